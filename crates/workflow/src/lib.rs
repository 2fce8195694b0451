//! Durable orchestration engine with step-log replay.
//!
//! An orchestration is a deterministic async program. Every side effect it
//! performs goes through an [`OrchestrationContext`] and is recorded in the
//! instance's history, so a restarted process can re-run the program from
//! the top and get the same answers without repeating completed work.
//!
//! - **Replay**: recorded activity results, timers, status changes, and
//!   markers are returned from history; divergence is a `NonDeterminism`
//!   error.
//! - **Retries**: transient activity errors are retried with exponential
//!   backoff; business failures are not.
//! - **Durable timers**: a timer's deadline is recorded once and survives
//!   restarts.
//! - **Instance locking**: at most one live instance per entity and
//!   operation, via deterministic instance ids.
//!
//! # Example
//!
//! ```ignore
//! use cgn_workflow::{
//!     ActivityRegistry, EngineConfig, InMemoryInstanceStore, OrchestrationRegistry,
//!     WorkflowEngine,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let engine = WorkflowEngine::new(
//!         Arc::new(InMemoryInstanceStore::new()),
//!         ActivityRegistry::new().with(Arc::new(MyActivity)),
//!         OrchestrationRegistry::new().with(Arc::new(MyProgram)),
//!         EngineConfig::default(),
//!     );
//!
//!     engine.start("MyProgram", "E1-OP-DONE", serde_json::json!({})).await?;
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod activity;
pub mod clock;
pub mod context;
pub mod engine;
pub mod error;
pub mod identity;
pub mod idempotent;
pub mod invoker;
pub mod lock;
pub mod orchestration;
pub mod retry;
pub mod storage;
pub mod surreal;
pub mod timer;
pub mod types;

// Re-export main types
pub use activity::{
    decode_input as decode_activity_input, encode_output, Activity, ActivityContext,
    ActivityError, ActivityRegistry, FnActivity,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use context::OrchestrationContext;
pub use engine::{EngineConfig, WorkflowEngine};
pub use error::{Error, Result};
pub use identity::{make_instance_id, InstanceIdentity};
pub use lock::{LockCheckResult, LockManager};
pub use orchestration::{decode_input, Orchestration, OrchestrationRegistry};
pub use retry::{RetryPolicy, RetryState};
pub use storage::{InMemoryInstanceStore, InstanceStore};
pub use surreal::{SurrealInstanceStore, SurrealStoreConfig};
pub use types::{
    ActivityResult, CustomStatus, History, HistoryEvent, InstanceOutcome, RuntimeStatus,
    WorkflowInstance,
};
