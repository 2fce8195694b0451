//! Card lifecycle programs on top of the workflow engine.
//!
//! - **Activities**: status writes, expiration records, partner calls,
//!   notifications, and data deletion, each idempotent under retry.
//! - **Orchestrations**: `UpdateCgn` (activation, revocation, expiration),
//!   `UpdateEyca` (dependent card), and `DeleteCard`.
//! - **Service**: lock-checked start triggers and the status query used by
//!   the HTTP layer and the expiration scanner.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod activities;
pub mod eligibility;
pub mod error;
pub mod input;
pub mod orchestrations;
pub mod service;
pub mod settings;
pub mod status;

pub use activities::{activity_registry, Collaborators, DependentQueue};
pub use error::{Error, Result};
pub use input::CgnTransition;
pub use orchestrations::{Delays, DeleteCard, UpdateCgn, UpdateEyca, ERROR_NOTIFIED_MARKER};
pub use service::{LifecycleService, LifecycleServiceBuilder, StartOutcome};
pub use settings::{engine_config, retry_policy, LifecycleSettings};
pub use status::{ActivationDetail, ActivationStatus};
