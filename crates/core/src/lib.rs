//! Core types, collaborator interfaces, and configuration for CGN.
//!
//! This crate owns everything the workflow layer treats as an external
//! collaborator:
//!
//! - **Cards**: the versioned card record and its linear status machine.
//! - **Stores**: card store, expiration store, backup store.
//! - **Partner API**: the EYCA partner client with transient/permanent
//!   error classification.
//! - **Notifications**: the notification client and message content.
//! - **Configuration**: TOML + environment configuration for the service.
//!
//! Every store trait ships with an in-memory implementation used by tests
//! and single-process runs, and a SurrealDB implementation for durable
//! deployments.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod backup;
pub mod card;
pub mod config;
pub mod error;
pub mod expiration;
pub mod notify;
pub mod partner;
pub mod result;
pub mod store;
pub mod surreal;

pub use backup::{BackupReceipt, BackupStore, InMemoryBackupStore};
pub use card::{Card, CardKind, CardStatus, StatusTag};
pub use config::{load_config, Config, EngineSettings, RetrySettings, ServerConfig, StorageConfig};
pub use error::{Error, Result};
pub use expiration::{ExpirationRecord, ExpirationStore, InMemoryExpirationStore};
pub use notify::{Notification, NotificationContent, Notifier, RecordingNotifier};
pub use partner::{PartnerApi, PartnerError, ScriptedPartnerApi};
pub use result::ResultExt;
pub use store::{CardStore, InMemoryCardStore};
pub use surreal::{SurrealBackupStore, SurrealCardStore, SurrealExpirationStore};
