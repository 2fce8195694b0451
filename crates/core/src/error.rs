//! Core error types for card storage, collaborators, and configuration.
//!
//! All errors are explicit, typed, and recoverable - no panics allowed.

use std::path::PathBuf;

use thiserror::Error;

use crate::card::StatusTag;

/// Core result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for card and collaborator operations.
#[derive(Debug, Error)]
pub enum Error {
    // Card store errors
    #[error("card '{holder_id}' ({kind}) not found")]
    CardNotFound { kind: String, holder_id: String },

    #[error("version conflict on card '{holder_id}': expected {expected}, found {found}")]
    VersionConflict {
        holder_id: String,
        expected: u64,
        found: u64,
    },

    #[error("invalid card transition from '{from}' to '{to}'")]
    InvalidTransition { from: StatusTag, to: StatusTag },

    #[error("store operation '{operation}' failed: {reason}")]
    StoreFailed { operation: String, reason: String },

    // Collaborator errors
    #[error("notification to '{holder_id}' failed: {reason}")]
    NotificationFailed { holder_id: String, reason: String },

    #[error("backup for '{holder_id}' failed: {reason}")]
    BackupFailed { holder_id: String, reason: String },

    // Configuration errors
    #[error("failed to read file '{path}': {reason}")]
    FileReadFailed { path: PathBuf, reason: String },

    #[error("TOML parse error: {reason}")]
    TomlParseFailed { reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create a card not found error.
    pub fn card_not_found(kind: impl std::fmt::Display, holder_id: impl Into<String>) -> Self {
        Self::CardNotFound {
            kind: kind.to_string(),
            holder_id: holder_id.into(),
        }
    }

    /// Create a version conflict error.
    pub fn version_conflict(holder_id: impl Into<String>, expected: u64, found: u64) -> Self {
        Self::VersionConflict {
            holder_id: holder_id.into(),
            expected,
            found,
        }
    }

    /// Create an invalid transition error.
    pub const fn invalid_transition(from: StatusTag, to: StatusTag) -> Self {
        Self::InvalidTransition { from, to }
    }

    /// Create a store failed error.
    pub fn store_failed(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StoreFailed {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a notification failed error.
    pub fn notification_failed(holder_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NotificationFailed {
            holder_id: holder_id.into(),
            reason: reason.into(),
        }
    }

    /// Create a backup failed error.
    pub fn backup_failed(holder_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BackupFailed {
            holder_id: holder_id.into(),
            reason: reason.into(),
        }
    }

    /// Create a file read error.
    pub fn file_read_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::FileReadFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether a retry of the same operation could succeed.
    ///
    /// Business refusals (invalid transitions, missing cards) never are.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::StoreFailed { .. }
                | Self::VersionConflict { .. }
                | Self::NotificationFailed { .. }
                | Self::BackupFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::invalid_transition(StatusTag::Revoked, StatusTag::Activated);
        assert_eq!(
            err.to_string(),
            "invalid card transition from 'REVOKED' to 'ACTIVATED'"
        );
    }

    #[test]
    fn test_is_transient() {
        assert!(Error::store_failed("update", "timeout").is_transient());
        assert!(Error::version_conflict("AAA", 1, 2).is_transient());
        assert!(!Error::card_not_found("CGN", "AAA").is_transient());
        assert!(!Error::invalid_transition(StatusTag::Expired, StatusTag::Revoked).is_transient());
    }
}
