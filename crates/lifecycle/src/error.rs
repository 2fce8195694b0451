//! Error types for the lifecycle service.

use cgn_core::StatusTag;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Workflow(#[from] cgn_workflow::Error),

    #[error(transparent)]
    Card(#[from] cgn_core::Error),

    #[error("no card found for holder '{holder_id}'")]
    NotFound { holder_id: String },

    /// The card already holds the requested status. Nothing was started.
    #[error("card of holder '{holder_id}' is already {status}")]
    AlreadyInStatus { holder_id: String, status: StatusTag },
}

impl Error {
    pub fn not_found(holder_id: impl Into<String>) -> Self {
        Self::NotFound {
            holder_id: holder_id.into(),
        }
    }

    pub fn already_in_status(holder_id: impl Into<String>, status: StatusTag) -> Self {
        Self::AlreadyInStatus {
            holder_id: holder_id.into(),
            status,
        }
    }
}
