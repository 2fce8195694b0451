//! Error types for the workflow crate.

use std::fmt;

/// Result type alias for workflow operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Workflow error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// An activity returned a business failure, or exhausted its retries.
    ActivityFailed {
        step: String,
        reason: String,
    },
    /// No activity registered under this name.
    ActivityNotFound {
        step: String,
    },
    /// Input or recorded result does not match the expected schema.
    Decode {
        step: String,
        reason: String,
    },
    /// The program asked for a different step than the one recorded.
    NonDeterminism {
        seq: u64,
        expected: String,
        found: String,
    },
    /// Custom status may only move forward.
    InvalidStatusTransition {
        from: String,
        to: String,
    },
    /// No orchestration registered under this name.
    OrchestrationNotFound {
        name: String,
    },
    /// A non-terminal instance already holds this id.
    InstanceAlreadyRunning {
        instance_id: String,
    },
    /// Instance not found.
    InstanceNotFound {
        instance_id: String,
    },
    /// The instance was terminated at a step boundary.
    Terminated {
        instance_id: String,
    },
    /// Storage operation failed.
    StorageFailed {
        operation: String,
        reason: String,
    },
    /// Serialization error.
    Serialization {
        reason: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ActivityFailed { step, reason } => {
                write!(f, "activity '{step}' failed: {reason}")
            }
            Self::ActivityNotFound { step } => {
                write!(f, "no activity registered for step '{step}'")
            }
            Self::Decode { step, reason } => {
                write!(f, "decode error at step '{step}': {reason}")
            }
            Self::NonDeterminism {
                seq,
                expected,
                found,
            } => {
                write!(
                    f,
                    "non-deterministic replay at seq {seq}: history has {expected}, program asked for {found}"
                )
            }
            Self::InvalidStatusTransition { from, to } => {
                write!(f, "custom status cannot move from '{from}' to '{to}'")
            }
            Self::OrchestrationNotFound { name } => {
                write!(f, "orchestration '{name}' not registered")
            }
            Self::InstanceAlreadyRunning { instance_id } => {
                write!(f, "instance '{instance_id}' is already running")
            }
            Self::InstanceNotFound { instance_id } => {
                write!(f, "instance '{instance_id}' not found")
            }
            Self::Terminated { instance_id } => {
                write!(f, "instance '{instance_id}' was terminated")
            }
            Self::StorageFailed { operation, reason } => {
                write!(f, "storage operation '{operation}' failed: {reason}")
            }
            Self::Serialization { reason } => {
                write!(f, "serialization error: {reason}")
            }
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    /// Create an activity failed error.
    pub fn activity_failed(step: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ActivityFailed {
            step: step.into(),
            reason: reason.into(),
        }
    }

    /// Create an activity not found error.
    pub fn activity_not_found(step: impl Into<String>) -> Self {
        Self::ActivityNotFound { step: step.into() }
    }

    /// Create a decode error.
    pub fn decode(step: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Decode {
            step: step.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a non-determinism error.
    pub fn non_determinism(seq: u64, expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::NonDeterminism {
            seq,
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Create an invalid custom status transition error.
    pub fn invalid_status_transition(from: impl fmt::Display, to: impl fmt::Display) -> Self {
        Self::InvalidStatusTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Create an orchestration not found error.
    pub fn orchestration_not_found(name: impl Into<String>) -> Self {
        Self::OrchestrationNotFound { name: name.into() }
    }

    /// Create an instance already running error.
    pub fn instance_already_running(instance_id: impl Into<String>) -> Self {
        Self::InstanceAlreadyRunning {
            instance_id: instance_id.into(),
        }
    }

    /// Create an instance not found error.
    pub fn instance_not_found(instance_id: impl Into<String>) -> Self {
        Self::InstanceNotFound {
            instance_id: instance_id.into(),
        }
    }

    /// Create a terminated error.
    pub fn terminated(instance_id: impl Into<String>) -> Self {
        Self::Terminated {
            instance_id: instance_id.into(),
        }
    }

    /// Create a storage failed error.
    pub fn storage_failed(operation: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::StorageFailed {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a serialization error.
    pub fn serialization(reason: impl fmt::Display) -> Self {
        Self::Serialization {
            reason: reason.to_string(),
        }
    }

    /// Whether the orchestration program should run its compensation path.
    ///
    /// Only business failures are compensated. Decode, replay, and lookup
    /// errors are programming errors and abort the instance directly.
    pub const fn is_compensable(&self) -> bool {
        matches!(self, Self::ActivityFailed { .. })
    }

    /// Whether the failure came from the host store rather than the program.
    ///
    /// Such an instance cannot record its own outcome and is left for resume.
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::StorageFailed { .. } | Self::Serialization { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::activity_failed("UpdateStatus", "already revoked");
        assert!(err.to_string().contains("UpdateStatus"));
        assert!(err.to_string().contains("already revoked"));
    }

    #[test]
    fn test_only_business_failures_are_compensable() {
        assert!(Error::activity_failed("UpdateStatus", "refused").is_compensable());
        assert!(!Error::decode("UpdateStatus", "missing field").is_compensable());
        assert!(!Error::non_determinism(3, "timer", "activity 'X'").is_compensable());
        assert!(!Error::activity_not_found("Nope").is_compensable());
    }

    #[test]
    fn test_storage_errors_are_flagged() {
        assert!(Error::storage_failed("append", "disk full").is_storage());
        assert!(!Error::terminated("id").is_storage());
    }
}
