//! EYCA partner API client interface.
//!
//! The partner is reached over HTTP in production. Responses are classified
//! as transient (retry) or permanent (abort) so the activity layer can apply
//! its retry policy.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;

/// Partner call failure, already classified.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PartnerError {
    /// Timeout, throttling, or 5xx. Worth retrying.
    #[error("transient partner error{}: {message}", status_suffix(.status))]
    Transient {
        status: Option<u16>,
        message: String,
    },
    /// The partner refused the operation. Retrying cannot help.
    #[error("permanent partner error{}: {message}", status_suffix(.status))]
    Permanent {
        status: Option<u16>,
        message: String,
    },
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({s})")).unwrap_or_default()
}

impl PartnerError {
    /// Classify an HTTP status code.
    ///
    /// 408, 429 and every 5xx are transient; anything else is permanent.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            408 | 429 | 500..=599 => Self::Transient {
                status: Some(status),
                message,
            },
            _ => Self::Permanent {
                status: Some(status),
                message,
            },
        }
    }

    /// Network-level failure with no response.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Transient {
            status: None,
            message: message.into(),
        }
    }

    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Partner API client.
#[async_trait]
pub trait PartnerApi: Send + Sync {
    /// Invoke a named partner operation.
    async fn call(&self, operation: &str, payload: &Value) -> Result<Value, PartnerError>;
}

/// Partner API that replays a script of responses, then a fallback.
///
/// Counts every call so tests can assert on retry behaviour.
#[derive(Debug)]
pub struct ScriptedPartnerApi {
    script: Mutex<VecDeque<Result<Value, PartnerError>>>,
    fallback: Result<Value, PartnerError>,
    calls: AtomicU32,
}

impl ScriptedPartnerApi {
    /// A partner that always answers `fallback` once the script runs out.
    pub fn new(fallback: Result<Value, PartnerError>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            calls: AtomicU32::new(0),
        }
    }

    /// A partner that always succeeds with `value`.
    pub fn always_ok(value: Value) -> Self {
        Self::new(Ok(value))
    }

    /// Queue scripted responses ahead of the fallback.
    #[must_use]
    pub fn with_script(self, responses: impl IntoIterator<Item = Result<Value, PartnerError>>) -> Self {
        Self {
            script: Mutex::new(responses.into_iter().collect()),
            ..self
        }
    }

    /// Total calls received.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PartnerApi for ScriptedPartnerApi {
    async fn call(&self, operation: &str, _payload: &Value) -> Result<Value, PartnerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        tracing::debug!(operation, call, "Partner API call");
        let scripted = self.script.lock().await.pop_front();
        scripted.unwrap_or_else(|| self.fallback.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(PartnerError::from_status(500, "boom").is_transient());
        assert!(PartnerError::from_status(503, "down").is_transient());
        assert!(PartnerError::from_status(429, "slow down").is_transient());
        assert!(!PartnerError::from_status(400, "bad").is_transient());
        assert!(!PartnerError::from_status(409, "already issued").is_transient());
        assert!(PartnerError::network("connection reset").is_transient());
    }

    #[test]
    fn test_display_includes_status() {
        let err = PartnerError::from_status(502, "bad gateway");
        assert_eq!(err.to_string(), "transient partner error (502): bad gateway");
    }

    #[tokio::test]
    async fn test_script_then_fallback() {
        let api = ScriptedPartnerApi::always_ok(serde_json::json!({"ok": true}))
            .with_script([Err(PartnerError::from_status(500, "boom"))]);

        let first = api.call("preissue", &Value::Null).await;
        let second = api.call("preissue", &Value::Null).await;

        assert!(first.is_err());
        assert!(second.is_ok());
        assert_eq!(api.calls(), 2);
    }
}
