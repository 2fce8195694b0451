//! Activity invocation with retries.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::activity::{ActivityContext, ActivityError, ActivityRegistry};
use crate::error::{Error, Result};
use crate::idempotent::step_key;
use crate::retry::RetryPolicy;
use crate::types::ActivityResult;

/// Result of one step invocation, after retries.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub result: ActivityResult,
    pub attempts: u32,
}

/// Runs registered activities under a retry policy.
///
/// Business failures come back as `ActivityResult::Failure`. Only
/// programming errors (unknown step, malformed input) are `Err`.
#[derive(Clone)]
pub struct ActivityInvoker {
    registry: Arc<ActivityRegistry>,
}

impl ActivityInvoker {
    pub fn new(registry: ActivityRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub fn has(&self, step: &str) -> bool {
        self.registry.has(step)
    }

    /// Invoke `step` for the given instance step.
    ///
    /// # Errors
    ///
    /// - `ActivityNotFound` if no activity is registered under `step`
    /// - `Decode` if the activity rejected its input schema
    /// - `Serialization` if the idempotency key cannot be derived
    pub async fn invoke(
        &self,
        instance_id: &str,
        seq: u64,
        step: &str,
        input: &Value,
        policy: &RetryPolicy,
    ) -> Result<Invocation> {
        let activity = self
            .registry
            .get(step)
            .ok_or_else(|| Error::activity_not_found(step))?;
        let idempotency_key = step_key(instance_id, seq, step, input)?;
        let mut state = policy.state();

        loop {
            let attempt = state.begin_attempt();
            let ctx = ActivityContext {
                instance_id: instance_id.to_string(),
                step: step.to_string(),
                seq,
                attempt,
                idempotency_key,
            };

            debug!(instance_id, step, seq, attempt, "Invoking activity");

            match activity.execute(&ctx, input.clone()).await {
                Ok(value) => {
                    return Ok(Invocation {
                        result: ActivityResult::success(value),
                        attempts: attempt,
                    })
                }
                Err(ActivityError::InvalidInput(reason)) => {
                    return Err(Error::decode(step, reason));
                }
                Err(ActivityError::Permanent(reason)) => {
                    warn!(instance_id, step, attempt, reason = %reason, "Activity failed permanently");
                    return Ok(Invocation {
                        result: ActivityResult::failure(reason),
                        attempts: attempt,
                    });
                }
                Err(ActivityError::Transient(reason)) => match state.next_delay() {
                    Some(delay) => {
                        warn!(
                            instance_id,
                            step,
                            attempt,
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            reason = %reason,
                            "Activity attempt failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        warn!(instance_id, step, attempt, reason = %reason, "Activity retries exhausted");
                        return Ok(Invocation {
                            result: ActivityResult::failure(format!(
                                "{reason} (after {attempt} attempts)"
                            )),
                            attempts: attempt,
                        });
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::activity::FnActivity;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting(name: &str, fail_first: u32, error: ActivityError) -> (ActivityInvoker, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let activity = FnActivity::new(name, move |_ctx: ActivityContext, input: Value| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            let error = error.clone();
            async move {
                if n <= fail_first {
                    Err(error)
                } else {
                    Ok(input)
                }
            }
        });
        let invoker = ActivityInvoker::new(ActivityRegistry::new().with(Arc::new(activity)));
        (invoker, calls)
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let (invoker, calls) = counting("Flaky", 2, ActivityError::transient("503"));
        let policy = RetryPolicy::new(1, 1.0, 5);

        let invocation = invoker.invoke("i", 0, "Flaky", &json!(7), &policy).await.unwrap();

        assert_eq!(invocation.result, ActivityResult::success(json!(7)));
        assert_eq!(invocation.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let (invoker, calls) = counting("Down", u32::MAX, ActivityError::transient("503"));
        let policy = RetryPolicy::new(1, 1.0, 4);

        let invocation = invoker.invoke("i", 0, "Down", &json!(null), &policy).await.unwrap();

        assert!(!invocation.result.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let (invoker, calls) = counting("Refuse", u32::MAX, ActivityError::permanent("already revoked"));
        let policy = RetryPolicy::new(1, 1.0, 5);

        let invocation = invoker.invoke("i", 0, "Refuse", &json!(null), &policy).await.unwrap();

        assert_eq!(invocation.result, ActivityResult::failure("already revoked"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_input_is_a_decode_error() {
        let (invoker, _) = counting("Strict", u32::MAX, ActivityError::InvalidInput("missing holder_id".into()));
        let result = invoker
            .invoke("i", 0, "Strict", &json!({}), &RetryPolicy::default())
            .await;
        assert!(matches!(result, Err(Error::Decode { .. })));
    }

    #[tokio::test]
    async fn test_unknown_activity() {
        let invoker = ActivityInvoker::new(ActivityRegistry::new());
        let result = invoker
            .invoke("i", 0, "Missing", &json!({}), &RetryPolicy::default())
            .await;
        assert!(matches!(result, Err(Error::ActivityNotFound { .. })));
    }

    #[tokio::test]
    async fn test_attempts_share_one_idempotency_key() {
        let keys = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let seen = Arc::clone(&keys);
        let activity = FnActivity::new("Keyed", move |ctx: ActivityContext, _input: Value| {
            let seen = Arc::clone(&seen);
            async move {
                let mut seen = seen.lock().await;
                seen.push(ctx.idempotency_key);
                if seen.len() < 3 {
                    Err(ActivityError::transient("retry me"))
                } else {
                    Ok(json!(null))
                }
            }
        });
        let invoker = ActivityInvoker::new(ActivityRegistry::new().with(Arc::new(activity)));

        invoker
            .invoke("i", 4, "Keyed", &json!({"a": 1}), &RetryPolicy::new(1, 1.0, 5))
            .await
            .unwrap();

        let keys = keys.lock().await;
        assert_eq!(keys.len(), 3);
        assert!(keys.iter().all(|k| *k == keys[0]));
    }
}
