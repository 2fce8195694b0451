//! Orchestration context: the only way a program touches the outside world.
//!
//! Every operation is a numbered step. On each (re)run the program starts
//! from the top and the context answers each step from history when it can:
//!
//! - a recorded activity returns its recorded result without invoking it
//! - a recorded timer reuses its deadline and waits only what is left
//! - a recorded status change or marker is skipped
//!
//! A recorded step of a different kind, name, or input is a
//! `NonDeterminism` error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::invoker::ActivityInvoker;
use crate::retry::RetryPolicy;
use crate::storage::InstanceStore;
use crate::timer;
use crate::types::{ActivityResult, CustomStatus, History, HistoryEvent};

/// Execution context for one run of one instance.
pub struct OrchestrationContext {
    instance_id: String,
    history: History,
    next_seq: u64,
    custom_status: CustomStatus,
    invoker: ActivityInvoker,
    store: Arc<dyn InstanceStore>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    terminate: Arc<AtomicBool>,
}

/// Recorded state of a timer step.
enum TimerRecord {
    Fresh,
    Scheduled(chrono::DateTime<chrono::Utc>),
    Fired,
}

impl OrchestrationContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        instance_id: String,
        history: History,
        custom_status: CustomStatus,
        invoker: ActivityInvoker,
        store: Arc<dyn InstanceStore>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
        terminate: Arc<AtomicBool>,
    ) -> Self {
        Self {
            instance_id,
            history,
            next_seq: 0,
            custom_status,
            invoker,
            store,
            clock,
            retry,
            terminate,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub const fn custom_status(&self) -> CustomStatus {
        self.custom_status
    }

    /// Whether the next step is answered from history.
    pub fn is_replaying(&self) -> bool {
        !self.history.at(self.next_seq).is_empty()
    }

    /// Default retry policy for activity calls.
    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Call an activity with the default retry policy.
    ///
    /// # Errors
    ///
    /// - `ActivityFailed` for a business failure or exhausted retries
    /// - `Decode` if the result does not match `O`
    /// - `NonDeterminism`, `Terminated`, or store errors
    pub async fn call_activity<I, O>(&mut self, step: &str, input: &I) -> Result<O>
    where
        I: Serialize + Sync,
        O: DeserializeOwned,
    {
        let policy = self.retry.clone();
        self.call_activity_with_retry(step, input, &policy).await
    }

    /// Call an activity with an explicit retry policy.
    ///
    /// # Errors
    ///
    /// Same as [`call_activity`](Self::call_activity).
    pub async fn call_activity_with_retry<I, O>(
        &mut self,
        step: &str,
        input: &I,
        policy: &RetryPolicy,
    ) -> Result<O>
    where
        I: Serialize + Sync,
        O: DeserializeOwned,
    {
        let input = serde_json::to_value(input).map_err(Error::serialization)?;
        let result = self.activity_step(step, input, policy).await?;
        decode_result(step, result)
    }

    async fn activity_step(
        &mut self,
        step: &str,
        input: Value,
        policy: &RetryPolicy,
    ) -> Result<ActivityResult> {
        self.ensure_live()?;
        let seq = self.take_seq();
        let requested = format!("activity '{step}'");

        let recorded = match self.history.at(seq).first() {
            Some(HistoryEvent::ActivityCompleted {
                name,
                input: recorded_input,
                result,
                ..
            }) if name == step => {
                if *recorded_input != input {
                    return Err(Error::non_determinism(
                        seq,
                        format!("activity '{name}' with input {recorded_input}"),
                        format!("{requested} with input {input}"),
                    ));
                }
                Some(result.clone())
            }
            Some(other) => return Err(Error::non_determinism(seq, other.describe(), requested)),
            None => None,
        };

        if let Some(result) = recorded {
            debug!(instance_id = %self.instance_id, seq, step, "Replayed activity result");
            return Ok(result);
        }

        let invocation = self
            .invoker
            .invoke(&self.instance_id, seq, step, &input, policy)
            .await?;

        self.record(
            HistoryEvent::ActivityCompleted {
                seq,
                name: step.to_string(),
                input,
                result: invocation.result.clone(),
                attempts: invocation.attempts,
                recorded_at: self.clock.now(),
            },
            None,
        )
        .await?;

        info!(
            instance_id = %self.instance_id,
            seq,
            step,
            attempts = invocation.attempts,
            success = invocation.result.is_success(),
            "Activity recorded"
        );
        Ok(invocation.result)
    }

    /// Wait durably for `delay`.
    ///
    /// The deadline is fixed the first time this step runs. No mid-wait
    /// cancellation: a termination request takes effect at the next step.
    ///
    /// # Errors
    ///
    /// `NonDeterminism`, `Terminated`, or store errors.
    pub async fn create_timer(&mut self, delay: Duration) -> Result<()> {
        self.ensure_live()?;
        let seq = self.take_seq();

        let mut record = TimerRecord::Fresh;
        for event in self.history.at(seq) {
            match event {
                HistoryEvent::TimerCreated { fire_at, .. } => {
                    if !matches!(record, TimerRecord::Fired) {
                        record = TimerRecord::Scheduled(*fire_at);
                    }
                }
                HistoryEvent::TimerFired { .. } => record = TimerRecord::Fired,
                other => return Err(Error::non_determinism(seq, other.describe(), "timer")),
            }
        }

        let deadline = match record {
            TimerRecord::Fired => return Ok(()),
            TimerRecord::Scheduled(deadline) => deadline,
            TimerRecord::Fresh => {
                let deadline = timer::deadline_after(self.clock.as_ref(), delay);
                self.record(
                    HistoryEvent::TimerCreated {
                        seq,
                        fire_at: deadline,
                        recorded_at: self.clock.now(),
                    },
                    None,
                )
                .await?;
                deadline
            }
        };

        debug!(instance_id = %self.instance_id, seq, fire_at = %deadline, "Waiting on timer");
        timer::wait_until(self.clock.as_ref(), deadline).await;

        self.record(
            HistoryEvent::TimerFired {
                seq,
                recorded_at: self.clock.now(),
            },
            None,
        )
        .await
    }

    /// Publish a new custom status.
    ///
    /// # Errors
    ///
    /// `InvalidStatusTransition` if the status would move backward, plus
    /// `NonDeterminism`, `Terminated`, or store errors.
    pub async fn set_custom_status(&mut self, status: CustomStatus) -> Result<()> {
        self.ensure_live()?;
        let seq = self.take_seq();
        let requested = format!("custom status {status}");

        match self.history.at(seq).first() {
            Some(HistoryEvent::CustomStatusSet { status: recorded, .. }) if *recorded == status => {
                self.custom_status = status;
                return Ok(());
            }
            Some(other) => return Err(Error::non_determinism(seq, other.describe(), requested)),
            None => {}
        }

        if status != self.custom_status && !self.custom_status.can_advance_to(status) {
            return Err(Error::invalid_status_transition(self.custom_status, status));
        }

        self.record(
            HistoryEvent::CustomStatusSet {
                seq,
                status,
                recorded_at: self.clock.now(),
            },
            Some(status),
        )
        .await?;
        self.custom_status = status;

        info!(instance_id = %self.instance_id, custom_status = %status, "Custom status set");
        Ok(())
    }

    /// Record a named fact in history.
    ///
    /// # Errors
    ///
    /// `NonDeterminism`, `Terminated`, or store errors.
    pub async fn record_marker(&mut self, name: &str) -> Result<()> {
        self.ensure_live()?;
        let seq = self.take_seq();
        let requested = format!("marker '{name}'");

        match self.history.at(seq).first() {
            Some(HistoryEvent::MarkerRecorded { name: recorded, .. }) if recorded == name => {
                return Ok(());
            }
            Some(other) => return Err(Error::non_determinism(seq, other.describe(), requested)),
            None => {}
        }

        self.record(
            HistoryEvent::MarkerRecorded {
                seq,
                name: name.to_string(),
                recorded_at: self.clock.now(),
            },
            None,
        )
        .await
    }

    fn ensure_live(&self) -> Result<()> {
        if self.terminate.load(Ordering::SeqCst) {
            return Err(Error::terminated(&self.instance_id));
        }
        Ok(())
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.saturating_add(1);
        seq
    }

    async fn record(&mut self, event: HistoryEvent, status: Option<CustomStatus>) -> Result<()> {
        self.store
            .append(&self.instance_id, vec![event.clone()], status, self.clock.now())
            .await?;
        self.history.append(event);
        Ok(())
    }
}

fn decode_result<O: DeserializeOwned>(step: &str, result: ActivityResult) -> Result<O> {
    match result {
        ActivityResult::Success { value } => {
            serde_json::from_value(value).map_err(|e| Error::decode(step, e))
        }
        ActivityResult::Failure { reason } => Err(Error::activity_failed(step, reason)),
    }
}
