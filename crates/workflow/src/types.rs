//! Core types for the orchestration engine.

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Host-level runtime status of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuntimeStatus {
    /// Created, not yet picked up by the engine.
    Pending,
    /// Program is executing or waiting on a timer.
    Running,
    /// Program returned successfully.
    Completed,
    /// Program returned an error.
    Failed,
    /// Stopped by a termination request.
    Terminated,
}

impl RuntimeStatus {
    /// Check if the instance is in a terminal state.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Terminated)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Terminated => "Terminated",
        }
    }
}

impl std::fmt::Display for RuntimeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse business-visible progress marker.
///
/// Moves only forward: `RUNNING → UPDATED → COMPLETED` or `RUNNING → ERROR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CustomStatus {
    Running,
    Updated,
    Error,
    Completed,
}

impl CustomStatus {
    /// Check if the status can move to `target`.
    pub const fn can_advance_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Running, Self::Updated)
                | (Self::Running, Self::Error)
                | (Self::Updated, Self::Completed)
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Updated => "UPDATED",
            Self::Error => "ERROR",
            Self::Completed => "COMPLETED",
        }
    }
}

impl std::fmt::Display for CustomStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniform activity result shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityResult {
    Success { value: Value },
    Failure { reason: String },
}

impl ActivityResult {
    pub fn success(value: Value) -> Self {
        Self::Success { value }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Failure {
            reason: reason.into(),
        }
    }

    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Event recorded in an instance's history.
///
/// Every step event carries the `seq` of the context operation that produced
/// it. A timer owns two events at the same `seq`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HistoryEvent {
    /// An activity call finished, successfully or not.
    ActivityCompleted {
        seq: u64,
        name: String,
        input: Value,
        result: ActivityResult,
        attempts: u32,
        recorded_at: DateTime<Utc>,
    },
    /// A durable timer was scheduled.
    TimerCreated {
        seq: u64,
        fire_at: DateTime<Utc>,
        recorded_at: DateTime<Utc>,
    },
    /// A durable timer elapsed.
    TimerFired {
        seq: u64,
        recorded_at: DateTime<Utc>,
    },
    /// The program published a new custom status.
    CustomStatusSet {
        seq: u64,
        status: CustomStatus,
        recorded_at: DateTime<Utc>,
    },
    /// The program recorded a named fact.
    MarkerRecorded {
        seq: u64,
        name: String,
        recorded_at: DateTime<Utc>,
    },
}

impl HistoryEvent {
    /// Step number of this event.
    pub const fn seq(&self) -> u64 {
        match self {
            Self::ActivityCompleted { seq, .. }
            | Self::TimerCreated { seq, .. }
            | Self::TimerFired { seq, .. }
            | Self::CustomStatusSet { seq, .. }
            | Self::MarkerRecorded { seq, .. } => *seq,
        }
    }

    /// Short description used in non-determinism errors.
    pub fn describe(&self) -> String {
        match self {
            Self::ActivityCompleted { name, .. } => format!("activity '{name}'"),
            Self::TimerCreated { .. } | Self::TimerFired { .. } => "timer".to_string(),
            Self::CustomStatusSet { status, .. } => format!("custom status {status}"),
            Self::MarkerRecorded { name, .. } => format!("marker '{name}'"),
        }
    }

    pub fn recorded_at(&self) -> DateTime<Utc> {
        match self {
            Self::ActivityCompleted { recorded_at, .. }
            | Self::TimerCreated { recorded_at, .. }
            | Self::TimerFired { recorded_at, .. }
            | Self::CustomStatusSet { recorded_at, .. }
            | Self::MarkerRecorded { recorded_at, .. } => *recorded_at,
        }
    }
}

/// Append-only history of an instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    events: Vec<HistoryEvent>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, event: HistoryEvent) {
        self.events.push(event);
    }

    pub fn entries(&self) -> &[HistoryEvent] {
        &self.events
    }

    /// Events recorded for one step.
    ///
    /// Steps are appended in `seq` order, so the lookup is a binary search.
    pub fn at(&self, seq: u64) -> &[HistoryEvent] {
        let start = self.events.partition_point(|e| e.seq() < seq);
        let end = self.events.partition_point(|e| e.seq() <= seq);
        self.events.get(start..end).unwrap_or_default()
    }

    /// Names of the activities recorded, in order.
    pub fn activity_names(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|e| match e {
                HistoryEvent::ActivityCompleted { name, .. } => Some(name.as_str()),
                _ => None,
            })
            .collect_vec()
    }

    /// Number of markers recorded under `name`.
    pub fn marker_count(&self, name: &str) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, HistoryEvent::MarkerRecorded { name: n, .. } if n == name))
            .count()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// How an instance ended.
#[derive(Debug, Clone, PartialEq)]
pub enum InstanceOutcome {
    Completed(Value),
    Failed(String),
    Terminated(String),
}

/// One durable run of an orchestration.
///
/// Only the engine mutates an instance, and only through the transition
/// methods below. Stores persist the whole aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: String,
    pub name: String,
    pub input: Value,
    pub history: History,
    pub custom_status: CustomStatus,
    pub runtime_status: RuntimeStatus,
    #[serde(default)]
    pub terminate_requested: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl WorkflowInstance {
    /// Create a pending instance with empty history.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        input: Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
            history: History::new(),
            custom_status: CustomStatus::Running,
            runtime_status: RuntimeStatus::Pending,
            terminate_requested: false,
            output: None,
            failure: None,
            created_at: now,
            last_updated_at: now,
        }
    }

    pub const fn is_terminal(&self) -> bool {
        self.runtime_status.is_terminal()
    }

    /// Move a pending or resumed instance to `Running`.
    pub fn mark_running(&mut self, now: DateTime<Utc>) {
        if !self.is_terminal() {
            self.runtime_status = RuntimeStatus::Running;
            self.last_updated_at = now;
        }
    }

    /// Append step events and, optionally, a new custom status.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStatusTransition` if the custom status would move
    /// backward, or `Terminated` if the instance already finished.
    pub fn append(
        &mut self,
        events: Vec<HistoryEvent>,
        custom_status: Option<CustomStatus>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.is_terminal() {
            return Err(Error::terminated(&self.id));
        }
        if let Some(status) = custom_status {
            if status != self.custom_status && !self.custom_status.can_advance_to(status) {
                return Err(Error::invalid_status_transition(self.custom_status, status));
            }
            self.custom_status = status;
        }
        events.into_iter().for_each(|e| self.history.append(e));
        self.last_updated_at = now;
        Ok(())
    }

    /// Record the terminal outcome.
    ///
    /// A failed instance publishes `ERROR` when its custom status still
    /// allows it. A terminated instance keeps its custom status.
    pub fn finish(&mut self, outcome: InstanceOutcome, now: DateTime<Utc>) {
        match outcome {
            InstanceOutcome::Completed(output) => {
                self.runtime_status = RuntimeStatus::Completed;
                self.output = Some(output);
            }
            InstanceOutcome::Failed(reason) => {
                self.runtime_status = RuntimeStatus::Failed;
                if self.custom_status.can_advance_to(CustomStatus::Error) {
                    self.custom_status = CustomStatus::Error;
                }
                self.failure = Some(reason);
            }
            InstanceOutcome::Terminated(reason) => {
                self.runtime_status = RuntimeStatus::Terminated;
                self.failure = Some(reason);
            }
        }
        self.last_updated_at = now;
    }

    /// Flag the instance for termination. Returns false if it already finished.
    pub fn request_termination(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.terminate_requested = true;
        self.last_updated_at = now;
        true
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use serde_json::json;

    fn instance() -> WorkflowInstance {
        WorkflowInstance::new("E1-UPDCGN-ACTIVATED", "UpdateCgn", json!({}), Utc::now())
    }

    fn status_event(seq: u64, status: CustomStatus) -> HistoryEvent {
        HistoryEvent::CustomStatusSet {
            seq,
            status,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_custom_status_moves_forward_only() {
        assert!(CustomStatus::Running.can_advance_to(CustomStatus::Updated));
        assert!(CustomStatus::Updated.can_advance_to(CustomStatus::Completed));
        assert!(CustomStatus::Running.can_advance_to(CustomStatus::Error));
        assert!(!CustomStatus::Completed.can_advance_to(CustomStatus::Running));
        assert!(!CustomStatus::Updated.can_advance_to(CustomStatus::Error));
        assert!(!CustomStatus::Running.can_advance_to(CustomStatus::Completed));
    }

    #[test]
    fn test_activity_result_wire_shape() {
        let ok = serde_json::to_value(ActivityResult::success(json!(1))).unwrap();
        assert_eq!(ok, json!({"kind": "SUCCESS", "value": 1}));

        let failed = serde_json::to_value(ActivityResult::failure("already revoked")).unwrap();
        assert_eq!(failed, json!({"kind": "FAILURE", "reason": "already revoked"}));
    }

    #[test]
    fn test_append_rejects_backward_status() {
        let mut instance = instance();
        instance
            .append(vec![status_event(0, CustomStatus::Updated)], Some(CustomStatus::Updated), Utc::now())
            .unwrap();
        let result = instance.append(
            vec![status_event(1, CustomStatus::Running)],
            Some(CustomStatus::Running),
            Utc::now(),
        );
        assert!(matches!(result, Err(Error::InvalidStatusTransition { .. })));
        assert_eq!(instance.history.len(), 1);
    }

    #[test]
    fn test_failed_instance_publishes_error() {
        let mut instance = instance();
        instance.finish(InstanceOutcome::Failed("boom".into()), Utc::now());
        assert_eq!(instance.custom_status, CustomStatus::Error);
        assert_eq!(instance.runtime_status, RuntimeStatus::Failed);
    }

    #[test]
    fn test_failure_after_update_keeps_status() {
        let mut instance = instance();
        instance
            .append(vec![], Some(CustomStatus::Updated), Utc::now())
            .unwrap();
        instance.finish(InstanceOutcome::Failed("late".into()), Utc::now());
        assert_eq!(instance.custom_status, CustomStatus::Updated);
    }

    #[test]
    fn test_termination_request_on_finished_instance() {
        let mut instance = instance();
        assert!(instance.request_termination(Utc::now()));
        instance.finish(InstanceOutcome::Terminated("stop".into()), Utc::now());
        assert!(!instance.request_termination(Utc::now()));
    }

    #[test]
    fn test_history_lookup_by_seq() {
        let mut history = History::new();
        let now = Utc::now();
        history.append(HistoryEvent::TimerCreated {
            seq: 2,
            fire_at: now,
            recorded_at: now,
        });
        history.append(HistoryEvent::TimerFired {
            seq: 2,
            recorded_at: now,
        });
        history.append(status_event(3, CustomStatus::Updated));

        assert_eq!(history.at(2).len(), 2);
        assert_eq!(history.at(3).len(), 1);
        assert!(history.at(0).is_empty());
        assert!(history.at(4).is_empty());
    }

    #[test]
    fn test_history_lookup_in_long_log() {
        let mut history = History::new();
        let now = Utc::now();
        for seq in 0..1_000 {
            history.append(HistoryEvent::MarkerRecorded {
                seq,
                name: format!("m{seq}"),
                recorded_at: now,
            });
        }

        let found = history.at(637);
        assert_eq!(found.len(), 1);
        assert!(matches!(&found[0], HistoryEvent::MarkerRecorded { name, .. } if name == "m637"));
        assert!(history.at(1_000).is_empty());
    }
}
