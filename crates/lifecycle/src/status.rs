//! Holder-facing view of a transition.

use cgn_core::{Card, StatusTag};
use cgn_workflow::{CustomStatus, RuntimeStatus, WorkflowInstance};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivationStatus {
    Pending,
    Running,
    Completed,
    Error,
}

impl ActivationStatus {
    /// Status reported for an instance.
    ///
    /// The custom status wins over the runtime status: once the card is
    /// written the instance reads as completed, even if a later step failed
    /// or it was terminated while waiting on its notification.
    pub const fn of_instance(instance: &WorkflowInstance) -> Self {
        match (instance.custom_status, instance.runtime_status) {
            (CustomStatus::Error, _) => Self::Error,
            (CustomStatus::Updated | CustomStatus::Completed, _) => Self::Completed,
            (_, RuntimeStatus::Failed | RuntimeStatus::Terminated) => Self::Error,
            (_, RuntimeStatus::Completed) => Self::Completed,
            (_, RuntimeStatus::Pending) => Self::Pending,
            (_, RuntimeStatus::Running) => Self::Running,
        }
    }

    /// Status reported when no instance is known.
    pub const fn of_card(card: &Card) -> Self {
        match card.status.tag() {
            StatusTag::Activated => Self::Completed,
            StatusTag::Pending | StatusTag::Expired | StatusTag::Revoked => Self::Pending,
        }
    }
}

/// Answer to a status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationDetail {
    pub status: ActivationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl ActivationDetail {
    pub fn from_instance(instance: &WorkflowInstance) -> Self {
        Self {
            status: ActivationStatus::of_instance(instance),
            instance_id: Some(instance.id.clone()),
            created_at: instance.created_at,
            last_updated_at: instance.last_updated_at,
        }
    }

    pub fn from_card(card: &Card) -> Self {
        Self {
            status: ActivationStatus::of_card(card),
            instance_id: None,
            created_at: card.updated_at,
            last_updated_at: card.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use cgn_core::CardKind;
    use cgn_workflow::InstanceOutcome;
    use serde_json::json;

    fn instance() -> WorkflowInstance {
        WorkflowInstance::new("E1-UPDCGN-ACTIVATED", "UpdateCgn", json!({}), Utc::now())
    }

    #[test]
    fn test_fresh_instance_is_pending() {
        assert_eq!(ActivationStatus::of_instance(&instance()), ActivationStatus::Pending);
    }

    #[test]
    fn test_running_instance() {
        let mut running = instance();
        running.mark_running(Utc::now());
        assert_eq!(ActivationStatus::of_instance(&running), ActivationStatus::Running);
    }

    #[test]
    fn test_updated_reads_as_completed() {
        let mut updated = instance();
        updated.mark_running(Utc::now());
        updated.custom_status = CustomStatus::Updated;
        assert_eq!(ActivationStatus::of_instance(&updated), ActivationStatus::Completed);
    }

    #[test]
    fn test_failed_reads_as_error() {
        let mut failed = instance();
        failed.mark_running(Utc::now());
        failed.finish(InstanceOutcome::Failed("boom".into()), Utc::now());
        assert_eq!(ActivationStatus::of_instance(&failed), ActivationStatus::Error);
    }

    #[test]
    fn test_failure_after_update_reads_as_completed() {
        let mut late = instance();
        late.mark_running(Utc::now());
        late.append(vec![], Some(CustomStatus::Updated), Utc::now()).unwrap();
        late.finish(InstanceOutcome::Failed("late".into()), Utc::now());

        assert_eq!(late.custom_status, CustomStatus::Updated);
        assert_eq!(late.runtime_status, RuntimeStatus::Failed);
        assert_eq!(ActivationStatus::of_instance(&late), ActivationStatus::Completed);
    }

    #[test]
    fn test_terminated_after_update_reads_as_completed() {
        let mut stopped = instance();
        stopped.mark_running(Utc::now());
        stopped.append(vec![], Some(CustomStatus::Updated), Utc::now()).unwrap();
        stopped.finish(InstanceOutcome::Terminated("query".into()), Utc::now());
        assert_eq!(ActivationStatus::of_instance(&stopped), ActivationStatus::Completed);
    }

    #[test]
    fn test_terminated_before_update_reads_as_error() {
        let mut stopped = instance();
        stopped.mark_running(Utc::now());
        stopped.finish(InstanceOutcome::Terminated("query".into()), Utc::now());
        assert_eq!(ActivationStatus::of_instance(&stopped), ActivationStatus::Error);
    }

    #[test]
    fn test_card_fallback() {
        let card = Card::pending(CardKind::Cgn, "E1", Utc::now());
        let detail = ActivationDetail::from_card(&card);
        assert_eq!(detail.status, ActivationStatus::Pending);
        assert_eq!(detail.instance_id, None);
    }
}
