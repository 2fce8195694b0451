//! Orchestration inputs and activity payloads.
//!
//! Everything an orchestration decides on is in its input. Values that
//! depend on "now" (dates, eligibility, whether to notify) are computed once
//! at trigger time so replays see the same numbers.

use cgn_core::{CardKind, ExpirationRecord, NotificationContent, StatusTag};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Operation tag of main-card transitions.
pub const UPDATE_CGN_OPERATION: &str = "UPDCGN";
/// Operation tag of dependent-card transitions.
pub const EYCA_OPERATION: &str = "EYCA";
/// Operation tag of data deletion.
pub const DELETE_OPERATION: &str = "DELETE";
/// Target status of data deletion.
pub const DELETED_STATUS: &str = "DELETED";

/// Requested main-card transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CgnTransition {
    Activated {
        activation_date: NaiveDate,
        expiration_date: NaiveDate,
        eyca_eligible: bool,
        requested_at: DateTime<Utc>,
    },
    Revoked {
        revocation_date: NaiveDate,
        reason: String,
    },
    Expired,
}

impl CgnTransition {
    pub const fn target(&self) -> StatusTag {
        match self {
            Self::Activated { .. } => StatusTag::Activated,
            Self::Revoked { .. } => StatusTag::Revoked,
            Self::Expired => StatusTag::Expired,
        }
    }

    /// The status change to write, for a card with no EYCA number.
    pub fn change(&self) -> StatusChange {
        match self {
            Self::Activated {
                activation_date,
                expiration_date,
                ..
            } => StatusChange::Activate {
                activation_date: *activation_date,
                expiration_date: *expiration_date,
                card_number: None,
            },
            Self::Revoked {
                revocation_date,
                reason,
            } => StatusChange::Revoke {
                revocation_date: *revocation_date,
                reason: reason.clone(),
            },
            Self::Expired => StatusChange::Expire,
        }
    }

    /// What the holder is told once the transition is in place.
    pub fn notification(&self) -> NotificationContent {
        match self {
            Self::Activated { .. } => NotificationContent::CardActivated,
            Self::Revoked { reason, .. } => NotificationContent::CardRevoked {
                reason: reason.clone(),
            },
            Self::Expired => NotificationContent::CardExpired,
        }
    }
}

/// Input of the main-card orchestration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCgnInput {
    pub holder_id: String,
    pub transition: CgnTransition,
    /// Whether the target status is notifiable.
    pub notify: bool,
}

/// Input of the dependent-card orchestration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EycaActivationInput {
    pub holder_id: String,
    pub activation_date: NaiveDate,
    pub expiration_date: NaiveDate,
}

/// Input of the data deletion orchestration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletionInput {
    pub holder_id: String,
    /// Snapshot of the holder's records taken at trigger time.
    pub records: Vec<Value>,
}

/// Status change applied by `UpdateStatus`.
///
/// Revocation and expiration keep the dates of the activated card, so the
/// activity reads them from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusChange {
    Activate {
        activation_date: NaiveDate,
        expiration_date: NaiveDate,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        card_number: Option<String>,
    },
    Revoke {
        revocation_date: NaiveDate,
        reason: String,
    },
    Expire,
}

impl StatusChange {
    pub const fn target(&self) -> StatusTag {
        match self {
            Self::Activate { .. } => StatusTag::Activated,
            Self::Revoke { .. } => StatusTag::Revoked,
            Self::Expire => StatusTag::Expired,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateStatusInput {
    pub holder_id: String,
    pub kind: CardKind,
    pub change: StatusChange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolderInput {
    pub holder_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkPendingInput {
    pub holder_id: String,
    pub requested_at: DateTime<Utc>,
}

pub type StoreExpirationInput = ExpirationRecord;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendNotificationInput {
    pub holder_id: String,
    pub content: NotificationContent,
    pub check_recipient_exists: bool,
}

/// Whether a notification went out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub delivered: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartnerCallInput {
    pub operation: String,
    pub payload: Value,
}

/// Partner answer to a pre-issue call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreissueResponse {
    pub card_number: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupAndDeleteInput {
    pub holder_id: String,
    pub records: Vec<Value>,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use serde_json::json;

    #[test]
    fn test_transition_wire_shape() {
        let input = UpdateCgnInput {
            holder_id: "E1".into(),
            transition: CgnTransition::Revoked {
                revocation_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
                reason: "fraud".into(),
            },
            notify: true,
        };
        let json = serde_json::to_value(&input).unwrap();
        assert_eq!(json["transition"]["status"], "REVOKED");
        assert_eq!(json["transition"]["reason"], "fraud");
    }

    #[test]
    fn test_change_matches_target() {
        assert_eq!(CgnTransition::Expired.change(), StatusChange::Expire);
        assert_eq!(CgnTransition::Expired.target(), StatusChange::Expire.target());
    }

    #[test]
    fn test_status_change_decode() {
        let change: StatusChange = serde_json::from_value(json!({
            "change": "ACTIVATE",
            "activation_date": "2024-01-10",
            "expiration_date": "2030-01-10"
        }))
        .unwrap();
        assert_eq!(change.target(), StatusTag::Activated);
    }
}
