//! Card record and its status machine.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Which card a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CardKind {
    /// The national benefit card.
    Cgn,
    /// The dependent European Youth Card, issued through the partner API.
    Eyca,
}

impl std::fmt::Display for CardKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Cgn => "CGN",
            Self::Eyca => "EYCA",
        };
        write!(f, "{s}")
    }
}

/// Status discriminant without payload.
///
/// Used for workflow identities, lock scans, and transition checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusTag {
    Pending,
    Activated,
    Expired,
    Revoked,
}

impl StatusTag {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 4] = [Self::Pending, Self::Activated, Self::Expired, Self::Revoked];

    /// Linear lifecycle: `PENDING → ACTIVATED → {EXPIRED, REVOKED}`.
    pub const fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Activated)
                | (Self::Activated, Self::Expired)
                | (Self::Activated, Self::Revoked)
        )
    }

    /// Stable upper-case name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Activated => "ACTIVATED",
            Self::Expired => "EXPIRED",
            Self::Revoked => "REVOKED",
        }
    }
}

impl std::fmt::Display for StatusTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StatusTag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|tag| tag.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::InvalidConfig(format!("unknown card status '{s}'")))
    }
}

/// Card status with status-specific fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CardStatus {
    Pending {
        requested_at: DateTime<Utc>,
    },
    Activated {
        activation_date: NaiveDate,
        expiration_date: NaiveDate,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        card_number: Option<String>,
    },
    Expired {
        activation_date: NaiveDate,
        expiration_date: NaiveDate,
    },
    Revoked {
        activation_date: NaiveDate,
        expiration_date: NaiveDate,
        revocation_date: NaiveDate,
        reason: String,
    },
}

impl CardStatus {
    /// The discriminant of this status.
    pub const fn tag(&self) -> StatusTag {
        match self {
            Self::Pending { .. } => StatusTag::Pending,
            Self::Activated { .. } => StatusTag::Activated,
            Self::Expired { .. } => StatusTag::Expired,
            Self::Revoked { .. } => StatusTag::Revoked,
        }
    }

    /// Activation and expiration dates, when the card was ever activated.
    pub const fn validity(&self) -> Option<(NaiveDate, NaiveDate)> {
        match self {
            Self::Pending { .. } => None,
            Self::Activated {
                activation_date,
                expiration_date,
                ..
            }
            | Self::Expired {
                activation_date,
                expiration_date,
            }
            | Self::Revoked {
                activation_date,
                expiration_date,
                ..
            } => Some((*activation_date, *expiration_date)),
        }
    }
}

/// The current version of a card record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    /// Holder identifier (fiscal code).
    pub holder_id: String,
    /// Which card this is.
    pub kind: CardKind,
    /// Current status.
    #[serde(flatten)]
    pub status: CardStatus,
    /// Monotonic version for optimistic concurrency.
    pub version: u64,
    /// Last write timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Card {
    /// Create a fresh pending card at version 1.
    pub fn pending(kind: CardKind, holder_id: impl Into<String>, requested_at: DateTime<Utc>) -> Self {
        Self {
            holder_id: holder_id.into(),
            kind,
            status: CardStatus::Pending { requested_at },
            version: 1,
            updated_at: requested_at,
        }
    }

    /// Apply a status change, returning the next version.
    ///
    /// Writing a status with the same tag as the current one is a no-op so
    /// that at-least-once callers converge on the same record.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidTransition` when the lifecycle forbids the move.
    pub fn transition(&self, status: CardStatus, now: DateTime<Utc>) -> Result<Self> {
        let from = self.status.tag();
        let to = status.tag();
        if from == to {
            return Ok(self.clone());
        }
        if !from.can_transition_to(to) {
            return Err(Error::invalid_transition(from, to));
        }
        Ok(Self {
            holder_id: self.holder_id.clone(),
            kind: self.kind,
            status,
            version: self.version.saturating_add(1),
            updated_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn activated() -> CardStatus {
        CardStatus::Activated {
            activation_date: date(2024, 1, 10),
            expiration_date: date(2030, 1, 10),
            card_number: None,
        }
    }

    #[test]
    fn test_linear_transitions() {
        assert!(StatusTag::Pending.can_transition_to(StatusTag::Activated));
        assert!(StatusTag::Activated.can_transition_to(StatusTag::Revoked));
        assert!(StatusTag::Activated.can_transition_to(StatusTag::Expired));
        assert!(!StatusTag::Revoked.can_transition_to(StatusTag::Activated));
        assert!(!StatusTag::Pending.can_transition_to(StatusTag::Expired));
        assert!(!StatusTag::Expired.can_transition_to(StatusTag::Revoked));
    }

    #[test]
    fn test_transition_bumps_version() {
        let now = Utc::now();
        let card = Card::pending(CardKind::Cgn, "AAA", now);
        let next = card.transition(activated(), now).unwrap();
        assert_eq!(next.version, 2);
        assert_eq!(next.status.tag(), StatusTag::Activated);
    }

    #[test]
    fn test_same_status_is_noop() {
        let now = Utc::now();
        let card = Card::pending(CardKind::Cgn, "AAA", now)
            .transition(activated(), now)
            .unwrap();
        let again = card.transition(activated(), now).unwrap();
        assert_eq!(again.version, card.version);
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let now = Utc::now();
        let card = Card::pending(CardKind::Cgn, "AAA", now);
        let revoked = CardStatus::Revoked {
            activation_date: date(2024, 1, 10),
            expiration_date: date(2030, 1, 10),
            revocation_date: date(2024, 2, 1),
            reason: "fraud".into(),
        };
        assert!(matches!(
            card.transition(revoked, now),
            Err(Error::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_status_tag_parse() {
        assert_eq!("activated".parse::<StatusTag>().unwrap(), StatusTag::Activated);
        assert!("deleted".parse::<StatusTag>().is_err());
    }

    #[test]
    fn test_card_json_shape() {
        let card = Card::pending(CardKind::Eyca, "AAA", Utc::now());
        let json = serde_json::to_value(&card).unwrap();
        assert_eq!(json["status"], "PENDING");
        assert_eq!(json["kind"], "EYCA");
    }
}
