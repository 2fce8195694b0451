//! Notification client interface and message content.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{Error, Result};

/// What a notification says.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationContent {
    CardActivated,
    CardRevoked { reason: String },
    CardExpired,
    EycaActivated { card_number: String },
    TransitionFailed { target: String, reason: String },
}

impl NotificationContent {
    /// Message subject.
    pub fn subject(&self) -> &'static str {
        match self {
            Self::CardActivated => "Your card is active",
            Self::CardRevoked { .. } => "Your card has been revoked",
            Self::CardExpired => "Your card has expired",
            Self::EycaActivated { .. } => "Your EYCA card is active",
            Self::TransitionFailed { .. } => "We could not update your card",
        }
    }

    /// Message body.
    pub fn body(&self) -> String {
        match self {
            Self::CardActivated => "Your card has been activated and is ready to use.".to_string(),
            Self::CardRevoked { reason } => format!("Your card has been revoked. Reason: {reason}"),
            Self::CardExpired => "Your card has reached its expiration date.".to_string(),
            Self::EycaActivated { card_number } => {
                format!("Your EYCA card number is {card_number}.")
            }
            Self::TransitionFailed { target, reason } => {
                format!("The request to move your card to {target} failed: {reason}. Please try again later.")
            }
        }
    }
}

/// A notification addressed to a card holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub holder_id: String,
    pub content: NotificationContent,
    /// Key the notifier can use to drop duplicate deliveries.
    pub idempotency_key: String,
}

/// Notification client.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Whether the holder can be reached at all.
    async fn recipient_exists(&self, holder_id: &str) -> Result<bool>;

    /// Deliver a notification.
    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// Notifier that records deliveries in memory.
///
/// Deliveries are deduplicated by idempotency key, the way the real
/// messaging backend drops repeats.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: RwLock<Vec<Notification>>,
    seen_keys: RwLock<HashSet<String>>,
    unknown_recipients: RwLock<HashSet<String>>,
    failing: RwLock<bool>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a holder as unreachable.
    pub async fn forget_recipient(&self, holder_id: impl Into<String>) {
        self.unknown_recipients.write().await.insert(holder_id.into());
    }

    /// Make every subsequent send fail.
    pub async fn set_failing(&self, failing: bool) {
        *self.failing.write().await = failing;
    }

    /// Deliveries so far.
    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.read().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn recipient_exists(&self, holder_id: &str) -> Result<bool> {
        Ok(!self.unknown_recipients.read().await.contains(holder_id))
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        if *self.failing.read().await {
            return Err(Error::notification_failed(
                &notification.holder_id,
                "messaging backend unavailable",
            ));
        }
        let fresh = self
            .seen_keys
            .write()
            .await
            .insert(notification.idempotency_key.clone());
        if fresh {
            self.sent.write().await.push(notification.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn notification(key: &str) -> Notification {
        Notification {
            holder_id: "AAA".into(),
            content: NotificationContent::CardActivated,
            idempotency_key: key.into(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_keys_are_dropped() {
        let notifier = RecordingNotifier::new();
        notifier.send(&notification("k1")).await.unwrap();
        notifier.send(&notification("k1")).await.unwrap();
        notifier.send(&notification("k2")).await.unwrap();
        assert_eq!(notifier.sent().await.len(), 2);
    }

    #[tokio::test]
    async fn test_failing_notifier() {
        let notifier = RecordingNotifier::new();
        notifier.set_failing(true).await;
        assert!(notifier.send(&notification("k1")).await.is_err());
    }

    #[test]
    fn test_content_body() {
        let content = NotificationContent::CardRevoked {
            reason: "fraud".into(),
        };
        assert!(content.body().contains("fraud"));
    }
}
