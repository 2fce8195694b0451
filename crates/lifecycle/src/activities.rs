//! Card lifecycle activities.
//!
//! Every activity is idempotent under at-least-once delivery: status writes
//! equal to the stored status are no-ops, expiration writes are upserts,
//! notifications carry the step's idempotency key, and backups overwrite.

use std::sync::Arc;

use async_trait::async_trait;
use cgn_core::{
    BackupStore, CardKind, CardStatus, CardStore, Error as CoreError, ExpirationStore,
    InMemoryBackupStore, InMemoryCardStore, InMemoryExpirationStore, Notification, Notifier,
    PartnerApi, RecordingNotifier, ScriptedPartnerApi, StatusTag,
};
use cgn_workflow::{
    decode_activity_input, encode_output, Activity, ActivityContext, ActivityError,
    ActivityRegistry,
};
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

use crate::input::{
    BackupAndDeleteInput, Delivery, HolderInput, MarkPendingInput, PartnerCallInput,
    SendNotificationInput, StatusChange, StoreExpirationInput, UpdateStatusInput,
};

pub const UPDATE_STATUS: &str = "UpdateStatus";
pub const STORE_EXPIRATION_RECORD: &str = "StoreExpirationRecord";
pub const DELETE_EXPIRATION_RECORD: &str = "DeleteExpirationRecord";
pub const MARK_DEPENDENT_PENDING: &str = "MarkDependentPending";
pub const ENQUEUE_DEPENDENT_ACTIVATION: &str = "EnqueueDependentActivation";
pub const SEND_NOTIFICATION: &str = "SendNotification";
pub const CALL_PARTNER_API: &str = "CallPartnerAPI";
pub const BACKUP_AND_DELETE: &str = "BackupAndDelete";

/// Holder ids waiting for a dependent card activation.
pub type DependentQueue = UnboundedSender<String>;

/// External systems the activities talk to.
#[derive(Clone)]
pub struct Collaborators {
    pub cards: Arc<dyn CardStore>,
    pub expirations: Arc<dyn ExpirationStore>,
    pub partner: Arc<dyn PartnerApi>,
    pub notifier: Arc<dyn Notifier>,
    pub backups: Arc<dyn BackupStore>,
}

impl Collaborators {
    /// Process-local collaborators. The partner pre-issues a fixed card number.
    pub fn in_memory() -> Self {
        Self {
            cards: Arc::new(InMemoryCardStore::new()),
            expirations: Arc::new(InMemoryExpirationStore::new()),
            partner: Arc::new(ScriptedPartnerApi::always_ok(
                json!({"card_number": "EYCA-LOCAL-0001"}),
            )),
            notifier: Arc::new(RecordingNotifier::new()),
            backups: Arc::new(InMemoryBackupStore::new()),
        }
    }
}

/// Map a store error onto retry semantics.
///
/// A refused move out of a final status reads as "already revoked" or
/// "already expired".
fn classify(err: CoreError) -> ActivityError {
    match err {
        CoreError::InvalidTransition {
            from: from @ (StatusTag::Revoked | StatusTag::Expired),
            ..
        } => ActivityError::permanent(format!("already {}", from.as_str().to_ascii_lowercase())),
        e if e.is_transient() => ActivityError::transient(e),
        e => ActivityError::permanent(e),
    }
}

/// Writes a new card status.
pub struct UpdateStatus {
    cards: Arc<dyn CardStore>,
}

#[async_trait]
impl Activity for UpdateStatus {
    fn name(&self) -> &str {
        UPDATE_STATUS
    }

    async fn execute(&self, ctx: &ActivityContext, input: Value) -> Result<Value, ActivityError> {
        let input: UpdateStatusInput = decode_activity_input(input)?;
        let card = self
            .cards
            .get(input.kind, &input.holder_id)
            .await
            .map_err(classify)?
            .ok_or_else(|| classify(CoreError::card_not_found(input.kind, &input.holder_id)))?;

        let target = input.change.target();
        let status = match input.change {
            StatusChange::Activate {
                activation_date,
                expiration_date,
                card_number,
            } => CardStatus::Activated {
                activation_date,
                expiration_date,
                card_number,
            },
            StatusChange::Revoke {
                revocation_date,
                reason,
            } => {
                let (activation_date, expiration_date) = card
                    .status
                    .validity()
                    .ok_or_else(|| classify(CoreError::invalid_transition(card.status.tag(), target)))?;
                CardStatus::Revoked {
                    activation_date,
                    expiration_date,
                    revocation_date,
                    reason,
                }
            }
            StatusChange::Expire => {
                let (activation_date, expiration_date) = card
                    .status
                    .validity()
                    .ok_or_else(|| classify(CoreError::invalid_transition(card.status.tag(), target)))?;
                CardStatus::Expired {
                    activation_date,
                    expiration_date,
                }
            }
        };

        let updated = self
            .cards
            .update_status(input.kind, &input.holder_id, status, Some(card.version))
            .await
            .map_err(classify)?;

        info!(
            instance_id = %ctx.instance_id,
            holder_id = %input.holder_id,
            kind = %input.kind,
            status = %target,
            version = updated.version,
            "Card status written"
        );
        encode_output(&updated)
    }
}

pub struct StoreExpirationRecord {
    expirations: Arc<dyn ExpirationStore>,
}

#[async_trait]
impl Activity for StoreExpirationRecord {
    fn name(&self) -> &str {
        STORE_EXPIRATION_RECORD
    }

    async fn execute(&self, _ctx: &ActivityContext, input: Value) -> Result<Value, ActivityError> {
        let record: StoreExpirationInput = decode_activity_input(input)?;
        self.expirations.upsert(record).await.map_err(classify)?;
        Ok(Value::Null)
    }
}

pub struct DeleteExpirationRecord {
    expirations: Arc<dyn ExpirationStore>,
}

#[async_trait]
impl Activity for DeleteExpirationRecord {
    fn name(&self) -> &str {
        DELETE_EXPIRATION_RECORD
    }

    async fn execute(&self, _ctx: &ActivityContext, input: Value) -> Result<Value, ActivityError> {
        let input: HolderInput = decode_activity_input(input)?;
        let existed = self
            .expirations
            .delete(&input.holder_id)
            .await
            .map_err(classify)?;
        encode_output(&existed)
    }
}

/// Creates the pending dependent card.
///
/// A dependent card already past pending is left alone.
pub struct MarkDependentPending {
    cards: Arc<dyn CardStore>,
}

#[async_trait]
impl Activity for MarkDependentPending {
    fn name(&self) -> &str {
        MARK_DEPENDENT_PENDING
    }

    async fn execute(&self, _ctx: &ActivityContext, input: Value) -> Result<Value, ActivityError> {
        let input: MarkPendingInput = decode_activity_input(input)?;
        match self
            .cards
            .insert_pending(CardKind::Eyca, &input.holder_id, input.requested_at)
            .await
        {
            Ok(_) => encode_output(&true),
            Err(CoreError::InvalidTransition { from, .. }) => {
                debug!(holder_id = %input.holder_id, status = %from, "Dependent card already issued");
                encode_output(&false)
            }
            Err(e) => Err(classify(e)),
        }
    }
}

pub struct EnqueueDependentActivation {
    queue: DependentQueue,
}

#[async_trait]
impl Activity for EnqueueDependentActivation {
    fn name(&self) -> &str {
        ENQUEUE_DEPENDENT_ACTIVATION
    }

    async fn execute(&self, _ctx: &ActivityContext, input: Value) -> Result<Value, ActivityError> {
        let input: HolderInput = decode_activity_input(input)?;
        self.queue
            .send(input.holder_id)
            .map_err(|_| ActivityError::permanent("dependent activation queue is closed"))?;
        Ok(Value::Null)
    }
}

pub struct SendNotification {
    notifier: Arc<dyn Notifier>,
}

#[async_trait]
impl Activity for SendNotification {
    fn name(&self) -> &str {
        SEND_NOTIFICATION
    }

    async fn execute(&self, ctx: &ActivityContext, input: Value) -> Result<Value, ActivityError> {
        let input: SendNotificationInput = decode_activity_input(input)?;

        if input.check_recipient_exists
            && !self
                .notifier
                .recipient_exists(&input.holder_id)
                .await
                .map_err(ActivityError::transient)?
        {
            debug!(holder_id = %input.holder_id, "Recipient unknown, notification skipped");
            return encode_output(&Delivery { delivered: false });
        }

        let notification = Notification {
            holder_id: input.holder_id,
            content: input.content,
            idempotency_key: ctx.idempotency_key.to_string(),
        };
        self.notifier
            .send(&notification)
            .await
            .map_err(ActivityError::transient)?;

        info!(
            instance_id = %ctx.instance_id,
            holder_id = %notification.holder_id,
            subject = notification.content.subject(),
            "Notification sent"
        );
        encode_output(&Delivery { delivered: true })
    }
}

pub struct CallPartnerApi {
    partner: Arc<dyn PartnerApi>,
}

#[async_trait]
impl Activity for CallPartnerApi {
    fn name(&self) -> &str {
        CALL_PARTNER_API
    }

    async fn execute(&self, _ctx: &ActivityContext, input: Value) -> Result<Value, ActivityError> {
        let input: PartnerCallInput = decode_activity_input(input)?;
        self.partner
            .call(&input.operation, &input.payload)
            .await
            .map_err(|e| {
                if e.is_transient() {
                    ActivityError::transient(e)
                } else {
                    ActivityError::permanent(e)
                }
            })
    }
}

/// Archives a holder's records, then removes them from the live stores.
pub struct BackupAndDelete {
    cards: Arc<dyn CardStore>,
    expirations: Arc<dyn ExpirationStore>,
    backups: Arc<dyn BackupStore>,
}

#[async_trait]
impl Activity for BackupAndDelete {
    fn name(&self) -> &str {
        BACKUP_AND_DELETE
    }

    async fn execute(&self, ctx: &ActivityContext, input: Value) -> Result<Value, ActivityError> {
        let input: BackupAndDeleteInput = decode_activity_input(input)?;
        let receipt = self
            .backups
            .backup(&input.holder_id, &input.records)
            .await
            .map_err(classify)?;

        for kind in [CardKind::Cgn, CardKind::Eyca] {
            self.cards
                .delete(kind, &input.holder_id)
                .await
                .map_err(classify)?;
        }
        self.expirations
            .delete(&input.holder_id)
            .await
            .map_err(classify)?;

        info!(
            instance_id = %ctx.instance_id,
            holder_id = %input.holder_id,
            records = receipt.records,
            "Holder data archived and deleted"
        );
        encode_output(&receipt)
    }
}

/// Every lifecycle activity, wired to `collaborators`.
pub fn activity_registry(collaborators: &Collaborators, dependents: DependentQueue) -> ActivityRegistry {
    ActivityRegistry::new()
        .with(Arc::new(UpdateStatus {
            cards: Arc::clone(&collaborators.cards),
        }))
        .with(Arc::new(StoreExpirationRecord {
            expirations: Arc::clone(&collaborators.expirations),
        }))
        .with(Arc::new(DeleteExpirationRecord {
            expirations: Arc::clone(&collaborators.expirations),
        }))
        .with(Arc::new(MarkDependentPending {
            cards: Arc::clone(&collaborators.cards),
        }))
        .with(Arc::new(EnqueueDependentActivation { queue: dependents }))
        .with(Arc::new(SendNotification {
            notifier: Arc::clone(&collaborators.notifier),
        }))
        .with(Arc::new(CallPartnerApi {
            partner: Arc::clone(&collaborators.partner),
        }))
        .with(Arc::new(BackupAndDelete {
            cards: Arc::clone(&collaborators.cards),
            expirations: Arc::clone(&collaborators.expirations),
            backups: Arc::clone(&collaborators.backups),
        }))
}
