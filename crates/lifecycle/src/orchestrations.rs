//! Card lifecycle orchestrations.
//!
//! Each program is a straight line of activity calls. A business failure in
//! the transition itself triggers compensation: wait the error delay, tell
//! the holder, record that they were told, then fail the instance.

use std::time::Duration;

use async_trait::async_trait;
use cgn_core::{BackupReceipt, Card, CardKind, ExpirationRecord, NotificationContent, StatusTag};
use cgn_workflow::{
    decode_input, CustomStatus, Error, Orchestration, OrchestrationContext, Result,
};
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use crate::activities::{
    BACKUP_AND_DELETE, CALL_PARTNER_API, DELETE_EXPIRATION_RECORD, ENQUEUE_DEPENDENT_ACTIVATION,
    MARK_DEPENDENT_PENDING, SEND_NOTIFICATION, STORE_EXPIRATION_RECORD, UPDATE_STATUS,
};
use crate::input::{
    BackupAndDeleteInput, CgnTransition, DeletionInput, Delivery, EycaActivationInput,
    HolderInput, MarkPendingInput, PartnerCallInput, PreissueResponse, SendNotificationInput,
    StatusChange, UpdateCgnInput, UpdateStatusInput,
};

pub const UPDATE_CGN: &str = "UpdateCgn";
pub const UPDATE_EYCA: &str = "UpdateEyca";
pub const DELETE_CARD: &str = "DeleteCard";

/// Marker recorded once the holder has been told about a failed transition.
pub const ERROR_NOTIFIED_MARKER: &str = "error-notification-sent";

/// Partner operation that reserves a dependent card number.
pub const PREISSUE_OPERATION: &str = "preissue";

/// Durable waits before notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delays {
    pub notification: Duration,
    pub error_notification: Duration,
}

async fn update_status(
    ctx: &mut OrchestrationContext,
    holder_id: &str,
    kind: CardKind,
    change: StatusChange,
) -> Result<Card> {
    let input = UpdateStatusInput {
        holder_id: holder_id.to_string(),
        kind,
        change,
    };
    ctx.call_activity(UPDATE_STATUS, &input).await
}

fn failure_reason(failure: &Error) -> String {
    match failure {
        Error::ActivityFailed { reason, .. } => reason.clone(),
        other => other.to_string(),
    }
}

/// Error path of a failed transition.
///
/// The notification is best-effort: when it cannot be delivered the marker
/// is skipped and the instance still fails with the original error.
async fn compensate(
    ctx: &mut OrchestrationContext,
    holder_id: &str,
    target: StatusTag,
    failure: &Error,
    delay: Duration,
) -> Result<()> {
    ctx.create_timer(delay).await?;
    if !ctx.is_replaying() {
        error!(
            instance_id = ctx.instance_id(),
            holder_id,
            target = %target,
            error = %failure,
            "Card transition failed"
        );
    }

    let notice = SendNotificationInput {
        holder_id: holder_id.to_string(),
        content: NotificationContent::TransitionFailed {
            target: target.to_string(),
            reason: failure_reason(failure),
        },
        check_recipient_exists: true,
    };
    match ctx.call_activity::<_, Delivery>(SEND_NOTIFICATION, &notice).await {
        Ok(delivery) if delivery.delivered => ctx.record_marker(ERROR_NOTIFIED_MARKER).await,
        Ok(_) => Ok(()),
        Err(e) if e.is_compensable() => {
            warn!(instance_id = ctx.instance_id(), error = %e, "Failure notification not sent");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Wait `delay`, then tell the holder. Delivery failures are logged only.
async fn notify(
    ctx: &mut OrchestrationContext,
    holder_id: &str,
    content: NotificationContent,
    delay: Duration,
) -> Result<()> {
    ctx.create_timer(delay).await?;
    let input = SendNotificationInput {
        holder_id: holder_id.to_string(),
        content,
        check_recipient_exists: true,
    };
    match ctx.call_activity::<_, Delivery>(SEND_NOTIFICATION, &input).await {
        Ok(delivery) => {
            if !delivery.delivered {
                debug!(instance_id = ctx.instance_id(), holder_id, "Holder not reachable");
            }
            Ok(())
        }
        Err(e) if e.is_compensable() => {
            warn!(instance_id = ctx.instance_id(), error = %e, "Notification not sent");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Moves the main card to a new status.
#[derive(Debug, Clone)]
pub struct UpdateCgn {
    delays: Delays,
}

impl UpdateCgn {
    pub const fn new(delays: Delays) -> Self {
        Self { delays }
    }

    async fn apply(&self, ctx: &mut OrchestrationContext, input: &UpdateCgnInput) -> Result<Card> {
        let holder_id = input.holder_id.as_str();
        match &input.transition {
            CgnTransition::Activated {
                activation_date,
                expiration_date,
                eyca_eligible,
                requested_at,
            } => {
                if *eyca_eligible {
                    let pending = MarkPendingInput {
                        holder_id: holder_id.to_string(),
                        requested_at: *requested_at,
                    };
                    let _: bool = ctx.call_activity(MARK_DEPENDENT_PENDING, &pending).await?;
                }
                let record = ExpirationRecord {
                    holder_id: holder_id.to_string(),
                    activation_date: *activation_date,
                    expiration_date: *expiration_date,
                };
                let _: Value = ctx.call_activity(STORE_EXPIRATION_RECORD, &record).await?;
                update_status(ctx, holder_id, CardKind::Cgn, input.transition.change()).await
            }
            CgnTransition::Revoked { .. } | CgnTransition::Expired => {
                let card =
                    update_status(ctx, holder_id, CardKind::Cgn, input.transition.change()).await?;
                let holder = HolderInput {
                    holder_id: holder_id.to_string(),
                };
                let _: bool = ctx.call_activity(DELETE_EXPIRATION_RECORD, &holder).await?;
                Ok(card)
            }
        }
    }
}

#[async_trait]
impl Orchestration for UpdateCgn {
    fn name(&self) -> &str {
        UPDATE_CGN
    }

    async fn run(&self, ctx: &mut OrchestrationContext, input: Value) -> Result<Value> {
        let input: UpdateCgnInput = decode_input(input)?;
        let target = input.transition.target();

        let card = match self.apply(ctx, &input).await {
            Ok(card) => card,
            Err(e) if e.is_compensable() => {
                compensate(ctx, &input.holder_id, target, &e, self.delays.error_notification).await?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        if matches!(
            input.transition,
            CgnTransition::Activated {
                eyca_eligible: true,
                ..
            }
        ) {
            let holder = HolderInput {
                holder_id: input.holder_id.clone(),
            };
            match ctx
                .call_activity::<_, Value>(ENQUEUE_DEPENDENT_ACTIVATION, &holder)
                .await
            {
                Ok(_) => {}
                Err(e) if e.is_compensable() => {
                    warn!(instance_id = ctx.instance_id(), error = %e, "Dependent activation not queued");
                }
                Err(e) => return Err(e),
            }
        }

        ctx.set_custom_status(CustomStatus::Updated).await?;
        if input.notify {
            notify(
                ctx,
                &input.holder_id,
                input.transition.notification(),
                self.delays.notification,
            )
            .await?;
        }
        ctx.set_custom_status(CustomStatus::Completed).await?;

        Ok(json!({
            "holder_id": input.holder_id,
            "status": target,
            "version": card.version,
        }))
    }
}

/// Activates the dependent card through the partner.
#[derive(Debug, Clone)]
pub struct UpdateEyca {
    delays: Delays,
}

impl UpdateEyca {
    pub const fn new(delays: Delays) -> Self {
        Self { delays }
    }

    async fn activate(
        &self,
        ctx: &mut OrchestrationContext,
        input: &EycaActivationInput,
    ) -> Result<(Card, String)> {
        let call = PartnerCallInput {
            operation: PREISSUE_OPERATION.to_string(),
            payload: json!({
                "holder_id": input.holder_id,
                "expiration_date": input.expiration_date,
            }),
        };
        let preissued: PreissueResponse = ctx.call_activity(CALL_PARTNER_API, &call).await?;
        let change = StatusChange::Activate {
            activation_date: input.activation_date,
            expiration_date: input.expiration_date,
            card_number: Some(preissued.card_number.clone()),
        };
        let card = update_status(ctx, &input.holder_id, CardKind::Eyca, change).await?;
        Ok((card, preissued.card_number))
    }
}

#[async_trait]
impl Orchestration for UpdateEyca {
    fn name(&self) -> &str {
        UPDATE_EYCA
    }

    async fn run(&self, ctx: &mut OrchestrationContext, input: Value) -> Result<Value> {
        let input: EycaActivationInput = decode_input(input)?;

        let (card, card_number) = match self.activate(ctx, &input).await {
            Ok(activated) => activated,
            Err(e) if e.is_compensable() => {
                compensate(
                    ctx,
                    &input.holder_id,
                    StatusTag::Activated,
                    &e,
                    self.delays.error_notification,
                )
                .await?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        ctx.set_custom_status(CustomStatus::Updated).await?;
        notify(
            ctx,
            &input.holder_id,
            NotificationContent::EycaActivated {
                card_number: card_number.clone(),
            },
            self.delays.notification,
        )
        .await?;
        ctx.set_custom_status(CustomStatus::Completed).await?;

        Ok(json!({
            "holder_id": input.holder_id,
            "card_number": card_number,
            "version": card.version,
        }))
    }
}

/// Archives and removes every record of a holder.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteCard;

#[async_trait]
impl Orchestration for DeleteCard {
    fn name(&self) -> &str {
        DELETE_CARD
    }

    async fn run(&self, ctx: &mut OrchestrationContext, input: Value) -> Result<Value> {
        let input: DeletionInput = decode_input(input)?;
        let request = BackupAndDeleteInput {
            holder_id: input.holder_id,
            records: input.records,
        };
        let receipt: BackupReceipt = ctx.call_activity(BACKUP_AND_DELETE, &request).await?;
        ctx.set_custom_status(CustomStatus::Updated).await?;
        ctx.set_custom_status(CustomStatus::Completed).await?;
        serde_json::to_value(receipt).map_err(Error::serialization)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_reason_strips_step() {
        let failure = Error::activity_failed(UPDATE_STATUS, "already revoked");
        assert_eq!(failure_reason(&failure), "already revoked");

        let other = Error::orchestration_not_found("Nope");
        assert_eq!(failure_reason(&other), other.to_string());
    }

    #[test]
    fn test_names() {
        let delays = Delays {
            notification: Duration::ZERO,
            error_notification: Duration::ZERO,
        };
        assert_eq!(UpdateCgn::new(delays).name(), UPDATE_CGN);
        assert_eq!(UpdateEyca::new(delays).name(), UPDATE_EYCA);
        assert_eq!(DeleteCard.name(), DELETE_CARD);
    }
}
