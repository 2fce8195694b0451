//! Start and query entry points for card transitions.
//!
//! Triggers (HTTP, the expiration scanner) go through [`LifecycleService`],
//! which serializes lock checks, writes the pending card, and hands the
//! instance to the engine.

use std::sync::Arc;

use cgn_core::{CardKind, CardStore, ExpirationStore, ResultExt, StatusTag};
use cgn_workflow::{
    make_instance_id, Clock, CustomStatus, EngineConfig, Error as WorkflowError, InMemoryInstanceStore,
    InstanceStore, LockCheckResult, LockManager, OrchestrationRegistry, RuntimeStatus,
    SystemClock, WorkflowEngine,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::activities::{activity_registry, Collaborators};
use crate::eligibility::{expiration_date, is_eyca_eligible, CGN_UPPER_BOUND_AGE};
use crate::error::{Error, Result};
use crate::input::{
    CgnTransition, DeletionInput, EycaActivationInput, UpdateCgnInput, DELETED_STATUS,
    DELETE_OPERATION, EYCA_OPERATION, UPDATE_CGN_OPERATION,
};
use crate::orchestrations::{DeleteCard, UpdateCgn, UpdateEyca, DELETE_CARD, UPDATE_CGN, UPDATE_EYCA};
use crate::settings::LifecycleSettings;
use crate::status::ActivationDetail;

/// What a trigger did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StartOutcome {
    /// A new instance was started.
    Started { instance_id: String },
    /// A transition for this holder is already live. Nothing was started.
    InProgress {
        instance_id: String,
        /// Target of the live transition, when it differs from the request.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conflicting_status: Option<String>,
    },
}

impl StartOutcome {
    pub fn instance_id(&self) -> &str {
        match self {
            Self::Started { instance_id } | Self::InProgress { instance_id, .. } => instance_id,
        }
    }

    pub const fn is_started(&self) -> bool {
        matches!(self, Self::Started { .. })
    }
}

const CARD_STATUSES: [&str; 4] = [
    StatusTag::Pending.as_str(),
    StatusTag::Activated.as_str(),
    StatusTag::Expired.as_str(),
    StatusTag::Revoked.as_str(),
];

/// Live deletions block every card transition of the holder.
const BLOCKED_BY_DELETION: [(&str, &[&str]); 1] = [(DELETE_OPERATION, &[DELETED_STATUS])];

/// Live card transitions block a deletion.
const BLOCKED_BY_TRANSITIONS: [(&str, &[&str]); 2] = [
    (UPDATE_CGN_OPERATION, &CARD_STATUSES),
    (EYCA_OPERATION, &CARD_STATUSES),
];

/// One transition request, resolved to an instance id and a program input.
struct Trigger<'a> {
    holder_id: &'a str,
    operation: &'a str,
    target: &'a str,
    statuses: &'a [&'a str],
    /// Other operations whose live instances also refuse this one.
    blockers: &'a [(&'a str, &'a [&'a str])],
    orchestration: &'a str,
}

pub struct LifecycleServiceBuilder {
    store: Arc<dyn InstanceStore>,
    collaborators: Collaborators,
    settings: LifecycleSettings,
    engine: EngineConfig,
    clock: Arc<dyn Clock>,
}

impl LifecycleServiceBuilder {
    #[must_use]
    pub fn store(mut self, store: Arc<dyn InstanceStore>) -> Self {
        self.store = store;
        self
    }

    #[must_use]
    pub fn collaborators(mut self, collaborators: Collaborators) -> Self {
        self.collaborators = collaborators;
        self
    }

    #[must_use]
    pub fn settings(mut self, settings: LifecycleSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn engine_config(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Wire the engine and start the dependent activation consumer.
    ///
    /// Must be called inside a tokio runtime.
    pub fn build(self) -> LifecycleService {
        let (dependents, queue) = unbounded_channel();
        let activities = activity_registry(&self.collaborators, dependents);
        let orchestrations = OrchestrationRegistry::new()
            .with(Arc::new(UpdateCgn::new(self.settings.delays)))
            .with(Arc::new(UpdateEyca::new(self.settings.delays)))
            .with(Arc::new(DeleteCard));
        let engine = WorkflowEngine::new(Arc::clone(&self.store), activities, orchestrations, self.engine)
            .with_clock(Arc::clone(&self.clock));

        let service = LifecycleService {
            engine,
            lock: LockManager::new(self.store),
            cards: self.collaborators.cards,
            expirations: self.collaborators.expirations,
            settings: Arc::new(self.settings),
            clock: self.clock,
            start_guard: Arc::new(Mutex::new(())),
        };
        tokio::spawn(service.clone().drain_dependents(queue));
        service
    }
}

/// Lifecycle front door.
#[derive(Clone)]
pub struct LifecycleService {
    engine: WorkflowEngine,
    lock: LockManager,
    cards: Arc<dyn CardStore>,
    expirations: Arc<dyn ExpirationStore>,
    settings: Arc<LifecycleSettings>,
    clock: Arc<dyn Clock>,
    /// Serializes lock check and start so two triggers cannot both see
    /// `NotRunning`.
    start_guard: Arc<Mutex<()>>,
}

impl LifecycleService {
    /// Builder with in-memory stores, default settings, and the system clock.
    pub fn builder() -> LifecycleServiceBuilder {
        LifecycleServiceBuilder {
            store: Arc::new(InMemoryInstanceStore::new()),
            collaborators: Collaborators::in_memory(),
            settings: LifecycleSettings::default(),
            engine: EngineConfig::default(),
            clock: Arc::new(SystemClock),
        }
    }

    pub const fn engine(&self) -> &WorkflowEngine {
        &self.engine
    }

    pub fn cards(&self) -> Arc<dyn CardStore> {
        Arc::clone(&self.cards)
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    fn today(&self) -> NaiveDate {
        self.clock.now().date_naive()
    }

    /// Activate the main card.
    ///
    /// Dates and dependent-card eligibility are fixed here, from the fiscal
    /// code and today's date.
    ///
    /// # Errors
    ///
    /// Same as [`start_transition`](Self::start_transition).
    pub async fn request_activation(&self, holder_id: &str) -> Result<StartOutcome> {
        let now = self.clock.now();
        let today = now.date_naive();
        let transition = CgnTransition::Activated {
            activation_date: today,
            expiration_date: expiration_date(holder_id, today, CGN_UPPER_BOUND_AGE),
            eyca_eligible: is_eyca_eligible(holder_id, today, self.settings.eyca_age_limit),
            requested_at: now,
        };
        self.start_transition(holder_id, transition).await
    }

    /// Revoke the main card.
    ///
    /// # Errors
    ///
    /// Same as [`start_transition`](Self::start_transition).
    pub async fn request_revocation(&self, holder_id: &str, reason: &str) -> Result<StartOutcome> {
        let transition = CgnTransition::Revoked {
            revocation_date: self.today(),
            reason: reason.to_string(),
        };
        self.start_transition(holder_id, transition).await
    }

    /// Expire the main card. Called by the expiration scanner.
    ///
    /// # Errors
    ///
    /// Same as [`start_transition`](Self::start_transition).
    pub async fn request_expiration(&self, holder_id: &str) -> Result<StartOutcome> {
        self.start_transition(holder_id, CgnTransition::Expired).await
    }

    /// Start a main-card transition unless one is already live for the holder.
    ///
    /// # Errors
    ///
    /// - `AlreadyInStatus` if the card already holds the target status
    /// - store failures from the lock check, pending write, or engine start
    pub async fn start_transition(
        &self,
        holder_id: &str,
        transition: CgnTransition,
    ) -> Result<StartOutcome> {
        let target = transition.target();
        let input = UpdateCgnInput {
            holder_id: holder_id.to_string(),
            notify: self.settings.is_notifiable(target),
            transition,
        };
        let trigger = Trigger {
            holder_id,
            operation: UPDATE_CGN_OPERATION,
            target: target.as_str(),
            statuses: &CARD_STATUSES,
            blockers: &BLOCKED_BY_DELETION,
            orchestration: UPDATE_CGN,
        };

        let _guard = self.start_guard.lock().await;
        let instance_id = match self.claim(&trigger).await? {
            Ok(instance_id) => instance_id,
            Err(busy) => return Ok(busy),
        };
        self.refuse_repeat(CardKind::Cgn, holder_id, target).await?;

        if let CgnTransition::Activated { requested_at, .. } = &input.transition {
            // A card past pending is left alone; the program reports the
            // refused transition.
            match self
                .cards
                .insert_pending(CardKind::Cgn, holder_id, *requested_at)
                .await
            {
                Ok(_) => {}
                Err(cgn_core::Error::InvalidTransition { from, .. }) => {
                    debug!(holder_id, status = %from, "Card already past pending");
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.launch(&trigger, &instance_id, to_value(&input)?).await
    }

    /// Activate the dependent card.
    ///
    /// # Errors
    ///
    /// - `AlreadyInStatus` if the dependent card is already active
    /// - store failures from the lock check or engine start
    pub async fn start_eyca_activation(&self, holder_id: &str) -> Result<StartOutcome> {
        let today = self.today();
        let input = EycaActivationInput {
            holder_id: holder_id.to_string(),
            activation_date: today,
            expiration_date: expiration_date(holder_id, today, self.settings.eyca_age_limit),
        };
        let trigger = Trigger {
            holder_id,
            operation: EYCA_OPERATION,
            target: StatusTag::Activated.as_str(),
            statuses: &CARD_STATUSES,
            blockers: &BLOCKED_BY_DELETION,
            orchestration: UPDATE_EYCA,
        };

        let _guard = self.start_guard.lock().await;
        let instance_id = match self.claim(&trigger).await? {
            Ok(instance_id) => instance_id,
            Err(busy) => return Ok(busy),
        };
        self.refuse_repeat(CardKind::Eyca, holder_id, StatusTag::Activated)
            .await?;
        self.launch(&trigger, &instance_id, to_value(&input)?).await
    }

    /// Archive and delete every record of a holder.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the holder has no card
    /// - store failures
    pub async fn request_deletion(&self, holder_id: &str) -> Result<StartOutcome> {
        let trigger = Trigger {
            holder_id,
            operation: DELETE_OPERATION,
            target: DELETED_STATUS,
            statuses: &[DELETED_STATUS],
            blockers: &BLOCKED_BY_TRANSITIONS,
            orchestration: DELETE_CARD,
        };

        let _guard = self.start_guard.lock().await;
        let instance_id = match self.claim(&trigger).await? {
            Ok(instance_id) => instance_id,
            Err(busy) => return Ok(busy),
        };

        let input = DeletionInput {
            holder_id: holder_id.to_string(),
            records: self.snapshot(holder_id).await?,
        };
        self.launch(&trigger, &instance_id, to_value(&input)?).await
    }

    /// Refuse a transition to the status the card already holds.
    ///
    /// Re-running it would rewrite the expiration record and notify the
    /// holder again while the card keeps its old dates.
    async fn refuse_repeat(&self, kind: CardKind, holder_id: &str, target: StatusTag) -> Result<()> {
        let current = self.cards.get(kind, holder_id).await?;
        if current.is_some_and(|card| card.status.tag() == target) {
            info!(holder_id, card = %kind, status = %target, "Card already in requested status");
            return Err(Error::already_in_status(holder_id, target));
        }
        Ok(())
    }

    /// Everything stored for a holder, as archived by the deletion program.
    async fn snapshot(&self, holder_id: &str) -> Result<Vec<Value>> {
        let mut records = Vec::new();
        for kind in [CardKind::Cgn, CardKind::Eyca] {
            if let Some(card) = self.cards.get(kind, holder_id).await? {
                records.push(to_value(&card)?);
            }
        }
        if records.is_empty() {
            return Err(Error::not_found(holder_id));
        }
        if let Some(record) = self.expirations.get(holder_id).await? {
            records.push(to_value(&record)?);
        }
        Ok(records)
    }

    /// Lock check. `Ok` carries the id to start, `Err` the outcome to return.
    async fn claim(&self, trigger: &Trigger<'_>) -> Result<std::result::Result<String, StartOutcome>> {
        let checked = self
            .lock
            .check_running(trigger.holder_id, trigger.operation, trigger.target, trigger.statuses)
            .await?;
        Ok(match checked {
            LockCheckResult::NotRunning { instance_id } => match self.blocked_by(trigger).await? {
                Some(busy) => Err(busy),
                None => Ok(instance_id),
            },
            LockCheckResult::RunningWithId(instance_id) => {
                info!(instance_id = %instance_id, "Transition already in progress");
                Err(StartOutcome::InProgress {
                    instance_id,
                    conflicting_status: None,
                })
            }
            LockCheckResult::ConflictingStatus(status) => {
                let instance_id = make_instance_id(trigger.holder_id, trigger.operation, &status);
                info!(
                    instance_id = %instance_id,
                    requested = trigger.target,
                    "Conflicting transition in progress"
                );
                Err(StartOutcome::InProgress {
                    instance_id,
                    conflicting_status: Some(status),
                })
            }
        })
    }

    /// A live instance of another operation on the same holder, if any.
    async fn blocked_by(&self, trigger: &Trigger<'_>) -> Result<Option<StartOutcome>> {
        for (operation, statuses) in trigger.blockers {
            let Some(status) = self
                .lock
                .find_running(trigger.holder_id, operation, statuses)
                .await?
            else {
                continue;
            };
            let instance_id = make_instance_id(trigger.holder_id, operation, &status);
            info!(
                instance_id = %instance_id,
                requested = trigger.target,
                "Other operation in progress for holder"
            );
            return Ok(Some(StartOutcome::InProgress {
                instance_id,
                conflicting_status: Some(status),
            }));
        }
        Ok(None)
    }

    async fn launch(&self, trigger: &Trigger<'_>, instance_id: &str, input: Value) -> Result<StartOutcome> {
        let instance_id = self.engine.start(trigger.orchestration, instance_id, input).await?;
        info!(
            instance_id = %instance_id,
            holder_id = trigger.holder_id,
            target = trigger.target,
            "Transition started"
        );
        Ok(StartOutcome::Started { instance_id })
    }

    /// Status of the first instance found among `candidates`, falling back to
    /// the card store.
    ///
    /// An instance that already wrote the card but is still waiting on its
    /// notification is asked to stop early. That request is best-effort.
    ///
    /// # Errors
    ///
    /// - `NotFound` if neither an instance nor a card exists
    /// - store failures
    pub async fn query_status(&self, holder_id: &str, candidates: &[StatusTag]) -> Result<ActivationDetail> {
        for status in candidates {
            let instance_id = make_instance_id(holder_id, UPDATE_CGN_OPERATION, status.as_str());
            let Some(instance) = self.engine.status(&instance_id).await? else {
                continue;
            };
            if instance.runtime_status == RuntimeStatus::Running
                && instance.custom_status == CustomStatus::Updated
            {
                self.engine
                    .terminate(&instance_id)
                    .await
                    .into_option_logged("early termination");
            }
            return Ok(ActivationDetail::from_instance(&instance));
        }

        let card = self
            .cards
            .get(CardKind::Cgn, holder_id)
            .await?
            .ok_or_else(|| Error::not_found(holder_id))?;
        Ok(ActivationDetail::from_card(&card))
    }

    /// Resume every instance left live by a previous process.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn resume(&self) -> Result<usize> {
        Ok(self.engine.resume_pending().await?)
    }

    async fn drain_dependents(self, mut queue: UnboundedReceiver<String>) {
        while let Some(holder_id) = queue.recv().await {
            if let Some(outcome) = self
                .start_eyca_activation(&holder_id)
                .await
                .into_option_logged("dependent activation")
            {
                debug!(holder_id = %holder_id, instance_id = outcome.instance_id(), "Dependent activation handled");
            }
        }
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| Error::from(WorkflowError::serialization(e)))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use serde_json::json;

    #[test]
    fn test_outcome_wire_shape() {
        let started = StartOutcome::Started {
            instance_id: "E1-UPDCGN-ACTIVATED".into(),
        };
        assert_eq!(
            serde_json::to_value(&started).unwrap(),
            json!({"status": "STARTED", "instance_id": "E1-UPDCGN-ACTIVATED"})
        );

        let busy = StartOutcome::InProgress {
            instance_id: "E1-UPDCGN-ACTIVATED".into(),
            conflicting_status: Some("ACTIVATED".into()),
        };
        assert_eq!(
            serde_json::to_value(&busy).unwrap(),
            json!({
                "status": "IN_PROGRESS",
                "instance_id": "E1-UPDCGN-ACTIVATED",
                "conflicting_status": "ACTIVATED"
            })
        );
        assert!(!busy.is_started());
    }

    #[tokio::test]
    async fn test_query_unknown_holder_is_not_found() {
        let service = LifecycleService::builder().build();
        let result = service.query_status("NOBODY", &[StatusTag::Activated]).await;
        assert!(matches!(result, Err(Error::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_deletion_of_unknown_holder_is_not_found() {
        let service = LifecycleService::builder().build();
        let result = service.request_deletion("NOBODY").await;
        assert!(matches!(result, Err(Error::NotFound { .. })));
    }
}
