//! Host instance store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::types::{CustomStatus, HistoryEvent, InstanceOutcome, WorkflowInstance};

/// Trait for instance storage backends.
///
/// The store is the single-instance-per-id primitive the lock manager
/// builds on: `create` must reject an id whose instance is not terminal.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Persist a new instance.
    ///
    /// Replaces a terminal instance with the same id. Fails with
    /// `InstanceAlreadyRunning` if the existing one is still live.
    async fn create(&self, instance: WorkflowInstance) -> Result<()>;

    /// Load an instance by id.
    async fn load(&self, id: &str) -> Result<Option<WorkflowInstance>>;

    /// Append history events and an optional custom status in one write.
    async fn append(
        &self,
        id: &str,
        events: Vec<HistoryEvent>,
        custom_status: Option<CustomStatus>,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Move an instance to `Running`.
    async fn mark_running(&self, id: &str, now: DateTime<Utc>) -> Result<()>;

    /// Record the terminal outcome.
    async fn finish(&self, id: &str, outcome: InstanceOutcome, now: DateTime<Utc>) -> Result<()>;

    /// Flag an instance for termination. Returns false if it already finished.
    async fn request_termination(&self, id: &str, now: DateTime<Utc>) -> Result<bool>;

    /// Every instance that has not reached a terminal state.
    async fn list_live(&self) -> Result<Vec<WorkflowInstance>>;

    /// Delete terminal instances last updated before `cutoff`.
    async fn purge_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

/// In-memory instance store.
#[derive(Debug, Default)]
pub struct InMemoryInstanceStore {
    instances: RwLock<HashMap<String, WorkflowInstance>>,
}

impl InMemoryInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored instance, sorted by id.
    pub async fn all(&self) -> Vec<WorkflowInstance> {
        self.instances
            .read()
            .await
            .values()
            .cloned()
            .sorted_by(|a, b| a.id.cmp(&b.id))
            .collect_vec()
    }

    async fn update<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut WorkflowInstance) -> Result<T> + Send,
    ) -> Result<T> {
        let mut instances = self.instances.write().await;
        let instance = instances
            .get_mut(id)
            .ok_or_else(|| Error::instance_not_found(id))?;
        f(instance)
    }
}

#[async_trait]
impl InstanceStore for InMemoryInstanceStore {
    async fn create(&self, instance: WorkflowInstance) -> Result<()> {
        let mut instances = self.instances.write().await;
        if let Some(existing) = instances.get(&instance.id) {
            if !existing.is_terminal() {
                return Err(Error::instance_already_running(&instance.id));
            }
        }
        instances.insert(instance.id.clone(), instance);
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<WorkflowInstance>> {
        Ok(self.instances.read().await.get(id).cloned())
    }

    async fn append(
        &self,
        id: &str,
        events: Vec<HistoryEvent>,
        custom_status: Option<CustomStatus>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.update(id, |instance| instance.append(events, custom_status, now))
            .await
    }

    async fn mark_running(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        self.update(id, |instance| {
            instance.mark_running(now);
            Ok(())
        })
        .await
    }

    async fn finish(&self, id: &str, outcome: InstanceOutcome, now: DateTime<Utc>) -> Result<()> {
        self.update(id, |instance| {
            instance.finish(outcome, now);
            Ok(())
        })
        .await
    }

    async fn request_termination(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        self.update(id, |instance| Ok(instance.request_termination(now)))
            .await
    }

    async fn list_live(&self) -> Result<Vec<WorkflowInstance>> {
        Ok(self
            .instances
            .read()
            .await
            .values()
            .filter(|i| !i.is_terminal())
            .cloned()
            .sorted_by_key(|i| i.created_at)
            .collect_vec())
    }

    async fn purge_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut instances = self.instances.write().await;
        let before = instances.len();
        instances.retain(|_, i| !(i.is_terminal() && i.last_updated_at < cutoff));
        Ok(before.saturating_sub(instances.len()))
    }
}
