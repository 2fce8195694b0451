//! Per-entity mutual exclusion on top of the instance store.

use std::sync::Arc;

use futures::future::try_join_all;
use tracing::debug;

use crate::error::Result;
use crate::identity::make_instance_id;
use crate::storage::InstanceStore;
use crate::types::{RuntimeStatus, WorkflowInstance};

/// Outcome of a lock check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockCheckResult {
    /// Nothing live for this entity. Start `instance_id`.
    NotRunning { instance_id: String },
    /// The requested transition is already live under this id.
    RunningWithId(String),
    /// A transition to a different status is live.
    ConflictingStatus(String),
}

/// Checks whether an entity already has a live transition.
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn InstanceStore>,
}

fn is_live(instance: Option<&WorkflowInstance>) -> bool {
    instance.is_some_and(|i| {
        matches!(
            i.runtime_status,
            RuntimeStatus::Pending | RuntimeStatus::Running
        )
    })
}

impl LockManager {
    pub fn new(store: Arc<dyn InstanceStore>) -> Self {
        Self { store }
    }

    /// Check the target id first, then every other status in `all_statuses`
    /// in order. The first live one wins.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn check_running(
        &self,
        entity_id: &str,
        operation: &str,
        target: &str,
        all_statuses: &[&str],
    ) -> Result<LockCheckResult> {
        let instance_id = make_instance_id(entity_id, operation, target);
        let current = self.store.load(&instance_id).await?;
        if is_live(current.as_ref()) {
            debug!(instance_id = %instance_id, "Transition already running");
            return Ok(LockCheckResult::RunningWithId(instance_id));
        }

        let others = all_statuses
            .iter()
            .copied()
            .filter(|status| *status != target)
            .collect::<Vec<_>>();

        Ok(match self.find_running(entity_id, operation, &others).await? {
            Some(status) => {
                debug!(entity_id, conflicting = %status, "Conflicting transition running");
                LockCheckResult::ConflictingStatus(status)
            }
            None => LockCheckResult::NotRunning { instance_id },
        })
    }

    /// First of `statuses` with a live instance under `operation`.
    ///
    /// Used on its own to keep different operations on one entity apart.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn find_running(
        &self,
        entity_id: &str,
        operation: &str,
        statuses: &[&str],
    ) -> Result<Option<String>> {
        let loaded = try_join_all(statuses.iter().map(|status| {
            let id = make_instance_id(entity_id, operation, status);
            let store = Arc::clone(&self.store);
            async move { store.load(&id).await }
        }))
        .await?;

        Ok(statuses
            .iter()
            .zip(loaded.iter())
            .find(|(_, instance)| is_live(instance.as_ref()))
            .map(|(status, _)| (*status).to_string()))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::storage::InMemoryInstanceStore;
    use crate::types::InstanceOutcome;
    use chrono::Utc;
    use serde_json::json;

    const ALL: [&str; 4] = ["PENDING", "ACTIVATED", "EXPIRED", "REVOKED"];

    async fn seeded(ids: &[&str]) -> Arc<InMemoryInstanceStore> {
        let store = Arc::new(InMemoryInstanceStore::new());
        for id in ids {
            store
                .create(WorkflowInstance::new(*id, "UpdateCgn", json!({}), Utc::now()))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_not_running() {
        let lock = LockManager::new(seeded(&[]).await);
        let result = lock
            .check_running("E1", "UPDCGN", "ACTIVATED", &ALL)
            .await
            .unwrap();
        assert_eq!(
            result,
            LockCheckResult::NotRunning {
                instance_id: "E1-UPDCGN-ACTIVATED".into()
            }
        );
    }

    #[tokio::test]
    async fn test_same_target_running() {
        let lock = LockManager::new(seeded(&["E1-UPDCGN-ACTIVATED"]).await);
        let result = lock
            .check_running("E1", "UPDCGN", "ACTIVATED", &ALL)
            .await
            .unwrap();
        assert_eq!(result, LockCheckResult::RunningWithId("E1-UPDCGN-ACTIVATED".into()));
    }

    #[tokio::test]
    async fn test_other_target_conflicts() {
        let lock = LockManager::new(seeded(&["E1-UPDCGN-ACTIVATED"]).await);
        let result = lock
            .check_running("E1", "UPDCGN", "REVOKED", &ALL)
            .await
            .unwrap();
        assert_eq!(result, LockCheckResult::ConflictingStatus("ACTIVATED".into()));
    }

    #[tokio::test]
    async fn test_finished_instances_do_not_lock() {
        let store = seeded(&["E1-UPDCGN-ACTIVATED"]).await;
        store
            .finish("E1-UPDCGN-ACTIVATED", InstanceOutcome::Completed(json!(true)), Utc::now())
            .await
            .unwrap();
        let lock = LockManager::new(store);

        let result = lock
            .check_running("E1", "UPDCGN", "REVOKED", &ALL)
            .await
            .unwrap();
        assert!(matches!(result, LockCheckResult::NotRunning { .. }));
    }

    #[tokio::test]
    async fn test_find_running_across_operations() {
        let lock = LockManager::new(seeded(&["E1-UPDCGN-REVOKED"]).await);

        let found = lock.find_running("E1", "UPDCGN", &ALL).await.unwrap();
        assert_eq!(found.as_deref(), Some("REVOKED"));

        let other_operation = lock.find_running("E1", "DELETE", &["DELETED"]).await.unwrap();
        assert_eq!(other_operation, None);
    }

    #[tokio::test]
    async fn test_other_entities_are_independent() {
        let lock = LockManager::new(seeded(&["E2-UPDCGN-ACTIVATED"]).await);
        let result = lock
            .check_running("E1", "UPDCGN", "REVOKED", &ALL)
            .await
            .unwrap();
        assert!(matches!(result, LockCheckResult::NotRunning { .. }));
    }
}
