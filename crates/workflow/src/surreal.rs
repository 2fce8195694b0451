//! SurrealDB-backed instance store.
//!
//! Each instance is one record in the `instance` table holding a
//! zstd-compressed JSON snapshot of the whole aggregate, plus the few
//! plain fields needed to filter without decompressing. Every mutation is a
//! single-record upsert, so a history append and its custom status land
//! together or not at all.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::storage::InstanceStore;
use crate::types::{CustomStatus, HistoryEvent, InstanceOutcome, RuntimeStatus, WorkflowInstance};

const TABLE: &str = "instance";
const COMPRESSION_LEVEL: i32 = 3;

/// Connection settings for the SurrealDB store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurrealStoreConfig {
    /// Connection URL (e.g., "mem://", "ws://localhost:8000")
    pub url: String,
    pub namespace: String,
    pub database: String,
}

impl SurrealStoreConfig {
    /// In-memory database, for tests and single-process runs.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            url: "mem://".to_string(),
            namespace: "cgn".to_string(),
            database: "workflows".to_string(),
        }
    }
}

/// Stored form of an instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct InstanceRecord {
    instance_id: String,
    runtime_status: RuntimeStatus,
    terminal: bool,
    last_updated_at: DateTime<Utc>,
    uncompressed_size: u64,
    snapshot: Vec<u8>,
}

impl InstanceRecord {
    fn encode(instance: &WorkflowInstance) -> Result<Self> {
        let json = serde_json::to_vec(instance).map_err(Error::serialization)?;
        let snapshot = zstd::bulk::compress(&json, COMPRESSION_LEVEL)
            .map_err(|e| Error::serialization(format!("zstd compression failed: {e}")))?;
        Ok(Self {
            instance_id: instance.id.clone(),
            runtime_status: instance.runtime_status,
            terminal: instance.is_terminal(),
            last_updated_at: instance.last_updated_at,
            uncompressed_size: json.len() as u64,
            snapshot,
        })
    }

    fn decode(&self) -> Result<WorkflowInstance> {
        let capacity = usize::try_from(self.uncompressed_size)
            .map_err(|e| Error::serialization(format!("snapshot too large: {e}")))?;
        let json = zstd::bulk::decompress(&self.snapshot, capacity)
            .map_err(|e| Error::serialization(format!("zstd decompression failed: {e}")))?;
        serde_json::from_slice(&json).map_err(Error::serialization)
    }
}

/// Instance store on SurrealDB.
#[derive(Debug, Clone)]
pub struct SurrealInstanceStore {
    db: Arc<Surreal<Any>>,
    /// Serializes read-modify-write cycles on records.
    write_lock: Arc<Mutex<()>>,
}

impl SurrealInstanceStore {
    /// Connect and select the namespace and database.
    ///
    /// # Errors
    ///
    /// Returns `StorageFailed` if the connection or selection fails.
    pub async fn connect(config: &SurrealStoreConfig) -> Result<Self> {
        let db = Surreal::<Any>::init();
        db.connect(config.url.as_str())
            .await
            .map_err(|e| Error::storage_failed("connect", format!("surrealdb error: {e}")))?;
        db.use_ns(config.namespace.as_str())
            .use_db(config.database.as_str())
            .await
            .map_err(|e| Error::storage_failed("use_ns", format!("surrealdb error: {e}")))?;

        debug!(url = %config.url, namespace = %config.namespace, database = %config.database, "Connected instance store");

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// The underlying client, for stores that share this database.
    pub fn client(&self) -> Arc<Surreal<Any>> {
        Arc::clone(&self.db)
    }

    async fn load_record(&self, id: &str) -> Result<Option<InstanceRecord>> {
        self.db
            .select((TABLE, id))
            .await
            .map_err(|e| Error::storage_failed("load_instance", format!("surrealdb error: {e}")))
    }

    async fn save(&self, instance: &WorkflowInstance) -> Result<()> {
        let record = InstanceRecord::encode(instance)?;
        let saved: Option<InstanceRecord> = self
            .db
            .upsert((TABLE, instance.id.as_str()))
            .content(record)
            .await
            .map_err(|e| Error::storage_failed("save_instance", format!("surrealdb error: {e}")))?;

        saved
            .map(|_| ())
            .ok_or_else(|| Error::storage_failed("save_instance", "no result returned from database"))
    }

    async fn all_records(&self) -> Result<Vec<InstanceRecord>> {
        self.db
            .select(TABLE)
            .await
            .map_err(|e| Error::storage_failed("list_instances", format!("surrealdb error: {e}")))
    }

    async fn update<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut WorkflowInstance) -> Result<T> + Send,
    ) -> Result<T> {
        let _guard = self.write_lock.lock().await;
        let mut instance = self
            .load_record(id)
            .await?
            .ok_or_else(|| Error::instance_not_found(id))?
            .decode()?;
        let value = f(&mut instance)?;
        self.save(&instance).await?;
        Ok(value)
    }
}

#[async_trait]
impl InstanceStore for SurrealInstanceStore {
    async fn create(&self, instance: WorkflowInstance) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if let Some(existing) = self.load_record(&instance.id).await? {
            if !existing.terminal {
                return Err(Error::instance_already_running(&instance.id));
            }
        }
        self.save(&instance).await
    }

    async fn load(&self, id: &str) -> Result<Option<WorkflowInstance>> {
        self.load_record(id)
            .await?
            .map(|record| record.decode())
            .transpose()
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
        let mut live = self
            .all_records()
            .await?
            .iter()
            .filter(|r| !r.terminal)
            .map(InstanceRecord::decode)
            .collect::<Result<Vec<_>>>()?;
        live.sort_by_key(|i| i.created_at);
        Ok(live)
    }

    async fn purge_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let expired = self
            .all_records()
            .await?
            .into_iter()
            .filter(|r| r.terminal && r.last_updated_at < cutoff)
            .map(|r| r.instance_id)
            .collect::<Vec<_>>();

        for id in &expired {
            let _: Option<InstanceRecord> = self
                .db
                .delete((TABLE, id.as_str()))
                .await
                .map_err(|e| Error::storage_failed("purge_instance", format!("surrealdb error: {e}")))?;
        }
        Ok(expired.len())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::types::ActivityResult;
    use serde_json::json;

    async fn store() -> SurrealInstanceStore {
        SurrealInstanceStore::connect(&SurrealStoreConfig::in_memory())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip_through_compression() {
        let mut instance =
            WorkflowInstance::new("E1-UPDCGN-ACTIVATED", "UpdateCgn", json!({"holder_id": "E1"}), Utc::now());
        instance
            .append(
                vec![HistoryEvent::ActivityCompleted {
                    seq: 0,
                    name: "UpdateStatus".into(),
                    input: json!({"holder_id": "E1"}),
                    result: ActivityResult::success(json!({"version": 2})),
                    attempts: 1,
                    recorded_at: Utc::now(),
                }],
                Some(CustomStatus::Updated),
                Utc::now(),
            )
            .unwrap();

        let record = InstanceRecord::encode(&instance).unwrap();
        assert_eq!(record.decode().unwrap(), instance);
    }

    #[tokio::test]
    async fn test_create_append_and_reload() {
        let store = store().await;
        let instance = WorkflowInstance::new("E1-UPDCGN-ACTIVATED", "UpdateCgn", json!({}), Utc::now());
        store.create(instance).await.unwrap();

        store
            .append("E1-UPDCGN-ACTIVATED", vec![], Some(CustomStatus::Updated), Utc::now())
            .await
            .unwrap();

        let reloaded = store.load("E1-UPDCGN-ACTIVATED").await.unwrap().unwrap();
        assert_eq!(reloaded.custom_status, CustomStatus::Updated);
    }

    #[tokio::test]
    async fn test_duplicate_live_instance_rejected() {
        let store = store().await;
        let instance = WorkflowInstance::new("E1-UPDCGN-ACTIVATED", "UpdateCgn", json!({}), Utc::now());
        store.create(instance.clone()).await.unwrap();

        let result = store.create(instance).await;
        assert!(matches!(result, Err(Error::InstanceAlreadyRunning { .. })));
    }

    #[tokio::test]
    async fn test_list_live_and_purge() {
        let store = store().await;
        for id in ["A", "B"] {
            store
                .create(WorkflowInstance::new(id, "UpdateCgn", json!({}), Utc::now()))
                .await
                .unwrap();
        }
        store
            .finish("A", InstanceOutcome::Completed(json!(true)), Utc::now())
            .await
            .unwrap();

        let live = store.list_live().await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, "B");

        let purged = store
            .purge_terminal_before(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert!(store.load("A").await.unwrap().is_none());
    }
}
