//! Backup-then-delete of a holder's records.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::Result;

/// Proof that a backup was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupReceipt {
    pub holder_id: String,
    pub records: usize,
    pub stored_at: DateTime<Utc>,
}

/// Archive for holder data removed from the live stores.
#[async_trait]
pub trait BackupStore: Send + Sync {
    /// Archive `records` for the holder. Repeating a backup overwrites it.
    async fn backup(&self, holder_id: &str, records: &[Value]) -> Result<BackupReceipt>;

    /// Load the archived records, if any.
    async fn get(&self, holder_id: &str) -> Result<Option<Vec<Value>>>;
}

/// In-memory backup store.
#[derive(Debug, Default)]
pub struct InMemoryBackupStore {
    archives: RwLock<HashMap<String, Vec<Value>>>,
}

impl InMemoryBackupStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BackupStore for InMemoryBackupStore {
    async fn backup(&self, holder_id: &str, records: &[Value]) -> Result<BackupReceipt> {
        self.archives
            .write()
            .await
            .insert(holder_id.to_string(), records.to_vec());
        Ok(BackupReceipt {
            holder_id: holder_id.to_string(),
            records: records.len(),
            stored_at: Utc::now(),
        })
    }

    async fn get(&self, holder_id: &str) -> Result<Option<Vec<Value>>> {
        Ok(self.archives.read().await.get(holder_id).cloned())
    }
}
