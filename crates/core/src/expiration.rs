//! Expiration records consumed by the periodic expiration scanner.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::Result;

/// Durable fact needed to schedule a card's expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpirationRecord {
    pub holder_id: String,
    pub activation_date: NaiveDate,
    pub expiration_date: NaiveDate,
}

/// Store of pending card expirations.
#[async_trait]
pub trait ExpirationStore: Send + Sync {
    /// Insert or overwrite the record for a holder.
    async fn upsert(&self, record: ExpirationRecord) -> Result<()>;

    /// Remove the record for a holder. Returns whether one existed.
    async fn delete(&self, holder_id: &str) -> Result<bool>;

    /// Load the record for a holder.
    async fn get(&self, holder_id: &str) -> Result<Option<ExpirationRecord>>;

    /// Records expiring on or before `date`.
    async fn due_on_or_before(&self, date: NaiveDate) -> Result<Vec<ExpirationRecord>>;
}

/// In-memory expiration store.
#[derive(Debug, Default)]
pub struct InMemoryExpirationStore {
    records: RwLock<BTreeMap<String, ExpirationRecord>>,
}

impl InMemoryExpirationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExpirationStore for InMemoryExpirationStore {
    async fn upsert(&self, record: ExpirationRecord) -> Result<()> {
        self.records
            .write()
            .await
            .insert(record.holder_id.clone(), record);
        Ok(())
    }

    async fn delete(&self, holder_id: &str) -> Result<bool> {
        Ok(self.records.write().await.remove(holder_id).is_some())
    }

    async fn get(&self, holder_id: &str) -> Result<Option<ExpirationRecord>> {
        Ok(self.records.read().await.get(holder_id).cloned())
    }

    async fn due_on_or_before(&self, date: NaiveDate) -> Result<Vec<ExpirationRecord>> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.expiration_date <= date)
            .cloned()
            .collect_vec())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn record(holder: &str, exp: (i32, u32, u32)) -> ExpirationRecord {
        ExpirationRecord {
            holder_id: holder.into(),
            activation_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            expiration_date: NaiveDate::from_ymd_opt(exp.0, exp.1, exp.2).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_upsert_and_due() {
        let store = InMemoryExpirationStore::new();
        store.upsert(record("AAA", (2024, 1, 1))).await.unwrap();
        store.upsert(record("BBB", (2026, 1, 1))).await.unwrap();

        let due = store
            .due_on_or_before(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap())
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].holder_id, "AAA");
    }

    #[tokio::test]
    async fn test_delete_reports_existence() {
        let store = InMemoryExpirationStore::new();
        store.upsert(record("AAA", (2024, 1, 1))).await.unwrap();
        assert!(store.delete("AAA").await.unwrap());
        assert!(!store.delete("AAA").await.unwrap());
    }
}
