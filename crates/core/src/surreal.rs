//! SurrealDB-backed card, expiration, and backup stores.
//!
//! These share the client of the instance store so a durable deployment
//! keeps cards and workflow history in one database. Cards are stored as a
//! JSON snapshot next to the fields needed to find them.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tokio::sync::Mutex;

use crate::backup::{BackupReceipt, BackupStore};
use crate::card::{Card, CardKind, CardStatus, StatusTag};
use crate::error::{Error, Result};
use crate::expiration::{ExpirationRecord, ExpirationStore};
use crate::store::CardStore;

const CARD_TABLE: &str = "card";
const EXPIRATION_TABLE: &str = "expiration";
const BACKUP_TABLE: &str = "backup";

fn surreal_error(operation: &str, e: &surrealdb::Error) -> Error {
    Error::store_failed(operation, format!("surrealdb error: {e}"))
}

fn card_key(kind: CardKind, holder_id: &str) -> String {
    format!("{kind}-{holder_id}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CardRecord {
    holder_id: String,
    kind: CardKind,
    status: StatusTag,
    version: u64,
    snapshot: String,
}

impl CardRecord {
    fn encode(card: &Card) -> Result<Self> {
        let snapshot = serde_json::to_string(card)
            .map_err(|e| Error::store_failed("encode_card", e.to_string()))?;
        Ok(Self {
            holder_id: card.holder_id.clone(),
            kind: card.kind,
            status: card.status.tag(),
            version: card.version,
            snapshot,
        })
    }

    fn decode(&self) -> Result<Card> {
        serde_json::from_str(&self.snapshot).map_err(|e| Error::store_failed("decode_card", e.to_string()))
    }
}

/// Card store on SurrealDB.
#[derive(Debug, Clone)]
pub struct SurrealCardStore {
    db: Arc<Surreal<Any>>,
    /// Serializes read-modify-write cycles on cards.
    write_lock: Arc<Mutex<()>>,
}

impl SurrealCardStore {
    pub fn new(db: Arc<Surreal<Any>>) -> Self {
        Self {
            db,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    async fn load(&self, kind: CardKind, holder_id: &str) -> Result<Option<Card>> {
        let record: Option<CardRecord> = self
            .db
            .select((CARD_TABLE, card_key(kind, holder_id)))
            .await
            .map_err(|e| surreal_error("load_card", &e))?;
        record.map(|r| r.decode()).transpose()
    }

    async fn save(&self, card: &Card) -> Result<()> {
        let saved: Option<CardRecord> = self
            .db
            .upsert((CARD_TABLE, card_key(card.kind, &card.holder_id)))
            .content(CardRecord::encode(card)?)
            .await
            .map_err(|e| surreal_error("save_card", &e))?;
        saved
            .map(|_| ())
            .ok_or_else(|| Error::store_failed("save_card", "no result returned from database"))
    }
}

#[async_trait]
impl CardStore for SurrealCardStore {
    async fn get(&self, kind: CardKind, holder_id: &str) -> Result<Option<Card>> {
        self.load(kind, holder_id).await
    }

    async fn insert_pending(
        &self,
        kind: CardKind,
        holder_id: &str,
        requested_at: DateTime<Utc>,
    ) -> Result<Card> {
        let _guard = self.write_lock.lock().await;
        if let Some(existing) = self.load(kind, holder_id).await? {
            return match existing.status.tag() {
                StatusTag::Pending => Ok(existing),
                other => Err(Error::invalid_transition(other, StatusTag::Pending)),
            };
        }
        let card = Card::pending(kind, holder_id, requested_at);
        self.save(&card).await?;
        Ok(card)
    }

    async fn update_status(
        &self,
        kind: CardKind,
        holder_id: &str,
        status: CardStatus,
        expected_version: Option<u64>,
    ) -> Result<Card> {
        let _guard = self.write_lock.lock().await;
        let current = self
            .load(kind, holder_id)
            .await?
            .ok_or_else(|| Error::card_not_found(kind, holder_id))?;

        if current.status.tag() == status.tag() {
            return Ok(current);
        }
        if let Some(expected) = expected_version {
            if expected != current.version {
                return Err(Error::version_conflict(holder_id, expected, current.version));
            }
        }

        let next = current.transition(status, Utc::now())?;
        self.save(&next).await?;
        Ok(next)
    }

    async fn delete(&self, kind: CardKind, holder_id: &str) -> Result<Option<Card>> {
        let _guard = self.write_lock.lock().await;
        let removed: Option<CardRecord> = self
            .db
            .delete((CARD_TABLE, card_key(kind, holder_id)))
            .await
            .map_err(|e| surreal_error("delete_card", &e))?;
        removed.map(|r| r.decode()).transpose()
    }
}

/// Expiration store on SurrealDB, keyed by holder.
#[derive(Debug, Clone)]
pub struct SurrealExpirationStore {
    db: Arc<Surreal<Any>>,
}

impl SurrealExpirationStore {
    pub const fn new(db: Arc<Surreal<Any>>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ExpirationStore for SurrealExpirationStore {
    async fn upsert(&self, record: ExpirationRecord) -> Result<()> {
        let saved: Option<ExpirationRecord> = self
            .db
            .upsert((EXPIRATION_TABLE, record.holder_id.as_str()))
            .content(record)
            .await
            .map_err(|e| surreal_error("save_expiration", &e))?;
        saved
            .map(|_| ())
            .ok_or_else(|| Error::store_failed("save_expiration", "no result returned from database"))
    }

    async fn delete(&self, holder_id: &str) -> Result<bool> {
        let removed: Option<ExpirationRecord> = self
            .db
            .delete((EXPIRATION_TABLE, holder_id))
            .await
            .map_err(|e| surreal_error("delete_expiration", &e))?;
        Ok(removed.is_some())
    }

    async fn get(&self, holder_id: &str) -> Result<Option<ExpirationRecord>> {
        self.db
            .select((EXPIRATION_TABLE, holder_id))
            .await
            .map_err(|e| surreal_error("load_expiration", &e))
    }

    async fn due_on_or_before(&self, date: NaiveDate) -> Result<Vec<ExpirationRecord>> {
        let all: Vec<ExpirationRecord> = self
            .db
            .select(EXPIRATION_TABLE)
            .await
            .map_err(|e| surreal_error("list_expirations", &e))?;
        Ok(all
            .into_iter()
            .filter(|r| r.expiration_date <= date)
            .sorted_by(|a, b| a.holder_id.cmp(&b.holder_id))
            .collect_vec())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BackupRecord {
    holder_id: String,
    records: String,
    stored_at: DateTime<Utc>,
}

/// Backup archive on SurrealDB, one record per holder.
#[derive(Debug, Clone)]
pub struct SurrealBackupStore {
    db: Arc<Surreal<Any>>,
}

impl SurrealBackupStore {
    pub const fn new(db: Arc<Surreal<Any>>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl BackupStore for SurrealBackupStore {
    async fn backup(&self, holder_id: &str, records: &[Value]) -> Result<BackupReceipt> {
        let archive = BackupRecord {
            holder_id: holder_id.to_string(),
            records: serde_json::to_string(records)
                .map_err(|e| Error::backup_failed(holder_id, e.to_string()))?,
            stored_at: Utc::now(),
        };
        let stored_at = archive.stored_at;
        let saved: Option<BackupRecord> = self
            .db
            .upsert((BACKUP_TABLE, holder_id))
            .content(archive)
            .await
            .map_err(|e| Error::backup_failed(holder_id, format!("surrealdb error: {e}")))?;
        saved.ok_or_else(|| Error::backup_failed(holder_id, "no result returned from database"))?;
        Ok(BackupReceipt {
            holder_id: holder_id.to_string(),
            records: records.len(),
            stored_at,
        })
    }

    async fn get(&self, holder_id: &str) -> Result<Option<Vec<Value>>> {
        let archive: Option<BackupRecord> = self
            .db
            .select((BACKUP_TABLE, holder_id))
            .await
            .map_err(|e| surreal_error("load_backup", &e))?;
        archive
            .map(|a| {
                serde_json::from_str(&a.records).map_err(|e| Error::store_failed("decode_backup", e.to_string()))
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use serde_json::json;

    async fn client() -> Arc<Surreal<Any>> {
        let db = Surreal::<Any>::init();
        db.connect("mem://").await.unwrap();
        db.use_ns("cgn").use_db("cards").await.unwrap();
        Arc::new(db)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_card_lifecycle_survives_reconnect() {
        let db = client().await;
        let store = SurrealCardStore::new(Arc::clone(&db));
        store
            .insert_pending(CardKind::Cgn, "AAA", Utc::now())
            .await
            .unwrap();
        let activated = store
            .update_status(
                CardKind::Cgn,
                "AAA",
                CardStatus::Activated {
                    activation_date: date(2024, 3, 1),
                    expiration_date: date(2030, 3, 1),
                    card_number: None,
                },
                Some(1),
            )
            .await
            .unwrap();
        assert_eq!(activated.version, 2);

        // A second store over the same client sees the write.
        let reopened = SurrealCardStore::new(db);
        let card = reopened.get(CardKind::Cgn, "AAA").await.unwrap().unwrap();
        assert_eq!(card, activated);
        assert!(reopened.get(CardKind::Eyca, "AAA").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_card_rules_match_in_memory_store() {
        let store = SurrealCardStore::new(client().await);
        store
            .insert_pending(CardKind::Cgn, "AAA", Utc::now())
            .await
            .unwrap();

        let stale = store
            .update_status(
                CardKind::Cgn,
                "AAA",
                CardStatus::Expired {
                    activation_date: date(2024, 3, 1),
                    expiration_date: date(2024, 3, 1),
                },
                None,
            )
            .await;
        assert!(matches!(stale, Err(Error::InvalidTransition { .. })));

        let missing = store
            .update_status(
                CardKind::Eyca,
                "AAA",
                CardStatus::Pending {
                    requested_at: Utc::now(),
                },
                None,
            )
            .await;
        assert!(matches!(missing, Err(Error::CardNotFound { .. })));

        assert!(store.delete(CardKind::Cgn, "AAA").await.unwrap().is_some());
        assert!(store.get(CardKind::Cgn, "AAA").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expiration_records_and_due_scan() {
        let store = SurrealExpirationStore::new(client().await);
        for (holder, year) in [("BBB", 2026), ("AAA", 2024)] {
            store
                .upsert(ExpirationRecord {
                    holder_id: holder.into(),
                    activation_date: date(2020, 1, 1),
                    expiration_date: date(year, 1, 1),
                })
                .await
                .unwrap();
        }

        let due = store.due_on_or_before(date(2025, 1, 1)).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].holder_id, "AAA");

        assert!(store.delete("AAA").await.unwrap());
        assert!(!store.delete("AAA").await.unwrap());
        assert!(store.get("BBB").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_backup_overwrites() {
        let store = SurrealBackupStore::new(client().await);
        store.backup("AAA", &[json!({"a": 1})]).await.unwrap();
        let receipt = store
            .backup("AAA", &[json!({"a": 1}), json!({"b": 2})])
            .await
            .unwrap();

        assert_eq!(receipt.records, 2);
        assert_eq!(store.get("AAA").await.unwrap().unwrap().len(), 2);
    }
}
