//! Versioned card store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use tokio::sync::RwLock;

use crate::card::{Card, CardKind, CardStatus, StatusTag};
use crate::error::{Error, Result};

/// Persistence for the current version of each card.
#[async_trait]
pub trait CardStore: Send + Sync {
    /// Load the current card, if any.
    async fn get(&self, kind: CardKind, holder_id: &str) -> Result<Option<Card>>;

    /// Create a pending card, or return the existing one if it is still pending.
    ///
    /// Fails with `InvalidTransition` when the card already moved past pending.
    async fn insert_pending(
        &self,
        kind: CardKind,
        holder_id: &str,
        requested_at: DateTime<Utc>,
    ) -> Result<Card>;

    /// Write a new status.
    ///
    /// When `expected_version` is set the write only succeeds against that
    /// version. Writing the status the card already has is a no-op.
    async fn update_status(
        &self,
        kind: CardKind,
        holder_id: &str,
        status: CardStatus,
        expected_version: Option<u64>,
    ) -> Result<Card>;

    /// Remove a card, returning the removed record.
    async fn delete(&self, kind: CardKind, holder_id: &str) -> Result<Option<Card>>;
}

/// In-memory card store.
#[derive(Debug, Default)]
pub struct InMemoryCardStore {
    cards: RwLock<HashMap<(CardKind, String), Card>>,
    writes: RwLock<u64>,
}

impl InMemoryCardStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of writes that actually changed a record.
    pub async fn write_count(&self) -> u64 {
        *self.writes.read().await
    }

    /// Every stored card, sorted by holder.
    pub async fn all(&self) -> Vec<Card> {
        self.cards
            .read()
            .await
            .values()
            .cloned()
            .sorted_by(|a, b| a.holder_id.cmp(&b.holder_id))
            .collect_vec()
    }

    /// Seed a card directly, bypassing lifecycle checks.
    pub async fn seed(&self, card: Card) {
        self.cards
            .write()
            .await
            .insert((card.kind, card.holder_id.clone()), card);
    }

    async fn bump_writes(&self) {
        let mut writes = self.writes.write().await;
        *writes = writes.saturating_add(1);
    }
}

#[async_trait]
impl CardStore for InMemoryCardStore {
    async fn get(&self, kind: CardKind, holder_id: &str) -> Result<Option<Card>> {
        Ok(self
            .cards
            .read()
            .await
            .get(&(kind, holder_id.to_string()))
            .cloned())
    }

    async fn insert_pending(
        &self,
        kind: CardKind,
        holder_id: &str,
        requested_at: DateTime<Utc>,
    ) -> Result<Card> {
        let key = (kind, holder_id.to_string());
        let mut cards = self.cards.write().await;
        if let Some(existing) = cards.get(&key) {
            return match existing.status.tag() {
                StatusTag::Pending => Ok(existing.clone()),
                other => Err(Error::invalid_transition(other, StatusTag::Pending)),
            };
        }
        let card = Card::pending(kind, holder_id, requested_at);
        cards.insert(key, card.clone());
        drop(cards);
        self.bump_writes().await;
        Ok(card)
    }

    async fn update_status(
        &self,
        kind: CardKind,
        holder_id: &str,
        status: CardStatus,
        expected_version: Option<u64>,
    ) -> Result<Card> {
        let key = (kind, holder_id.to_string());
        let mut cards = self.cards.write().await;
        let current = cards
            .get(&key)
            .ok_or_else(|| Error::card_not_found(kind, holder_id))?;

        if current.status.tag() == status.tag() {
            return Ok(current.clone());
        }
        if let Some(expected) = expected_version {
            if expected != current.version {
                return Err(Error::version_conflict(holder_id, expected, current.version));
            }
        }

        let next = current.transition(status, Utc::now())?;
        cards.insert(key, next.clone());
        drop(cards);
        self.bump_writes().await;
        Ok(next)
    }

    async fn delete(&self, kind: CardKind, holder_id: &str) -> Result<Option<Card>> {
        let removed = self
            .cards
            .write()
            .await
            .remove(&(kind, holder_id.to_string()));
        if removed.is_some() {
            self.bump_writes().await;
        }
        Ok(removed)
    }
}
