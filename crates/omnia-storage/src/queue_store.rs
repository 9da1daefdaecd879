//! Durable backing store for the watch/work queue (spec.md §4.2), so pending
//! keys, attempt counters, and `next_attempt_at` survive a control-plane
//! restart. The in-process queue (`omnia-control-plane::queue`) is the
//! source of truth for scheduling while the process is up; this store is
//! only consulted on startup to repopulate it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::desired_state::{ObjectKey, StoreError};

#[derive(Debug, Clone)]
pub struct PendingKey {
    pub key: ObjectKey,
    pub attempt: u32,
    pub next_attempt_at: DateTime<Utc>,
}

#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn upsert(&self, entry: PendingKey) -> Result<(), StoreError>;
    async fn remove(&self, key: &ObjectKey) -> Result<(), StoreError>;
    async fn load_all(&self) -> Result<Vec<PendingKey>, StoreError>;
}

#[derive(Default)]
pub struct InMemoryQueueStore {
    entries: DashMap<ObjectKey, PendingKey>,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn upsert(&self, entry: PendingKey) -> Result<(), StoreError> {
        self.entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn remove(&self, key: &ObjectKey) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<PendingKey>, StoreError> {
        Ok(self.entries.iter().map(|r| r.clone()).collect())
    }
}

/// Dead-letter entry: a key whose backoff ceiling was exhausted without the
/// underlying object changing (SPEC_FULL.md §11 "Dead-letter visibility").
#[derive(Debug, Clone)]
pub struct DlqEntry {
    pub key: ObjectKey,
    pub last_error: String,
    pub attempts: u32,
    pub observed_generation: i64,
    pub dead_lettered_at: DateTime<Utc>,
}

#[async_trait]
pub trait DlqStore: Send + Sync {
    async fn insert(&self, entry: DlqEntry) -> Result<(), StoreError>;
    async fn list(&self) -> Result<Vec<DlqEntry>, StoreError>;
    async fn remove(&self, key: &ObjectKey) -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct InMemoryDlqStore {
    entries: DashMap<ObjectKey, DlqEntry>,
}

impl InMemoryDlqStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DlqStore for InMemoryDlqStore {
    async fn insert(&self, entry: DlqEntry) -> Result<(), StoreError> {
        self.entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<DlqEntry>, StoreError> {
        Ok(self.entries.iter().map(|r| r.clone()).collect())
    }

    async fn remove(&self, key: &ObjectKey) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queue_store_round_trips_pending_keys() {
        let store = InMemoryQueueStore::new();
        let key = ObjectKey::new("PromptPack", "a", "x");
        store
            .upsert(PendingKey {
                key: key.clone(),
                attempt: 2,
                next_attempt_at: Utc::now(),
            })
            .await
            .unwrap();
        assert_eq!(store.load_all().await.unwrap().len(), 1);
        store.remove(&key).await.unwrap();
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dlq_store_lists_dead_lettered_keys() {
        let store = InMemoryDlqStore::new();
        let key = ObjectKey::new("PromptPack", "a", "x");
        store
            .insert(DlqEntry {
                key: key.clone(),
                last_error: "boom".into(),
                attempts: 10,
                observed_generation: 3,
                dead_lettered_at: Utc::now(),
            })
            .await
            .unwrap();
        assert_eq!(store.list().await.unwrap().len(), 1);
    }
}
