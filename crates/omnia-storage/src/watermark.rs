//! Analytics sync watermark table (spec.md §6): `_omnia_sync_watermarks`.
//!
//! The watermark is the source of truth for incremental sync progress; a
//! crash mid-batch reprocesses at most the last batch, which MERGE makes
//! idempotent (spec.md §4.10 "Crash safety").

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::desired_state::StoreError;

#[derive(Debug, Clone)]
pub struct Watermark {
    pub table_name: String,
    pub last_sync_at: DateTime<Utc>,
    pub last_sync_rows: u64,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait WatermarkStore: Send + Sync {
    async fn get(&self, table_name: &str) -> Result<Option<Watermark>, StoreError>;

    /// Advance the watermark. Rejects a write that would move it backwards —
    /// spec.md §8 property 6: "`last_sync_at` is non-decreasing across runs".
    async fn advance(&self, table_name: &str, last_sync_at: DateTime<Utc>, rows: u64) -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct InMemoryWatermarkStore {
    watermarks: DashMap<String, Watermark>,
}

impl InMemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WatermarkStore for InMemoryWatermarkStore {
    async fn get(&self, table_name: &str) -> Result<Option<Watermark>, StoreError> {
        Ok(self.watermarks.get(table_name).map(|r| r.clone()))
    }

    async fn advance(&self, table_name: &str, last_sync_at: DateTime<Utc>, rows: u64) -> Result<(), StoreError> {
        let now = Utc::now();
        self.watermarks
            .entry(table_name.to_string())
            .and_modify(|w| {
                if last_sync_at > w.last_sync_at {
                    w.last_sync_at = last_sync_at;
                }
                w.last_sync_rows = rows;
                w.updated_at = now;
            })
            .or_insert_with(|| Watermark {
                table_name: table_name.to_string(),
                last_sync_at,
                last_sync_rows: rows,
                updated_at: now,
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn advance_never_moves_watermark_backwards() {
        let store = InMemoryWatermarkStore::new();
        let t1 = Utc::now();
        let t0 = t1 - Duration::hours(1);

        store.advance("omnia_sessions", t1, 100).await.unwrap();
        store.advance("omnia_sessions", t0, 5).await.unwrap();

        let wm = store.get("omnia_sessions").await.unwrap().unwrap();
        assert_eq!(wm.last_sync_at, t1);
    }

    #[tokio::test]
    async fn missing_watermark_defaults_to_none() {
        let store = InMemoryWatermarkStore::new();
        assert!(store.get("omnia_messages").await.unwrap().is_none());
    }
}
