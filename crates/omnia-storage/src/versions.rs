//! ArenaSource content-addressed version history (spec.md §4.4, §6).
//!
//! A version is identified purely by its content hash, so two sources whose
//! fetched trees are byte-identical share one history entry — this is what
//! makes "content-addressed" testable (spec.md §8 property 7).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::desired_state::StoreError;

#[derive(Debug, Clone)]
pub struct VersionRecord {
    pub content_version: String,
    pub target_path: String,
    pub size_bytes: u64,
    pub first_seen_at: DateTime<Utc>,
    /// Every `(namespace, name)` ArenaSource that has produced this content.
    pub contributing_sources: Vec<(String, String)>,
}

#[async_trait]
pub trait VersionHistoryStore: Send + Sync {
    /// Record that `source` produced `content_version` under `target_path`.
    /// Idempotent: recording the same version from a different source just
    /// appends it to `contributing_sources` rather than duplicating history.
    async fn record(
        &self,
        namespace: &str,
        name: &str,
        content_version: &str,
        target_path: &str,
        size_bytes: u64,
    ) -> Result<(), StoreError>;

    async fn get(&self, content_version: &str) -> Result<Option<VersionRecord>, StoreError>;

    /// All versions ever produced by a given source, newest first.
    async fn history_for(&self, namespace: &str, name: &str) -> Result<Vec<VersionRecord>, StoreError>;
}

#[derive(Default)]
pub struct InMemoryVersionHistoryStore {
    versions: DashMap<String, VersionRecord>,
}

impl InMemoryVersionHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VersionHistoryStore for InMemoryVersionHistoryStore {
    async fn record(
        &self,
        namespace: &str,
        name: &str,
        content_version: &str,
        target_path: &str,
        size_bytes: u64,
    ) -> Result<(), StoreError> {
        let source = (namespace.to_string(), name.to_string());
        self.versions
            .entry(content_version.to_string())
            .and_modify(|record| {
                if !record.contributing_sources.contains(&source) {
                    record.contributing_sources.push(source.clone());
                }
            })
            .or_insert_with(|| VersionRecord {
                content_version: content_version.to_string(),
                target_path: target_path.to_string(),
                size_bytes,
                first_seen_at: Utc::now(),
                contributing_sources: vec![source],
            });
        Ok(())
    }

    async fn get(&self, content_version: &str) -> Result<Option<VersionRecord>, StoreError> {
        Ok(self.versions.get(content_version).map(|r| r.clone()))
    }

    async fn history_for(&self, namespace: &str, name: &str) -> Result<Vec<VersionRecord>, StoreError> {
        let source = (namespace.to_string(), name.to_string());
        let mut records: Vec<VersionRecord> = self
            .versions
            .iter()
            .filter(|r| r.contributing_sources.contains(&source))
            .map(|r| r.clone())
            .collect();
        records.sort_by(|a, b| b.first_seen_at.cmp(&a.first_seen_at));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn identical_content_from_two_sources_shares_one_version_record() {
        let store = InMemoryVersionHistoryStore::new();
        store.record("team-a", "source-git", "sha256:abc", "/packs", 128).await.unwrap();
        store.record("team-a", "source-oci", "sha256:abc", "/packs", 128).await.unwrap();

        let record = store.get("sha256:abc").await.unwrap().unwrap();
        assert_eq!(record.contributing_sources.len(), 2);
    }

    #[tokio::test]
    async fn history_for_source_is_newest_first() {
        let store = InMemoryVersionHistoryStore::new();
        store.record("team-a", "source-git", "sha256:v1", "/packs", 10).await.unwrap();
        store.record("team-a", "source-git", "sha256:v2", "/packs", 20).await.unwrap();

        let history = store.history_for("team-a", "source-git").await.unwrap();
        assert_eq!(history.len(), 2);
    }
}
