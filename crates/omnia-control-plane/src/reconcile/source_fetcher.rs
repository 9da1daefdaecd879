//! Source Fetcher Engine (C4, spec.md §4.4).
//!
//! Fetches `ArenaSource` content (git/oci/configmap), computes a stable
//! revision string, and — when the tree actually changed — a
//! content-addressed version shared across sources with byte-identical
//! trees (spec.md §8 property 7, S4).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use omnia_core::domain::{ArenaSourcePhase, ArenaSourceSpec, ArenaSourceStatus, ArtifactInfo, SourceType};
use omnia_core::{Condition, ConditionStatus, ReconcileError, RequeueHint};
use omnia_storage::{StoredObject, VersionHistoryStore, VersionRecord};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex as AsyncMutex;

use crate::dispatcher::{ReconcileOutput, Reconciler};
use crate::queue::ReconcileKey;

/// One file within a fetched tree, already content-hashed.
#[derive(Debug, Clone)]
pub struct FetchedEntry {
    pub path: String,
    pub mode: u32,
    pub contents: Vec<u8>,
}

/// A fetched source tree. `entries` need not arrive sorted — the canonical
/// encoder sorts them (spec.md §4.4 step 5: "the SHA-256 of a canonical
/// encoding of the fetched tree (sorted entries; for each: path, mode,
/// contents hash)").
#[derive(Debug, Clone, Default)]
pub struct FetchedTree {
    pub entries: Vec<FetchedEntry>,
}

/// Computes the content version per spec.md §4.4 step 5. Content-addressed:
/// two byte-identical trees hash to the same version regardless of source.
pub fn compute_content_version(tree: &FetchedTree) -> String {
    let mut entries: Vec<&FetchedEntry> = tree.entries.iter().collect();
    entries.sort_by(|a, b| a.path.cmp(&b.path));

    let mut hasher = Sha256::new();
    for entry in entries {
        hasher.update(entry.path.as_bytes());
        hasher.update([0u8]);
        hasher.update(entry.mode.to_le_bytes());
        let content_hash = Sha256::digest(&entry.contents);
        hasher.update(content_hash);
    }
    hex::encode(hasher.finalize())
}

/// Abstracts the actual Git/OCI/ConfigMap transport (spec.md §1 non-goal:
/// "the specific container-cluster client library" and upstream source
/// protocols are named collaborators, described by the operations the core
/// needs from them).
#[async_trait]
pub trait SourceTransport: Send + Sync {
    async fn fetch(
        &self,
        spec: &ArenaSourceSpec,
        timeout: Duration,
    ) -> Result<(String, FetchedTree), ReconcileError>;
}

/// Writes versioned content under `targetPath/<version>/` and flips the
/// `head` symlink (spec.md §4.4 step 6).
#[async_trait]
pub trait ContentVolumeWriter: Send + Sync {
    async fn write_version(
        &self,
        target_path: &str,
        version: &str,
        tree: &FetchedTree,
    ) -> Result<String, ReconcileError>;

    async fn flip_head(&self, target_path: &str, version: &str) -> Result<(), ReconcileError>;
}

pub struct SourceFetcherReconciler {
    transport: Arc<dyn SourceTransport>,
    volume: Arc<dyn ContentVolumeWriter>,
    versions: Arc<dyn VersionHistoryStore>,
    fetch_locks: DashMap<String, Arc<AsyncMutex<()>>>,
}

impl SourceFetcherReconciler {
    pub fn new(
        transport: Arc<dyn SourceTransport>,
        volume: Arc<dyn ContentVolumeWriter>,
        versions: Arc<dyn VersionHistoryStore>,
    ) -> Self {
        Self {
            transport,
            volume,
            versions,
            fetch_locks: DashMap::new(),
        }
    }

    fn fetch_lock(&self, key: &str) -> Arc<AsyncMutex<()>> {
        Arc::clone(self.fetch_locks.entry(key.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))))
    }
}

#[async_trait]
impl Reconciler for SourceFetcherReconciler {
    fn kind(&self) -> &'static str {
        "ArenaSource"
    }

    async fn reconcile(&self, object: &StoredObject) -> Result<ReconcileOutput, ReconcileError> {
        let spec: ArenaSourceSpec = serde_json::from_value(object.spec.clone())
            .map_err(|e| ReconcileError::Validation(e.to_string()))?;
        let mut status: ArenaSourceStatus = serde_json::from_value(object.status.clone()).unwrap_or_default();

        if spec.suspend {
            status.phase = Some(ArenaSourcePhase::Pending);
            let mut conditions = object.conditions.clone();
            set_condition(&mut conditions, "Ready", ConditionStatus::Unknown, "Suspended", "source is suspended");
            return Ok(ReconcileOutput::new(serde_json::to_value(&status).unwrap(), conditions));
        }

        let now = Utc::now();
        if let Some(next) = status.next_fetch_time {
            if now < next {
                let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
                return Ok(ReconcileOutput::new(object.status.clone(), object.conditions.clone())
                    .requeue_after(RequeueHint::After(wait)));
            }
        }

        let lock_key = format!("{}/{}", object.key.namespace, object.key.name);
        let lock = self.fetch_lock(&lock_key);
        let _guard = lock.lock().await;

        let timeout = Duration::from_secs(spec.timeout_secs.unwrap_or(spec.interval_secs * 10));
        let (revision, tree) = match tokio::time::timeout(timeout, self.transport.fetch(&spec, timeout)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(ReconcileError::Transient(format!("fetch timed out after {timeout:?}"))),
        };

        let interval = Duration::from_secs(spec.interval_secs);

        if status.last_sync_revision.as_deref() == Some(revision.as_str()) {
            status.next_fetch_time = Some(now + interval);
            status.phase = Some(ArenaSourcePhase::Ready);
            let mut conditions = object.conditions.clone();
            set_condition(&mut conditions, "Ready", ConditionStatus::True, "UpToDate", "no change since last sync");
            return Ok(ReconcileOutput::new(serde_json::to_value(&status).unwrap(), conditions)
                .requeue_after(RequeueHint::After(interval)));
        }

        let version = compute_content_version(&tree);
        let already_known = self.versions.get(&version).await.is_some();

        let content_path = if spec.create_version_on_sync {
            let path = self.volume.write_version(&spec.target_path, &version, &tree).await?;
            if !already_known {
                self.versions
                    .record(VersionRecord {
                        content_version: version.clone(),
                        target_path: spec.target_path.clone(),
                        size_bytes: tree.entries.iter().map(|e| e.contents.len() as u64).sum(),
                        first_seen_at: now,
                        contributing_sources: vec![(object.key.namespace.clone(), object.key.name.clone())],
                    })
                    .await;
            }
            self.volume.flip_head(&spec.target_path, &version).await?;
            Some(path)
        } else {
            None
        };

        status.phase = Some(ArenaSourcePhase::Ready);
        status.last_sync_revision = Some(revision.clone());
        status.last_version_created = Some(version.clone());
        status.head_version = Some(version.clone());
        status.version_count += 1;
        status.next_fetch_time = Some(now + interval);
        status.artifact = ArtifactInfo {
            revision: Some(revision),
            content_path,
            version: Some(version),
            checksum: None,
            size: Some(tree.entries.iter().map(|e| e.contents.len() as u64).sum()),
            last_update_time: Some(now),
        };

        let mut conditions = object.conditions.clone();
        set_condition(&mut conditions, "Ready", ConditionStatus::True, "Synced", "source fetched and versioned");

        Ok(ReconcileOutput::new(serde_json::to_value(&status).unwrap(), conditions)
            .requeue_after(RequeueHint::After(interval)))
    }
}

fn set_condition(conditions: &mut Vec<Condition>, kind: &str, status: ConditionStatus, reason: &str, message: &str) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.kind == kind) {
        if existing.status != status {
            existing.status = status;
            existing.last_transition_time = Utc::now();
        }
        existing.reason = reason.to_string();
        existing.message = message.to_string();
    } else {
        conditions.push(Condition::new(kind, status, reason, message));
    }
}

/// In-memory transport used by the reconciler's own test suite — resolves a
/// fixed `(revision, tree)` per source type without real I/O, named fakes
/// so downstream integration tests can reuse them too.
pub struct FakeSourceTransport {
    pub responses: HashMap<SourceType, (String, FetchedTree)>,
}

#[async_trait]
impl SourceTransport for FakeSourceTransport {
    async fn fetch(&self, spec: &ArenaSourceSpec, _timeout: Duration) -> Result<(String, FetchedTree), ReconcileError> {
        self.responses
            .get(&spec.source_type)
            .cloned()
            .ok_or_else(|| ReconcileError::Transient("no fake response registered".to_string()))
    }
}

#[derive(Default)]
pub struct FakeContentVolume {
    pub writes: std::sync::Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl ContentVolumeWriter for FakeContentVolume {
    async fn write_version(&self, target_path: &str, version: &str, _tree: &FetchedTree) -> Result<String, ReconcileError> {
        self.writes.lock().unwrap().push((target_path.to_string(), version.to_string()));
        Ok(format!("{target_path}/{version}"))
    }

    async fn flip_head(&self, _target_path: &str, _version: &str) -> Result<(), ReconcileError> {
        Ok(())
    }
}

/// No-op stand-ins for the Git/OCI/ConfigMap transport and volume writer
/// spec.md §1 names as out of scope ("the specific container-cluster client
/// library" and upstream source protocols). Unlike [`FakeSourceTransport`]
/// above (which requires pre-seeded responses and is built for the test
/// suite), this always succeeds with an empty tree, so `main` can wire it in
/// place of a real adapter and still drive `ArenaSource` reconciliation to a
/// steady state rather than stalling on "no fake response registered".
pub mod fakes {
    use super::*;

    #[derive(Default)]
    pub struct EmptyTreeTransport;

    #[async_trait]
    impl SourceTransport for EmptyTreeTransport {
        async fn fetch(&self, spec: &ArenaSourceSpec, _timeout: Duration) -> Result<(String, FetchedTree), ReconcileError> {
            let revision = match spec.source_type {
                SourceType::Git => spec
                    .git
                    .as_ref()
                    .and_then(|g| g.commit.clone().or_else(|| g.tag.clone()).or_else(|| g.branch.clone()))
                    .unwrap_or_default(),
                SourceType::Oci => spec.oci.as_ref().map(|o| o.tag.clone()).unwrap_or_default(),
                SourceType::ConfigMap => spec.config_map.as_ref().map(|c| c.name.clone()).unwrap_or_default(),
            };
            Ok((revision, FetchedTree::default()))
        }
    }

    #[derive(Default)]
    pub struct NullContentVolume;

    #[async_trait]
    impl ContentVolumeWriter for NullContentVolume {
        async fn write_version(&self, target_path: &str, version: &str, _tree: &FetchedTree) -> Result<String, ReconcileError> {
            Ok(format!("{target_path}/{version}"))
        }

        async fn flip_head(&self, _target_path: &str, _version: &str) -> Result<(), ReconcileError> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omnia_storage::{InMemoryVersionHistoryStore, ObjectKey};
    use serde_json::json;

    fn tree(entries: &[(&str, &str)]) -> FetchedTree {
        FetchedTree {
            entries: entries
                .iter()
                .map(|(path, contents)| FetchedEntry {
                    path: path.to_string(),
                    mode: 0o644,
                    contents: contents.as_bytes().to_vec(),
                })
                .collect(),
        }
    }

    #[test]
    fn identical_trees_hash_to_the_same_version_regardless_of_order() {
        let a = tree(&[("b.txt", "2"), ("a.txt", "1")]);
        let b = tree(&[("a.txt", "1"), ("b.txt", "2")]);
        assert_eq!(compute_content_version(&a), compute_content_version(&b));
    }

    #[test]
    fn different_contents_hash_differently() {
        let a = tree(&[("a.txt", "1")]);
        let b = tree(&[("a.txt", "2")]);
        assert_ne!(compute_content_version(&a), compute_content_version(&b));
    }

    fn make_object(spec: serde_json::Value, status: serde_json::Value) -> StoredObject {
        StoredObject {
            key: ObjectKey::new("ArenaSource", "default", "src1"),
            generation: 1,
            spec,
            observed_generation: 0,
            status,
            conditions: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn unchanged_revision_is_a_no_op_fast_path() {
        let mut responses = HashMap::new();
        responses.insert(SourceType::Git, ("ref@sha1:abc".to_string(), tree(&[("a", "1")])));
        let reconciler = SourceFetcherReconciler::new(
            Arc::new(FakeSourceTransport { responses }),
            Arc::new(FakeContentVolume::default()),
            Arc::new(InMemoryVersionHistoryStore::new()),
        );

        let object = make_object(
            json!({"type": "git", "git": {"url": "https://x"}, "intervalSecs": 60, "targetPath": "/content", "createVersionOnSync": true}),
            json!({"lastSyncRevision": "ref@sha1:abc"}),
        );

        let output = reconciler.reconcile(&object).await.unwrap();
        let status: ArenaSourceStatus = serde_json::from_value(output.status).unwrap();
        assert_eq!(status.phase, Some(ArenaSourcePhase::Ready));
        assert!(matches!(output.requeue, RequeueHint::After(_)));
    }

    #[tokio::test]
    async fn changed_revision_creates_a_new_version() {
        let mut responses = HashMap::new();
        responses.insert(SourceType::Git, ("ref@sha1:def".to_string(), tree(&[("a", "2")])));
        let reconciler = SourceFetcherReconciler::new(
            Arc::new(FakeSourceTransport { responses }),
            Arc::new(FakeContentVolume::default()),
            Arc::new(InMemoryVersionHistoryStore::new()),
        );

        let object = make_object(
            json!({"type": "git", "git": {"url": "https://x"}, "intervalSecs": 60, "targetPath": "/content", "createVersionOnSync": true}),
            json!({"lastSyncRevision": "ref@sha1:abc"}),
        );

        let output = reconciler.reconcile(&object).await.unwrap();
        let status: ArenaSourceStatus = serde_json::from_value(output.status).unwrap();
        assert_eq!(status.last_sync_revision.as_deref(), Some("ref@sha1:def"));
        assert!(status.artifact.version.is_some());
        assert_eq!(status.version_count, 1);
    }

    #[tokio::test]
    async fn suspended_source_is_not_fetched() {
        let reconciler = SourceFetcherReconciler::new(
            Arc::new(FakeSourceTransport { responses: HashMap::new() }),
            Arc::new(FakeContentVolume::default()),
            Arc::new(InMemoryVersionHistoryStore::new()),
        );
        let object = make_object(
            json!({"type": "git", "git": {"url": "https://x"}, "intervalSecs": 60, "targetPath": "/content", "suspend": true}),
            json!({}),
        );
        let output = reconciler.reconcile(&object).await.unwrap();
        let status: ArenaSourceStatus = serde_json::from_value(output.status).unwrap();
        assert_eq!(status.phase, Some(ArenaSourcePhase::Pending));
        assert!(matches!(output.requeue, RequeueHint::None));
    }
}
