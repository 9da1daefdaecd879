//! Retention Lifecycle Manager (C8, spec.md §4.8).
//!
//! Reconciles the single cluster-scoped `SessionRetentionPolicy` against
//! every registered `Workspace`: computes each workspace's effective tier
//! config and publishes it to the hot cache (shared singleton, defaults
//! only), warm store, and — when enabled — cold archive collaborators.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use omnia_core::domain::{SessionRetentionPolicySpec, SessionRetentionPolicyStatus};
use omnia_core::{Condition, ConditionStatus, ReconcileError, RequeueHint};
use omnia_storage::collaborators::{
    ColdArchiveClient, ColdArchiveTierConfig, HotCacheClient, HotCacheTierConfig,
    PartitionStrategy, WarmStoreClient, WarmStoreTierConfig,
};
use omnia_storage::{DesiredStateStore, StoredObject};

use crate::dispatcher::{ReconcileOutput, Reconciler};

/// Re-probed on a fixed cadence since workspace membership can change
/// without this object's own spec changing.
const RECONCILE_INTERVAL_SECS: u64 = 300;

pub struct RetentionReconciler {
    store: Arc<dyn DesiredStateStore>,
    hot_cache: Arc<dyn HotCacheClient>,
    warm_store: Arc<dyn WarmStoreClient>,
    cold_archive: Arc<dyn ColdArchiveClient>,
}

impl RetentionReconciler {
    pub fn new(
        store: Arc<dyn DesiredStateStore>,
        hot_cache: Arc<dyn HotCacheClient>,
        warm_store: Arc<dyn WarmStoreClient>,
        cold_archive: Arc<dyn ColdArchiveClient>,
    ) -> Self {
        Self {
            store,
            hot_cache,
            warm_store,
            cold_archive,
        }
    }
}

#[async_trait]
impl Reconciler for RetentionReconciler {
    fn kind(&self) -> &'static str {
        "SessionRetentionPolicy"
    }

    async fn reconcile(&self, object: &StoredObject) -> Result<ReconcileOutput, ReconcileError> {
        let spec: SessionRetentionPolicySpec = serde_json::from_value(object.spec.clone())
            .map_err(|e| ReconcileError::Validation(e.to_string()))?;

        if spec.cold.enabled == Some(true) && spec.cold.retention_days.unwrap_or(0) == 0 {
            return Err(ReconcileError::Validation(
                "cold.enabled requires cold.retentionDays > 0".to_string(),
            ));
        }

        self.hot_cache
            .apply_tier_config(HotCacheTierConfig {
                ttl_after_inactivity_secs: spec.hot.ttl_after_inactivity_secs.unwrap_or(0),
                max_sessions: spec.hot.max_sessions.unwrap_or(0),
                max_messages_per_session: spec.hot.max_messages_per_session.unwrap_or(0),
            })
            .await
            .map_err(|e| ReconcileError::Transient(e.to_string()))?;

        let workspaces = self
            .store
            .list("Workspace", None)
            .await
            .map_err(|e| ReconcileError::Transient(e.to_string()))?;

        let mut applied = 0u32;
        for workspace in &workspaces {
            let effective = spec.effective_for(&workspace.key.name);

            if effective.cold.enabled == Some(true) && effective.cold.retention_days.unwrap_or(0) == 0 {
                continue;
            }

            self.warm_store
                .apply_tier_config(WarmStoreTierConfig {
                    workspace: workspace.key.name.clone(),
                    retention_days: effective.warm.retention_days.unwrap_or(0),
                    partition_strategy: PartitionStrategy::Week,
                })
                .await
                .map_err(|e| ReconcileError::Transient(e.to_string()))?;

            if effective.cold.enabled == Some(true) {
                self.cold_archive
                    .schedule_compaction(ColdArchiveTierConfig {
                        workspace: workspace.key.name.clone(),
                        retention_days: effective.cold.retention_days.unwrap_or(0),
                        compaction_cron_schedule: effective.cold.compaction_schedule.unwrap_or_default(),
                    })
                    .await
                    .map_err(|e| ReconcileError::Transient(e.to_string()))?;
            }

            applied += 1;
        }

        let status = SessionRetentionPolicyStatus {
            workspace_count: applied,
        };

        let mut conditions = object.conditions.clone();
        set_condition(&mut conditions, "Applied", ConditionStatus::True, "TiersApplied", "hot/warm/cold tiers published");

        Ok(ReconcileOutput::new(serde_json::to_value(&status).unwrap(), conditions)
            .requeue_after(RequeueHint::after_secs(RECONCILE_INTERVAL_SECS)))
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

#[cfg(test)]
mod tests {
    use super::*;
    use omnia_storage::collaborators::fakes::{FakeColdArchive, FakeHotCache, FakeWarmStore};
    use omnia_storage::{InMemoryDesiredStateStore, ObjectKey};
    use serde_json::json;

    fn object(spec: serde_json::Value) -> StoredObject {
        StoredObject {
            key: ObjectKey::new("SessionRetentionPolicy", "", "default"),
            generation: 1,
            spec,
            observed_generation: 0,
            status: json!({}),
            conditions: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    async fn reconciler() -> (RetentionReconciler, Arc<FakeHotCache>, Arc<FakeWarmStore>, Arc<FakeColdArchive>, Arc<InMemoryDesiredStateStore>) {
        let store = Arc::new(InMemoryDesiredStateStore::new());
        let hot = Arc::new(FakeHotCache::default());
        let warm = Arc::new(FakeWarmStore::default());
        let cold = Arc::new(FakeColdArchive::default());
        let reconciler = RetentionReconciler::new(
            store.clone() as Arc<dyn DesiredStateStore>,
            hot.clone() as Arc<dyn HotCacheClient>,
            warm.clone() as Arc<dyn WarmStoreClient>,
            cold.clone() as Arc<dyn ColdArchiveClient>,
        );
        (reconciler, hot, warm, cold, store)
    }

    #[tokio::test]
    async fn applies_effective_tiers_to_every_workspace() {
        let (reconciler, hot, warm, cold, store) = reconciler().await;
        store.put_spec(ObjectKey::new("Workspace", "", "ws1"), json!({})).await.unwrap();
        store.put_spec(ObjectKey::new("Workspace", "", "ws2"), json!({})).await.unwrap();

        let spec = json!({
            "hot": {"ttlAfterInactivitySecs": 3600},
            "warm": {"retentionDays": 30},
            "cold": {"enabled": true, "retentionDays": 365, "compactionSchedule": "0 0 * * 0"},
        });
        let output = reconciler.reconcile(&object(spec)).await.unwrap();
        let status: SessionRetentionPolicyStatus = serde_json::from_value(output.status).unwrap();
        assert_eq!(status.workspace_count, 2);
        assert_eq!(hot.applied.lock().len(), 1);
        assert_eq!(warm.applied.lock().len(), 2);
        assert_eq!(cold.scheduled.lock().len(), 2);
    }

    #[tokio::test]
    async fn cold_enabled_without_retention_days_is_rejected() {
        let (reconciler, _hot, _warm, _cold, _store) = reconciler().await;
        let spec = json!({"cold": {"enabled": true}});
        let err = reconciler.reconcile(&object(spec)).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Validation(_)));
    }

    #[tokio::test]
    async fn workspace_override_skips_cold_archive_when_disabled() {
        let (reconciler, _hot, warm, cold, store) = reconciler().await;
        store.put_spec(ObjectKey::new("Workspace", "", "ws1"), json!({})).await.unwrap();

        let spec = json!({
            "warm": {"retentionDays": 30},
            "cold": {"enabled": true, "retentionDays": 365},
            "workspaceOverrides": {"ws1": {"cold": {"enabled": false}}},
        });
        let output = reconciler.reconcile(&object(spec)).await.unwrap();
        let status: SessionRetentionPolicyStatus = serde_json::from_value(output.status).unwrap();
        assert_eq!(status.workspace_count, 1);
        assert_eq!(warm.applied.lock().len(), 1);
        assert_eq!(cold.scheduled.lock().len(), 0);
    }
}
