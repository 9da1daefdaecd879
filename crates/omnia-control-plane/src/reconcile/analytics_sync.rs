//! Analytics Sync Engine (C10, spec.md §4.10).
//!
//! Each table mapping is synced watermark-first: read rows newer than the
//! last-recorded watermark from the source tier, MERGE them into the
//! warehouse, then advance the watermark to the max `updated_at` observed.
//! The watermark is the sole source of truth for progress — a crash mid-batch
//! reprocesses at most the last batch, which MERGE makes idempotent.
//!
//! `sync.schedule` is treated as opaque: no cron-parsing crate appears
//! anywhere in this corpus, so rather than fabricate one, re-sync cadence is
//! driven by the returned [`RequeueHint`] the same way the rollout and
//! retention reconcilers use duration-based scheduling (see DESIGN.md).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use omnia_core::domain::{SessionAnalyticsSyncSpec, SessionAnalyticsSyncStatus, SourceTierKind, SyncStatusKind};
use omnia_core::{Condition, ConditionStatus, ReconcileError, RequeueHint};
use omnia_storage::collaborators::{SourceTierReader, WarehouseSink};
use omnia_storage::{ObjectKey, StoredObject, WatermarkStore};
use tokio::sync::Mutex as AsyncMutex;

use crate::dispatcher::{ReconcileOutput, Reconciler};

const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 60;
const MAX_REPORTED_ERRORS: usize = 20;

pub struct AnalyticsSyncReconciler {
    watermarks: Arc<dyn WatermarkStore>,
    cold_archive: Arc<dyn SourceTierReader>,
    warm_store: Arc<dyn SourceTierReader>,
    warehouse: Arc<dyn WarehouseSink>,
    /// One sync lock per destination object (spec.md §4.10 step 1).
    sync_locks: dashmap::DashMap<ObjectKey, Arc<AsyncMutex<()>>>,
}

impl AnalyticsSyncReconciler {
    pub fn new(
        watermarks: Arc<dyn WatermarkStore>,
        cold_archive: Arc<dyn SourceTierReader>,
        warm_store: Arc<dyn SourceTierReader>,
        warehouse: Arc<dyn WarehouseSink>,
    ) -> Self {
        Self {
            watermarks,
            cold_archive,
            warm_store,
            warehouse,
            sync_locks: dashmap::DashMap::new(),
        }
    }

    fn lock_for(&self, key: &ObjectKey) -> Arc<AsyncMutex<()>> {
        self.sync_locks.entry(key.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    fn reader(&self, kind: SourceTierKind) -> &Arc<dyn SourceTierReader> {
        match kind {
            SourceTierKind::ColdArchive => &self.cold_archive,
            SourceTierKind::WarmStore => &self.warm_store,
        }
    }

    async fn sync_table(
        &self,
        watermark_key: &str,
        source_table: &str,
        destination_table: &str,
        reader: &Arc<dyn SourceTierReader>,
        batch_size: u32,
        max_batches: u32,
    ) -> Result<u64, String> {
        let mut watermark = self
            .watermarks
            .get(watermark_key)
            .await
            .map_err(|e| e.to_string())?
            .map(|w| w.last_sync_at)
            .unwrap_or_else(|| DateTime::<Utc>::from_timestamp(0, 0).expect("epoch is a valid timestamp"));

        let mut total_rows = 0u64;
        for _ in 0..max_batches.max(1) {
            let rows = reader
                .read_batch(source_table, watermark, batch_size)
                .await
                .map_err(|e| e.to_string())?;
            if rows.is_empty() {
                break;
            }

            self.warehouse
                .merge_rows(destination_table, &rows)
                .await
                .map_err(|e| e.to_string())?;

            let max_updated = rows.iter().map(|r| r.updated_at).max().expect("rows non-empty");
            self.watermarks
                .advance(watermark_key, max_updated, rows.len() as u64)
                .await
                .map_err(|e| e.to_string())?;
            watermark = max_updated;

            let exhausted = (rows.len() as u32) < batch_size;
            total_rows += rows.len() as u64;
            if exhausted {
                break;
            }
        }
        Ok(total_rows)
    }
}

#[async_trait]
impl Reconciler for AnalyticsSyncReconciler {
    fn kind(&self) -> &'static str {
        "SessionAnalyticsSync"
    }

    async fn reconcile(&self, object: &StoredObject) -> Result<ReconcileOutput, ReconcileError> {
        let spec: SessionAnalyticsSyncSpec = serde_json::from_value(object.spec.clone())
            .map_err(|e| ReconcileError::Validation(e.to_string()))?;

        let lock = self.lock_for(&object.key);
        let _guard = lock.lock().await;

        let reader = self.reader(spec.source.source_type).clone();
        let mut total_rows = 0u64;
        let mut errors = Vec::new();

        for mapping in &spec.table_mappings {
            let watermark_key = format!("{}/{}/{}", object.key.namespace, object.key.name, mapping.source_table);
            match self
                .sync_table(
                    &watermark_key,
                    &mapping.source_table,
                    &mapping.destination_table,
                    &reader,
                    spec.sync.batch_size,
                    spec.sync.parallelism,
                )
                .await
            {
                Ok(rows) => total_rows += rows,
                Err(e) => errors.push(format!("{}: {e}", mapping.source_table)),
            }
        }

        errors.truncate(MAX_REPORTED_ERRORS);
        let now = Utc::now();
        let status = SessionAnalyticsSyncStatus {
            last_sync_at: Some(now),
            last_sync_status: Some(if errors.is_empty() { SyncStatusKind::Success } else { SyncStatusKind::Failed }),
            rows_synced: total_rows,
            next_sync_at: Some(now + chrono::Duration::seconds(DEFAULT_RESYNC_INTERVAL_SECS as i64)),
            errors,
        };

        let mut conditions = object.conditions.clone();
        let (cond_status, reason) = match status.last_sync_status {
            Some(SyncStatusKind::Success) => (ConditionStatus::True, "SyncSucceeded"),
            _ => (ConditionStatus::False, "SyncFailed"),
        };
        set_condition(&mut conditions, "Synced", cond_status, reason, &format!("{} rows synced", status.rows_synced));

        Ok(ReconcileOutput::new(serde_json::to_value(&status).unwrap(), conditions)
            .requeue_after(RequeueHint::after_secs(DEFAULT_RESYNC_INTERVAL_SECS)))
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
    use omnia_storage::collaborators::fakes::{FakeSourceTier, FakeWarehouse};
    use omnia_storage::collaborators::SourceRow;
    use omnia_storage::InMemoryWatermarkStore;
    use serde_json::json;

    fn object(spec: serde_json::Value) -> StoredObject {
        StoredObject {
            key: ObjectKey::new("SessionAnalyticsSync", "default", "sync1"),
            generation: 1,
            spec,
            observed_generation: 0,
            status: json!({}),
            conditions: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn spec_json() -> serde_json::Value {
        json!({
            "destination": "snowflake",
            "connectionRef": "conn-1",
            "sync": {"schedule": "*/5 * * * *", "mode": "incremental", "batchSize": 2, "parallelism": 3},
            "source": {"type": "warm_store"},
            "tableMappings": [{"sourceTable": "sessions", "destinationTable": "analytics_sessions"}],
        })
    }

    #[tokio::test]
    async fn syncs_all_available_rows_across_batches_and_advances_watermark() {
        let watermarks = Arc::new(InMemoryWatermarkStore::new());
        let warm = Arc::new(FakeSourceTier::default());
        let cold = Arc::new(FakeSourceTier::default());
        let warehouse = Arc::new(FakeWarehouse::default());

        let t0 = Utc::now();
        {
            let mut rows = warm.rows_by_table.lock();
            rows.insert(
                "sessions".to_string(),
                vec![
                    SourceRow { primary_key: vec!["s1".into()], updated_at: t0, fields: json!({"id": "s1"}) },
                    SourceRow { primary_key: vec!["s2".into()], updated_at: t0 + chrono::Duration::seconds(1), fields: json!({"id": "s2"}) },
                    SourceRow { primary_key: vec!["s3".into()], updated_at: t0 + chrono::Duration::seconds(2), fields: json!({"id": "s3"}) },
                ],
            );
        }

        let reconciler = AnalyticsSyncReconciler::new(
            watermarks.clone() as Arc<dyn WatermarkStore>,
            cold as Arc<dyn SourceTierReader>,
            warm as Arc<dyn SourceTierReader>,
            warehouse.clone() as Arc<dyn WarehouseSink>,
        );

        let output = reconciler.reconcile(&object(spec_json())).await.unwrap();
        let status: SessionAnalyticsSyncStatus = serde_json::from_value(output.status).unwrap();
        assert_eq!(status.rows_synced, 3);
        assert_eq!(status.last_sync_status, Some(SyncStatusKind::Success));

        let watermark = watermarks.get("default/sync1/sessions").await.unwrap().unwrap();
        assert_eq!(watermark.last_sync_at, t0 + chrono::Duration::seconds(2));
        assert_eq!(warehouse.merged.lock().len(), 2);
    }

    #[tokio::test]
    async fn read_failure_is_recorded_as_a_sync_error() {
        struct FailingReader;
        #[async_trait::async_trait]
        impl SourceTierReader for FailingReader {
            async fn read_batch(
                &self,
                _table: &str,
                _watermark: DateTime<Utc>,
                _batch_size: u32,
            ) -> Result<Vec<SourceRow>, omnia_storage::collaborators::CollaboratorError> {
                Err(omnia_storage::collaborators::CollaboratorError::Unavailable("source down".to_string()))
            }
        }

        let watermarks = Arc::new(InMemoryWatermarkStore::new());
        let warehouse = Arc::new(FakeWarehouse::default());
        let reconciler = AnalyticsSyncReconciler::new(
            watermarks as Arc<dyn WatermarkStore>,
            Arc::new(FailingReader) as Arc<dyn SourceTierReader>,
            Arc::new(FailingReader) as Arc<dyn SourceTierReader>,
            warehouse as Arc<dyn WarehouseSink>,
        );

        let output = reconciler.reconcile(&object(spec_json())).await.unwrap();
        let status: SessionAnalyticsSyncStatus = serde_json::from_value(output.status).unwrap();
        assert_eq!(status.last_sync_status, Some(SyncStatusKind::Failed));
        assert_eq!(status.errors.len(), 1);
    }
}
