//! Reconciliation Dispatcher (spec.md §4.3).
//!
//! A fixed-size worker pool drains the [`WorkQueue`](crate::queue::WorkQueue),
//! looks up the per-`kind` [`Reconciler`], and applies the error-classification
//! policy from spec.md §7: transient/reference errors requeue with backoff,
//! validation/semantic errors park the object behind a failing condition
//! until its spec next changes, and successes honor the returned
//! [`RequeueHint`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use omnia_core::{Classify, Condition, ConditionStatus, ErrorClass, ReconcileError, RequeueHint};
use omnia_storage::{DesiredStateStore, DlqEntry, DlqStore, ObjectKey, StoredObject};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::queue::{ReconcileKey, WorkQueue};

/// What a reconciler produces for one object: the new `status` blob and a
/// hint about when (if ever) to reconcile it again (spec.md §4.3: "a pure
/// function `(current_spec, observed_world) → (desired_artifacts,
/// desired_status, requeue_hint)`" — artifact application is the
/// responsibility of the concrete reconciler, not the dispatcher).
pub struct ReconcileOutput {
    pub status: Value,
    pub conditions: Vec<Condition>,
    pub requeue: RequeueHint,
}

impl ReconcileOutput {
    pub fn new(status: Value, conditions: Vec<Condition>) -> Self {
        Self {
            status,
            conditions,
            requeue: RequeueHint::None,
        }
    }

    pub fn requeue_after(mut self, hint: RequeueHint) -> Self {
        self.requeue = hint;
        self
    }
}

/// Implemented once per `kind`. The dispatcher owns reading the object and
/// classifying/acting on errors; a `Reconciler` only computes the next state.
#[async_trait]
pub trait Reconciler: Send + Sync {
    fn kind(&self) -> &'static str;

    async fn reconcile(&self, object: &StoredObject) -> Result<ReconcileOutput, ReconcileError>;

    /// Whether this kind still holds a finalizer for `key` after its object
    /// has been deleted (spec.md §4.3 step 3). None of the reconcilers in
    /// this control plane currently register finalizers — generated
    /// artifacts are garbage-collected via owner references instead
    /// (spec.md §3 "Ownership & lifecycle") — so the default is `false`.
    fn has_finalizer(&self, _key: &ReconcileKey) -> bool {
        false
    }

    async fn finalize(&self, _key: &ReconcileKey) -> Result<(), ReconcileError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Success,
    Requeued,
    Failed,
    Dropped,
    DeadLettered,
}

impl Outcome {
    fn label(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Requeued => "requeued",
            Outcome::Failed => "failed",
            Outcome::Dropped => "dropped",
            Outcome::DeadLettered => "dead_lettered",
        }
    }
}

pub struct DispatcherConfig {
    pub workers: usize,
    /// Attempts (since the last success or spec change) after which a
    /// transient/reference/fatal failure stops retrying and is moved to the
    /// DLQ instead (SPEC_FULL.md §11 "Dead-letter visibility"). `None`
    /// retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self { workers: 8, max_attempts: Some(20) }
    }
}

/// Worker pool of N workers draining a shared [`WorkQueue`] (spec.md §4.3,
/// §5: "default: 8 per kind; configurable").
pub struct Dispatcher {
    queue: Arc<WorkQueue>,
    store: Arc<dyn DesiredStateStore>,
    dlq: Arc<dyn DlqStore>,
    reconcilers: HashMap<&'static str, Arc<dyn Reconciler>>,
    counters: DashMap<(String, &'static str), u64>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<WorkQueue>,
        store: Arc<dyn DesiredStateStore>,
        dlq: Arc<dyn DlqStore>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            queue,
            store,
            dlq,
            reconcilers: HashMap::new(),
            counters: DashMap::new(),
            config,
        }
    }

    pub fn register(&mut self, reconciler: Arc<dyn Reconciler>) {
        self.reconcilers.insert(reconciler.kind(), reconciler);
    }

    /// Current value of the `(kind, outcome)` reconcile counter, exposed via
    /// the `/debug/reconcile-counters` HTTP surface.
    pub fn counters_snapshot(&self) -> Vec<(String, &'static str, u64)> {
        self.counters
            .iter()
            .map(|entry| (entry.key().0.clone(), entry.key().1, *entry.value()))
            .collect()
    }

    fn bump(&self, kind: &str, outcome: Outcome) {
        *self
            .counters
            .entry((kind.to_string(), outcome.label()))
            .or_insert(0) += 1;
    }

    /// Spawns `config.workers` loops, each pulling from the shared queue
    /// until `shutdown` is signaled (mirrors `omnia_durable::worker::pool`'s
    /// poll/backpressure loop). Returns their join handles so callers can
    /// await graceful shutdown.
    pub fn spawn_workers(self: &Arc<Self>, shutdown: tokio::sync::watch::Receiver<bool>) -> Vec<tokio::task::JoinHandle<()>> {
        (0..self.config.workers)
            .map(|worker_index| {
                let dispatcher = Arc::clone(self);
                let mut shutdown = shutdown.clone();
                tokio::spawn(async move {
                    debug!(worker_index, "dispatcher worker starting");
                    loop {
                        if *shutdown.borrow() {
                            debug!(worker_index, "dispatcher worker shutting down");
                            return;
                        }
                        let key = tokio::select! {
                            key = dispatcher.queue.dequeue() => key,
                            _ = shutdown.changed() => continue,
                        };
                        dispatcher.dispatch_one(&key).await;
                        dispatcher.queue.release(&key);
                    }
                })
            })
            .collect()
    }

    async fn dispatch_one(&self, key: &ReconcileKey) {
        let Some(reconciler) = self.reconcilers.get(key.kind.as_str()).cloned() else {
            warn!(%key, "no reconciler registered for kind; dropping");
            self.bump(&key.kind, Outcome::Dropped);
            return;
        };

        let object_key = ObjectKey::new(key.kind.clone(), key.namespace.clone(), key.name.clone());
        let current = match self.store.get(&object_key).await {
            Ok(current) => current,
            Err(e) => {
                error!(%key, error = %e, "failed to read object; requeuing");
                self.queue.requeue_with_backoff(key.clone()).await;
                self.bump(&key.kind, Outcome::Requeued);
                return;
            }
        };

        let Some(object) = current else {
            if reconciler.has_finalizer(key) {
                if let Err(e) = reconciler.finalize(key).await {
                    error!(%key, error = %e, "finalize failed");
                    self.queue.requeue_with_backoff(key.clone()).await;
                    self.bump(&key.kind, Outcome::Requeued);
                    return;
                }
            }
            self.bump(&key.kind, Outcome::Dropped);
            return;
        };

        match reconciler.reconcile(&object).await {
            Ok(output) => {
                if let Err(e) = self
                    .store
                    .put_status(&object_key, object.generation, output.status, output.conditions)
                    .await
                {
                    error!(%key, error = %e, "status write failed; requeuing");
                    self.queue.requeue_with_backoff(key.clone()).await;
                    self.bump(&key.kind, Outcome::Requeued);
                    return;
                }

                self.queue.reset_attempts(key);
                let _ = self.dlq.remove(&object_key).await;
                match output.requeue {
                    RequeueHint::None => {
                        info!(%key, "reconcile succeeded");
                        self.bump(&key.kind, Outcome::Success);
                    }
                    RequeueHint::After(duration) => {
                        self.queue.schedule_after(key.clone(), duration).await;
                        self.bump(&key.kind, Outcome::Success);
                    }
                }
            }
            Err(error) => self.handle_error(key, &object, error).await,
        }
    }

    async fn handle_error(&self, key: &ReconcileKey, object: &StoredObject, error: ReconcileError) {
        match error.classify() {
            ErrorClass::Transient | ErrorClass::Fatal | ErrorClass::Reference => {
                let next_attempt = self.queue.attempt_count(key) + 1;
                if matches!(self.config.max_attempts, Some(max) if next_attempt > max) {
                    error!(%key, %error, next_attempt, "backoff ceiling exhausted; moving to DLQ");
                    let object_key = ObjectKey::new(key.kind.clone(), key.namespace.clone(), key.name.clone());
                    let _ = self
                        .dlq
                        .insert(DlqEntry {
                            key: object_key,
                            last_error: error.to_string(),
                            attempts: next_attempt - 1,
                            observed_generation: object.observed_generation,
                            dead_lettered_at: Utc::now(),
                        })
                        .await;
                    self.queue.reset_attempts(key);
                    self.bump(&key.kind, Outcome::DeadLettered);
                    return;
                }

                let backoff = self.queue.requeue_with_backoff(key.clone()).await;
                warn!(%key, %error, ?backoff, "transient failure, requeuing with backoff");
                self.bump(&key.kind, Outcome::Requeued);

                if error.classify() == ErrorClass::Reference {
                    // Surface as a status condition without blocking retries — the
                    // grace window is judged by the reconciler itself, which decides
                    // when a `Reference` error should instead surface as permanent.
                    let mut conditions = object.conditions.clone();
                    upsert_condition(&mut conditions, "Ready", ConditionStatus::False, "ReferenceNotReady", &error.to_string());
                    let _ = self
                        .store
                        .put_status(
                            &ObjectKey::new(key.kind.clone(), key.namespace.clone(), key.name.clone()),
                            object.observed_generation,
                            object.status.clone(),
                            conditions,
                        )
                        .await;
                }
            }
            ErrorClass::Validation | ErrorClass::UpstreamSemantic => {
                error!(%key, %error, "permanent failure; parking until spec changes");
                let mut conditions = object.conditions.clone();
                upsert_condition(&mut conditions, "Ready", ConditionStatus::False, "Invalid", &error.to_string());
                let _ = self
                    .store
                    .put_status(
                        &ObjectKey::new(key.kind.clone(), key.namespace.clone(), key.name.clone()),
                        object.generation,
                        object.status.clone(),
                        conditions,
                    )
                    .await;
                self.bump(&key.kind, Outcome::Failed);
            }
        }
    }
}

fn upsert_condition(
    conditions: &mut Vec<Condition>,
    kind: &str,
    status: ConditionStatus,
    reason: &str,
    message: &str,
) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.kind == kind) {
        if existing.status != status {
            existing.status = status;
            existing.last_transition_time = chrono::Utc::now();
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
    use omnia_storage::{InMemoryDesiredStateStore, InMemoryDlqStore};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct AlwaysSucceeds {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Reconciler for AlwaysSucceeds {
        fn kind(&self) -> &'static str {
            "Widget"
        }

        async fn reconcile(&self, _object: &StoredObject) -> Result<ReconcileOutput, ReconcileError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ReconcileOutput::new(json!({"phase": "Active"}), vec![]))
        }
    }

    struct AlwaysTransient;

    #[async_trait]
    impl Reconciler for AlwaysTransient {
        fn kind(&self) -> &'static str {
            "Widget"
        }

        async fn reconcile(&self, _object: &StoredObject) -> Result<ReconcileOutput, ReconcileError> {
            Err(ReconcileError::Transient("upstream 503".to_string()))
        }
    }

    #[tokio::test]
    async fn successful_reconcile_writes_status_and_resets_attempts() {
        let store: Arc<dyn DesiredStateStore> = Arc::new(InMemoryDesiredStateStore::new());
        let key = ObjectKey::new("Widget", "default", "w1");
        store.put_spec(key.clone(), json!({})).await.unwrap();

        let queue = Arc::new(WorkQueue::new(crate::queue::WorkQueueConfig::default()));
        let mut dispatcher = Dispatcher::new(queue.clone(), store.clone(), Arc::new(InMemoryDlqStore::new()), DispatcherConfig { workers: 1, max_attempts: Some(20) });
        dispatcher.register(Arc::new(AlwaysSucceeds { calls: AtomicUsize::new(0) }));

        let rkey = ReconcileKey::new("Widget", "default", "w1");
        dispatcher.dispatch_one(&rkey).await;

        let object = store.get(&key).await.unwrap().unwrap();
        assert_eq!(object.status["phase"], "Active");
        assert!(object.is_reconciled());
        assert_eq!(queue.attempt_count(&rkey), 0);
    }

    #[tokio::test]
    async fn transient_error_requeues_with_backoff_and_does_not_drop() {
        let store: Arc<dyn DesiredStateStore> = Arc::new(InMemoryDesiredStateStore::new());
        let key = ObjectKey::new("Widget", "default", "w1");
        store.put_spec(key.clone(), json!({})).await.unwrap();

        let queue = Arc::new(WorkQueue::new(crate::queue::WorkQueueConfig::default()));
        let mut dispatcher = Dispatcher::new(queue.clone(), store.clone(), Arc::new(InMemoryDlqStore::new()), DispatcherConfig { workers: 1, max_attempts: Some(20) });
        dispatcher.register(Arc::new(AlwaysTransient));

        let rkey = ReconcileKey::new("Widget", "default", "w1");
        dispatcher.dispatch_one(&rkey).await;

        assert_eq!(queue.attempt_count(&rkey), 1);
        assert!(queue.is_queued(&rkey));
        let counters = dispatcher.counters_snapshot();
        assert!(counters.contains(&("Widget".to_string(), "requeued", 1)));
    }

    #[tokio::test]
    async fn missing_object_without_finalizer_is_dropped() {
        let store: Arc<dyn DesiredStateStore> = Arc::new(InMemoryDesiredStateStore::new());
        let queue = Arc::new(WorkQueue::new(crate::queue::WorkQueueConfig::default()));
        let mut dispatcher = Dispatcher::new(queue.clone(), store.clone(), Arc::new(InMemoryDlqStore::new()), DispatcherConfig { workers: 1, max_attempts: Some(20) });
        dispatcher.register(Arc::new(AlwaysSucceeds { calls: AtomicUsize::new(0) }));

        let rkey = ReconcileKey::new("Widget", "default", "ghost");
        dispatcher.dispatch_one(&rkey).await;

        let counters = dispatcher.counters_snapshot();
        assert!(counters.contains(&("Widget".to_string(), "dropped", 1)));
    }

    #[tokio::test]
    async fn exhausting_max_attempts_moves_the_key_to_the_dlq_and_stops_retrying() {
        let store: Arc<dyn DesiredStateStore> = Arc::new(InMemoryDesiredStateStore::new());
        let key = ObjectKey::new("Widget", "default", "w1");
        store.put_spec(key.clone(), json!({})).await.unwrap();

        let queue = Arc::new(WorkQueue::new(crate::queue::WorkQueueConfig::default()));
        let dlq = Arc::new(InMemoryDlqStore::new());
        let mut dispatcher = Dispatcher::new(
            queue.clone(),
            store.clone(),
            dlq.clone(),
            DispatcherConfig { workers: 1, max_attempts: Some(2) },
        );
        dispatcher.register(Arc::new(AlwaysTransient));

        let rkey = ReconcileKey::new("Widget", "default", "w1");
        dispatcher.dispatch_one(&rkey).await;
        dispatcher.dispatch_one(&rkey).await;
        assert_eq!(queue.attempt_count(&rkey), 2);
        assert!(dlq.list().await.unwrap().is_empty(), "ceiling not yet exceeded");

        dispatcher.dispatch_one(&rkey).await;
        assert_eq!(queue.attempt_count(&rkey), 0, "attempts reset once dead-lettered");

        let entries = dlq.list().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, key);
        let counters = dispatcher.counters_snapshot();
        assert!(counters.contains(&("Widget".to_string(), "dead_lettered", 1)));
    }
}
