//! Watch/Work Queue (spec.md §4.2).
//!
//! Guarantees: dedup by key, per-key serialization, exponential backoff with
//! jitter on requeue, and an explicit [`WorkQueue::schedule_after`] path for
//! `RequeueAfter` so a reconciler can ask to be woken later without blocking
//! a worker slot. Mirrors the shape of `omnia_durable::worker::pool`'s
//! poll/backpressure loop, but keyed on `(kind, namespace, name)` rather than
//! on claimed activity tasks.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::fmt;
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use rand::Rng;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

/// `(kind, namespace, name)` — spec.md §4.2's reconcile key. Cluster-scoped
/// kinds use `""` for namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReconcileKey {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ReconcileKey {
    pub fn new(kind: impl Into<String>, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ReconcileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}/{}", self.kind, self.name)
        } else {
            write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WorkQueueConfig {
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Fraction of the computed backoff added as random jitter, e.g. 0.2 = ±20%.
    pub jitter_factor: f64,
}

impl Default for WorkQueueConfig {
    fn default() -> Self {
        Self {
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(5 * 60),
            jitter_factor: 0.2,
        }
    }
}

impl WorkQueueConfig {
    /// Exponential backoff for the n-th attempt (1-indexed), capped at
    /// `max_backoff`, with symmetric random jitter applied.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        let scaled = self.base_backoff.as_millis().saturating_mul(1u128 << exp);
        let capped = scaled.min(self.max_backoff.as_millis());
        let base_ms = capped as u64;

        let jitter_span = (base_ms as f64 * self.jitter_factor) as i64;
        let jitter = if jitter_span > 0 {
            rand::thread_rng().gen_range(-jitter_span..=jitter_span)
        } else {
            0
        };
        let final_ms = (base_ms as i64 + jitter).max(0) as u64;
        Duration::from_millis(final_ms)
    }
}

struct ScheduledItem {
    ready_at: Instant,
    key: ReconcileKey,
}

impl PartialEq for ScheduledItem {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at
    }
}
impl Eq for ScheduledItem {}
impl PartialOrd for ScheduledItem {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}
impl Ord for ScheduledItem {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reverse so the BinaryHeap (a max-heap) pops the soonest item first.
        other.ready_at.cmp(&self.ready_at)
    }
}

/// A single shared work queue for all kinds. One [`WorkQueue`] is wired into
/// every per-kind watch stream and into every reconciler's `RequeueAfter`.
pub struct WorkQueue {
    config: WorkQueueConfig,
    scheduled: Mutex<BinaryHeap<ScheduledItem>>,
    /// Keys with a pending entry in `scheduled` — enforces dedup-by-key.
    queued: DashSet<ReconcileKey>,
    /// Keys currently being processed by a worker — enforces per-key serialization.
    in_flight: DashSet<ReconcileKey>,
    attempts: DashMap<ReconcileKey, u32>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new(config: WorkQueueConfig) -> Self {
        Self {
            config,
            scheduled: Mutex::new(BinaryHeap::new()),
            queued: DashSet::new(),
            in_flight: DashSet::new(),
            attempts: DashMap::new(),
            notify: Notify::new(),
        }
    }

    /// Enqueue `key` for immediate processing. A no-op if the key is already
    /// queued (spec.md §4.2 dedup-by-key).
    pub async fn enqueue(&self, key: ReconcileKey) {
        self.schedule_at(key, Instant::now()).await;
    }

    /// `RequeueAfter(duration)`: schedule a future enqueue without blocking
    /// the calling worker.
    pub async fn schedule_after(&self, key: ReconcileKey, delay: Duration) {
        self.schedule_at(key, Instant::now() + delay).await;
    }

    async fn schedule_at(&self, key: ReconcileKey, ready_at: Instant) {
        if !self.queued.insert(key.clone()) {
            return;
        }
        self.scheduled.lock().await.push(ScheduledItem { ready_at, key });
        self.notify.notify_one();
    }

    /// Requeue after a transient error, applying exponential backoff keyed on
    /// this key's attempt counter.
    pub async fn requeue_with_backoff(&self, key: ReconcileKey) -> Duration {
        let attempt = {
            let mut entry = self.attempts.entry(key.clone()).or_insert(0);
            *entry += 1;
            *entry
        };
        let backoff = self.config.backoff_for_attempt(attempt);
        self.schedule_after(key, backoff).await;
        backoff
    }

    /// Clear the attempt counter for `key` (called on a successful reconcile).
    pub fn reset_attempts(&self, key: &ReconcileKey) {
        self.attempts.remove(key);
    }

    pub fn attempt_count(&self, key: &ReconcileKey) -> u32 {
        self.attempts.get(key).map(|v| *v).unwrap_or(0)
    }

    /// Blocks until a key is ready, marks it in-flight, and returns it.
    /// Returns `None` only if `shutdown` resolves first.
    pub async fn dequeue(&self) -> ReconcileKey {
        loop {
            let wait_until = {
                let mut heap = self.scheduled.lock().await;
                match heap.peek() {
                    Some(item) if item.ready_at <= Instant::now() => {
                        let item = heap.pop().expect("just peeked");
                        self.queued.remove(&item.key);
                        if self.in_flight.insert(item.key.clone()) {
                            return item.key;
                        }
                        // Same key already in flight somehow — reschedule shortly.
                        heap.push(ScheduledItem {
                            ready_at: Instant::now() + Duration::from_millis(50),
                            key: item.key,
                        });
                        None
                    }
                    Some(item) => Some(item.ready_at),
                    None => None,
                }
            };

            match wait_until {
                Some(ready_at) => {
                    let timeout = ready_at.saturating_duration_since(Instant::now());
                    tokio::select! {
                        _ = tokio::time::sleep(timeout) => {}
                        _ = self.notify.notified() => {}
                    }
                }
                None => {
                    self.notify.notified().await;
                }
            }
        }
    }

    /// Release `key` from the in-flight set once a worker finishes processing
    /// it, whether or not it was requeued.
    pub fn release(&self, key: &ReconcileKey) {
        self.in_flight.remove(key);
    }

    pub fn is_in_flight(&self, key: &ReconcileKey) -> bool {
        self.in_flight.contains(key)
    }

    pub fn is_queued(&self, key: &ReconcileKey) -> bool {
        self.queued.contains(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps_near_ceiling() {
        let config = WorkQueueConfig {
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            jitter_factor: 0.0,
        };
        assert_eq!(config.backoff_for_attempt(1), Duration::from_secs(1));
        assert_eq!(config.backoff_for_attempt(2), Duration::from_secs(2));
        assert_eq!(config.backoff_for_attempt(3), Duration::from_secs(4));
        assert_eq!(config.backoff_for_attempt(10), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn enqueueing_the_same_key_twice_is_a_no_op() {
        let queue = WorkQueue::new(WorkQueueConfig::default());
        let key = ReconcileKey::new("PromptPack", "default", "pp1");
        queue.enqueue(key.clone()).await;
        queue.enqueue(key.clone()).await;

        let dequeued = queue.dequeue().await;
        assert_eq!(dequeued, key);
        assert!(!queue.is_queued(&key));
        // A second dequeue must not find another copy of the same key ready.
        assert!(tokio::time::timeout(Duration::from_millis(50), queue.dequeue())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn in_flight_key_is_marked_until_released() {
        let queue = WorkQueue::new(WorkQueueConfig::default());
        let key = ReconcileKey::new("PromptPack", "default", "pp1");
        queue.enqueue(key.clone()).await;
        let dequeued = queue.dequeue().await;
        assert!(queue.is_in_flight(&dequeued));
        queue.release(&dequeued);
        assert!(!queue.is_in_flight(&dequeued));
    }

    #[tokio::test]
    async fn requeue_with_backoff_increments_attempt_counter() {
        let queue = WorkQueue::new(WorkQueueConfig {
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(100),
            jitter_factor: 0.0,
        });
        let key = ReconcileKey::new("ArenaSource", "default", "a1");
        queue.requeue_with_backoff(key.clone()).await;
        assert_eq!(queue.attempt_count(&key), 1);
        queue.requeue_with_backoff(key.clone()).await;
        assert_eq!(queue.attempt_count(&key), 2);

        queue.reset_attempts(&key);
        assert_eq!(queue.attempt_count(&key), 0);
    }

    #[tokio::test]
    async fn schedule_after_does_not_deliver_before_the_delay_elapses() {
        let queue = WorkQueue::new(WorkQueueConfig::default());
        let key = ReconcileKey::new("ArenaSource", "default", "a1");
        queue.schedule_after(key.clone(), Duration::from_millis(200)).await;

        let result = tokio::time::timeout(Duration::from_millis(50), queue.dequeue()).await;
        assert!(result.is_err(), "key delivered before its delay elapsed");
    }
}
