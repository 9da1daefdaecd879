//! Leader election (spec.md §5: "when replicated, only the leader runs
//! reconcilers; followers stand by. The leader lease is renewed periodically;
//! loss of lease aborts in-flight reconciles.").
//!
//! Implemented with a Postgres session-level advisory lock
//! (`pg_try_advisory_lock`): advisory locks are tied to the connection that
//! took them, so holding the lock *is* the lease — there is nothing to renew
//! explicitly, and a dropped connection (crash, network partition) releases
//! it immediately for the next contender. This is the standard
//! Postgres-native alternative to a heartbeat-and-TTL lease table.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tracing::{info, warn};

/// A stable 64-bit key identifying this control plane's leader lock.
/// Distinct deployments that must not contend with each other should use
/// distinct keys (derived from e.g. a cluster name hash).
pub const DEFAULT_LOCK_KEY: i64 = 0x6f6d6e69_612d6370; // "omnia-cp" as bytes

pub struct LeaderElector {
    pool: PgPool,
    lock_key: i64,
    is_leader: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl LeaderElector {
    pub fn new(pool: PgPool, lock_key: i64, poll_interval: Duration) -> Self {
        Self {
            pool,
            lock_key,
            is_leader: Arc::new(AtomicBool::new(false)),
            poll_interval,
        }
    }

    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::SeqCst)
    }

    pub fn is_leader_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.is_leader)
    }

    /// Runs forever on a dedicated connection: attempts to acquire the
    /// advisory lock, and while held, periodically confirms the connection
    /// is alive (a broken connection silently drops the lock, so the
    /// heartbeat is what notices that and triggers re-acquisition).
    pub async fn run(&self, shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut shutdown = shutdown;
        loop {
            if *shutdown.borrow() {
                return;
            }

            match self.try_become_leader().await {
                Ok(mut conn) => {
                    info!(lock_key = self.lock_key, "acquired leader lock");
                    self.is_leader.store(true, Ordering::SeqCst);

                    loop {
                        tokio::select! {
                            _ = tokio::time::sleep(self.poll_interval) => {
                                if sqlx::query("SELECT 1").execute(&mut *conn).await.is_err() {
                                    warn!("leader connection lost; lock released");
                                    break;
                                }
                            }
                            _ = shutdown.changed() => {
                                if *shutdown.borrow() {
                                    self.release(&mut conn).await;
                                    self.is_leader.store(false, Ordering::SeqCst);
                                    return;
                                }
                            }
                        }
                    }

                    self.is_leader.store(false, Ordering::SeqCst);
                }
                Err(_) => {
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    async fn try_become_leader(&self) -> Result<sqlx::pool::PoolConnection<sqlx::Postgres>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        let (acquired,): (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
            .bind(self.lock_key)
            .fetch_one(&mut *conn)
            .await?;
        if acquired {
            Ok(conn)
        } else {
            Err(sqlx::Error::RowNotFound)
        }
    }

    async fn release(&self, conn: &mut sqlx::pool::PoolConnection<sqlx::Postgres>) {
        let _ = sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(self.lock_key)
            .execute(&mut **conn)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_lock_key_is_a_fixed_nonzero_constant() {
        assert_ne!(DEFAULT_LOCK_KEY, 0);
    }
}
