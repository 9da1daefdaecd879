//! Process-wide configuration, loaded from the environment at startup
//! (mirrors `omnia_core::config`'s `env_var`/`env_var_or` helpers).

use std::time::Duration;

use omnia_core::config::{env_flag, env_var, env_var_or};

use crate::dispatcher::DispatcherConfig;
use crate::queue::WorkQueueConfig;

#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub database_url: Option<String>,
    pub http_addr: String,
    pub workers_per_kind: usize,
    pub leader_election_enabled: bool,
    pub leader_poll_interval: Duration,
    /// Attempts a transient/reference/fatal failure gets before it is moved
    /// to the DLQ (SPEC_FULL.md §11). `0` disables the ceiling.
    pub dlq_max_attempts: u32,
    /// How often the startup watch-substitute sweep re-lists every
    /// registered kind and enqueues every object it finds (see DESIGN.md —
    /// no real cluster watch API is part of this stack).
    pub watch_poll_interval: Duration,
}

impl ProcessConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self {
            database_url: env_var("DATABASE_URL"),
            http_addr: env_var_or("OMNIA_HTTP_ADDR", "0.0.0.0:8080".to_string()),
            workers_per_kind: env_var_or("OMNIA_WORKERS_PER_KIND", 8u32) as usize,
            leader_election_enabled: env_flag("OMNIA_LEADER_ELECTION", false),
            leader_poll_interval: Duration::from_secs(env_var_or("OMNIA_LEADER_POLL_SECS", 5u64)),
            dlq_max_attempts: env_var_or("OMNIA_DLQ_MAX_ATTEMPTS", 20u32),
            watch_poll_interval: Duration::from_secs(env_var_or("OMNIA_WATCH_POLL_SECS", 30u64)),
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            workers: self.workers_per_kind,
            max_attempts: if self.dlq_max_attempts == 0 { None } else { Some(self.dlq_max_attempts) },
        }
    }

    pub fn queue_config(&self) -> WorkQueueConfig {
        WorkQueueConfig::default()
    }
}
