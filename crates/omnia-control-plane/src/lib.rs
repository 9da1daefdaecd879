//! Shared library for the `omnia-control-plane` binary: configuration,
//! the reconciliation dispatcher and its worker pool, the watch/work queue,
//! Postgres advisory-lock leader election, and the operator-facing HTTP
//! surface. Every reconciler lives under [`reconcile`].

pub mod config;
pub mod dispatcher;
pub mod http;
pub mod leader;
pub mod queue;
pub mod reconcile;

pub use dispatcher::{Dispatcher, DispatcherConfig, ReconcileOutput, Reconciler};
pub use queue::{ReconcileKey, WorkQueue, WorkQueueConfig};
