//! Shared domain primitives for the Omnia control plane: object metadata,
//! status conditions, the error taxonomy reconcilers classify against,
//! requeue hints, environment configuration helpers, and telemetry setup.
//!
//! Every `omnia-*` component crate depends on this one; it depends on none
//! of them.

pub mod condition;
pub mod config;
pub mod domain;
pub mod error;
pub mod meta;
pub mod registry;
pub mod requeue;
pub mod telemetry;

pub use condition::{Condition, ConditionStatus, Conditions};
pub use error::{Classify, ErrorClass, ReconcileError, DEFAULT_REFERENCE_GRACE_WINDOW};
pub use meta::ObjectMeta;
pub use registry::{
    build_default_registry, DefaultApplicator, KindDescriptor, ResourceRegistry,
    ResourceRegistryBuilder, Validator,
};
pub use requeue::RequeueHint;
pub use telemetry::{init_telemetry, TelemetryConfig, TelemetryGuard};

/// Common imports for reconciler and service implementations.
pub mod prelude {
    pub use crate::condition::{Condition, ConditionStatus, Conditions};
    pub use crate::domain::{ObjectRef, Phase};
    pub use crate::error::{Classify, ErrorClass, ReconcileError};
    pub use crate::meta::ObjectMeta;
    pub use crate::requeue::RequeueHint;
}
