//! Persistence layer for the Omnia control plane's own state.
//!
//! This crate never stores agent-plane data (sessions, messages, judge
//! transcripts) itself — spec.md §1 treats those as external collaborators.
//! It stores what the control plane needs to remember about *itself*:
//! desired-state/status documents, queue/DLQ state, ArenaSource version
//! history, and analytics sync watermarks — plus the trait boundaries
//! (`collaborators`) every reconciler uses to reach the external systems it
//! configures.

pub mod collaborators;
pub mod desired_state;
pub mod queue_store;
pub mod versions;
pub mod watermark;

pub use collaborators::{
    ColdArchiveClient, ColdArchiveTierConfig, CollaboratorError, HotCacheClient, HotCacheTierConfig,
    JudgeClient, JudgeVerdict, PartitionStrategy, SourceRow, SourceTierReader, StreamingBusProducer,
    WarehouseSink, WarmStoreClient, WarmStoreTierConfig,
};
pub use desired_state::{
    DesiredStateStore, InMemoryDesiredStateStore, ObjectKey, PostgresDesiredStateStore, StoreError,
    StoredObject,
};
pub use queue_store::{DlqEntry, DlqStore, InMemoryDlqStore, InMemoryQueueStore, PendingKey, QueueStore};
pub use versions::{InMemoryVersionHistoryStore, VersionHistoryStore, VersionRecord};
pub use watermark::{InMemoryWatermarkStore, Watermark, WatermarkStore};
