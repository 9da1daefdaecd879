//! The data model: typed spec/status pairs for every kind the control plane
//! reconciles (spec.md §3). Each submodule owns one kind; cross-references
//! between kinds go through [`common::ObjectRef`] rather than embedding.

pub mod agent_runtime;
pub mod analytics;
pub mod arena_source;
pub mod common;
pub mod policy;
pub mod prompt_pack;
pub mod provider;
pub mod retention;
pub mod streaming;
pub mod tool_registry;
pub mod workspace;

pub use agent_runtime::{
    AgentRuntimeSpec, AgentRuntimeStatus, AutoscalerType, AutoscalingConfig, EvalConfig,
    FacadeConfig, FacadeProtocol, FrameworkConfig, FrameworkKind, NamedProviderRef, RuntimeConfig,
    SamplingConfig, SchedulingConstraints,
};
pub use analytics::{
    SessionAnalyticsSyncSpec, SessionAnalyticsSyncStatus, SourceTierKind, SyncConfig, SyncMode,
    SyncSource, SyncStatusKind, TableMapping, WarehouseKind,
};
pub use arena_source::{
    ArenaSourcePhase, ArenaSourceSpec, ArenaSourceStatus, ArtifactInfo, ConfigMapSourceBlock,
    GitSourceBlock, OciSourceBlock, SourceType,
};
pub use common::{ObjectRef, Phase};
pub use policy::{
    AgentPolicySpec, AgentPolicyStatus, AgentSelector, ClaimMapping, HeaderInjection, OnFailure,
    PolicyMode, ToolAccess, ToolAccessRule, ToolPolicyMode, ToolPolicyPhase, ToolPolicyRule,
    ToolPolicySpec, ToolPolicyStatus,
};
pub use prompt_pack::{
    CanaryConfig, PromptPackPhase, PromptPackSpec, PromptPackStatus, RolloutConfig, RolloutType,
};
pub use provider::{
    AuthBlock, AuthKind, Capability, CredentialSource, PlatformBlock, ProviderSpec,
    ProviderStatus, ProviderType,
};
pub use retention::{
    ColdTierConfig, EffectiveTierConfig, HotTierConfig, SessionRetentionPolicySpec,
    SessionRetentionPolicyStatus, TierOverride, WarmTierConfig,
};
pub use streaming::{
    KafkaBlock, KinesisBlock, NatsBlock, OutputFormat, ProviderBlocks, PulsarBlock,
    SessionStreamingConfigSpec, SessionStreamingConfigStatus, StreamingFilter, StreamingProvider,
    StreamingTransform,
};
pub use tool_registry::{
    AvailabilityStatus, DiscoveredTool, GrpcConfig, Handler, HandlerType, HttpConfig, McpConfig,
    McpTransport, OpenApiConfig, ServiceSelector, ToolDefinition, ToolRegistryPhase,
    ToolRegistrySpec, ToolRegistryStatus,
};
pub use workspace::{
    BudgetAction, CostBudget, Quotas, RoleBinding, WorkspaceRole, WorkspaceSpec, WorkspaceStatus,
};
