// PromptPack: a versioned, content-addressed prompt bundle (spec.md §3, §4.5).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::common::ObjectRef;

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutType {
    Immediate,
    Canary,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanaryConfig {
    /// Initial traffic weight (0-100) for the new version.
    pub weight: u8,
    /// Automatic step size applied every `interval` (registry validator:
    /// "canary requires canary block" — `step_weight`/`interval` are
    /// optional; without them the weight only changes on explicit spec edits).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_weight: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<u64>,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutConfig {
    #[serde(rename = "type")]
    pub rollout_type: RolloutType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canary: Option<CanaryConfig>,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptPackSpec {
    /// Must be valid semver (registry validator: "version matches semver").
    pub version: String,
    /// Points at an inline ConfigMap containing `pack.json`.
    pub source: ObjectRef,
    pub rollout: RolloutConfig,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum PromptPackPhase {
    Pending,
    Active,
    Canary,
    Failed,
    Superseded,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptPackStatus {
    #[serde(default)]
    pub phase: Option<PromptPackPhase>,
    #[serde(default)]
    pub active_version: Option<String>,
    #[serde(default)]
    pub canary_version: Option<String>,
    #[serde(default)]
    pub canary_weight: Option<u8>,
    /// The `rollout.canary.weight` last read from the spec while this
    /// canary was in flight — distinct from `canary_weight`, which the
    /// auto-step schedule advances on its own. Only a change here means the
    /// operator edited the spec weight directly; comparing against
    /// `canary_weight` instead cannot tell an edit apart from ordinary
    /// auto-step drift (spec.md §4.5).
    #[serde(default)]
    pub declared_weight: Option<u8>,
    /// When the auto-step schedule next advances `canary_weight` (spec.md
    /// §4.5: "the reconciler itself advances weight by stepWeight every
    /// interval"). `None` when no canary is in flight or no schedule is set.
    #[serde(default)]
    pub next_weight_advance: Option<DateTime<Utc>>,
    /// Versions abandoned mid-canary by a newer arrival, or by an immediate
    /// swap that preempted an in-flight canary (spec.md §4.5: "any version
    /// superseded by a newer Active/Canary transitions to Superseded").
    #[serde(default)]
    pub superseded_versions: Vec<String>,
}
