// AgentPolicy / ToolPolicy: claim-mapping and CEL-based tool policies
// (spec.md §3, §4.7).

use serde::{Deserialize, Serialize};

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSelector {
    /// Empty + `all = true` selects every AgentRuntime in the namespace.
    #[serde(default)]
    pub all: bool,
    #[serde(default)]
    pub names: Vec<String>,
}

/// Claim name -> outbound header. Header names must match
/// `^X-Omnia-Claim-[A-Za-z0-9-]+$` (registry validator).
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimMapping(pub std::collections::BTreeMap<String, String>);

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolAccessRule {
    pub registry: String,
    pub tool: String,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolAccess {
    #[serde(default)]
    pub allow: Vec<ToolAccessRule>,
    #[serde(default)]
    pub deny: Vec<ToolAccessRule>,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyMode {
    Enforce,
    Permissive,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnFailure {
    Deny,
    Allow,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPolicySpec {
    pub selector: AgentSelector,
    #[serde(default)]
    pub claim_mapping: ClaimMapping,
    #[serde(default)]
    pub tool_access: ToolAccess,
    pub mode: PolicyMode,
    pub on_failure: OnFailure,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPolicyStatus {
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub matched_agent_count: u32,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderInjection {
    pub header: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cel_expression: Option<String>,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolPolicyRule {
    pub name: String,
    pub registry: String,
    pub tool: String,
    /// CEL expression gating the call; compiled once at reconcile time.
    pub deny_cel: String,
    #[serde(default)]
    pub required_claims: Vec<String>,
    #[serde(default)]
    pub header_injections: Vec<HeaderInjection>,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolPolicyMode {
    Enforce,
    Audit,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolPolicySpec {
    pub rules: Vec<ToolPolicyRule>,
    pub mode: ToolPolicyMode,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ToolPolicyPhase {
    Ready,
    Error,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolPolicyStatus {
    #[serde(default)]
    pub phase: Option<ToolPolicyPhase>,
    #[serde(default)]
    pub rule_count: u32,
}
