// AgentRuntime: a desired deployment of an agent (spec.md §3, §4.11).

use serde::{Deserialize, Serialize};

use super::common::{ObjectRef, Phase};

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FacadeProtocol {
    Websocket,
    Grpc,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacadeConfig {
    pub protocol: FacadeProtocol,
    pub port: u16,
}

/// A named provider binding. `role` is `"default"`, `"judge"`, or any other
/// operator-chosen label (spec.md §3).
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamedProviderRef {
    pub role: String,
    pub provider_ref: ObjectRef,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoscalerType {
    Hpa,
    Keda,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalingConfig {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoscaler_type: Option<AutoscalerType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_replicas: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_replicas: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_target_percent: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_target_percent: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_down_stabilization_secs: Option<u32>,
    #[serde(default)]
    pub keda_triggers: Vec<String>,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplingConfig {
    /// Admission rate (0-100) for non-judge evals.
    pub default_rate: u8,
    /// Admission rate (0-100) for LLM-judge evals.
    pub llm_judge_rate: u8,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default = "default_max_evals_per_second")]
    pub max_evals_per_second: u32,
    #[serde(default = "default_max_concurrent_judge_calls")]
    pub max_concurrent_judge_calls: u32,
    #[serde(default = "default_inactivity_timeout_secs")]
    pub inactivity_timeout_secs: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: u32,
}

fn default_max_evals_per_second() -> u32 {
    50
}
fn default_max_concurrent_judge_calls() -> u32 {
    10
}
fn default_inactivity_timeout_secs() -> u64 {
    30 * 60
}
fn default_queue_capacity() -> u32 {
    1000
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameworkKind {
    Custom,
    LangGraph,
    Autogen,
    Crewai,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameworkConfig {
    #[serde(rename = "type")]
    pub kind: FrameworkKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulingConstraints {
    #[serde(default)]
    pub node_selector: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    pub tolerations: Vec<String>,
    #[serde(default)]
    pub extra_pod_annotations: std::collections::BTreeMap<String, String>,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub scheduling: SchedulingConstraints,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRuntimeSpec {
    pub prompt_pack_ref: ObjectRef,
    pub facade: FacadeConfig,
    pub framework: FrameworkConfig,

    /// New keyed-list form. Wins over `provider_ref`/`provider` if both
    /// appear (spec.md §3 invariant).
    #[serde(default)]
    pub providers: Vec<NamedProviderRef>,
    /// Deprecated single-provider form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_ref: Option<ObjectRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_registry_ref: Option<ObjectRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_ref: Option<ObjectRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_store_ref: Option<ObjectRef>,

    #[serde(default = "default_replicas")]
    pub replicas: u32,
    #[serde(default)]
    pub autoscaling: Option<AutoscalingConfig>,
    #[serde(default)]
    pub evals: Option<EvalConfig>,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub console_media_policy: Option<String>,
}

fn default_replicas() -> u32 {
    1
}

impl AgentRuntimeSpec {
    /// §3 invariant: `providers` (new) wins over the deprecated
    /// `providerRef`/`provider` if both are set. Returns the resolved
    /// `(role, ObjectRef)` pairs to resolve against the Provider registry.
    pub fn effective_providers(&self) -> Vec<(String, ObjectRef)> {
        if !self.providers.is_empty() {
            self.providers
                .iter()
                .map(|p| (p.role.clone(), p.provider_ref.clone()))
                .collect()
        } else if let Some(reference) = &self.provider_ref {
            vec![("default".to_string(), reference.clone())]
        } else {
            Vec::new()
        }
    }
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRuntimeStatus {
    #[serde(default)]
    pub phase: Option<Phase>,
    #[serde(default)]
    pub service_endpoint: Option<String>,
    #[serde(default)]
    pub ready_replicas: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_providers_list_wins_over_deprecated_provider_ref() {
        let spec = AgentRuntimeSpec {
            prompt_pack_ref: ObjectRef::new("pp"),
            facade: FacadeConfig {
                protocol: FacadeProtocol::Websocket,
                port: 8080,
            },
            framework: FrameworkConfig {
                kind: FrameworkKind::Custom,
                image: Some("img".into()),
            },
            providers: vec![NamedProviderRef {
                role: "default".into(),
                provider_ref: ObjectRef::new("new-provider"),
            }],
            provider_ref: Some(ObjectRef::new("old-provider")),
            tool_registry_ref: None,
            policy_ref: None,
            session_store_ref: None,
            replicas: 1,
            autoscaling: None,
            evals: None,
            runtime: RuntimeConfig::default(),
            console_media_policy: None,
        };

        let resolved = spec.effective_providers();
        assert_eq!(resolved, vec![("default".to_string(), ObjectRef::new("new-provider"))]);
    }

    #[test]
    fn deprecated_provider_ref_used_when_providers_list_empty() {
        let spec = AgentRuntimeSpec {
            prompt_pack_ref: ObjectRef::new("pp"),
            facade: FacadeConfig {
                protocol: FacadeProtocol::Grpc,
                port: 9090,
            },
            framework: FrameworkConfig {
                kind: FrameworkKind::Custom,
                image: Some("img".into()),
            },
            providers: Vec::new(),
            provider_ref: Some(ObjectRef::new("old-provider")),
            tool_registry_ref: None,
            policy_ref: None,
            session_store_ref: None,
            replicas: 1,
            autoscaling: None,
            evals: None,
            runtime: RuntimeConfig::default(),
            console_media_policy: None,
        };

        assert_eq!(
            spec.effective_providers(),
            vec![("default".to_string(), ObjectRef::new("old-provider"))]
        );
    }
}
