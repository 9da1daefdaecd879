// Provider: a reusable LLM binding (spec.md §3).

use serde::{Deserialize, Serialize};

use super::common::Phase;

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderType {
    Claude,
    Openai,
    Gemini,
    Ollama,
    Mock,
    Bedrock,
    Vertex,
    AzureAi,
}

impl ProviderType {
    /// Hyperscaler types require `platform` + `auth` (spec.md §3).
    pub fn is_hyperscaler(self) -> bool {
        matches!(self, ProviderType::Bedrock | ProviderType::Vertex | ProviderType::AzureAi)
    }
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Text,
    Streaming,
    Vision,
    Tools,
    Json,
    Audio,
    Video,
    Documents,
    Duplex,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthKind {
    WorkloadIdentity,
    AccessKey,
    ServiceAccount,
    ServicePrincipal,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformBlock {
    pub cloud: String,
    pub region: Option<String>,
    /// Project id (GCP) or endpoint (Azure), depending on `cloud`.
    pub project_or_endpoint: Option<String>,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthBlock {
    pub kind: AuthKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_ref: Option<String>,
}

/// Exactly one credential source may be set (registry validator: "secretRef
/// and credential are mutually exclusive").
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_var: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

impl CredentialSource {
    pub fn count_set(&self) -> usize {
        [&self.secret_ref, &self.env_var, &self.file_path]
            .into_iter()
            .filter(|v| v.is_some())
            .count()
    }
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSpec {
    #[serde(rename = "type")]
    pub provider_type: ProviderType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<PlatformBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthBlock>,
    #[serde(default)]
    pub credential: CredentialSource,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub phase: Phase,
}
