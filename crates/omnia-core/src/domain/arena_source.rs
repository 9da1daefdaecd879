// ArenaSource: a fetchable prompt-bundle/template source (spec.md §3, §4.4).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Git,
    Oci,
    Configmap,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitSourceBlock {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<String>,
}

impl GitSourceBlock {
    /// Branch|tag|commit, in that priority (spec.md §4.4 step 3).
    pub fn resolved_ref(&self) -> Option<&str> {
        self.branch
            .as_deref()
            .or(self.tag.as_deref())
            .or(self.commit.as_deref())
    }
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciSourceBlock {
    pub repository: String,
    #[serde(default = "default_oci_tag")]
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<String>,
}

fn default_oci_tag() -> String {
    "latest".to_string()
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigMapSourceBlock {
    pub name: String,
    #[serde(default = "default_configmap_key")]
    pub key: String,
}

fn default_configmap_key() -> String {
    "pack.json".to_string()
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArenaSourceSpec {
    #[serde(rename = "type")]
    pub source_type: SourceType,
    #[serde(default)]
    pub git: Option<GitSourceBlock>,
    #[serde(default)]
    pub oci: Option<OciSourceBlock>,
    #[serde(default)]
    pub config_map: Option<ConfigMapSourceBlock>,
    /// Poll cadence, in seconds.
    pub interval_secs: u64,
    pub target_path: String,
    #[serde(default = "default_true")]
    pub create_version_on_sync: bool,
    #[serde(default)]
    pub suspend: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

fn default_true() -> bool {
    true
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ArenaSourcePhase {
    Pending,
    Ready,
    Error,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<DateTime<Utc>>,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArenaSourceStatus {
    #[serde(default)]
    pub phase: Option<ArenaSourcePhase>,
    #[serde(default)]
    pub artifact: ArtifactInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_revision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_version_created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head_version: Option<String>,
    #[serde(default)]
    pub version_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_fetch_time: Option<DateTime<Utc>>,
}
