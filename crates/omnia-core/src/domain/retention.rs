// SessionRetentionPolicy: tiered TTL/partition/archival rules (spec.md §3, §4.8).

use serde::{Deserialize, Serialize};

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HotTierConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_after_inactivity_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_sessions: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_messages_per_session: Option<u64>,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarmTierConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_days: Option<u32>,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColdTierConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compaction_schedule: Option<String>,
}

/// Per-workspace override: warm and cold only — hot is always the shared
/// singleton (spec.md §3).
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierOverride {
    #[serde(default)]
    pub warm: WarmTierConfig,
    #[serde(default)]
    pub cold: ColdTierConfig,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRetentionPolicySpec {
    #[serde(default)]
    pub hot: HotTierConfig,
    #[serde(default)]
    pub warm: WarmTierConfig,
    #[serde(default)]
    pub cold: ColdTierConfig,
    #[serde(default)]
    pub workspace_overrides: std::collections::BTreeMap<String, TierOverride>,
}

/// Deep-merge: override wins field-wise over the default, hot never merges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveTierConfig {
    pub warm: WarmTierConfig,
    pub cold: ColdTierConfig,
}

impl SessionRetentionPolicySpec {
    pub fn effective_for(&self, workspace: &str) -> EffectiveTierConfig {
        let base = TierOverride {
            warm: self.warm,
            cold: self.cold,
        };
        let Some(over) = self.workspace_overrides.get(workspace) else {
            return EffectiveTierConfig {
                warm: base.warm,
                cold: base.cold,
            };
        };
        EffectiveTierConfig {
            warm: WarmTierConfig {
                retention_days: over.warm.retention_days.or(base.warm.retention_days),
            },
            cold: ColdTierConfig {
                enabled: over.cold.enabled.or(base.cold.enabled),
                retention_days: over.cold.retention_days.or(base.cold.retention_days),
                compaction_schedule: over
                    .cold
                    .compaction_schedule
                    .clone()
                    .or_else(|| base.cold.compaction_schedule.clone()),
            },
        }
    }
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRetentionPolicyStatus {
    #[serde(default)]
    pub workspace_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_wins_field_wise_over_default() {
        let spec = SessionRetentionPolicySpec {
            warm: WarmTierConfig {
                retention_days: Some(7),
            },
            cold: ColdTierConfig {
                enabled: Some(false),
                retention_days: None,
                compaction_schedule: None,
            },
            workspace_overrides: std::collections::BTreeMap::from([(
                "ws1".to_string(),
                TierOverride {
                    warm: WarmTierConfig { retention_days: Some(30) },
                    cold: ColdTierConfig {
                        enabled: Some(true),
                        retention_days: Some(365),
                        compaction_schedule: None,
                    },
                },
            )]),
            ..Default::default()
        };

        let ws1 = spec.effective_for("ws1");
        assert_eq!(ws1.warm.retention_days, Some(30));
        assert_eq!(ws1.cold.enabled, Some(true));
        assert_eq!(ws1.cold.retention_days, Some(365));

        let other = spec.effective_for("ws2");
        assert_eq!(other.warm.retention_days, Some(7));
        assert_eq!(other.cold.enabled, Some(false));
    }
}
