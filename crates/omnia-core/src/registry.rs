//! Resource Registry (spec.md §4.1).
//!
//! Populated once at process start, then read-only: each registered `Kind`
//! carries a default-value applicator, a list of named cross-field
//! validators, and the set of condition types it may carry. Admission-time
//! validation is factored out here so reconcilers can assume their
//! invariants already hold on read (spec.md §9 design note).
//!
//! Validators and defaulters operate on the raw `spec` as [`serde_json::Value`]
//! rather than the typed structs in [`crate::domain`] — the registry itself
//! is schema-driven and kind-agnostic; decoding into a concrete domain type
//! happens downstream, after admission succeeds.

use std::collections::HashMap;

use regex::Regex;
use semver::Version;
use serde_json::Value;

/// One cross-field rule, enumerated in spec.md §4.1 ("canary requires canary
/// block"; "hyperscaler types require platform"; "secretRef and credential
/// are mutually exclusive"; "header matches `^X-Omnia-Claim-[A-Za-z0-9-]+$`";
/// "version matches semver").
pub type Validator = fn(&Value) -> Result<(), String>;

/// Mutates `spec` in place, filling in any field the kind defines a default
/// for (e.g. `createVersionOnSync = true`, `mode = enforce`).
pub type DefaultApplicator = fn(&mut Value);

/// Everything the registry knows about one `kind`.
pub struct KindDescriptor {
    pub kind: &'static str,
    pub apply_defaults: Option<DefaultApplicator>,
    pub validators: Vec<(&'static str, Validator)>,
    /// Condition `type`s this kind's reconciler may set.
    pub conditions: &'static [&'static str],
}

impl KindDescriptor {
    /// Applies defaults then runs every validator, short-circuiting on the
    /// first failure. Order matches registration order, which matters only
    /// for which message a caller sees first — all validators are pure and
    /// side-effect free.
    pub fn admit(&self, spec: &mut Value) -> Result<(), String> {
        if let Some(apply) = self.apply_defaults {
            apply(spec);
        }
        for (name, validator) in &self.validators {
            validator(spec).map_err(|msg| format!("{name}: {msg}"))?;
        }
        Ok(())
    }
}

/// `register`/`lookup` (spec.md §4.1). Built once via [`ResourceRegistry::builder`]
/// then frozen; there is no mutation path after construction.
pub struct ResourceRegistry {
    descriptors: HashMap<&'static str, KindDescriptor>,
}

impl ResourceRegistry {
    pub fn builder() -> ResourceRegistryBuilder {
        ResourceRegistryBuilder {
            descriptors: HashMap::new(),
        }
    }

    pub fn lookup(&self, kind: &str) -> Option<&KindDescriptor> {
        self.descriptors.get(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.descriptors.keys().copied()
    }
}

pub struct ResourceRegistryBuilder {
    descriptors: HashMap<&'static str, KindDescriptor>,
}

impl ResourceRegistryBuilder {
    pub fn register(mut self, descriptor: KindDescriptor) -> Self {
        self.descriptors.insert(descriptor.kind, descriptor);
        self
    }

    pub fn build(self) -> ResourceRegistry {
        ResourceRegistry {
            descriptors: self.descriptors,
        }
    }
}

// ---- enumerated cross-field validators (spec.md §4.1) ----------------------

/// "canary requires canary block": `rollout.type=canary` implies
/// `rollout.canary` is present.
pub fn canary_requires_canary_block(spec: &Value) -> Result<(), String> {
    let rollout_type = spec.pointer("/rollout/type").and_then(Value::as_str);
    if rollout_type == Some("canary") && spec.pointer("/rollout/canary").is_none() {
        return Err("rollout.type=canary requires rollout.canary".to_string());
    }
    Ok(())
}

/// "hyperscaler types require platform": `type` in {bedrock, vertex,
/// azure-ai} implies both `platform` and `auth` are present.
pub fn hyperscaler_requires_platform(spec: &Value) -> Result<(), String> {
    const HYPERSCALERS: [&str; 3] = ["bedrock", "vertex", "azure-ai"];
    let provider_type = spec.pointer("/type").and_then(Value::as_str);
    if let Some(provider_type) = provider_type {
        if HYPERSCALERS.contains(&provider_type) {
            if spec.pointer("/platform").is_none() {
                return Err(format!("provider type {provider_type} requires a platform block"));
            }
            if spec.pointer("/auth").is_none() {
                return Err(format!("provider type {provider_type} requires an auth block"));
            }
        }
    }
    Ok(())
}

/// "secretRef and credential are mutually exclusive": at most one of
/// `credential.secretRef`, `credential.envVar`, `credential.filePath`.
pub fn credential_source_mutually_exclusive(spec: &Value) -> Result<(), String> {
    let credential = match spec.pointer("/credential") {
        Some(c) => c,
        None => return Ok(()),
    };
    let set_count = ["secretRef", "envVar", "filePath"]
        .iter()
        .filter(|field| credential.get(field).is_some_and(|v| !v.is_null()))
        .count();
    if set_count > 1 {
        return Err("at most one of credential.secretRef, envVar, filePath may be set".to_string());
    }
    Ok(())
}

/// "header matches `^X-Omnia-Claim-[A-Za-z0-9-]+$`": every `claimMapping`
/// value (the outbound header name) must match the prefix convention.
pub fn claim_header_matches_pattern(spec: &Value) -> Result<(), String> {
    let pattern = Regex::new(r"^X-Omnia-Claim-[A-Za-z0-9-]+$").expect("static regex is valid");
    let mapping = match spec.pointer("/claimMapping").and_then(Value::as_object) {
        Some(m) => m,
        None => return Ok(()),
    };
    for (claim, header) in mapping {
        let header = header.as_str().ok_or_else(|| format!("claimMapping.{claim} must be a string"))?;
        if !pattern.is_match(header) {
            return Err(format!(
                "claimMapping.{claim} = \"{header}\" does not match ^X-Omnia-Claim-[A-Za-z0-9-]+$"
            ));
        }
    }
    Ok(())
}

/// "version matches semver": `spec.version` parses as a valid semantic
/// version (PromptPack).
pub fn version_matches_semver(spec: &Value) -> Result<(), String> {
    let version = spec
        .pointer("/version")
        .and_then(Value::as_str)
        .ok_or_else(|| "spec.version is required".to_string())?;
    Version::parse(version).map_err(|e| format!("spec.version \"{version}\" is not valid semver: {e}"))?;
    Ok(())
}

// ---- default applicators ----------------------------------------------------

pub fn apply_arena_source_defaults(spec: &mut Value) {
    if let Some(obj) = spec.as_object_mut() {
        obj.entry("createVersionOnSync").or_insert(Value::Bool(true));
    }
}

pub fn apply_tool_policy_defaults(spec: &mut Value) {
    if let Some(obj) = spec.as_object_mut() {
        obj.entry("mode").or_insert(Value::String("enforce".to_string()));
    }
}

/// Registers every core kind from spec.md §3 with the validators that apply
/// to it, per §4.1's enumeration.
pub fn build_default_registry() -> ResourceRegistry {
    ResourceRegistry::builder()
        .register(KindDescriptor {
            kind: "AgentRuntime",
            apply_defaults: None,
            validators: vec![],
            conditions: &["Ready", "PromptPackReady", "ProviderReady", "ToolRegistryReady"],
        })
        .register(KindDescriptor {
            kind: "PromptPack",
            apply_defaults: None,
            validators: vec![
                ("version matches semver", version_matches_semver),
                ("canary requires canary block", canary_requires_canary_block),
            ],
            conditions: &["SchemaValid", "Ready"],
        })
        .register(KindDescriptor {
            kind: "Provider",
            apply_defaults: None,
            validators: vec![
                ("hyperscaler types require platform", hyperscaler_requires_platform),
                (
                    "secretRef and credential are mutually exclusive",
                    credential_source_mutually_exclusive,
                ),
            ],
            conditions: &["Ready"],
        })
        .register(KindDescriptor {
            kind: "ArenaSource",
            apply_defaults: Some(apply_arena_source_defaults),
            validators: vec![],
            conditions: &["Ready"],
        })
        .register(KindDescriptor {
            kind: "ToolRegistry",
            apply_defaults: None,
            validators: vec![],
            conditions: &["Ready", "Degraded"],
        })
        .register(KindDescriptor {
            kind: "AgentPolicy",
            apply_defaults: None,
            validators: vec![("header matches claim pattern", claim_header_matches_pattern)],
            conditions: &["Active"],
        })
        .register(KindDescriptor {
            kind: "ToolPolicy",
            apply_defaults: Some(apply_tool_policy_defaults),
            validators: vec![("header matches claim pattern", claim_header_matches_pattern)],
            conditions: &["Ready"],
        })
        .register(KindDescriptor {
            kind: "SessionRetentionPolicy",
            apply_defaults: None,
            validators: vec![],
            conditions: &[],
        })
        .register(KindDescriptor {
            kind: "SessionAnalyticsSync",
            apply_defaults: None,
            validators: vec![],
            conditions: &["Ready"],
        })
        .register(KindDescriptor {
            kind: "SessionStreamingConfig",
            apply_defaults: None,
            validators: vec![],
            conditions: &["Active"],
        })
        .register(KindDescriptor {
            kind: "Workspace",
            apply_defaults: None,
            validators: vec![],
            conditions: &["NamespaceReady", "BudgetOk"],
        })
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lookup_returns_registered_kind_with_its_conditions() {
        let registry = build_default_registry();
        let descriptor = registry.lookup("PromptPack").expect("PromptPack is registered");
        assert!(descriptor.conditions.contains(&"SchemaValid"));
    }

    #[test]
    fn lookup_returns_none_for_unregistered_kind() {
        let registry = build_default_registry();
        assert!(registry.lookup("NotAKind").is_none());
    }

    #[test]
    fn canary_without_block_is_rejected() {
        let spec = json!({"rollout": {"type": "canary"}});
        assert!(canary_requires_canary_block(&spec).is_err());
    }

    #[test]
    fn canary_with_block_passes() {
        let spec = json!({"rollout": {"type": "canary", "canary": {"weight": 10}}});
        assert!(canary_requires_canary_block(&spec).is_ok());
    }

    #[test]
    fn immediate_rollout_does_not_require_canary_block() {
        let spec = json!({"rollout": {"type": "immediate"}});
        assert!(canary_requires_canary_block(&spec).is_ok());
    }

    #[test]
    fn hyperscaler_type_without_platform_is_rejected() {
        let spec = json!({"type": "bedrock"});
        assert!(hyperscaler_requires_platform(&spec).is_err());
    }

    #[test]
    fn hyperscaler_type_with_platform_and_auth_passes() {
        let spec = json!({
            "type": "vertex",
            "platform": {"cloud": "gcp"},
            "auth": {"kind": "workload-identity"},
        });
        assert!(hyperscaler_requires_platform(&spec).is_ok());
    }

    #[test]
    fn non_hyperscaler_type_has_no_platform_requirement() {
        let spec = json!({"type": "claude"});
        assert!(hyperscaler_requires_platform(&spec).is_ok());
    }

    #[test]
    fn two_credential_sources_at_once_is_rejected() {
        let spec = json!({"credential": {"secretRef": "s", "envVar": "E"}});
        assert!(credential_source_mutually_exclusive(&spec).is_err());
    }

    #[test]
    fn single_credential_source_passes() {
        let spec = json!({"credential": {"secretRef": "s"}});
        assert!(credential_source_mutually_exclusive(&spec).is_ok());
    }

    #[test]
    fn claim_header_must_carry_prefix() {
        let spec = json!({"claimMapping": {"team": "X-Team"}});
        assert!(claim_header_matches_pattern(&spec).is_err());

        let spec = json!({"claimMapping": {"team": "X-Omnia-Claim-Team"}});
        assert!(claim_header_matches_pattern(&spec).is_ok());
    }

    #[test]
    fn version_must_be_valid_semver() {
        assert!(version_matches_semver(&json!({"version": "1.0.0"})).is_ok());
        assert!(version_matches_semver(&json!({"version": "not-a-version"})).is_err());
        assert!(version_matches_semver(&json!({})).is_err());
    }

    #[test]
    fn admit_applies_defaults_before_validating() {
        let registry = build_default_registry();
        let descriptor = registry.lookup("ArenaSource").unwrap();
        let mut spec = json!({});
        descriptor.admit(&mut spec).unwrap();
        assert_eq!(spec["createVersionOnSync"], json!(true));
    }

    #[test]
    fn admit_surfaces_the_validator_name_in_the_error() {
        let registry = build_default_registry();
        let descriptor = registry.lookup("PromptPack").unwrap();
        let mut spec = json!({"rollout": {"type": "canary"}});
        let err = descriptor.admit(&mut spec).unwrap_err();
        assert!(err.contains("version matches semver"));
    }
}
