//! Policy Compiler (C7, spec.md §4.7).
//!
//! `AgentPolicy` resolves a selector into concrete AgentRuntime names and
//! emits an authorization + header-injection artifact per match.
//! `ToolPolicy` precompiles each rule's `deny.cel` and header-injection
//! expressions ([`crate::reconcile::cel`]) once at reconcile time.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::Utc;
use omnia_core::domain::{
    AgentPolicySpec, AgentPolicyStatus, ClaimMapping, ToolAccess, ToolPolicyPhase, ToolPolicyRule, ToolPolicySpec,
    ToolPolicyStatus,
};
use omnia_core::{Condition, ConditionStatus, ReconcileError, RequeueHint};
use omnia_storage::{DesiredStateStore, StoredObject};
use std::sync::Arc;

use crate::dispatcher::{ReconcileOutput, Reconciler};
use crate::reconcile::cel;

/// Publishes compiled policy artifacts to the policy-proxy (spec.md §4.7:
/// "drive an external policy-proxy collaborator; this engine owns only their
/// generation and lifecycle"). Named the way [`super::tool_registry`] and
/// [`super::agent_runtime`] name their own cluster-facing collaborators.
#[async_trait]
pub trait PolicyArtifactPublisher: Send + Sync {
    async fn publish_agent_policy(
        &self,
        policy_name: &str,
        matched_agents: &[String],
        claim_mapping: &ClaimMapping,
        tool_access: &ToolAccess,
    ) -> Result<(), String>;

    async fn publish_tool_policy(&self, policy_name: &str, rules: &[ToolPolicyRule]) -> Result<(), String>;
}

/// AgentPolicy: claim-mapping + tool allow/deny lists projected onto the
/// AgentRuntimes a selector resolves to.
pub struct AgentPolicyReconciler {
    store: Arc<dyn DesiredStateStore>,
    publisher: Arc<dyn PolicyArtifactPublisher>,
}

impl AgentPolicyReconciler {
    pub fn new(store: Arc<dyn DesiredStateStore>, publisher: Arc<dyn PolicyArtifactPublisher>) -> Self {
        Self { store, publisher }
    }
}

#[async_trait]
impl Reconciler for AgentPolicyReconciler {
    fn kind(&self) -> &'static str {
        "AgentPolicy"
    }

    async fn reconcile(&self, object: &StoredObject) -> Result<ReconcileOutput, ReconcileError> {
        let spec: AgentPolicySpec = serde_json::from_value(object.spec.clone())
            .map_err(|e| ReconcileError::Validation(e.to_string()))?;

        let rule_pairs: BTreeSet<(&str, &str)> = spec
            .tool_access
            .allow
            .iter()
            .chain(spec.tool_access.deny.iter())
            .map(|r| (r.registry.as_str(), r.tool.as_str()))
            .collect();
        let total_rules = spec.tool_access.allow.len() + spec.tool_access.deny.len();
        if rule_pairs.len() != total_rules {
            return Err(ReconcileError::Validation("duplicate (registry, tool) pair within tool_access rules".to_string()));
        }

        let matched_names: Vec<String> = if spec.selector.all {
            self.store
                .list("AgentRuntime", Some(&object.key.namespace))
                .await
                .map_err(|e| ReconcileError::Transient(e.to_string()))?
                .into_iter()
                .map(|o| o.key.name)
                .collect()
        } else {
            spec.selector.names.clone()
        };

        let mut status = AgentPolicyStatus {
            active: true,
            matched_agent_count: matched_names.len() as u32,
        };
        if matched_names.is_empty() {
            status.active = false;
        }

        if status.active {
            self.publisher
                .publish_agent_policy(&object.key.name, &matched_names, &spec.claim_mapping, &spec.tool_access)
                .await
                .map_err(ReconcileError::Transient)?;
        }

        let mut conditions = object.conditions.clone();
        let (cond_status, reason) = if status.active {
            (ConditionStatus::True, "ArtifactsGenerated")
        } else {
            (ConditionStatus::False, "NoMatchingAgents")
        };
        set_condition(&mut conditions, "Active", cond_status, reason, "");

        Ok(ReconcileOutput::new(serde_json::to_value(&status).unwrap(), conditions))
    }
}

/// ToolPolicy: precompiles every rule's CEL gate and header injections.
pub struct ToolPolicyReconciler {
    publisher: Arc<dyn PolicyArtifactPublisher>,
}

impl ToolPolicyReconciler {
    pub fn new(publisher: Arc<dyn PolicyArtifactPublisher>) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl Reconciler for ToolPolicyReconciler {
    fn kind(&self) -> &'static str {
        "ToolPolicy"
    }

    async fn reconcile(&self, object: &StoredObject) -> Result<ReconcileOutput, ReconcileError> {
        let spec: ToolPolicySpec = serde_json::from_value(object.spec.clone())
            .map_err(|e| ReconcileError::Validation(e.to_string()))?;

        let mut status = ToolPolicyStatus::default();
        let mut conditions = object.conditions.clone();

        for rule in &spec.rules {
            if let Err(e) = cel::compile(&rule.deny_cel) {
                status.phase = Some(ToolPolicyPhase::Error);
                status.rule_count = 0;
                set_condition(&mut conditions, "Ready", ConditionStatus::False, "CompileError", &format!("rule {}: {e}", rule.name));
                return Ok(ReconcileOutput::new(serde_json::to_value(&status).unwrap(), conditions));
            }
            for injection in &rule.header_injections {
                if let Some(expr) = &injection.cel_expression {
                    if let Err(e) = cel::compile(expr) {
                        status.phase = Some(ToolPolicyPhase::Error);
                        status.rule_count = 0;
                        set_condition(
                            &mut conditions,
                            "Ready",
                            ConditionStatus::False,
                            "CompileError",
                            &format!("rule {} header {}: {e}", rule.name, injection.header),
                        );
                        return Ok(ReconcileOutput::new(serde_json::to_value(&status).unwrap(), conditions));
                    }
                }
            }
        }

        self.publisher
            .publish_tool_policy(&object.key.name, &spec.rules)
            .await
            .map_err(ReconcileError::Transient)?;

        status.phase = Some(ToolPolicyPhase::Ready);
        status.rule_count = spec.rules.len() as u32;
        set_condition(&mut conditions, "Ready", ConditionStatus::True, "Compiled", "all rules compiled");

        Ok(ReconcileOutput::new(serde_json::to_value(&status).unwrap(), conditions)
            .requeue_after(RequeueHint::None))
    }
}

fn set_condition(conditions: &mut Vec<Condition>, kind: &str, status: ConditionStatus, reason: &str, message: &str) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.kind == kind) {
        if existing.status != status {
            existing.status = status;
            existing.last_transition_time = Utc::now();
        }
        existing.reason = reason.to_string();
        existing.message = message.to_string();
    } else {
        conditions.push(Condition::new(kind, status, reason, message));
    }
}

/// No-op stand-in for the real policy-proxy spec.md §4.7 names as out of
/// scope. Always succeeds, so `main` can wire it in place of a real adapter
/// without stalling either reconciler on a publish step that never resolves.
pub mod fakes {
    use super::*;

    #[derive(Default)]
    pub struct NullPolicyPublisher;

    #[async_trait]
    impl PolicyArtifactPublisher for NullPolicyPublisher {
        async fn publish_agent_policy(
            &self,
            _policy_name: &str,
            _matched_agents: &[String],
            _claim_mapping: &ClaimMapping,
            _tool_access: &ToolAccess,
        ) -> Result<(), String> {
            Ok(())
        }

        async fn publish_tool_policy(&self, _policy_name: &str, _rules: &[ToolPolicyRule]) -> Result<(), String> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omnia_storage::{InMemoryDesiredStateStore, ObjectKey};
    use serde_json::json;

    fn publisher() -> Arc<dyn PolicyArtifactPublisher> {
        Arc::new(fakes::NullPolicyPublisher)
    }

    fn object(kind: &str, spec: serde_json::Value) -> StoredObject {
        StoredObject {
            key: ObjectKey::new(kind, "default", "p1"),
            generation: 1,
            spec,
            observed_generation: 0,
            status: json!({}),
            conditions: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn agent_policy_resolves_all_selector_against_registered_runtimes() {
        let store: Arc<dyn DesiredStateStore> = Arc::new(InMemoryDesiredStateStore::new());
        store.put_spec(ObjectKey::new("AgentRuntime", "default", "a1"), json!({})).await.unwrap();
        store.put_spec(ObjectKey::new("AgentRuntime", "default", "a2"), json!({})).await.unwrap();

        let reconciler = AgentPolicyReconciler::new(store, publisher());
        let spec = json!({
            "selector": {"all": true},
            "mode": "enforce",
            "onFailure": "deny",
        });
        let output = reconciler.reconcile(&object("AgentPolicy", spec)).await.unwrap();
        let status: AgentPolicyStatus = serde_json::from_value(output.status).unwrap();
        assert!(status.active);
        assert_eq!(status.matched_agent_count, 2);
    }

    #[tokio::test]
    async fn agent_policy_rejects_duplicate_tool_access_pairs() {
        let store: Arc<dyn DesiredStateStore> = Arc::new(InMemoryDesiredStateStore::new());
        let reconciler = AgentPolicyReconciler::new(store, publisher());
        let spec = json!({
            "selector": {"names": ["a1"]},
            "toolAccess": {"allow": [
                {"registry": "r1", "tool": "t1"},
                {"registry": "r1", "tool": "t1"},
            ]},
            "mode": "enforce",
            "onFailure": "deny",
        });
        let err = reconciler.reconcile(&object("AgentPolicy", spec)).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Validation(_)));
    }

    #[tokio::test]
    async fn tool_policy_compiles_valid_rules() {
        let reconciler = ToolPolicyReconciler::new(publisher());
        let spec = json!({
            "mode": "enforce",
            "rules": [{
                "name": "r1", "registry": "reg", "tool": "t",
                "denyCel": "headers[\"X-Env\"] == \"prod\"",
            }],
        });
        let output = reconciler.reconcile(&object("ToolPolicy", spec)).await.unwrap();
        let status: ToolPolicyStatus = serde_json::from_value(output.status).unwrap();
        assert_eq!(status.phase, Some(ToolPolicyPhase::Ready));
        assert_eq!(status.rule_count, 1);
    }

    #[tokio::test]
    async fn tool_policy_compile_error_zeroes_rule_count() {
        let reconciler = ToolPolicyReconciler::new(publisher());
        let spec = json!({
            "mode": "enforce",
            "rules": [{
                "name": "r1", "registry": "reg", "tool": "t",
                "denyCel": "headers[",
            }],
        });
        let output = reconciler.reconcile(&object("ToolPolicy", spec)).await.unwrap();
        let status: ToolPolicyStatus = serde_json::from_value(output.status).unwrap();
        assert_eq!(status.phase, Some(ToolPolicyPhase::Error));
        assert_eq!(status.rule_count, 0);
    }
}
