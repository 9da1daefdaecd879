//! Agent Runtime Reconciler (C11, spec.md §4.11).
//!
//! Resolves an AgentRuntime's PromptPack/Provider(s)/ToolRegistry/AgentPolicy
//! references, composes deployment/service/autoscaler artifacts, and applies
//! them through [`ClusterArtifactApplier`] — named the way [`tool_registry`]
//! names its `ServiceResolver`/`ToolDiscovery` traits, so it can be swapped
//! for a real cluster-API client without touching reconcile logic.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use omnia_core::domain::{
    AgentPolicyStatus, AgentRuntimeSpec, AgentRuntimeStatus, AutoscalerType, FrameworkConfig,
    FrameworkKind, ObjectRef, Phase, ProviderSpec, ProviderStatus, PromptPackPhase,
    PromptPackStatus, ToolRegistryPhase, ToolRegistryStatus,
};
use omnia_core::{Condition, ConditionStatus, ReconcileError, RequeueHint, DEFAULT_REFERENCE_GRACE_WINDOW};
use omnia_storage::{DesiredStateStore, ObjectKey, StoredObject};

use crate::dispatcher::{ReconcileOutput, Reconciler};

const FACADE_SIDECAR_IMAGE: &str = "omnia/facade-sidecar:latest";
const DEFAULT_KEDA_TRIGGER: &str = "prometheus-connection-count";
/// Re-checked periodically since deployment/service readiness can change
/// without this object's own spec changing.
const READINESS_POLL_SECS: u64 = 30;

fn builtin_framework_image(framework: &FrameworkConfig) -> Result<String, ReconcileError> {
    match framework.kind {
        FrameworkKind::Custom => framework
            .image
            .clone()
            .ok_or_else(|| ReconcileError::Validation("framework.image is required when framework.type=custom".to_string())),
        FrameworkKind::LangGraph => Ok("omnia/framework-langgraph:latest".to_string()),
        FrameworkKind::Autogen => Ok("omnia/framework-autogen:latest".to_string()),
        FrameworkKind::Crewai => Ok("omnia/framework-crewai:latest".to_string()),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulingSpec {
    pub node_selector: BTreeMap<String, String>,
    pub tolerations: Vec<String>,
    pub extra_pod_annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentArtifact {
    pub name: String,
    pub namespace: String,
    pub replicas: u32,
    pub framework_image: String,
    pub facade_image: String,
    pub facade_port: u16,
    pub env: BTreeMap<String, String>,
    pub volumes: Vec<String>,
    pub scheduling: SchedulingSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeploymentState {
    pub ready_replicas: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceArtifact {
    pub name: String,
    pub namespace: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceState {
    pub reachable: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AutoscalerArtifact {
    Static {
        replicas: u32,
    },
    Hpa {
        min_replicas: u32,
        max_replicas: u32,
        memory_target_percent: u32,
        cpu_target_percent: Option<u32>,
        scale_down_stabilization_secs: Option<u32>,
    },
    Keda {
        min_replicas: u32,
        max_replicas: u32,
        triggers: Vec<String>,
    },
}

/// Named so it can be swapped for a real cluster-API client (mirrors
/// [`crate::reconcile::tool_registry::ServiceResolver`]'s rationale).
#[async_trait]
pub trait ClusterArtifactApplier: Send + Sync {
    async fn apply_deployment(&self, artifact: DeploymentArtifact) -> Result<DeploymentState, String>;
    async fn apply_service(&self, artifact: ServiceArtifact) -> Result<ServiceState, String>;
    async fn apply_autoscaler(&self, artifact: AutoscalerArtifact) -> Result<(), String>;
}

pub struct AgentRuntimeReconciler {
    store: Arc<dyn DesiredStateStore>,
    applier: Arc<dyn ClusterArtifactApplier>,
}

impl AgentRuntimeReconciler {
    pub fn new(store: Arc<dyn DesiredStateStore>, applier: Arc<dyn ClusterArtifactApplier>) -> Self {
        Self { store, applier }
    }

    async fn get(&self, kind: &str, reference: &ObjectRef, default_namespace: &str) -> Result<Option<StoredObject>, ReconcileError> {
        let key = ObjectKey::new(kind, reference.namespace_or(default_namespace), &reference.name);
        self.store.get(&key).await.map_err(|e| ReconcileError::Transient(e.to_string()))
    }
}

#[async_trait]
impl Reconciler for AgentRuntimeReconciler {
    fn kind(&self) -> &'static str {
        "AgentRuntime"
    }

    async fn reconcile(&self, object: &StoredObject) -> Result<ReconcileOutput, ReconcileError> {
        let spec: AgentRuntimeSpec = serde_json::from_value(object.spec.clone())
            .map_err(|e| ReconcileError::Validation(e.to_string()))?;
        let namespace = &object.key.namespace;

        if let Some(autoscaling) = &spec.autoscaling {
            if autoscaling.enabled
                && autoscaling.min_replicas == Some(0)
                && autoscaling.autoscaler_type != Some(AutoscalerType::Keda)
            {
                return Err(ReconcileError::Validation(
                    "autoscaling.minReplicas=0 requires autoscaling.type=keda".to_string(),
                ));
            }
        }

        // 1. Resolve references.
        let pack_object = self
            .get("PromptPack", &spec.prompt_pack_ref, namespace)
            .await?
            .ok_or_else(|| reference_error(object, format!("PromptPack {} not found", spec.prompt_pack_ref.name)))?;
        let pack_status: PromptPackStatus = serde_json::from_value(pack_object.status.clone()).unwrap_or_default();
        if !matches!(pack_status.phase, Some(PromptPackPhase::Active) | Some(PromptPackPhase::Canary)) {
            return Err(reference_error(object, format!("PromptPack {} is not Active/Canary", spec.prompt_pack_ref.name)));
        }

        let providers = spec.effective_providers();
        if providers.is_empty() {
            return Err(ReconcileError::Validation("no provider configured (providers/providerRef both empty)".to_string()));
        }

        let mut env = BTreeMap::new();
        for (role, provider_ref) in &providers {
            let provider_object = self
                .get("Provider", provider_ref, namespace)
                .await?
                .ok_or_else(|| reference_error(object, format!("Provider {} (role {role}) not found", provider_ref.name)))?;
            let provider_status: ProviderStatus = serde_json::from_value(provider_object.status.clone())
                .map_err(|e| ReconcileError::UpstreamSemantic(e.to_string()))?;
            if provider_status.phase != Phase::Active {
                return Err(reference_error(object, format!("Provider {} (role {role}) is not Active", provider_ref.name)));
            }
            let provider_spec: ProviderSpec = serde_json::from_value(provider_object.spec.clone())
                .map_err(|e| ReconcileError::UpstreamSemantic(e.to_string()))?;
            project_provider_env(&mut env, role, &provider_spec);
        }

        if let Some(tool_registry_ref) = &spec.tool_registry_ref {
            let tr_object = self
                .get("ToolRegistry", tool_registry_ref, namespace)
                .await?
                .ok_or_else(|| reference_error(object, format!("ToolRegistry {} not found", tool_registry_ref.name)))?;
            let tr_status: ToolRegistryStatus = serde_json::from_value(tr_object.status.clone()).unwrap_or_default();
            if !matches!(tr_status.phase, Some(ToolRegistryPhase::Ready) | Some(ToolRegistryPhase::Degraded)) {
                return Err(reference_error(object, format!("ToolRegistry {} is not Ready/Degraded", tool_registry_ref.name)));
            }
        }

        if let Some(policy_ref) = &spec.policy_ref {
            let policy_object = self
                .get("AgentPolicy", policy_ref, namespace)
                .await?
                .ok_or_else(|| reference_error(object, format!("AgentPolicy {} not found", policy_ref.name)))?;
            let policy_status: AgentPolicyStatus = serde_json::from_value(policy_object.status.clone()).unwrap_or_default();
            if !policy_status.active {
                return Err(reference_error(object, format!("AgentPolicy {} is not Active", policy_ref.name)));
            }
        }

        // 2. Deployment artifact.
        let framework_image = builtin_framework_image(&spec.framework)?;
        let deployment = DeploymentArtifact {
            name: object.key.name.clone(),
            namespace: namespace.clone(),
            replicas: if spec.autoscaling.as_ref().is_some_and(|a| a.enabled) { 0 } else { spec.replicas },
            framework_image,
            facade_image: FACADE_SIDECAR_IMAGE.to_string(),
            facade_port: spec.facade.port,
            env,
            volumes: spec.runtime.volumes.clone(),
            scheduling: SchedulingSpec {
                node_selector: spec.runtime.scheduling.node_selector.clone(),
                tolerations: spec.runtime.scheduling.tolerations.clone(),
                extra_pod_annotations: spec.runtime.scheduling.extra_pod_annotations.clone(),
            },
        };
        let deployment_state = self
            .applier
            .apply_deployment(deployment)
            .await
            .map_err(ReconcileError::Transient)?;

        // 3. Service artifact.
        let service = ServiceArtifact {
            name: object.key.name.clone(),
            namespace: namespace.clone(),
            port: spec.facade.port,
        };
        let service_state = self.applier.apply_service(service).await.map_err(ReconcileError::Transient)?;
        let service_endpoint = format!("{}.{}.svc.cluster.local:{}", object.key.name, namespace, spec.facade.port);

        // 4. Autoscaler composition.
        let autoscaler = match &spec.autoscaling {
            None => AutoscalerArtifact::Static { replicas: spec.replicas },
            Some(autoscaling) if !autoscaling.enabled => AutoscalerArtifact::Static { replicas: spec.replicas },
            Some(autoscaling) => match autoscaling.autoscaler_type {
                Some(AutoscalerType::Hpa) | None => {
                    let memory_target_percent = autoscaling
                        .memory_target_percent
                        .ok_or_else(|| ReconcileError::Validation("autoscaling.type=hpa requires memoryTargetPercent".to_string()))?;
                    AutoscalerArtifact::Hpa {
                        min_replicas: autoscaling.min_replicas.unwrap_or(1),
                        max_replicas: autoscaling.max_replicas.unwrap_or(autoscaling.min_replicas.unwrap_or(1).max(1)),
                        memory_target_percent,
                        cpu_target_percent: autoscaling.cpu_target_percent,
                        scale_down_stabilization_secs: autoscaling.scale_down_stabilization_secs,
                    }
                }
                Some(AutoscalerType::Keda) => {
                    let triggers = if autoscaling.keda_triggers.is_empty() {
                        vec![DEFAULT_KEDA_TRIGGER.to_string()]
                    } else {
                        autoscaling.keda_triggers.clone()
                    };
                    AutoscalerArtifact::Keda {
                        min_replicas: autoscaling.min_replicas.unwrap_or(0),
                        max_replicas: autoscaling.max_replicas.unwrap_or(1),
                        triggers,
                    }
                }
            },
        };
        self.applier.apply_autoscaler(autoscaler).await.map_err(ReconcileError::Transient)?;

        // 5. Aggregate readiness.
        let phase = if deployment_state.ready_replicas >= 1 && service_state.reachable {
            Phase::Active
        } else {
            Phase::Pending
        };

        let status = AgentRuntimeStatus {
            phase: Some(phase),
            service_endpoint: Some(service_endpoint),
            ready_replicas: deployment_state.ready_replicas,
        };

        let mut conditions = object.conditions.clone();
        let (cond_status, reason) = match phase {
            Phase::Active => (ConditionStatus::True, "Running"),
            _ => (ConditionStatus::False, "WaitingForReadyReplicas"),
        };
        set_condition(&mut conditions, "Ready", cond_status, reason, "");

        Ok(ReconcileOutput::new(serde_json::to_value(&status).unwrap(), conditions)
            .requeue_after(RequeueHint::after_secs(READINESS_POLL_SECS)))
    }
}

fn project_provider_env(env: &mut BTreeMap<String, String>, role: &str, provider_spec: &ProviderSpec) {
    let prefix = role.to_uppercase();
    env.insert(format!("{prefix}_PROVIDER_TYPE"), format!("{:?}", provider_spec.provider_type).to_lowercase());
    if let Some(base_url) = &provider_spec.base_url {
        env.insert(format!("{prefix}_BASE_URL"), base_url.clone());
    }
    if let Some(model) = &provider_spec.default_model {
        env.insert(format!("{prefix}_DEFAULT_MODEL"), model.clone());
    }
    if let Some(secret_ref) = &provider_spec.credential.secret_ref {
        env.insert(format!("{prefix}_CREDENTIAL_SECRET_REF"), secret_ref.clone());
    }
    if let Some(env_var) = &provider_spec.credential.env_var {
        env.insert(format!("{prefix}_CREDENTIAL_ENV_VAR"), env_var.clone());
    }
}

/// A `Reference` error escalates to a permanent `Validation` once the shared
/// `Ready=False/ReferenceNotReady` condition the dispatcher maintains
/// (spec.md §4.3, §7) has stood for longer than the grace window. Since that
/// condition isn't split per reference kind, the window is conservative: it
/// measures "something has been not-ready continuously", not per-reference
/// elapsed time (see DESIGN.md).
fn reference_error(object: &StoredObject, message: String) -> ReconcileError {
    let now = Utc::now();
    let grace_exceeded = object
        .conditions
        .iter()
        .find(|c| c.kind == "Ready" && c.status == ConditionStatus::False && c.reason == "ReferenceNotReady")
        .map(|c| (now - c.last_transition_time).to_std().unwrap_or_default() >= DEFAULT_REFERENCE_GRACE_WINDOW)
        .unwrap_or(false);
    if grace_exceeded {
        ReconcileError::Validation(message)
    } else {
        ReconcileError::Reference(message)
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

/// No-op stand-in for the real cluster-API client spec.md §1 names as out
/// of scope ("the specific container-cluster client library"). Reports
/// every applied artifact as immediately ready, which is enough to drive
/// the reconciler's own state machine to completion. `main` wires this
/// until a real adapter exists.
pub mod fakes {
    use super::*;

    #[derive(Default)]
    pub struct InertClusterApplier;

    #[async_trait]
    impl ClusterArtifactApplier for InertClusterApplier {
        async fn apply_deployment(&self, artifact: DeploymentArtifact) -> Result<DeploymentState, String> {
            Ok(DeploymentState { ready_replicas: artifact.replicas.max(1) })
        }
        async fn apply_service(&self, _artifact: ServiceArtifact) -> Result<ServiceState, String> {
            Ok(ServiceState { reachable: true })
        }
        async fn apply_autoscaler(&self, _artifact: AutoscalerArtifact) -> Result<(), String> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omnia_storage::InMemoryDesiredStateStore;
    use serde_json::json;

    struct FakeApplier {
        ready_replicas: u32,
        reachable: bool,
    }

    #[async_trait]
    impl ClusterArtifactApplier for FakeApplier {
        async fn apply_deployment(&self, _artifact: DeploymentArtifact) -> Result<DeploymentState, String> {
            Ok(DeploymentState { ready_replicas: self.ready_replicas })
        }
        async fn apply_service(&self, _artifact: ServiceArtifact) -> Result<ServiceState, String> {
            Ok(ServiceState { reachable: self.reachable })
        }
        async fn apply_autoscaler(&self, _artifact: AutoscalerArtifact) -> Result<(), String> {
            Ok(())
        }
    }

    fn object(spec: serde_json::Value, conditions: Vec<Condition>) -> StoredObject {
        StoredObject {
            key: ObjectKey::new("AgentRuntime", "default", "a1"),
            generation: 1,
            spec,
            observed_generation: 0,
            status: json!({}),
            conditions,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn spec_json() -> serde_json::Value {
        json!({
            "promptPackRef": {"name": "pp1"},
            "facade": {"protocol": "websocket", "port": 8080},
            "framework": {"type": "custom", "image": "img:latest"},
            "providers": [{"role": "default", "providerRef": {"name": "prov1"}}],
            "replicas": 2,
        })
    }

    async fn seed_ready_refs(store: &Arc<InMemoryDesiredStateStore>) {
        store.put_spec(ObjectKey::new("PromptPack", "default", "pp1"), json!({})).await.unwrap();
        store
            .put_status(&ObjectKey::new("PromptPack", "default", "pp1"), 1, json!({"phase": "Active"}), vec![])
            .await
            .unwrap();
        store.put_spec(ObjectKey::new("Provider", "default", "prov1"), json!({"type": "openai"})).await.unwrap();
        store
            .put_status(&ObjectKey::new("Provider", "default", "prov1"), 1, json!({"phase": "Active"}), vec![])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn aggregates_running_phase_when_replicas_ready_and_service_reachable() {
        let store = Arc::new(InMemoryDesiredStateStore::new());
        seed_ready_refs(&store).await;
        let reconciler = AgentRuntimeReconciler::new(
            store.clone() as Arc<dyn DesiredStateStore>,
            Arc::new(FakeApplier { ready_replicas: 2, reachable: true }),
        );

        let output = reconciler.reconcile(&object(spec_json(), vec![])).await.unwrap();
        let status: AgentRuntimeStatus = serde_json::from_value(output.status).unwrap();
        assert_eq!(status.phase, Some(Phase::Active));
        assert_eq!(status.ready_replicas, 2);
        assert_eq!(status.service_endpoint.unwrap(), "a1.default.svc.cluster.local:8080");
    }

    #[tokio::test]
    async fn missing_prompt_pack_is_a_reference_error_before_grace_window() {
        let store = Arc::new(InMemoryDesiredStateStore::new());
        let reconciler = AgentRuntimeReconciler::new(
            store as Arc<dyn DesiredStateStore>,
            Arc::new(FakeApplier { ready_replicas: 1, reachable: true }),
        );

        let err = reconciler.reconcile(&object(spec_json(), vec![])).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Reference(_)));
    }

    #[tokio::test]
    async fn missing_prompt_pack_escalates_to_validation_after_grace_window() {
        let store = Arc::new(InMemoryDesiredStateStore::new());
        let reconciler = AgentRuntimeReconciler::new(
            store as Arc<dyn DesiredStateStore>,
            Arc::new(FakeApplier { ready_replicas: 1, reachable: true }),
        );

        let stale_condition = Condition {
            kind: "Ready".to_string(),
            status: ConditionStatus::False,
            reason: "ReferenceNotReady".to_string(),
            message: "stale".to_string(),
            last_transition_time: Utc::now() - chrono::Duration::seconds(DEFAULT_REFERENCE_GRACE_WINDOW.as_secs() as i64 + 1),
        };

        let err = reconciler.reconcile(&object(spec_json(), vec![stale_condition])).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Validation(_)));
    }

    #[tokio::test]
    async fn keda_required_when_min_replicas_is_zero() {
        let store = Arc::new(InMemoryDesiredStateStore::new());
        seed_ready_refs(&store).await;
        let reconciler = AgentRuntimeReconciler::new(
            store.clone() as Arc<dyn DesiredStateStore>,
            Arc::new(FakeApplier { ready_replicas: 1, reachable: true }),
        );

        let mut spec = spec_json();
        spec["autoscaling"] = json!({"enabled": true, "type": "hpa", "minReplicas": 0, "memoryTargetPercent": 70});
        let err = reconciler.reconcile(&object(spec, vec![])).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Validation(_)));
    }

    #[tokio::test]
    async fn hpa_without_memory_target_is_rejected() {
        let store = Arc::new(InMemoryDesiredStateStore::new());
        seed_ready_refs(&store).await;
        let reconciler = AgentRuntimeReconciler::new(
            store.clone() as Arc<dyn DesiredStateStore>,
            Arc::new(FakeApplier { ready_replicas: 1, reachable: true }),
        );

        let mut spec = spec_json();
        spec["autoscaling"] = json!({"enabled": true, "type": "hpa", "minReplicas": 1, "maxReplicas": 5});
        let err = reconciler.reconcile(&object(spec, vec![])).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Validation(_)));
    }
}
