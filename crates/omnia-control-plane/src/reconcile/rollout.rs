//! Rollout State Machine (C5, spec.md §4.5).
//!
//! Drives a PromptPack through `Pending → Active` on first validated spec,
//! then `Active ↔ Canary ↔ Active` with weighted traffic shifting as newer
//! versions arrive. Validation is two-phase (ConfigMap has `pack.json`;
//! `pack.json` conforms to schema) and both failure modes are permanent
//! (`Validation`, spec.md §7) until the spec next changes.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use omnia_core::domain::{CanaryConfig, ObjectRef, PromptPackPhase, PromptPackSpec, PromptPackStatus, RolloutType};
use omnia_core::{Condition, ConditionStatus, ReconcileError, RequeueHint};
use omnia_storage::StoredObject;
use serde_json::Value;

use crate::dispatcher::{ReconcileOutput, Reconciler};

/// Reads the inline ConfigMap a PromptPack's `spec.source` points at
/// (spec.md §4.5 validation phase (a): "ConfigMap has pack.json"). A missing
/// ConfigMap or a missing `pack.json` key are both reported as `Err` and
/// treated as validation failures, not as a retry-with-backoff reference
/// error — per spec.md §4.5 both phases of pack validation are permanent
/// until the spec changes.
#[async_trait]
pub trait PackConfigMapSource: Send + Sync {
    async fn read_pack_json(&self, source: &ObjectRef, namespace: &str) -> Result<Value, String>;
}

/// Validates a fetched `pack.json` against the externally-published JSON
/// Schema (spec.md §6: "fetched once at init"). Errors must surface the
/// exact failing path (S2: "message containing 'id is required'").
pub trait PackSchemaValidator: Send + Sync {
    fn validate(&self, pack: &Value) -> Result<(), String>;
}

pub struct RolloutReconciler {
    configmaps: Arc<dyn PackConfigMapSource>,
    schema: Arc<dyn PackSchemaValidator>,
}

impl RolloutReconciler {
    pub fn new(configmaps: Arc<dyn PackConfigMapSource>, schema: Arc<dyn PackSchemaValidator>) -> Self {
        Self { configmaps, schema }
    }

    fn fail(status: &mut PromptPackStatus, conditions: &mut Vec<Condition>, reason: &str, message: &str) -> ReconcileOutput {
        status.phase = Some(PromptPackPhase::Failed);
        set_condition(conditions, "SchemaValid", ConditionStatus::False, reason, message);
        ReconcileOutput::new(serde_json::to_value(&*status).unwrap(), conditions.clone())
    }
}

#[async_trait]
impl Reconciler for RolloutReconciler {
    fn kind(&self) -> &'static str {
        "PromptPack"
    }

    async fn reconcile(&self, object: &StoredObject) -> Result<ReconcileOutput, ReconcileError> {
        let spec: PromptPackSpec = serde_json::from_value(object.spec.clone())
            .map_err(|e| ReconcileError::Validation(e.to_string()))?;
        let mut status: PromptPackStatus = serde_json::from_value(object.status.clone()).unwrap_or_default();
        let mut conditions = object.conditions.clone();

        let pack = match self.configmaps.read_pack_json(&spec.source, &object.key.namespace).await {
            Ok(pack) => pack,
            Err(message) => return Ok(Self::fail(&mut status, &mut conditions, "ConfigMapMissing", &message)),
        };
        if let Err(message) = self.schema.validate(&pack) {
            return Ok(Self::fail(&mut status, &mut conditions, "SchemaInvalid", &message));
        }
        if let Err(e) = semver::Version::parse(spec.version.trim_start_matches('v')) {
            return Ok(Self::fail(&mut status, &mut conditions, "VersionInvalid", &e.to_string()));
        }
        set_condition(&mut conditions, "SchemaValid", ConditionStatus::True, "Valid", "pack.json parses and conforms to schema");

        let now = Utc::now();
        let requeue = self.advance(&spec, &mut status, now)?;

        Ok(ReconcileOutput::new(serde_json::to_value(&status).unwrap(), conditions).requeue_after(requeue))
    }
}

impl RolloutReconciler {
    /// The actual state machine (spec.md §4.5), run only once two-phase
    /// validation has passed.
    fn advance(
        &self,
        spec: &PromptPackSpec,
        status: &mut PromptPackStatus,
        now: DateTime<Utc>,
    ) -> Result<RequeueHint, ReconcileError> {
        let Some(active) = status.active_version.clone() else {
            // First-ever validated admission: there is nothing to canary
            // against yet, so go straight to Active regardless of
            // `rollout.type` (spec.md §4.5 names this transition "Pending →
            // Active (immediate rollout)"; a canary needs an existing Active
            // version to shift traffic away from, which doesn't exist here).
            status.phase = Some(PromptPackPhase::Active);
            status.active_version = Some(spec.version.clone());
            status.canary_version = None;
            status.canary_weight = None;
            status.next_weight_advance = None;
            return Ok(RequeueHint::None);
        };

        if status.canary_version.as_deref() == Some(spec.version.as_str()) {
            return self.advance_canary(spec, status, now);
        }

        if active == spec.version && status.canary_version.is_none() {
            status.phase = Some(PromptPackPhase::Active);
            return Ok(RequeueHint::None);
        }

        // A version other than the current Active/Canary target arrived.
        if let Some(abandoned) = status.canary_version.take() {
            if !status.superseded_versions.contains(&abandoned) {
                status.superseded_versions.push(abandoned);
            }
        }
        status.canary_weight = None;
        status.declared_weight = None;
        status.next_weight_advance = None;

        match spec.rollout.rollout_type {
            RolloutType::Immediate => {
                status.phase = Some(PromptPackPhase::Active);
                status.active_version = Some(spec.version.clone());
                Ok(RequeueHint::None)
            }
            RolloutType::Canary => {
                let canary = spec.rollout.canary.clone().ok_or_else(|| {
                    ReconcileError::Validation("rollout.type=canary requires a canary block".to_string())
                })?;
                status.phase = Some(PromptPackPhase::Canary);
                status.canary_version = Some(spec.version.clone());
                status.canary_weight = Some(canary.weight);
                status.declared_weight = Some(canary.weight);
                Ok(self.schedule_next_advance(status, &canary, now))
            }
        }
    }

    /// Already mid-canary for `spec.version`: either the operator edited
    /// `rollout.canary.weight` directly, or the auto-step schedule is due
    /// (spec.md §4.5: "Canary → Canary on `spec.rollout.canary.weight`
    /// updates; if a `stepWeight`+`interval` schedule is configured, the
    /// reconciler itself advances weight... up to 100").
    fn advance_canary(
        &self,
        spec: &PromptPackSpec,
        status: &mut PromptPackStatus,
        now: DateTime<Utc>,
    ) -> Result<RequeueHint, ReconcileError> {
        let canary = spec.rollout.canary.clone().ok_or_else(|| {
            ReconcileError::Validation("rollout.type=canary requires a canary block".to_string())
        })?;

        if status.declared_weight != Some(canary.weight) {
            // Operator explicitly edited the spec weight (as opposed to the
            // auto-step schedule having advanced `canary_weight` on its own,
            // which leaves `declared_weight` untouched); adopt it verbatim
            // and restart the auto-step baseline from now.
            status.canary_weight = Some(canary.weight);
            status.declared_weight = Some(canary.weight);
            status.next_weight_advance = None;
        } else if let Some(next) = status.next_weight_advance {
            if now >= next {
                let step = canary.step_weight.unwrap_or(0);
                let advanced = status.canary_weight.unwrap_or(canary.weight).saturating_add(step).min(100);
                status.canary_weight = Some(advanced);
            } else {
                status.phase = Some(PromptPackPhase::Canary);
                let wait = (next - now).to_std().unwrap_or(std::time::Duration::ZERO);
                return Ok(RequeueHint::After(wait));
            }
        }

        if status.canary_weight == Some(100) {
            status.phase = Some(PromptPackPhase::Active);
            status.active_version = status.canary_version.take();
            status.canary_weight = None;
            status.declared_weight = None;
            status.next_weight_advance = None;
            return Ok(RequeueHint::None);
        }

        status.phase = Some(PromptPackPhase::Canary);
        Ok(self.schedule_next_advance(status, &canary, now))
    }

    fn schedule_next_advance(&self, status: &mut PromptPackStatus, canary: &CanaryConfig, now: DateTime<Utc>) -> RequeueHint {
        match (canary.step_weight, canary.interval_secs) {
            (Some(_), Some(interval_secs)) => {
                let next = now + chrono::Duration::seconds(interval_secs as i64);
                status.next_weight_advance = Some(next);
                RequeueHint::After(std::time::Duration::from_secs(interval_secs))
            }
            _ => {
                // No auto-step schedule: the weight only ever moves on an
                // explicit spec edit, so there is nothing to wake up for.
                status.next_weight_advance = None;
                RequeueHint::None
            }
        }
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

/// In-memory stand-ins for the ConfigMap store and JSON Schema fetch spec.md
/// §1 names as out of scope ("the specific container-cluster client
/// library"; schema distribution is an operational concern). `main` wires
/// these until a real adapter exists — swapping one out never touches
/// [`RolloutReconciler`] itself.
pub mod fakes {
    use super::*;
    use std::collections::HashMap;

    /// Keyed by `"{namespace}/{name}"`. Empty by default — operators seed it
    /// via [`InMemoryConfigMapSource::put`] or replace it outright.
    #[derive(Default)]
    pub struct InMemoryConfigMapSource {
        packs: parking_lot::Mutex<HashMap<String, Value>>,
    }

    impl InMemoryConfigMapSource {
        pub fn put(&self, namespace: &str, name: &str, pack_json: Value) {
            self.packs.lock().insert(format!("{namespace}/{name}"), pack_json);
        }
    }

    #[async_trait]
    impl PackConfigMapSource for InMemoryConfigMapSource {
        async fn read_pack_json(&self, source: &ObjectRef, default_namespace: &str) -> Result<Value, String> {
            let namespace = source.namespace_or(default_namespace);
            self.packs
                .lock()
                .get(&format!("{namespace}/{}", source.name))
                .cloned()
                .ok_or_else(|| format!("no pack.json found for ConfigMap {namespace}/{}", source.name))
        }
    }

    /// Checks the structural minimum (`id`, `version`) in lieu of a fetched
    /// JSON Schema document — no JSON Schema validation crate is part of
    /// this stack (see DESIGN.md).
    #[derive(Default)]
    pub struct MinimalPackSchemaValidator;

    impl PackSchemaValidator for MinimalPackSchemaValidator {
        fn validate(&self, pack: &Value) -> Result<(), String> {
            if pack.get("id").is_none() {
                return Err("$.id: id is required".to_string());
            }
            if pack.get("version").is_none() {
                return Err("$.version: version is required".to_string());
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omnia_storage::ObjectKey;
    use serde_json::json;

    struct FakeConfigMapSource {
        pack: Result<Value, String>,
    }

    #[async_trait]
    impl PackConfigMapSource for FakeConfigMapSource {
        async fn read_pack_json(&self, _source: &ObjectRef, _namespace: &str) -> Result<Value, String> {
            self.pack.clone()
        }
    }

    struct RequireIdField;

    impl PackSchemaValidator for RequireIdField {
        fn validate(&self, pack: &Value) -> Result<(), String> {
            if pack.get("id").is_none() {
                Err("$.id: id is required".to_string())
            } else {
                Ok(())
            }
        }
    }

    fn object(spec: Value, status: Value) -> StoredObject {
        StoredObject {
            key: ObjectKey::new("PromptPack", "default", "pp"),
            generation: 1,
            spec,
            observed_generation: 0,
            status,
            conditions: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn immediate_spec(version: &str) -> Value {
        json!({"version": version, "source": {"name": "cm"}, "rollout": {"type": "immediate"}})
    }

    fn canary_spec(version: &str, weight: u8, step: Option<u8>, interval_secs: Option<u64>) -> Value {
        let mut canary = json!({"weight": weight});
        if let Some(step) = step {
            canary["stepWeight"] = json!(step);
        }
        if let Some(interval_secs) = interval_secs {
            canary["intervalSecs"] = json!(interval_secs);
        }
        json!({"version": version, "source": {"name": "cm"}, "rollout": {"type": "canary", "canary": canary}})
    }

    fn reconciler() -> RolloutReconciler {
        RolloutReconciler::new(
            Arc::new(FakeConfigMapSource { pack: Ok(json!({"id": "pp", "version": "1.0.0"})) }),
            Arc::new(RequireIdField),
        )
    }

    #[tokio::test]
    async fn first_admission_goes_straight_to_active() {
        let output = reconciler().reconcile(&object(immediate_spec("1.0.0"), json!({}))).await.unwrap();
        let status: PromptPackStatus = serde_json::from_value(output.status).unwrap();
        assert_eq!(status.phase, Some(PromptPackPhase::Active));
        assert_eq!(status.active_version.as_deref(), Some("1.0.0"));
        let schema_valid = output.conditions.iter().find(|c| c.kind == "SchemaValid").unwrap();
        assert_eq!(schema_valid.status, ConditionStatus::True);
    }

    #[tokio::test]
    async fn invalid_pack_fails_permanently_with_path_in_message() {
        let reconciler = RolloutReconciler::new(
            Arc::new(FakeConfigMapSource { pack: Ok(json!({"version": "1.0.0"})) }),
            Arc::new(RequireIdField),
        );
        let output = reconciler.reconcile(&object(immediate_spec("1.0.0"), json!({}))).await.unwrap();
        let status: PromptPackStatus = serde_json::from_value(output.status).unwrap();
        assert_eq!(status.phase, Some(PromptPackPhase::Failed));
        let schema_valid = output.conditions.iter().find(|c| c.kind == "SchemaValid").unwrap();
        assert_eq!(schema_valid.status, ConditionStatus::False);
        assert!(schema_valid.message.contains("id is required"));
        assert!(matches!(output.requeue, RequeueHint::None));
    }

    #[tokio::test]
    async fn immediate_update_swaps_active_version_without_canary() {
        let status = json!({"phase": "Active", "activeVersion": "1.0.0"});
        let output = reconciler().reconcile(&object(immediate_spec("1.1.0"), status)).await.unwrap();
        let status: PromptPackStatus = serde_json::from_value(output.status).unwrap();
        assert_eq!(status.active_version.as_deref(), Some("1.1.0"));
        assert!(status.canary_version.is_none());
    }

    #[tokio::test]
    async fn canary_update_starts_canary_with_spec_weight() {
        let status = json!({"phase": "Active", "activeVersion": "1.0.0"});
        let spec = canary_spec("1.1.0", 10, Some(30), Some(100));
        let output = reconciler().reconcile(&object(spec, status)).await.unwrap();
        let status: PromptPackStatus = serde_json::from_value(output.status).unwrap();
        assert_eq!(status.phase, Some(PromptPackPhase::Canary));
        assert_eq!(status.active_version.as_deref(), Some("1.0.0"));
        assert_eq!(status.canary_version.as_deref(), Some("1.1.0"));
        assert_eq!(status.canary_weight, Some(10));
        assert!(matches!(output.requeue, RequeueHint::After(_)));
    }

    #[tokio::test]
    async fn auto_step_advances_weight_when_due_and_promotes_at_100() {
        let spec = canary_spec("1.1.0", 10, Some(30), Some(100));
        let mut status = json!({
            "phase": "Canary",
            "activeVersion": "1.0.0",
            "canaryVersion": "1.1.0",
            "canaryWeight": 70,
            "declaredWeight": 10,
            "nextWeightAdvance": (Utc::now() - chrono::Duration::seconds(1)).to_rfc3339(),
        });
        let output = reconciler().reconcile(&object(spec.clone(), status.clone())).await.unwrap();
        let new_status: PromptPackStatus = serde_json::from_value(output.status.clone()).unwrap();
        assert_eq!(new_status.canary_weight, Some(100 - 0).min(Some(100)));
        // 70 + 30 = 100: promotes to Active in the same reconcile.
        assert_eq!(new_status.phase, Some(PromptPackPhase::Active));
        assert_eq!(new_status.active_version.as_deref(), Some("1.1.0"));
        assert!(new_status.canary_version.is_none());
        assert!(matches!(output.requeue, RequeueHint::None));

        status["canaryWeight"] = json!(10);
        status["nextWeightAdvance"] = json!((Utc::now() + chrono::Duration::seconds(1000)).to_rfc3339());
        let output = reconciler().reconcile(&object(spec, status)).await.unwrap();
        let status: PromptPackStatus = serde_json::from_value(output.status).unwrap();
        assert_eq!(status.phase, Some(PromptPackPhase::Canary));
        assert_eq!(status.canary_weight, Some(10));
        assert!(matches!(output.requeue, RequeueHint::After(_)));
    }

    #[tokio::test]
    async fn explicit_weight_edit_is_adopted_immediately() {
        let spec = canary_spec("1.1.0", 40, None, None);
        let status = json!({
            "phase": "Canary",
            "activeVersion": "1.0.0",
            "canaryVersion": "1.1.0",
            "canaryWeight": 10,
            "declaredWeight": 10,
        });
        let output = reconciler().reconcile(&object(spec, status)).await.unwrap();
        let status: PromptPackStatus = serde_json::from_value(output.status).unwrap();
        assert_eq!(status.canary_weight, Some(40));
        assert_eq!(status.declared_weight, Some(40));
        assert!(matches!(output.requeue, RequeueHint::None));
    }
}
