// Status conditions (spec.md §3, Glossary: "Condition").
//
// A condition is a `(type, status, reason, message, lastTransitionTime)` tuple.
// `lastTransitionTime` only advances when `status` actually changes — flapping
// the reason/message while the status stays the same must not touch the
// timestamp (spec.md §3 Invariants).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub kind: String,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    pub fn new(
        kind: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }
}

/// A set of conditions keyed by `type`, with the transition-time invariant
/// enforced centrally so reconcilers never have to remember it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conditions(Vec<Condition>);

impl Conditions {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn get(&self, kind: &str) -> Option<&Condition> {
        self.0.iter().find(|c| c.kind == kind)
    }

    pub fn is_true(&self, kind: &str) -> bool {
        matches!(
            self.get(kind).map(|c| c.status),
            Some(ConditionStatus::True)
        )
    }

    /// Insert or update a condition. `last_transition_time` is preserved
    /// (not bumped to now) unless `status` differs from the prior value.
    pub fn set(
        &mut self,
        kind: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) {
        let kind = kind.into();
        let reason = reason.into();
        let message = message.into();

        if let Some(existing) = self.0.iter_mut().find(|c| c.kind == kind) {
            if existing.status != status {
                existing.status = status;
                existing.last_transition_time = Utc::now();
            }
            existing.reason = reason;
            existing.message = message;
        } else {
            self.0.push(Condition::new(kind, status, reason, message));
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.0.iter()
    }

    pub fn into_vec(self) -> Vec<Condition> {
        self.0
    }
}

impl From<Vec<Condition>> for Conditions {
    fn from(value: Vec<Condition>) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setting_same_status_twice_does_not_move_transition_time() {
        let mut conditions = Conditions::new();
        conditions.set("Ready", ConditionStatus::False, "Init", "starting up");
        let first = conditions.get("Ready").unwrap().last_transition_time;

        std::thread::sleep(std::time::Duration::from_millis(5));
        conditions.set("Ready", ConditionStatus::False, "StillInit", "still starting up");
        let second = conditions.get("Ready").unwrap().last_transition_time;

        assert_eq!(first, second);
        assert_eq!(conditions.get("Ready").unwrap().reason, "StillInit");
    }

    #[test]
    fn status_change_bumps_transition_time() {
        let mut conditions = Conditions::new();
        conditions.set("Ready", ConditionStatus::False, "Init", "starting up");
        let first = conditions.get("Ready").unwrap().last_transition_time;

        std::thread::sleep(std::time::Duration::from_millis(5));
        conditions.set("Ready", ConditionStatus::True, "Active", "up and running");
        let second = conditions.get("Ready").unwrap().last_transition_time;

        assert!(second > first);
    }

    #[test]
    fn is_true_reports_false_for_missing_condition() {
        let conditions = Conditions::new();
        assert!(!conditions.is_true("Ready"));
    }
}
