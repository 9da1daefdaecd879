// Shared requeue hint type, returned by every reconciler alongside its
// desired artifacts and status (spec.md §4.3: "a pure function
// (current_spec, observed_world) → (desired_artifacts, desired_status,
// requeue_hint)").

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeueHint {
    /// No further reconcile is needed until the object changes.
    None,
    /// Reconcile again after the given duration, without treating this as an error.
    After(Duration),
}

impl RequeueHint {
    pub fn after_secs(secs: u64) -> Self {
        Self::After(Duration::from_secs(secs))
    }

    pub fn duration(self) -> Option<Duration> {
        match self {
            RequeueHint::None => None,
            RequeueHint::After(d) => Some(d),
        }
    }

    /// Combine two hints, preferring the sooner of the two `After` values.
    pub fn soonest(self, other: RequeueHint) -> RequeueHint {
        match (self, other) {
            (RequeueHint::None, x) => x,
            (x, RequeueHint::None) => x,
            (RequeueHint::After(a), RequeueHint::After(b)) => RequeueHint::After(a.min(b)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soonest_prefers_shorter_duration() {
        let a = RequeueHint::after_secs(60);
        let b = RequeueHint::after_secs(10);
        assert_eq!(a.soonest(b), RequeueHint::after_secs(10));
    }

    #[test]
    fn soonest_with_none_returns_the_other() {
        assert_eq!(
            RequeueHint::None.soonest(RequeueHint::after_secs(5)),
            RequeueHint::after_secs(5)
        );
    }
}
