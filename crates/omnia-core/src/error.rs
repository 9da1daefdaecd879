// Shared error taxonomy (spec.md §7).
//
// Every component-specific error type implements `Classify` so the dispatcher
// (omnia-reconciler) can decide whether to retry, wait on a reference, or
// surface a permanent condition without needing to know the concrete error.

use std::time::Duration;

/// The five error classes from spec.md §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Spec violates a static or cross-field rule. Never retried.
    Validation,
    /// A referenced entity is missing or not yet Ready. Retried for a grace window.
    Reference,
    /// Network, 5xx, lock contention. Retried with exponential backoff.
    Transient,
    /// Content fetched successfully but is semantically invalid.
    UpstreamSemantic,
    /// Data corruption or lost leadership mid-write. Abort, next reconcile restarts.
    Fatal,
}

impl ErrorClass {
    /// Whether the dispatcher should requeue at all for this class.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorClass::Reference | ErrorClass::Transient | ErrorClass::Fatal
        )
    }
}

/// Implemented by every component error enum so the dispatcher can classify
/// failures without depending on each component crate's concrete error type.
pub trait Classify {
    fn classify(&self) -> ErrorClass;
}

/// A reconcile outcome bubbled up to the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("reference not ready: {0}")]
    Reference(String),

    #[error("transient error: {0}")]
    Transient(String),

    #[error("upstream content invalid: {0}")]
    UpstreamSemantic(String),

    #[error("fatal error: {0}")]
    Fatal(String),
}

impl Classify for ReconcileError {
    fn classify(&self) -> ErrorClass {
        match self {
            ReconcileError::Validation(_) => ErrorClass::Validation,
            ReconcileError::Reference(_) => ErrorClass::Reference,
            ReconcileError::Transient(_) => ErrorClass::Transient,
            ReconcileError::UpstreamSemantic(_) => ErrorClass::UpstreamSemantic,
            ReconcileError::Fatal(_) => ErrorClass::Fatal,
        }
    }
}

/// Grace window before a `Reference` error is surfaced as a stuck condition
/// rather than polled quietly (spec.md §7: default 5 minutes).
pub const DEFAULT_REFERENCE_GRACE_WINDOW: Duration = Duration::from_secs(5 * 60);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_is_never_retryable() {
        assert!(!ErrorClass::Validation.is_retryable());
    }

    #[test]
    fn transient_and_reference_are_retryable() {
        assert!(ErrorClass::Transient.is_retryable());
        assert!(ErrorClass::Reference.is_retryable());
        assert!(ErrorClass::Fatal.is_retryable());
    }
}
