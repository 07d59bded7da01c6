//! Error types for the reconciler crate.

use itertools::Itertools;
use rocketlab_core::{NamespacedName, ResourceKind, StoreError};
use thiserror::Error;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
///
/// Every variant is retryable from the dispatcher's point of view; none of
/// them is fatal to the process.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A store call failed with something other than an absorbed
    /// `NotFound` / `AlreadyExists`.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// One or more bound sources could not be converged by a site cascade.
    #[error("cascade from site '{site}' failed for {count} tmsource(s): {summary}")]
    CascadeFailed {
        site: NamespacedName,
        count: usize,
        summary: String,
    },

    /// No reconciler is registered for the requested kind.
    #[error("no reconciler registered for kind {kind}")]
    UnknownKind { kind: ResourceKind },

    /// The controller configuration was rejected.
    #[error("configuration error: {0}")]
    Config(#[from] rocketlab_core::Error),

    /// Reconciliation failed.
    #[error("reconciliation failed: {reason}")]
    ReconcileFailed { reason: String },
}

impl Error {
    /// Create a cascade failure from per-source errors.
    pub fn cascade_failed(site: NamespacedName, failures: &[(NamespacedName, Self)]) -> Self {
        let summary = failures
            .iter()
            .map(|(key, err)| format!("{key}: {err}"))
            .join("; ");
        Self::CascadeFailed {
            site,
            count: failures.len(),
            summary,
        }
    }

    /// Create an unknown kind error.
    pub const fn unknown_kind(kind: ResourceKind) -> Self {
        Self::UnknownKind { kind }
    }

    /// Create a reconcile failed error.
    pub fn reconcile_failed(reason: impl Into<String>) -> Self {
        Self::ReconcileFailed {
            reason: reason.into(),
        }
    }

    /// Whether the underlying cause is an optimistic concurrency conflict.
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_conflict())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::reconcile_failed("something went wrong");
        assert!(err.to_string().contains("something went wrong"));
    }

    #[test]
    fn test_cascade_failed_summarizes_each_source() {
        let failures = vec![
            (
                NamespacedName::new("lab", "a"),
                Error::Store(StoreError::backend("create", "timeout")),
            ),
            (
                NamespacedName::new("lab", "b"),
                Error::Store(StoreError::backend("delete", "refused")),
            ),
        ];
        let err = Error::cascade_failed(NamespacedName::new("lab", "north"), &failures);
        let text = err.to_string();
        assert!(text.contains("2 tmsource(s)"));
        assert!(text.contains("lab/a"));
        assert!(text.contains("refused"));
    }

    #[test]
    fn test_conflict_detection() {
        let err = Error::from(StoreError::conflict(
            ResourceKind::Site,
            NamespacedName::new("lab", "north"),
            "stale",
        ));
        assert!(err.is_conflict());
        assert!(!Error::reconcile_failed("boom").is_conflict());
    }
}
