//! Core types for the reconcilers.

use std::time::Duration;

use rocketlab_core::{ObjectMeta, Site};

/// Result of one reconcile pass, handed back to the dispatcher.
///
/// A requeue is not a failure: it asks for the same key to be reconciled
/// again after the given delay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub requeue_after: Option<Duration>,
}

impl ReconcileOutcome {
    /// Nothing left to do until the next change.
    pub const fn done() -> Self {
        Self {
            requeue_after: None,
        }
    }

    /// Run this key again after `after`.
    pub const fn requeue(after: Duration) -> Self {
        Self {
            requeue_after: Some(after),
        }
    }

    pub const fn is_requeue(&self) -> bool {
        self.requeue_after.is_some()
    }
}

/// Lifecycle of a finalizer-guarded resource, derived on every pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// No deletion requested.
    Active,
    /// Deletion requested and our finalizer still holds the object.
    Terminating,
    /// Deletion requested and our finalizer is already gone.
    Gone,
}

impl Lifecycle {
    pub fn of(meta: &ObjectMeta, token: &str) -> Self {
        match (meta.is_deleting(), meta.has_finalizer(token)) {
            (false, _) => Self::Active,
            (true, true) => Self::Terminating,
            (true, false) => Self::Gone,
        }
    }
}

/// How a source relates to its site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteLinkage {
    /// No site named, or the named site does not exist.
    Unbound,
    Enabled,
    Disabled,
}

impl SiteLinkage {
    pub fn of(site: Option<&Site>) -> Self {
        match site {
            None => Self::Unbound,
            Some(site) if site.spec.enabled => Self::Enabled,
            Some(_) => Self::Disabled,
        }
    }

    /// Whether a worker should be running under this linkage.
    pub const fn wants_worker(self) -> bool {
        matches!(self, Self::Unbound | Self::Enabled)
    }
}

/// What to do with the worker of one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerAction {
    Create,
    Keep,
    /// Delete the drifted worker, then create it from the current descriptor.
    Replace,
    Delete,
    Nothing,
}

impl WorkerAction {
    /// Get a description of the action.
    pub const fn description(self) -> &'static str {
        match self {
            Self::Create => "create worker",
            Self::Keep => "worker up to date",
            Self::Replace => "replace drifted worker",
            Self::Delete => "delete worker",
            Self::Nothing => "worker already down",
        }
    }
}

/// Whether a pass reached the desired state or must be run again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convergence {
    Converged,
    /// A replaced worker had not disappeared within the termination wait.
    Requeue,
}
