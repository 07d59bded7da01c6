//! Error types for the Rocketlab controller core.
//!
//! Two families live here:
//!
//! - [`StoreError`]: the object store taxonomy. `NotFound` and `AlreadyExists`
//!   are expected outcomes that call sites usually absorb; `Conflict` and
//!   `Backend` are surfaced so the dispatcher can retry.
//! - [`Error`]: configuration and manifest loading failures.

use std::path::PathBuf;

use thiserror::Error;

use crate::meta::NamespacedName;
use crate::resource::ResourceKind;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for object store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Object store error taxonomy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{kind} '{key}' not found")]
    NotFound {
        kind: ResourceKind,
        key: NamespacedName,
    },

    #[error("{kind} '{key}' already exists")]
    AlreadyExists {
        kind: ResourceKind,
        key: NamespacedName,
    },

    #[error("conflict on {kind} '{key}': {reason}")]
    Conflict {
        kind: ResourceKind,
        key: NamespacedName,
        reason: String,
    },

    #[error("store operation '{operation}' failed: {reason}")]
    Backend { operation: String, reason: String },

    #[error("expected a {expected} object, got {found}")]
    KindMismatch {
        expected: ResourceKind,
        found: ResourceKind,
    },
}

impl StoreError {
    /// Create a not found error.
    pub fn not_found(kind: ResourceKind, key: NamespacedName) -> Self {
        Self::NotFound { kind, key }
    }

    /// Create an already exists error.
    pub fn already_exists(kind: ResourceKind, key: NamespacedName) -> Self {
        Self::AlreadyExists { kind, key }
    }

    /// Create a conflict error.
    pub fn conflict(kind: ResourceKind, key: NamespacedName, reason: impl Into<String>) -> Self {
        Self::Conflict {
            kind,
            key,
            reason: reason.into(),
        }
    }

    /// Create a backend error.
    pub fn backend(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Backend {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub const fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Configuration and manifest errors.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("failed to read file '{path}': {reason}")]
    FileReadFailed { path: PathBuf, reason: String },

    #[error("TOML parse error: {reason}")]
    TomlParseFailed { reason: String },

    #[error("YAML parse error: {reason}")]
    YamlParseFailed { reason: String },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Error {
    /// Create a file read error.
    pub fn file_read_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::FileReadFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a TOML parse error.
    pub fn toml_parse_failed(reason: impl Into<String>) -> Self {
        Self::TomlParseFailed {
            reason: reason.into(),
        }
    }

    /// Create a YAML parse error.
    pub fn yaml_parse_failed(reason: impl Into<String>) -> Self {
        Self::YamlParseFailed {
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}
