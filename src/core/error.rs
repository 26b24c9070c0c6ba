//! Error taxonomy for identifiers, resolution, transport and provisioning.

use super::types::ObjectKind;
use thiserror::Error;

/// Malformed content type identifier. Always a caller bug; never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid content type id '{input}': {reason}")]
pub struct FormatError {
    pub input: String,
    pub reason: String,
}

impl FormatError {
    pub fn new(input: &str, reason: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

/// A resolver matched zero or several remote objects.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    #[error("no object matches {resolver}")]
    NotFound { resolver: String },

    #[error("{resolver} is ambiguous: {count} matches")]
    Ambiguous { resolver: String, count: usize },
}

/// Failure reported by a connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("remote store unavailable: {0}")]
    Unavailable(String),

    #[error("{kind} '{key}' already exists")]
    AlreadyExists { kind: ObjectKind, key: String },

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("operation cancelled")]
    Cancelled,
}

/// Why a single node failed to provision.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("remote operation failed: {0}")]
    Remote(RemoteError),

    /// The object appeared between the existence check and the create flush.
    #[error("{kind} '{key}' was created concurrently by someone else")]
    AlreadyExistsConflict { kind: ObjectKind, key: String },

    #[error("invalid declaration: {0}")]
    Invalid(String),

    #[error("provisioning cancelled")]
    Cancelled,
}

impl From<RemoteError> for ProvisionError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Cancelled => Self::Cancelled,
            other => Self::Remote(other),
        }
    }
}

/// A provisioning error attached to the node it happened on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} {node}: {source}")]
pub struct NodeError {
    pub kind: ObjectKind,
    /// Resolved lookup key, or the declared identity when resolution failed.
    pub node: String,
    #[source]
    pub source: ProvisionError,
}

impl NodeError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self.source, ProvisionError::Cancelled)
    }
}
