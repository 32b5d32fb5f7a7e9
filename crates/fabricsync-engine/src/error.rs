//! Error types for fabricsync-engine

use fabricsync_core::{AlertLifecycleError, CoreError};
use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur while reconciling a fabric
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// Invalid request or malformed input; rejected before anything was mutated
    #[error("validation error: {0}")]
    Validation(String),

    /// A Git or cluster collaborator call failed
    #[error("{collaborator} call failed: {message}")]
    Connectivity {
        collaborator: String,
        message: String,
    },

    /// A CRITICAL conflict blocks automatic resolution
    #[error("conflict on '{field_path}' requires manual review: {message}\nHint: resolve with the manual_review action")]
    Conflict { field_path: String, message: String },

    /// Dependency-aware scheduling made no progress
    #[error("dependency cycle in batch '{batch_id}' between: {}", .remaining.join(", "))]
    Cycle {
        batch_id: String,
        remaining: Vec<String>,
    },

    /// Resource not found
    #[error("resource '{0}' not found")]
    ResourceNotFound(String),

    /// Alert not found
    #[error("alert '{0}' not found")]
    AlertNotFound(String),

    /// Alert id already in use
    #[error("alert '{0}' already exists")]
    AlertAlreadyExists(String),

    /// Batch not found
    #[error("batch '{0}' not found")]
    BatchNotFound(String),

    /// The stored resource changed since it was read
    #[error("resource '{id}' was modified concurrently (expected revision {expected}, found {found})")]
    StaleRevision { id: String, expected: u64, found: u64 },

    /// Storage backend error
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from the core crate (policy, parsing)
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for EngineError {
    fn from(e: serde_yaml::Error) -> Self {
        EngineError::Serialization(e.to_string())
    }
}

impl From<AlertLifecycleError> for EngineError {
    fn from(e: AlertLifecycleError) -> Self {
        EngineError::Validation(e.to_string())
    }
}

impl EngineError {
    /// Create a connectivity error for a collaborator
    pub fn connectivity(collaborator: &str, message: impl Into<String>) -> Self {
        EngineError::Connectivity {
            collaborator: collaborator.to_string(),
            message: message.into(),
        }
    }

    /// Check if the request was rejected without side effects
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EngineError::Validation(_) | EngineError::StaleRevision { .. }
        )
    }

    /// Check if a later attempt may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Connectivity { .. } | EngineError::StaleRevision { .. }
        )
    }

    /// Check if the storage backend itself failed
    pub fn is_storage_fault(&self) -> bool {
        matches!(self, EngineError::Storage(_))
    }

    /// Check if this error requires a human decision
    pub fn requires_manual_review(&self) -> bool {
        matches!(self, EngineError::Conflict { .. })
    }
}
