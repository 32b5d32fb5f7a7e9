//! CLI error types with exit code handling
//!
//! Engine and core errors are mapped onto a small set of CLI errors, each
//! carrying the process exit code it ends with.

use fabricsync_core::CoreError;
use fabricsync_engine::EngineError;
use miette::Diagnostic;
use thiserror::Error;

use crate::exit_codes;

/// CLI-specific error type that includes exit code information
#[derive(Error, Debug, Diagnostic, Clone)]
pub enum CliError {
    /// Snapshot, policy or request is invalid
    #[error("Validation failed: {message}")]
    #[diagnostic(code(fabricsync::cli::validation))]
    Validation {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Drift was found and the caller asked for a failing exit code
    #[error("{count} resource(s) drifted from Git")]
    #[diagnostic(
        code(fabricsync::cli::drift),
        help("run `fabricsync reconcile` to remediate")
    )]
    DriftDetected { count: usize },

    /// The reconciliation batch did not complete cleanly
    #[error("Batch {batch_id} finished {status} with {failed} failed item(s)")]
    #[diagnostic(code(fabricsync::cli::reconcile))]
    ReconcileFailed {
        batch_id: String,
        status: String,
        failed: usize,
        #[help]
        help: Option<String>,
    },

    /// A critical conflict blocks the requested operation
    #[error("Manual review required: {message}")]
    #[diagnostic(
        code(fabricsync::cli::manual_review),
        help("use the manual strategy or resolve the conflict in Git first")
    )]
    ManualReview { message: String },

    /// IO error (file not found, permissions, etc.)
    #[error("IO error: {message}")]
    #[diagnostic(code(fabricsync::cli::io))]
    Io { message: String },

    /// Wrapped error for passthrough (stores the formatted message)
    #[error("{message}")]
    #[diagnostic(code(fabricsync::cli::error))]
    Other { message: String },

    /// Internal error (runtime, unexpected failure)
    #[error("Internal error: {message}")]
    #[diagnostic(code(fabricsync::cli::internal))]
    Internal { message: String },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Validation { .. } => exit_codes::VALIDATION_ERROR,
            CliError::DriftDetected { .. } => exit_codes::DRIFT_DETECTED,
            CliError::ReconcileFailed { .. } => exit_codes::RECONCILE_FAILED,
            CliError::ManualReview { .. } => exit_codes::MANUAL_REVIEW,
            CliError::Io { .. } => exit_codes::IO_ERROR,
            CliError::Other { .. } => exit_codes::ERROR,
            CliError::Internal { .. } => exit_codes::ERROR,
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            help: None,
        }
    }

    /// Create a validation error with help text
    pub fn validation_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            help: Some(help.into()),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        CliError::internal(format!("failed to encode output: {}", err))
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Io(e) => e.into(),
            other => CliError::validation(other.to_string()),
        }
    }
}

impl From<EngineError> for CliError {
    fn from(err: EngineError) -> Self {
        if err.is_validation() {
            return CliError::validation(err.to_string());
        }
        match err {
            EngineError::Io(e) => e.into(),
            EngineError::Core(e) => e.into(),
            EngineError::Conflict { .. } => CliError::ManualReview {
                message: err.to_string(),
            },
            EngineError::ResourceNotFound(_)
            | EngineError::AlertNotFound(_)
            | EngineError::BatchNotFound(_)
            | EngineError::Serialization(_) => CliError::validation(err.to_string()),
            other => CliError::Other {
                message: other.to_string(),
            },
        }
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
