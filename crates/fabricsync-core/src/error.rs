//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid reconcile policy: {message}")]
    InvalidPolicy { message: String },

    #[error("Unknown resolution action: {value}")]
    UnknownAction { value: String },

    #[error("Unknown resource state: {value}")]
    UnknownState { value: String },

    #[error("Unknown transition trigger: {value}")]
    UnknownTrigger { value: String },

    #[error("Unknown batch strategy: {value}")]
    UnknownStrategy { value: String },

    #[error("Invalid resource key '{value}' (expected namespace/kind/name)")]
    InvalidResourceKey { value: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
