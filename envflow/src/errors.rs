//! Error types for envflow

use thiserror::Error;

/// A single item that could not be processed inside a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub id: String,
    pub detail: String,
}

/// Main error type for envflow
#[derive(Error, Debug)]
pub enum EnvError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Authentication required: {0}")]
    Unauthenticated(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Controller error: {0}")]
    Upstream(String),

    #[error("Partial failure: {message} ({} failed)", failures.len())]
    PartialFailure {
        message: String,
        failures: Vec<ItemFailure>,
    },

    #[error("Task state error: {0}")]
    TaskState(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EnvError {
    /// Short machine-readable kind, used in API error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            EnvError::NotFound(_) => "not_found",
            EnvError::ValidationError(_) | EnvError::JsonError(_) => "validation_error",
            EnvError::Unauthenticated(_) => "unauthenticated",
            EnvError::PermissionDenied(_) => "permission_denied",
            EnvError::Conflict(_) => "conflict",
            EnvError::Upstream(_) | EnvError::HttpError(_) => "upstream_error",
            EnvError::PartialFailure { .. } => "partial_failure",
            EnvError::TaskState(_) => "task_state",
            EnvError::IoError(_)
            | EnvError::ConfigError(_)
            | EnvError::ServerError(_)
            | EnvError::ShutdownError(_)
            | EnvError::Internal(_) => "internal_error",
        }
    }
}

impl From<anyhow::Error> for EnvError {
    fn from(err: anyhow::Error) -> Self {
        EnvError::Internal(err.to_string())
    }
}
