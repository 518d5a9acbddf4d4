//! Error types for the deployer

use thiserror::Error;

/// Main error type for the deployer
#[derive(Error, Debug)]
pub enum DeployerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Malformed trigger payload; rejected before reaching the queue
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unknown target: {0}")]
    UnknownTarget(String),

    /// Trigger credential did not match the configured secret
    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    #[error("Step '{step}' failed: {message}")]
    StepExecution {
        step: String,
        message: String,
        retryable: bool,
    },

    /// The caller no longer holds the lease on this job
    #[error("Lease expired for job {0}")]
    LeaseExpired(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeployerError {
    /// Whether a failure of this kind should be retried by the worker.
    ///
    /// Step errors carry their own classification; anything unclassified is
    /// treated as transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            DeployerError::StepExecution { retryable, .. } => *retryable,
            DeployerError::ValidationError(_)
            | DeployerError::UnknownTarget(_)
            | DeployerError::AuthenticationError(_)
            | DeployerError::ConfigError(_) => false,
            _ => true,
        }
    }

    /// Short machine-readable code used in API responses
    pub fn code(&self) -> &'static str {
        match self {
            DeployerError::IoError(_) => "io",
            DeployerError::JsonError(_) => "json",
            DeployerError::HttpError(_) => "http",
            DeployerError::ValidationError(_) => "validation",
            DeployerError::UnknownTarget(_) => "unknown_target",
            DeployerError::AuthenticationError(_) => "authentication",
            DeployerError::StepExecution { .. } => "step_execution",
            DeployerError::LeaseExpired(_) => "lease_expired",
            DeployerError::InvalidTransition(_) => "invalid_transition",
            DeployerError::ConfigError(_) => "config",
            DeployerError::StorageError(_) => "storage",
            DeployerError::NotFound(_) => "not_found",
            DeployerError::ServerError(_) => "server",
            DeployerError::ShutdownError(_) => "shutdown",
            DeployerError::Internal(_) => "internal",
        }
    }
}

impl From<anyhow::Error> for DeployerError {
    fn from(err: anyhow::Error) -> Self {
        DeployerError::Internal(err.to_string())
    }
}
