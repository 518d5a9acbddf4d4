//! Container runtime interface
//!
//! The worker drives deployments exclusively through [`ContainerRuntime`].
//! Implementations classify every failure as transient (retried) or invalid
//! (terminal).

pub mod docker;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::DeploymentTarget;

pub use docker::DockerRuntime;

/// A classified runtime failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    /// Infrastructure or transport problem; worth retrying
    #[error("{0}")]
    Transient(String),

    /// Bad input such as an unknown image; retrying cannot help
    #[error("{0}")]
    Invalid(String),
}

impl StepError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StepError::Transient(_))
    }
}

/// Result of a single health probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Health {
    Healthy,
    Unhealthy(String),
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Fetch `image_ref` from its registry
    async fn pull(&self, image_ref: &str) -> Result<(), StepError>;

    /// Image the target's container currently runs, if any
    async fn current_image(&self, target: &DeploymentTarget) -> Result<Option<String>, StepError>;

    /// Gracefully stop and remove the target's container. Returns whether a
    /// container existed.
    async fn stop(&self, target: &DeploymentTarget) -> Result<bool, StepError>;

    /// Run `command` to completion in a throwaway container of `image_ref`
    async fn run_setup(
        &self,
        target: &DeploymentTarget,
        image_ref: &str,
        command: &[String],
    ) -> Result<(), StepError>;

    /// Start the target's container from `image_ref`
    async fn start(&self, target: &DeploymentTarget, image_ref: &str) -> Result<(), StepError>;

    /// Probe the target once
    async fn health_check(&self, target: &DeploymentTarget) -> Result<Health, StepError>;
}
