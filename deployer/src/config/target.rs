//! Deployment targets

use std::time::Duration;

use url::Url;

use crate::utils::{calc_exp_backoff, wildcard_match, CooldownOptions};

/// Retry policy applied by the queue when a job fails
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts allowed per job, including the first
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl RetryPolicy {
    /// Delay before a job that has failed `failed_attempts` times becomes
    /// eligible again. Non-decreasing in `failed_attempts`.
    pub fn backoff_for(&self, failed_attempts: u32) -> Duration {
        let options = CooldownOptions {
            base_delay: self.backoff_base,
            max_delay: self.backoff_max,
            multiplier: 2.0,
        };
        calc_exp_backoff(&options, failed_attempts.saturating_sub(1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
        }
    }
}

/// A named deployable unit. Immutable once the config is loaded; at most one
/// deployment runs against a target at any time.
#[derive(Debug, Clone)]
pub struct DeploymentTarget {
    pub name: String,
    pub image_pattern: String,
    pub container_name: String,
    pub health_check_url: Option<Url>,
    pub health_check_path: String,
    pub health_poll_interval: Duration,
    pub step_timeout: Duration,
    pub stop_grace: Duration,
    pub retry: RetryPolicy,
    pub setup_command: Option<Vec<String>>,
    pub run_args: Vec<String>,
}

impl DeploymentTarget {
    /// A target with default options; used by tests and embedders that build
    /// configs in code
    pub fn new(name: impl Into<String>, image_pattern: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            container_name: name.clone(),
            name,
            image_pattern: image_pattern.into(),
            health_check_url: None,
            health_check_path: "/health".to_string(),
            health_poll_interval: Duration::from_secs(1),
            step_timeout: Duration::from_secs(300),
            stop_grace: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            setup_command: None,
            run_args: Vec::new(),
        }
    }

    /// Whether `image_ref` is allowed for this target
    pub fn accepts_image(&self, image_ref: &str) -> bool {
        wildcard_match(&self.image_pattern, image_ref)
    }

    /// Full URL polled by the health check, if one is configured
    pub fn health_endpoint(&self) -> Option<Url> {
        self.health_check_url
            .as_ref()
            .and_then(|base| base.join(&self.health_check_path).ok())
    }
}
