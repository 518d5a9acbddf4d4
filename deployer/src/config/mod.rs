//! Process-wide deployer configuration
//!
//! Loaded once at startup from a JSON file and shared read-only (`Arc<Config>`)
//! between the receiver, the queue and the workers. There is no reload; a
//! changed file takes effect on restart.

pub mod settings;
pub mod target;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tracing::debug;
use url::Url;

use crate::errors::DeployerError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

pub use settings::{ServerSettings, Settings, TargetSettings, WorkerSettings};
pub use target::{DeploymentTarget, RetryPolicy};

/// Environment variable overriding `trigger_secret`
pub const TRIGGER_SECRET_ENV: &str = "DEPLOYER_TRIGGER_SECRET";

/// Validated, immutable configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: LogLevel,
    pub log_json: bool,
    pub log_dir: Option<PathBuf>,
    pub server: ServerSettings,
    pub worker_count: usize,
    pub idle_poll_base: Duration,
    pub idle_poll_max: Duration,
    pub heartbeat_interval: Duration,
    pub lease_expiry: Duration,
    pub reaper_interval: Duration,
    pub retention: Option<Duration>,
    pub state_dir: PathBuf,
    pub trigger_secret: Option<SecretString>,
    pub notify_url: Option<Url>,
    pub notify_token: Option<SecretString>,
    pub docker_binary: String,
    pub shutdown_timeout: Duration,
    targets: HashMap<String, Arc<DeploymentTarget>>,
    target_names: Vec<String>,
}

impl Config {
    /// Load and validate the configuration file.
    ///
    /// `DEPLOYER_TRIGGER_SECRET` takes precedence over the file's
    /// `trigger_secret`.
    pub async fn load(source: &File) -> Result<Self, DeployerError> {
        debug!("Loading configuration from {}", source.path().display());
        let contents = source.read_string().await.map_err(|e| {
            DeployerError::ConfigError(format!(
                "unable to read {}: {}",
                source.path().display(),
                e
            ))
        })?;
        let mut settings = parse_settings(&contents)?;
        if let Ok(secret) = std::env::var(TRIGGER_SECRET_ENV) {
            if !secret.is_empty() {
                settings.trigger_secret = Some(SecretString::from(secret));
            }
        }
        Self::from_settings(settings)
    }

    /// Parse and validate configuration from a JSON string
    pub fn from_json(contents: &str) -> Result<Self, DeployerError> {
        Self::from_settings(parse_settings(contents)?)
    }

    /// Validate raw settings
    pub fn from_settings(settings: Settings) -> Result<Self, DeployerError> {
        let mut targets = Vec::with_capacity(settings.targets.len());
        for (index, raw) in settings.targets.into_iter().enumerate() {
            targets.push(build_target(index, raw)?);
        }

        if settings.workers.count == 0 {
            return Err(DeployerError::ConfigError(
                "workers.count must be at least 1".to_string(),
            ));
        }
        if settings.workers.idle_poll_base_ms > settings.workers.idle_poll_max_ms {
            return Err(DeployerError::ConfigError(
                "workers.idle_poll_base_ms must not exceed workers.idle_poll_max_ms".to_string(),
            ));
        }
        if settings.workers.heartbeat_interval_secs == 0
            || settings.workers.heartbeat_interval_secs >= settings.lease_expiry_secs
        {
            return Err(DeployerError::ConfigError(format!(
                "workers.heartbeat_interval_secs ({}) must be non-zero and shorter than lease_expiry_secs ({})",
                settings.workers.heartbeat_interval_secs, settings.lease_expiry_secs
            )));
        }
        if settings.reaper_interval_secs == 0 {
            return Err(DeployerError::ConfigError(
                "reaper_interval_secs must be at least 1".to_string(),
            ));
        }
        if settings.trigger_secret.is_none() {
            return Err(DeployerError::ConfigError(format!(
                "trigger_secret is required (or set {})",
                TRIGGER_SECRET_ENV
            )));
        }

        let notify_url = settings
            .notify_url
            .as_deref()
            .map(|raw| {
                Url::parse(raw).map_err(|e| {
                    DeployerError::ConfigError(format!("invalid notify_url '{}': {}", raw, e))
                })
            })
            .transpose()?;

        let mut config = Self::with_targets(targets)?;
        config.log_level = settings.log_level;
        config.log_json = settings.log_json;
        config.log_dir = settings.log_dir.map(PathBuf::from);
        config.server = settings.server;
        config.worker_count = settings.workers.count;
        config.idle_poll_base = Duration::from_millis(settings.workers.idle_poll_base_ms);
        config.idle_poll_max = Duration::from_millis(settings.workers.idle_poll_max_ms);
        config.heartbeat_interval = Duration::from_secs(settings.workers.heartbeat_interval_secs);
        config.lease_expiry = Duration::from_secs(settings.lease_expiry_secs);
        config.reaper_interval = Duration::from_secs(settings.reaper_interval_secs);
        config.retention = settings.retention_secs.map(Duration::from_secs);
        config.state_dir = PathBuf::from(settings.state_dir);
        config.trigger_secret = settings.trigger_secret;
        config.notify_url = notify_url;
        config.notify_token = settings.notify_token;
        config.docker_binary = settings.docker_binary;
        config.shutdown_timeout = Duration::from_secs(settings.shutdown_timeout_secs);
        Ok(config)
    }

    /// Build a config from already constructed targets with default global
    /// settings and no trigger secret
    pub fn with_targets(targets: Vec<DeploymentTarget>) -> Result<Self, DeployerError> {
        let mut by_name = HashMap::with_capacity(targets.len());
        let mut target_names = Vec::with_capacity(targets.len());
        for target in targets {
            if by_name.contains_key(&target.name) {
                return Err(DeployerError::ConfigError(format!(
                    "duplicate target name '{}'",
                    target.name
                )));
            }
            target_names.push(target.name.clone());
            by_name.insert(target.name.clone(), Arc::new(target));
        }

        let workers = WorkerSettings::default();
        Ok(Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_dir: None,
            server: ServerSettings::default(),
            worker_count: workers.count,
            idle_poll_base: Duration::from_millis(workers.idle_poll_base_ms),
            idle_poll_max: Duration::from_millis(workers.idle_poll_max_ms),
            heartbeat_interval: Duration::from_secs(workers.heartbeat_interval_secs),
            lease_expiry: Duration::from_secs(60),
            reaper_interval: Duration::from_secs(5),
            retention: None,
            state_dir: PathBuf::from("/var/lib/deployer"),
            trigger_secret: None,
            notify_url: None,
            notify_token: None,
            docker_binary: "docker".to_string(),
            shutdown_timeout: Duration::from_secs(30),
            targets: by_name,
            target_names,
        })
    }

    /// Case-sensitive target lookup
    pub fn target_by_name(&self, name: &str) -> Option<Arc<DeploymentTarget>> {
        self.targets.get(name).cloned()
    }

    /// Targets in configuration file order
    pub fn targets(&self) -> impl Iterator<Item = &Arc<DeploymentTarget>> {
        self.target_names
            .iter()
            .filter_map(|name| self.targets.get(name))
    }
}

fn parse_settings(contents: &str) -> Result<Settings, DeployerError> {
    serde_json::from_str(contents)
        .map_err(|e| DeployerError::ConfigError(format!("invalid configuration: {}", e)))
}

fn build_target(index: usize, raw: TargetSettings) -> Result<DeploymentTarget, DeployerError> {
    let name = raw
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| DeployerError::ConfigError(format!("targets[{}]: missing name", index)))?;

    let image_pattern = raw
        .image_pattern
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .ok_or_else(|| {
            DeployerError::ConfigError(format!("target '{}': missing image_pattern", name))
        })?;

    if raw.max_attempts == 0 {
        return Err(DeployerError::ConfigError(format!(
            "target '{}': max_attempts must be at least 1",
            name
        )));
    }
    if raw.step_timeout_secs == 0 {
        return Err(DeployerError::ConfigError(format!(
            "target '{}': step_timeout_secs must be at least 1",
            name
        )));
    }
    if raw.backoff_base_secs > raw.backoff_max_secs {
        return Err(DeployerError::ConfigError(format!(
            "target '{}': backoff_base_secs must not exceed backoff_max_secs",
            name
        )));
    }
    if matches!(&raw.setup_command, Some(cmd) if cmd.is_empty()) {
        return Err(DeployerError::ConfigError(format!(
            "target '{}': setup_command must not be empty",
            name
        )));
    }

    let health_check_url = raw
        .health_check_url
        .as_deref()
        .map(|url| {
            Url::parse(url).map_err(|e| {
                DeployerError::ConfigError(format!(
                    "target '{}': invalid health_check_url '{}': {}",
                    name, url, e
                ))
            })
        })
        .transpose()?;

    let health_check_path = if raw.health_check_path.starts_with('/') {
        raw.health_check_path
    } else {
        format!("/{}", raw.health_check_path)
    };

    Ok(DeploymentTarget {
        container_name: raw
            .container_name
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| name.clone()),
        name,
        image_pattern,
        health_check_url,
        health_check_path,
        health_poll_interval: Duration::from_millis(raw.health_poll_interval_ms.max(1)),
        step_timeout: Duration::from_secs(raw.step_timeout_secs),
        stop_grace: Duration::from_secs(raw.stop_grace_secs),
        retry: RetryPolicy {
            max_attempts: raw.max_attempts,
            backoff_base: Duration::from_secs(raw.backoff_base_secs),
            backoff_max: Duration::from_secs(raw.backoff_max_secs),
        },
        setup_command: raw.setup_command,
        run_args: raw.run_args,
    })
}
