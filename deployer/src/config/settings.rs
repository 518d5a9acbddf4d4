//! Settings file schema
//!
//! Mirrors the JSON configuration file one-to-one. Values are validated and
//! converted into [`crate::config::Config`] by [`crate::config::Config::from_settings`].

use secrecy::SecretString;
use serde::Deserialize;

use crate::logs::LogLevel;

/// Top-level deployer settings
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON logs on stdout
    #[serde(default)]
    pub log_json: bool,

    /// Directory for rolling log files
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Inbound HTTP server
    #[serde(default)]
    pub server: ServerSettings,

    /// Worker pool
    #[serde(default)]
    pub workers: WorkerSettings,

    /// Seconds without a heartbeat before a lease is reclaimed
    #[serde(default = "default_lease_expiry")]
    pub lease_expiry_secs: u64,

    /// Seconds between reaper sweeps
    #[serde(default = "default_reaper_interval")]
    pub reaper_interval_secs: u64,

    /// Terminal jobs older than this are evicted; kept forever when absent
    #[serde(default)]
    pub retention_secs: Option<u64>,

    /// Directory holding the durable job store
    #[serde(default = "default_state_dir")]
    pub state_dir: String,

    /// Shared secret for inbound triggers
    #[serde(default)]
    pub trigger_secret: Option<SecretString>,

    /// Endpoint receiving job status events
    #[serde(default)]
    pub notify_url: Option<String>,

    /// Bearer token sent to `notify_url`
    #[serde(default)]
    pub notify_token: Option<SecretString>,

    /// Container runtime CLI
    #[serde(default = "default_docker_binary")]
    pub docker_binary: String,

    /// Upper bound on graceful shutdown
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Deployment targets
    #[serde(default)]
    pub targets: Vec<TargetSettings>,
}

fn default_lease_expiry() -> u64 {
    60
}

fn default_reaper_interval() -> u64 {
    5
}

fn default_state_dir() -> String {
    "/var/lib/deployer".to_string()
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

/// HTTP server settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Worker pool settings
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSettings {
    /// Number of executors
    #[serde(default = "default_worker_count")]
    pub count: usize,

    /// First idle wait when the queue is empty
    #[serde(default = "default_idle_poll_base")]
    pub idle_poll_base_ms: u64,

    /// Ceiling for the idle wait
    #[serde(default = "default_idle_poll_max")]
    pub idle_poll_max_ms: u64,

    /// Heartbeat period while a job is executing
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
}

fn default_worker_count() -> usize {
    2
}

fn default_idle_poll_base() -> u64 {
    500
}

fn default_idle_poll_max() -> u64 {
    10_000
}

fn default_heartbeat_interval() -> u64 {
    15
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            idle_poll_base_ms: default_idle_poll_base(),
            idle_poll_max_ms: default_idle_poll_max(),
            heartbeat_interval_secs: default_heartbeat_interval(),
        }
    }
}

/// Per-target settings
#[derive(Debug, Clone, Deserialize)]
pub struct TargetSettings {
    #[serde(default)]
    pub name: Option<String>,

    /// Accepted image references, `*` matches any run of characters
    #[serde(default)]
    pub image_pattern: Option<String>,

    /// Container name; defaults to the target name
    #[serde(default)]
    pub container_name: Option<String>,

    /// Base URL polled after start, e.g. `http://127.0.0.1:8069`
    #[serde(default)]
    pub health_check_url: Option<String>,

    #[serde(default = "default_health_check_path")]
    pub health_check_path: String,

    #[serde(default = "default_health_poll_interval")]
    pub health_poll_interval_ms: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_step_timeout")]
    pub step_timeout_secs: u64,

    #[serde(default = "default_stop_grace")]
    pub stop_grace_secs: u64,

    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,

    #[serde(default = "default_backoff_max")]
    pub backoff_max_secs: u64,

    /// Command run in a throwaway container of the new image before start
    #[serde(default)]
    pub setup_command: Option<Vec<String>>,

    /// Extra arguments for `docker run`
    #[serde(default)]
    pub run_args: Vec<String>,
}

fn default_health_check_path() -> String {
    "/health".to_string()
}

fn default_health_poll_interval() -> u64 {
    1_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_step_timeout() -> u64 {
    300
}

fn default_stop_grace() -> u64 {
    30
}

fn default_backoff_base() -> u64 {
    5
}

fn default_backoff_max() -> u64 {
    300
}
