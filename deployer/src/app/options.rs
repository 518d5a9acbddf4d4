//! Application configuration options

use std::time::Duration;

use crate::config::Config;
use crate::storage::layout::StorageLayout;
use crate::workers::{deployer, reaper};

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage configuration
    pub storage: StorageLayout,

    /// Enable the trigger/status HTTP server
    pub enable_server: bool,

    /// Server configuration
    pub server: ServerOptions,

    /// Number of deployment workers
    pub worker_count: usize,

    /// Deployment worker options; worker ids are assigned per worker
    pub deployer: deployer::Options,

    /// Lease reaper options
    pub reaper: reaper::Options,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            storage: StorageLayout::default(),
            enable_server: true,
            server: ServerOptions::default(),
            worker_count: 2,
            deployer: deployer::Options::default(),
            reaper: reaper::Options::default(),
        }
    }
}

impl AppOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            lifecycle: LifecycleOptions {
                max_shutdown_delay: config.shutdown_timeout,
            },
            storage: StorageLayout::new(config.state_dir.clone()),
            enable_server: true,
            server: ServerOptions {
                host: config.server.host.clone(),
                port: config.server.port,
            },
            worker_count: config.worker_count,
            deployer: deployer::Options::from_config(config, 0),
            reaper: reaper::Options {
                interval: config.reaper_interval,
                retention: config.retention,
            },
        }
    }
}

/// Lifecycle options for the deployer
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}
