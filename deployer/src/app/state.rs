//! Application state management

use std::sync::Arc;

use tracing::{info, warn};

use crate::app::options::AppOptions;
use crate::config::Config;
use crate::errors::DeployerError;
use crate::notify::{HttpNotifier, LogNotifier, StatusNotifier};
use crate::queue::{JobQueue, JobState, SystemClock};
use crate::receiver::Receiver;
use crate::runtime::{ContainerRuntime, DockerRuntime};

/// Main application state
pub struct AppState {
    /// Validated configuration
    pub config: Arc<Config>,

    /// Durable job queue
    pub queue: Arc<JobQueue>,

    /// Container runtime driven by the workers
    pub runtime: Arc<dyn ContainerRuntime>,

    /// Status notification sink
    pub notifier: Arc<dyn StatusNotifier>,

    /// Trigger intake
    pub receiver: Arc<Receiver>,
}

impl AppState {
    /// Initialize application state
    pub async fn init(config: Arc<Config>, options: &AppOptions) -> Result<Self, DeployerError> {
        info!("Initializing application state...");

        options.storage.setup().await?;
        let queue = Arc::new(
            JobQueue::open(
                config.clone(),
                options.storage.jobs_file(),
                Arc::new(SystemClock),
            )
            .await?,
        );

        let runtime: Arc<dyn ContainerRuntime> = Arc::new(
            DockerRuntime::new(config.docker_binary.clone())
                .map_err(|e| DeployerError::ConfigError(e.to_string()))?,
        );

        let notifier: Arc<dyn StatusNotifier> = match &config.notify_url {
            Some(url) => Arc::new(HttpNotifier::new(url.clone(), config.notify_token.clone())?),
            None => Arc::new(LogNotifier),
        };

        let receiver = Arc::new(Receiver::new(config.clone(), queue.clone()));

        Ok(Self {
            config,
            queue,
            runtime,
            notifier,
            receiver,
        })
    }

    /// Shutdown application state
    pub async fn shutdown(&self) -> Result<(), DeployerError> {
        info!("Shutting down application state...");
        for target in self.config.targets() {
            let jobs = self.queue.jobs_for_target(&target.name).await;
            let running = jobs.iter().filter(|j| j.state == JobState::Running).count();
            if running > 0 {
                warn!(
                    "{} job(s) for {} still running; they will be reclaimed after restart",
                    running, target.name
                );
            }
        }
        Ok(())
    }
}
