//! Deployment worker
//!
//! Each worker is an independent lease/execute/report loop. Workers share
//! nothing but the queue; the queue guarantees a job is held by one worker
//! at a time.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::errors::DeployerError;
use crate::notify::{StatusEvent, StatusNotifier};
use crate::queue::{JobQueue, JobStatus, LeasedJob};
use crate::runtime::ContainerRuntime;
use crate::utils::{calc_exp_backoff, with_jitter, CooldownOptions};
use crate::workers::pipeline::{Abort, Pipeline};

/// Deployer worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Identifies the worker in leases and logs
    pub worker_id: String,

    /// First wait after finding the queue empty
    pub idle_poll_base: Duration,

    /// Longest wait between polls of an empty queue
    pub idle_poll_max: Duration,

    /// Lease heartbeat period while a job runs
    pub heartbeat_interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            worker_id: "worker-0".to_string(),
            idle_poll_base: Duration::from_millis(500),
            idle_poll_max: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(15),
        }
    }
}

impl Options {
    pub fn from_config(config: &Config, index: usize) -> Self {
        Self {
            worker_id: format!("worker-{}", index),
            idle_poll_base: config.idle_poll_base,
            idle_poll_max: config.idle_poll_max,
            heartbeat_interval: config.heartbeat_interval,
        }
    }

    fn idle_delay(&self, idle_polls: u32) -> Duration {
        let options = CooldownOptions {
            base_delay: self.idle_poll_base,
            max_delay: self.idle_poll_max,
            multiplier: 2.0,
        };
        with_jitter(calc_exp_backoff(&options, idle_polls))
    }
}

/// Run the deployer worker
#[allow(clippy::too_many_arguments)]
pub async fn run<S, F>(
    options: &Options,
    config: Arc<Config>,
    queue: Arc<JobQueue>,
    runtime: Arc<dyn ContainerRuntime>,
    notifier: Arc<dyn StatusNotifier>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Deployer worker {} starting...", options.worker_id);
    let mut idle_polls: u32 = 0;

    loop {
        // A running job is never interrupted; shutdown is honoured between jobs
        if (&mut shutdown_signal).now_or_never().is_some() {
            info!("Deployer worker {} shutting down...", options.worker_id);
            return;
        }

        let leased = match queue.lease(&options.worker_id).await {
            Ok(leased) => leased,
            Err(e) => {
                error!("Worker {} failed to lease: {}", options.worker_id, e);
                None
            }
        };

        match leased {
            Some(leased) => {
                idle_polls = 0;
                execute_job(
                    options,
                    &config,
                    &queue,
                    runtime.as_ref(),
                    notifier.as_ref(),
                    leased,
                )
                .await;
            }
            None => {
                let delay = options.idle_delay(idle_polls);
                idle_polls = idle_polls.saturating_add(1);
                debug!("Worker {} idle, polling again in {:?}", options.worker_id, delay);

                tokio::select! {
                    _ = &mut shutdown_signal => {
                        info!("Deployer worker {} shutting down...", options.worker_id);
                        return;
                    }
                    _ = sleep_fn(delay) => {}
                }
            }
        }
    }
}

/// Execute one leased job and report its outcome to the queue
pub async fn execute_job(
    options: &Options,
    config: &Config,
    queue: &JobQueue,
    runtime: &dyn ContainerRuntime,
    notifier: &dyn StatusNotifier,
    leased: LeasedJob,
) {
    let LeasedJob { job, lease } = leased;
    info!(
        "Worker {} deploying {} to {} (job {}, attempt {})",
        options.worker_id, job.image_ref, job.target, job.id, lease.attempt
    );
    notifier
        .notify(&StatusEvent::from_status(&JobStatus::from(&job)))
        .await;

    let Some(target) = config.target_by_name(&job.target) else {
        let error = DeployerError::UnknownTarget(job.target.clone());
        report(queue.fail(&lease, &error.to_string(), false).await, notifier).await;
        return;
    };

    let pipeline = Pipeline::new(queue, runtime, &target, &lease, options.heartbeat_interval);
    let result = match pipeline.execute(&job).await {
        Ok(()) => queue.complete(&lease).await,
        Err(Abort::LeaseLost) => {
            warn!(
                "Worker {} abandoned job {}: lease no longer held",
                options.worker_id, job.id
            );
            return;
        }
        Err(Abort::Failed { error, note }) => {
            if let Some(note) = note {
                if let Err(e) = queue.add_note(&lease, &note).await {
                    warn!("Unable to record note on job {}: {}", job.id, e);
                }
            }
            queue
                .fail(&lease, &error.to_string(), error.is_retryable())
                .await
        }
    };

    report(result, notifier).await;
}

async fn report(result: Result<JobStatus, DeployerError>, notifier: &dyn StatusNotifier) {
    match result {
        Ok(status) => notifier.notify(&StatusEvent::from_status(&status)).await,
        Err(DeployerError::LeaseExpired(job_id)) => {
            warn!("Outcome of job {} discarded: lease expired", job_id);
        }
        Err(e) => error!("Failed to record job outcome: {}", e),
    }
}
