//! Deployment step pipeline
//!
//! Runs the fixed rollout sequence for one leased job: pull, stop, setup,
//! start, health check. Every step is bounded by the target's step timeout
//! and the lease is heartbeated for as long as the job is in flight.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::DeploymentTarget;
use crate::errors::DeployerError;
use crate::queue::{Job, JobQueue, Lease};
use crate::runtime::{ContainerRuntime, Health, StepError};

/// Rollout steps in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Inspect,
    Pull,
    Stop,
    Setup,
    Start,
    HealthCheck,
    Rollback,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Inspect => "inspect",
            Step::Pull => "pull",
            Step::Stop => "stop",
            Step::Setup => "setup",
            Step::Start => "start",
            Step::HealthCheck => "health_check",
            Step::Rollback => "rollback",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a pipeline run stopped short of success
#[derive(Debug)]
pub enum Abort {
    /// A step failed; `note` records what the rollback did, if one ran
    Failed {
        error: DeployerError,
        note: Option<String>,
    },

    /// The queue no longer considers this worker the lease holder
    LeaseLost,
}

impl Abort {
    fn failed(error: DeployerError) -> Self {
        Abort::Failed { error, note: None }
    }
}

pub struct Pipeline<'a> {
    queue: &'a JobQueue,
    runtime: &'a dyn ContainerRuntime,
    target: &'a DeploymentTarget,
    lease: &'a Lease,
    heartbeat_interval: Duration,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        queue: &'a JobQueue,
        runtime: &'a dyn ContainerRuntime,
        target: &'a DeploymentTarget,
        lease: &'a Lease,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            queue,
            runtime,
            target,
            lease,
            heartbeat_interval,
        }
    }

    /// Run every step for `job`, heartbeating the lease from the first step
    /// until the last one (rollback included) returns
    pub async fn execute(&self, job: &Job) -> Result<(), Abort> {
        let steps = self.run_steps(job);
        tokio::pin!(steps);

        let mut ticker = tokio::time::interval_at(
            Instant::now() + self.heartbeat_interval,
            self.heartbeat_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                result = &mut steps => return result,
                _ = ticker.tick() => {
                    match self.queue.heartbeat(self.lease).await {
                        Ok(()) => {}
                        Err(DeployerError::LeaseExpired(_)) | Err(DeployerError::NotFound(_)) => {
                            warn!("Lost lease on job {}", self.lease.job_id);
                            return Err(Abort::LeaseLost);
                        }
                        Err(e) => warn!("Heartbeat for job {} failed: {}", self.lease.job_id, e),
                    }
                }
            }
        }
    }

    async fn run_steps(&self, job: &Job) -> Result<(), Abort> {
        let image_ref = job.image_ref.as_str();

        let previous = self.previous_image(image_ref).await;
        debug!("Previous image for {}: {:?}", self.target.name, previous);

        self.run_step(Step::Pull, self.runtime.pull(image_ref))
            .await
            .map_err(Abort::failed)?;

        let stopped = self
            .run_step(Step::Stop, self.runtime.stop(self.target))
            .await
            .map_err(Abort::failed)?;

        if let Some(command) = &self.target.setup_command {
            self.run_step(
                Step::Setup,
                self.runtime.run_setup(self.target, image_ref, command),
            )
            .await
            .map_err(Abort::failed)?;
        }

        let started = match self
            .run_step(Step::Start, self.runtime.start(self.target, image_ref))
            .await
        {
            Ok(()) => self.run_step(Step::HealthCheck, self.wait_healthy()).await,
            Err(error) => Err(error),
        };

        match started {
            Ok(()) => Ok(()),
            Err(error) if stopped => {
                let note = self.rollback(previous.as_deref(), &error).await;
                Err(Abort::Failed {
                    error,
                    note: Some(note),
                })
            }
            Err(error) => Err(Abort::failed(error)),
        }
    }

    /// Known-good image to fall back to: whatever runs now, else the last
    /// successful deployment recorded in the queue. The image being deployed
    /// never counts; it is what a previous attempt of this job left behind.
    async fn previous_image(&self, image_ref: &str) -> Option<String> {
        match self
            .run_step(Step::Inspect, self.runtime.current_image(self.target))
            .await
        {
            Ok(Some(image)) if image != image_ref => return Some(image),
            Ok(_) => {}
            Err(e) => {
                warn!("Unable to inspect current container of {}: {}", self.target.name, e);
            }
        }
        self.queue
            .last_succeeded_image(&self.target.name)
            .await
            .filter(|image| image != image_ref)
    }

    /// One bounded attempt to bring the previous image back. Never retried.
    async fn rollback(&self, previous: Option<&str>, cause: &DeployerError) -> String {
        let Some(previous) = previous else {
            warn!("No previous image known for {}; skipping rollback", self.target.name);
            return "rollback skipped: no previous image known".to_string();
        };

        warn!(
            "Rolling back {} to {} after: {}",
            self.target.name, previous, cause
        );
        let restore = async {
            if let Err(e) = self.runtime.stop(self.target).await {
                debug!("Ignoring stop failure during rollback: {}", e);
            }
            self.runtime.start(self.target, previous).await
        };

        match self.run_step(Step::Rollback, restore).await {
            Ok(()) => {
                info!("Rolled back {} to {}", self.target.name, previous);
                format!("rolled back to {}", previous)
            }
            Err(e) => {
                error!("Rollback of {} to {} failed: {}", self.target.name, previous, e);
                format!("rollback to {} failed: {}", previous, e)
            }
        }
    }

    /// Probe until healthy; gives up once another poll would overrun the
    /// step timeout
    async fn wait_healthy(&self) -> Result<(), StepError> {
        let deadline = Instant::now() + self.target.step_timeout;
        let interval = self.target.health_poll_interval;
        loop {
            let reason = match self.runtime.health_check(self.target).await? {
                Health::Healthy => {
                    info!("{} is healthy", self.target.name);
                    return Ok(());
                }
                Health::Unhealthy(reason) => reason,
            };
            debug!("{} not healthy yet: {}", self.target.name, reason);

            if Instant::now() + interval >= deadline {
                return Err(StepError::Transient(format!(
                    "not healthy within {:?}: {}",
                    self.target.step_timeout, reason
                )));
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Drive `operation` under the step timeout
    async fn run_step<T, F>(&self, step: Step, operation: F) -> Result<T, DeployerError>
    where
        F: Future<Output = Result<T, StepError>>,
    {
        debug!("Job {}: {} started", self.lease.job_id, step);
        match tokio::time::timeout(self.target.step_timeout, operation).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(DeployerError::StepExecution {
                step: step.to_string(),
                retryable: e.is_retryable(),
                message: e.to_string(),
            }),
            Err(_) => Err(DeployerError::StepExecution {
                step: step.to_string(),
                message: format!("timed out after {:?}", self.target.step_timeout),
                retryable: true,
            }),
        }
    }
}
