//! Docker CLI runtime

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::DeploymentTarget;
use crate::runtime::{ContainerRuntime, Health, StepError};

/// stderr fragments that mean the request itself is wrong
const INVALID_MARKERS: &[&str] = &[
    "manifest unknown",
    "not found",
    "invalid reference format",
    "repository does not exist",
    "pull access denied",
    "no such image",
];

struct CommandOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

/// Drives the `docker` CLI and probes health over HTTP
pub struct DockerRuntime {
    binary: String,
    http: reqwest::Client,
}

impl DockerRuntime {
    pub fn new(binary: impl Into<String>) -> Result<Self, StepError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| StepError::Invalid(format!("unable to build HTTP client: {}", e)))?;
        Ok(Self {
            binary: binary.into(),
            http,
        })
    }

    async fn docker(&self, args: &[&str]) -> Result<CommandOutput, StepError> {
        debug!("{} {}", self.binary, args.join(" "));
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| StepError::Transient(format!("failed to run {}: {}", self.binary, e)))?;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    async fn container_running(&self, name: &str) -> Result<bool, StepError> {
        let output = self
            .docker(&["inspect", "--format", "{{.State.Running}}", name])
            .await?;
        Ok(output.success && output.stdout == "true")
    }
}

/// Classify a failed docker invocation from its stderr
fn classify(action: &str, stderr: &str) -> StepError {
    let lowered = stderr.to_lowercase();
    let message = format!("docker {} failed: {}", action, stderr);
    if INVALID_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        StepError::Invalid(message)
    } else {
        StepError::Transient(message)
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn pull(&self, image_ref: &str) -> Result<(), StepError> {
        info!("Pulling image: {}", image_ref);
        let output = self.docker(&["pull", image_ref]).await?;
        if !output.success {
            return Err(classify("pull", &output.stderr));
        }
        Ok(())
    }

    async fn current_image(&self, target: &DeploymentTarget) -> Result<Option<String>, StepError> {
        let output = self
            .docker(&[
                "inspect",
                "--format",
                "{{.Config.Image}}",
                target.container_name.as_str(),
            ])
            .await?;
        if !output.success || output.stdout.is_empty() {
            return Ok(None);
        }
        Ok(Some(output.stdout))
    }

    async fn stop(&self, target: &DeploymentTarget) -> Result<bool, StepError> {
        let name = target.container_name.as_str();
        let exists = self.docker(&["inspect", "--format", "{{.Id}}", name]).await?;
        if !exists.success {
            debug!("No existing container {}", name);
            return Ok(false);
        }

        info!("Stopping container: {}", name);
        let grace = target.stop_grace.as_secs().to_string();
        let stop = self.docker(&["stop", "--time", grace.as_str(), name]).await?;
        if !stop.success {
            return Err(classify("stop", &stop.stderr));
        }

        let rm = self.docker(&["rm", name]).await?;
        if !rm.success {
            return Err(classify("rm", &rm.stderr));
        }
        Ok(true)
    }

    async fn run_setup(
        &self,
        target: &DeploymentTarget,
        image_ref: &str,
        command: &[String],
    ) -> Result<(), StepError> {
        info!("Running setup for {}: {}", target.name, command.join(" "));
        let mut args: Vec<&str> = vec!["run", "--rm"];
        args.extend(target.run_args.iter().map(String::as_str));
        args.push(image_ref);
        args.extend(command.iter().map(String::as_str));

        let output = self.docker(&args).await?;
        if !output.success {
            // A setup command exiting non-zero is a problem with the release
            return Err(StepError::Invalid(format!(
                "setup command failed: {}",
                output.stderr
            )));
        }
        Ok(())
    }

    async fn start(&self, target: &DeploymentTarget, image_ref: &str) -> Result<(), StepError> {
        info!("Starting container {} from {}", target.container_name, image_ref);
        let mut args: Vec<&str> = vec![
            "run",
            "-d",
            "--name",
            target.container_name.as_str(),
            "--restart",
            "unless-stopped",
        ];
        args.extend(target.run_args.iter().map(String::as_str));
        args.push(image_ref);

        let output = self.docker(&args).await?;
        if !output.success {
            return Err(classify("run", &output.stderr));
        }
        Ok(())
    }

    async fn health_check(&self, target: &DeploymentTarget) -> Result<Health, StepError> {
        let Some(endpoint) = target.health_endpoint() else {
            return if self.container_running(&target.container_name).await? {
                Ok(Health::Healthy)
            } else {
                Ok(Health::Unhealthy("container is not running".to_string()))
            };
        };

        match self.http.get(endpoint.clone()).send().await {
            Ok(response) if response.status().is_success() => Ok(Health::Healthy),
            Ok(response) => Ok(Health::Unhealthy(format!(
                "{} returned {}",
                endpoint,
                response.status()
            ))),
            // Still starting up
            Err(e) => Ok(Health::Unhealthy(format!("{} unreachable: {}", endpoint, e))),
        }
    }
}
