//! Inbound trigger boundary
//!
//! Authenticates and validates a trigger, then hands it to the queue. The
//! receiver never runs deployment logic and never waits for a deployment; a
//! repeated trigger is absorbed by the queue's deduplication.

pub mod auth;
pub mod trigger;

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;
use crate::errors::DeployerError;
use crate::queue::{Enqueued, JobQueue};

pub use auth::{Authenticator, Grant, TriggerClaims};
pub use trigger::TriggerPayload;

pub struct Receiver {
    config: Arc<Config>,
    queue: Arc<JobQueue>,
    authenticator: Authenticator,
}

impl Receiver {
    pub fn new(config: Arc<Config>, queue: Arc<JobQueue>) -> Self {
        let authenticator = Authenticator::new(config.trigger_secret.clone());
        Self {
            config,
            queue,
            authenticator,
        }
    }

    /// Validate `body` and enqueue the deployment it requests
    pub async fn handle_trigger(
        &self,
        body: &[u8],
        credential: Option<&str>,
    ) -> Result<Enqueued, DeployerError> {
        let grant = self.authenticator.verify(credential).map_err(|e| {
            warn!(target: "security", "Rejected trigger: {}", e);
            e
        })?;

        let payload = TriggerPayload::parse(body)?;

        if !grant.allows(&payload.target) {
            warn!(
                target: "security",
                "Rejected trigger for {}: credential is scoped to another target",
                payload.target
            );
            return Err(DeployerError::AuthenticationError(format!(
                "credential not valid for target '{}'",
                payload.target
            )));
        }

        if let Some(target) = self.config.target_by_name(&payload.target) {
            if !target.accepts_image(&payload.image_ref) {
                return Err(DeployerError::ValidationError(format!(
                    "image '{}' does not match pattern '{}' of target '{}'",
                    payload.image_ref, target.image_pattern, target.name
                )));
            }
        }

        let enqueued = self
            .queue
            .enqueue(&payload.target, &payload.image_ref, payload.trigger_source())
            .await?;
        info!(
            "Accepted trigger for {} ({}) as job {}{}",
            payload.target,
            payload.image_ref,
            enqueued.job_id,
            if enqueued.deduplicated { " (duplicate)" } else { "" }
        );
        Ok(enqueued)
    }
}
