//! Job status notifications
//!
//! The worker and the reaper report every transition they cause to a
//! [`StatusNotifier`]. Delivery is best effort: notifier failures are logged
//! and never influence the job.

pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::queue::{JobId, JobState, JobStatus};

pub use http::HttpNotifier;

/// A job status change
#[derive(Debug, Clone, Serialize)]
pub struct StatusEvent {
    pub job_id: JobId,
    pub target: String,
    pub image_ref: String,
    pub state: JobState,
    pub attempt_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

impl StatusEvent {
    pub fn from_status(status: &JobStatus) -> Self {
        Self {
            job_id: status.id,
            target: status.target.clone(),
            image_ref: status.image_ref.clone(),
            state: status.state,
            attempt_count: status.attempt_count,
            error: status.last_error.clone(),
            at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait StatusNotifier: Send + Sync {
    async fn notify(&self, event: &StatusEvent);
}

/// Writes status events to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl StatusNotifier for LogNotifier {
    async fn notify(&self, event: &StatusEvent) {
        match &event.error {
            Some(error) if event.state != JobState::Succeeded => warn!(
                job_id = %event.job_id,
                target = %event.target,
                state = %event.state,
                attempts = event.attempt_count,
                "Job status changed: {}",
                error
            ),
            _ => info!(
                job_id = %event.job_id,
                target = %event.target,
                state = %event.state,
                attempts = event.attempt_count,
                "Job status changed"
            ),
        }
    }
}
