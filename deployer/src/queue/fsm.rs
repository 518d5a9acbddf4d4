//! Finite state machine for deployment jobs
//!
//! `pending → running → {succeeded | pending (retry) | failed}`. The terminal
//! states `succeeded` and `failed` accept no further transitions.

use serde::{Deserialize, Serialize};

use crate::errors::DeployerError;

/// Job state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting to be leased
    Pending,

    /// Leased by a worker
    Running,

    /// All steps completed
    Succeeded,

    /// Gave up; final error recorded on the job
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        }
    }

    /// Apply `event`, returning the next state
    pub fn process(&self, event: &JobEvent) -> Result<JobState, DeployerError> {
        let next = match (self, event) {
            (JobState::Pending, JobEvent::Lease) => JobState::Running,
            (JobState::Running, JobEvent::Complete) => JobState::Succeeded,
            (JobState::Running, JobEvent::Requeue) => JobState::Pending,
            (JobState::Running, JobEvent::Fail) => JobState::Failed,
            // Startup recovery may fail a pending job whose target disappeared
            (JobState::Pending, JobEvent::Fail) => JobState::Failed,
            (state, event) => {
                return Err(DeployerError::InvalidTransition(format!(
                    "{:?} -> {:?}",
                    state, event
                )));
            }
        };
        Ok(next)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    /// A worker claimed the job
    Lease,

    /// All steps succeeded
    Complete,

    /// Retryable failure or lease reclaim with attempts left
    Requeue,

    /// Terminal failure
    Fail,
}
