//! Job records

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::queue::fsm::JobState;

/// Unique job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Where a trigger came from; informational only
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerSource {
    /// Caller label, e.g. `ci` or `webhook`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Delivery id assigned by the caller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_id: Option<String>,

    /// Commit the image was built from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
}

/// Exclusive claim on a running job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseInfo {
    pub worker_id: String,
    /// Attempt number this lease was granted for (1-based)
    pub attempt: u32,
    pub leased_at: DateTime<Utc>,
    pub heartbeat_at: DateTime<Utc>,
}

/// Token a worker presents to act on the job it leased
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub job_id: JobId,
    pub worker_id: String,
    pub attempt: u32,
}

/// How an attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    /// Failed and was requeued
    Retrying,
    Failed,
    /// Lease expired and the job was taken back by the reaper
    Reclaimed,
}

/// One execution of a job by a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub number: u32,
    pub worker_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub outcome: Option<AttemptOutcome>,
    #[serde(default)]
    pub error: Option<String>,
    /// Backoff applied before the next attempt, when requeued
    #[serde(default)]
    pub retry_delay_ms: Option<u64>,
}

/// A requested deployment of `image_ref` to `target`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Global submission order
    pub seq: u64,
    pub target: String,
    pub image_ref: String,
    #[serde(default)]
    pub source: TriggerSource,
    pub state: JobState,
    /// Finished attempts
    pub attempt_count: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// A requeued job is not leased before this instant
    #[serde(default)]
    pub eligible_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub lease: Option<LeaseInfo>,
    #[serde(default)]
    pub attempts: Vec<AttemptRecord>,
    #[serde(default)]
    pub notes: Vec<String>,
}

impl Job {
    pub(crate) fn new(
        seq: u64,
        target: String,
        image_ref: String,
        source: TriggerSource,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: JobId::new(),
            seq,
            target,
            image_ref,
            source,
            state: JobState::Pending,
            attempt_count: 0,
            last_error: None,
            submitted_at: now,
            started_at: None,
            eligible_after: None,
            completed_at: None,
            lease: None,
            attempts: Vec::new(),
            notes: Vec::new(),
        }
    }

    /// Whether this job can be leased at `now`, ignoring target exclusivity
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Pending && self.eligible_after.map_or(true, |at| at <= now)
    }

    /// Whether `lease` is the current lease on this job
    pub fn is_held_by(&self, lease: &Lease) -> bool {
        self.state == JobState::Running
            && self.lease.as_ref().is_some_and(|held| {
                held.worker_id == lease.worker_id && held.attempt == lease.attempt
            })
    }

    /// Lease token for the current holder
    pub fn current_lease(&self) -> Option<Lease> {
        self.lease.as_ref().map(|held| Lease {
            job_id: self.id,
            worker_id: held.worker_id.clone(),
            attempt: held.attempt,
        })
    }
}

/// Read-only view returned by status queries
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub id: JobId,
    pub target: String,
    pub image_ref: String,
    pub source: TriggerSource,
    pub state: JobState,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub eligible_after: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub leased_by: Option<String>,
    pub attempts: Vec<AttemptRecord>,
    pub notes: Vec<String>,
}

impl From<&Job> for JobStatus {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            target: job.target.clone(),
            image_ref: job.image_ref.clone(),
            source: job.source.clone(),
            state: job.state,
            attempt_count: job.attempt_count,
            last_error: job.last_error.clone(),
            submitted_at: job.submitted_at,
            started_at: job.started_at,
            eligible_after: job.eligible_after,
            completed_at: job.completed_at,
            leased_by: job.lease.as_ref().map(|l| l.worker_id.clone()),
            attempts: job.attempts.clone(),
            notes: job.notes.clone(),
        }
    }
}
