//! Durable job queue
//!
//! The queue owns every job record. State lives in an arena keyed by job id
//! plus a per-target index of the non-terminal jobs in submission order. The
//! head of each target's index is the only job of that target that may be
//! leased, which gives strict FIFO per target and at most one running job per
//! target. Every mutation is written through to a JSON snapshot; when the
//! write fails the records the mutation touched are restored and the caller
//! gets a storage error.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::errors::DeployerError;
use crate::filesys::file::File;
use crate::queue::clock::{to_chrono, Clock};
use crate::queue::fsm::{JobEvent, JobState};
use crate::queue::job::{
    AttemptOutcome, AttemptRecord, Job, JobId, JobStatus, Lease, LeaseInfo, TriggerSource,
};

const SNAPSHOT_VERSION: u32 = 1;

/// Result of an enqueue call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Enqueued {
    pub job_id: JobId,
    /// The trigger matched an existing pending or running job
    pub deduplicated: bool,
}

/// A job handed to a worker together with its lease token
#[derive(Debug, Clone)]
pub struct LeasedJob {
    pub job: Job,
    pub lease: Lease,
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    next_seq: u64,
    jobs: Vec<Job>,
}

#[derive(Debug, Default)]
struct QueueInner {
    next_seq: u64,
    jobs: HashMap<JobId, Job>,
    /// Non-terminal jobs per target, oldest first
    by_target: HashMap<String, VecDeque<JobId>>,
}

impl QueueInner {
    fn from_jobs(next_seq: u64, mut jobs: Vec<Job>) -> Self {
        jobs.sort_by_key(|job| job.seq);
        let next_seq = jobs
            .last()
            .map_or(next_seq, |job| next_seq.max(job.seq + 1));

        let mut inner = Self {
            next_seq,
            ..Default::default()
        };
        for job in jobs {
            if !job.state.is_terminal() {
                inner
                    .by_target
                    .entry(job.target.clone())
                    .or_default()
                    .push_back(job.id);
            }
            inner.jobs.insert(job.id, job);
        }
        inner
    }

    fn snapshot(&self) -> Snapshot {
        let mut jobs: Vec<Job> = self.jobs.values().cloned().collect();
        jobs.sort_by_key(|job| job.seq);
        Snapshot {
            version: SNAPSHOT_VERSION,
            next_seq: self.next_seq,
            jobs,
        }
    }

    fn job_mut(&mut self, job_id: &JobId) -> Result<&mut Job, DeployerError> {
        self.jobs
            .get_mut(job_id)
            .ok_or_else(|| DeployerError::NotFound(format!("job {}", job_id)))
    }

    /// Fetch the job behind `lease`, failing when the lease is no longer current
    fn leased_job_mut(&mut self, lease: &Lease) -> Result<&mut Job, DeployerError> {
        let job = self.job_mut(&lease.job_id)?;
        if !job.is_held_by(lease) {
            return Err(DeployerError::LeaseExpired(lease.job_id.to_string()));
        }
        Ok(job)
    }

    fn checkpoint(&self) -> Undo {
        Undo {
            next_seq: self.next_seq,
            jobs: Vec::new(),
            targets: Vec::new(),
        }
    }

    fn unlink(&mut self, target: &str, job_id: &JobId) {
        if let Some(order) = self.by_target.get_mut(target) {
            order.retain(|id| id != job_id);
            if order.is_empty() {
                self.by_target.remove(target);
            }
        }
    }
}

/// Prior values of the records one mutation touches
#[derive(Debug)]
struct Undo {
    next_seq: u64,
    jobs: Vec<(JobId, Option<Job>)>,
    targets: Vec<(String, Option<VecDeque<JobId>>)>,
}

impl Undo {
    /// Remember `job_id` (absent or not) and its target's index entry
    fn save_job(&mut self, inner: &QueueInner, job_id: &JobId) {
        if self.jobs.iter().any(|(id, _)| id == job_id) {
            return;
        }
        let job = inner.jobs.get(job_id).cloned();
        if let Some(job) = &job {
            self.save_target(inner, &job.target);
        }
        self.jobs.push((*job_id, job));
    }

    fn save_target(&mut self, inner: &QueueInner, target: &str) {
        if self.targets.iter().any(|(name, _)| name == target) {
            return;
        }
        self.targets
            .push((target.to_string(), inner.by_target.get(target).cloned()));
    }

    fn restore(self, inner: &mut QueueInner) {
        inner.next_seq = self.next_seq;
        for (job_id, job) in self.jobs {
            match job {
                Some(job) => {
                    inner.jobs.insert(job_id, job);
                }
                None => {
                    inner.jobs.remove(&job_id);
                }
            }
        }
        for (target, order) in self.targets {
            match order {
                Some(order) => {
                    inner.by_target.insert(target, order);
                }
                None => {
                    inner.by_target.remove(&target);
                }
            }
        }
    }
}

/// The deployment job queue
pub struct JobQueue {
    config: Arc<Config>,
    clock: Arc<dyn Clock>,
    file: Option<File>,
    inner: Mutex<QueueInner>,
}

impl JobQueue {
    /// A queue that keeps state in memory only
    pub fn in_memory(config: Arc<Config>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            file: None,
            inner: Mutex::new(QueueInner::default()),
        }
    }

    /// Open the durable queue backed by `file`, restoring any saved jobs.
    ///
    /// Pending jobs whose target is no longer configured are failed. Running
    /// jobs keep their lease and are reclaimed once it expires.
    pub async fn open(
        config: Arc<Config>,
        file: File,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, DeployerError> {
        let mut inner = if file.exists().await {
            let snapshot: Snapshot = file.read_json().await.map_err(|e| {
                DeployerError::StorageError(format!(
                    "unable to read job store {}: {}",
                    file.path().display(),
                    e
                ))
            })?;
            if snapshot.version != SNAPSHOT_VERSION {
                return Err(DeployerError::StorageError(format!(
                    "unsupported job store version {}",
                    snapshot.version
                )));
            }
            QueueInner::from_jobs(snapshot.next_seq, snapshot.jobs)
        } else {
            QueueInner::default()
        };

        let now = clock.now();
        let orphaned: Vec<(String, JobId)> = inner
            .by_target
            .iter()
            .filter(|(target, _)| config.target_by_name(target).is_none())
            .flat_map(|(target, ids)| ids.iter().map(move |id| (target.clone(), *id)))
            .collect();
        for (target, job_id) in orphaned {
            let job = inner.job_mut(&job_id)?;
            if job.state != JobState::Pending {
                continue;
            }
            warn!("Failing job {}: target '{}' is no longer configured", job_id, target);
            job.state = job.state.process(&JobEvent::Fail)?;
            job.last_error = Some(format!("target '{}' is no longer configured", target));
            job.completed_at = Some(now);
            job.eligible_after = None;
            inner.unlink(&target, &job_id);
        }

        let restored = inner.jobs.len();
        let queue = Self {
            config,
            clock,
            file: Some(file),
            inner: Mutex::new(inner),
        };
        {
            let inner = queue.inner.lock().await;
            queue.persist(&inner).await?;
        }
        info!("Job queue opened with {} job(s)", restored);
        Ok(queue)
    }

    /// Create a pending job, or return the pending/running job of `target`
    /// that already deploys the same `image_ref`
    pub async fn enqueue(
        &self,
        target: &str,
        image_ref: &str,
        source: TriggerSource,
    ) -> Result<Enqueued, DeployerError> {
        if self.config.target_by_name(target).is_none() {
            return Err(DeployerError::UnknownTarget(target.to_string()));
        }

        let mut inner = self.inner.lock().await;

        if let Some(existing) = inner.by_target.get(target).and_then(|order| {
            order
                .iter()
                .filter_map(|id| inner.jobs.get(id))
                .find(|job| job.image_ref == image_ref)
        }) {
            debug!(
                "Deduplicated trigger for {} ({}) onto job {}",
                target, image_ref, existing.id
            );
            return Ok(Enqueued {
                job_id: existing.id,
                deduplicated: true,
            });
        }

        let mut undo = inner.checkpoint();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        let job = Job::new(
            seq,
            target.to_string(),
            image_ref.to_string(),
            source,
            self.clock.now(),
        );
        let job_id = job.id;
        undo.save_job(&inner, &job_id);
        undo.save_target(&inner, target);
        inner
            .by_target
            .entry(target.to_string())
            .or_default()
            .push_back(job_id);
        inner.jobs.insert(job_id, job);

        self.commit(&mut inner, undo).await?;
        info!("Enqueued job {} for {} ({})", job_id, target, image_ref);
        Ok(Enqueued {
            job_id,
            deduplicated: false,
        })
    }

    /// Claim the earliest-submitted eligible job whose target is idle
    pub async fn lease(&self, worker_id: &str) -> Result<Option<LeasedJob>, DeployerError> {
        let mut inner = self.inner.lock().await;
        let now = self.clock.now();

        let candidate = inner
            .by_target
            .values()
            .filter_map(|order| order.front())
            .filter_map(|id| inner.jobs.get(id))
            .filter(|job| job.is_eligible(now))
            .min_by_key(|job| job.seq)
            .map(|job| job.id);

        let Some(job_id) = candidate else {
            return Ok(None);
        };

        let mut undo = inner.checkpoint();
        undo.save_job(&inner, &job_id);
        let job = inner.job_mut(&job_id)?;
        job.state = job.state.process(&JobEvent::Lease)?;
        let attempt = job.attempt_count + 1;
        job.eligible_after = None;
        job.started_at.get_or_insert(now);
        job.lease = Some(LeaseInfo {
            worker_id: worker_id.to_string(),
            attempt,
            leased_at: now,
            heartbeat_at: now,
        });
        job.attempts.push(AttemptRecord {
            number: attempt,
            worker_id: worker_id.to_string(),
            started_at: now,
            finished_at: None,
            outcome: None,
            error: None,
            retry_delay_ms: None,
        });
        let leased = LeasedJob {
            job: job.clone(),
            lease: Lease {
                job_id,
                worker_id: worker_id.to_string(),
                attempt,
            },
        };

        self.commit(&mut inner, undo).await?;
        info!(
            "Worker {} leased job {} for {} (attempt {})",
            worker_id, job_id, leased.job.target, attempt
        );
        Ok(Some(leased))
    }

    /// Refresh the lease timestamp. Heartbeats are not persisted; after a
    /// restart the last persisted lease time governs reclaim.
    pub async fn heartbeat(&self, lease: &Lease) -> Result<(), DeployerError> {
        let mut inner = self.inner.lock().await;
        let now = self.clock.now();
        let job = inner.leased_job_mut(lease)?;
        if let Some(held) = job.lease.as_mut() {
            held.heartbeat_at = now;
        }
        debug!("Heartbeat for job {} from {}", lease.job_id, lease.worker_id);
        Ok(())
    }

    /// `running → succeeded`
    pub async fn complete(&self, lease: &Lease) -> Result<JobStatus, DeployerError> {
        let mut inner = self.inner.lock().await;
        let now = self.clock.now();
        let mut undo = inner.checkpoint();
        undo.save_job(&inner, &lease.job_id);

        let job = inner.leased_job_mut(lease)?;
        job.state = job.state.process(&JobEvent::Complete)?;
        job.attempt_count += 1;
        job.completed_at = Some(now);
        job.lease = None;
        finish_attempt(job, now, AttemptOutcome::Succeeded, None, None);
        let status = JobStatus::from(&*job);
        let target = job.target.clone();
        inner.unlink(&target, &lease.job_id);

        self.commit(&mut inner, undo).await?;
        info!("Job {} for {} succeeded", lease.job_id, target);
        Ok(status)
    }

    /// Report a failed attempt. Retryable failures with attempts left are
    /// requeued behind a backoff delay; anything else is terminal.
    pub async fn fail(
        &self,
        lease: &Lease,
        error: &str,
        retryable: bool,
    ) -> Result<JobStatus, DeployerError> {
        let mut inner = self.inner.lock().await;
        let mut undo = inner.checkpoint();
        undo.save_job(&inner, &lease.job_id);
        let status = self.fail_locked(&mut inner, lease, error, retryable, AttemptOutcome::Failed)?;
        self.commit(&mut inner, undo).await?;
        Ok(status)
    }

    /// Append a note to the job behind `lease`
    pub async fn add_note(&self, lease: &Lease, note: &str) -> Result<(), DeployerError> {
        let mut inner = self.inner.lock().await;
        let mut undo = inner.checkpoint();
        undo.save_job(&inner, &lease.job_id);
        let job = inner.leased_job_mut(lease)?;
        job.notes.push(note.to_string());
        self.commit(&mut inner, undo).await
    }

    /// Requeue (or fail) running jobs whose lease was not refreshed within the
    /// lease-expiry window. Returns the reclaimed jobs' new status.
    pub async fn reclaim_expired(&self) -> Result<Vec<JobStatus>, DeployerError> {
        let mut inner = self.inner.lock().await;
        let now = self.clock.now();
        let expiry = to_chrono(self.config.lease_expiry);

        let expired: Vec<Lease> = inner
            .by_target
            .values()
            .filter_map(|order| order.front())
            .filter_map(|id| inner.jobs.get(id))
            .filter(|job| job.state == JobState::Running)
            .filter(|job| {
                job.lease
                    .as_ref()
                    .is_some_and(|held| now - held.heartbeat_at > expiry)
            })
            .filter_map(|job| job.current_lease())
            .collect();

        if expired.is_empty() {
            return Ok(Vec::new());
        }

        let mut undo = inner.checkpoint();
        for lease in &expired {
            undo.save_job(&inner, &lease.job_id);
        }
        let mut reclaimed = Vec::with_capacity(expired.len());
        for lease in expired {
            let error = DeployerError::LeaseExpired(lease.job_id.to_string());
            warn!(
                "Reclaiming job {}: worker {} stopped heartbeating",
                lease.job_id, lease.worker_id
            );
            if let Some(job) = inner.jobs.get_mut(&lease.job_id) {
                job.notes
                    .push(format!("attempt {} reclaimed from {}", lease.attempt, lease.worker_id));
            }
            let message = format!("{} (worker {})", error, lease.worker_id);
            match self.fail_locked(&mut inner, &lease, &message, true, AttemptOutcome::Reclaimed) {
                Ok(status) => reclaimed.push(status),
                Err(e) => {
                    undo.restore(&mut inner);
                    return Err(e);
                }
            }
        }

        self.commit(&mut inner, undo).await?;
        Ok(reclaimed)
    }

    /// Drop terminal jobs completed more than `retention` ago
    pub async fn evict_expired(&self, retention: Duration) -> Result<usize, DeployerError> {
        let mut inner = self.inner.lock().await;
        let cutoff = self.clock.now() - to_chrono(retention);

        let stale: Vec<JobId> = inner
            .jobs
            .values()
            .filter(|job| job.state.is_terminal())
            .filter(|job| job.completed_at.is_some_and(|at| at < cutoff))
            .map(|job| job.id)
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }

        let mut undo = inner.checkpoint();
        for id in &stale {
            undo.save_job(&inner, id);
            inner.jobs.remove(id);
        }
        self.commit(&mut inner, undo).await?;
        info!("Evicted {} finished job(s)", stale.len());
        Ok(stale.len())
    }

    /// Snapshot of one job
    pub async fn status(&self, job_id: &JobId) -> Result<JobStatus, DeployerError> {
        let inner = self.inner.lock().await;
        inner
            .jobs
            .get(job_id)
            .map(JobStatus::from)
            .ok_or_else(|| DeployerError::NotFound(format!("job {}", job_id)))
    }

    /// All retained jobs of `target`, oldest first
    pub async fn jobs_for_target(&self, target: &str) -> Vec<JobStatus> {
        let inner = self.inner.lock().await;
        let mut jobs: Vec<&Job> = inner.jobs.values().filter(|j| j.target == target).collect();
        jobs.sort_by_key(|job| job.seq);
        jobs.into_iter().map(JobStatus::from).collect()
    }

    /// Image of the most recent successful deployment to `target`
    pub async fn last_succeeded_image(&self, target: &str) -> Option<String> {
        let inner = self.inner.lock().await;
        inner
            .jobs
            .values()
            .filter(|job| job.target == target && job.state == JobState::Succeeded)
            .max_by_key(|job| job.seq)
            .map(|job| job.image_ref.clone())
    }

    fn fail_locked(
        &self,
        inner: &mut QueueInner,
        lease: &Lease,
        error: &str,
        retryable: bool,
        outcome: AttemptOutcome,
    ) -> Result<JobStatus, DeployerError> {
        let now = self.clock.now();
        let job = inner.leased_job_mut(lease)?;
        let policy = self
            .config
            .target_by_name(&job.target)
            .map(|target| target.retry.clone())
            .unwrap_or_default();

        let attempt_count = job.attempt_count + 1;
        let retry = retryable && attempt_count < policy.max_attempts;
        let event = if retry {
            JobEvent::Requeue
        } else {
            JobEvent::Fail
        };
        let next_state = job.state.process(&event)?;

        job.state = next_state;
        job.attempt_count = attempt_count;
        job.last_error = Some(error.to_string());
        job.lease = None;

        if retry {
            let delay = policy.backoff_for(job.attempt_count);
            job.eligible_after = Some(now + to_chrono(delay));
            let recorded_outcome = if outcome == AttemptOutcome::Reclaimed {
                outcome
            } else {
                AttemptOutcome::Retrying
            };
            finish_attempt(
                job,
                now,
                recorded_outcome,
                Some(error),
                Some(delay.as_millis() as u64),
            );
            warn!(
                "Job {} attempt {}/{} failed, retrying in {:?}: {}",
                job.id, job.attempt_count, policy.max_attempts, delay, error
            );
            return Ok(JobStatus::from(&*job));
        }

        job.completed_at = Some(now);
        job.eligible_after = None;
        finish_attempt(job, now, outcome, Some(error), None);
        let status = JobStatus::from(&*job);
        let target = job.target.clone();
        inner.unlink(&target, &lease.job_id);
        warn!(
            "Job {} for {} failed after {} attempt(s): {}",
            lease.job_id, target, status.attempt_count, error
        );
        Ok(status)
    }

    /// Persist `inner`, applying `undo` when the write fails
    async fn commit(&self, inner: &mut QueueInner, undo: Undo) -> Result<(), DeployerError> {
        if let Err(e) = self.persist(inner).await {
            undo.restore(inner);
            return Err(e);
        }
        Ok(())
    }

    async fn persist(&self, inner: &QueueInner) -> Result<(), DeployerError> {
        let Some(file) = &self.file else {
            return Ok(());
        };
        file.write_json_atomic(&inner.snapshot()).await.map_err(|e| {
            DeployerError::StorageError(format!(
                "unable to write job store {}: {}",
                file.path().display(),
                e
            ))
        })
    }
}

fn finish_attempt(
    job: &mut Job,
    now: chrono::DateTime<chrono::Utc>,
    outcome: AttemptOutcome,
    error: Option<&str>,
    retry_delay_ms: Option<u64>,
) {
    if let Some(record) = job.attempts.last_mut() {
        record.finished_at = Some(now);
        record.outcome = Some(outcome);
        record.error = error.map(str::to_string);
        record.retry_delay_ms = retry_delay_ms;
    }
}
