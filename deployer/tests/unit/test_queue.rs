//! Job queue tests

use std::sync::Arc;
use std::time::Duration;

use tokio_test::{assert_err, assert_ok};

use deployer::config::{Config, DeploymentTarget, RetryPolicy};
use deployer::errors::DeployerError;
use deployer::filesys::file::File;
use deployer::queue::{
    AttemptOutcome, JobId, JobQueue, JobState, ManualClock, TriggerSource,
};

fn target(name: &str, max_attempts: u32, backoff_base_secs: u64) -> DeploymentTarget {
    let mut target = DeploymentTarget::new(name, "app:*");
    target.retry = RetryPolicy {
        max_attempts,
        backoff_base: Duration::from_secs(backoff_base_secs),
        backoff_max: Duration::from_secs(60),
    };
    target
}

fn config(targets: Vec<DeploymentTarget>) -> Arc<Config> {
    Arc::new(Config::with_targets(targets).unwrap())
}

fn queue_with(targets: Vec<DeploymentTarget>) -> (JobQueue, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    (JobQueue::in_memory(config(targets), clock.clone()), clock)
}

fn default_queue() -> (JobQueue, Arc<ManualClock>) {
    queue_with(vec![target("staging", 3, 10), target("prod", 3, 10)])
}

async fn enqueue(queue: &JobQueue, target: &str, image_ref: &str) -> JobId {
    queue
        .enqueue(target, image_ref, TriggerSource::default())
        .await
        .unwrap()
        .job_id
}

#[tokio::test]
async fn test_same_target_is_fifo_and_exclusive() {
    let (queue, _) = default_queue();
    let first = enqueue(&queue, "staging", "app:1").await;
    let second = enqueue(&queue, "staging", "app:2").await;
    let other = enqueue(&queue, "prod", "app:1").await;

    let a = queue.lease("w1").await.unwrap().unwrap();
    assert_eq!(a.job.id, first);

    // staging is busy, so the next lease goes to prod
    let b = queue.lease("w2").await.unwrap().unwrap();
    assert_eq!(b.job.id, other);

    assert!(queue.lease("w3").await.unwrap().is_none());

    assert_ok!(queue.complete(&a.lease).await);
    let c = queue.lease("w3").await.unwrap().unwrap();
    assert_eq!(c.job.id, second);
    assert_eq!(c.lease.attempt, 1);
}

#[tokio::test]
async fn test_lease_prefers_earliest_submission() {
    let (queue, _) = default_queue();
    let prod = enqueue(&queue, "prod", "app:1").await;
    let staging = enqueue(&queue, "staging", "app:1").await;

    assert_eq!(queue.lease("w1").await.unwrap().unwrap().job.id, prod);
    assert_eq!(queue.lease("w2").await.unwrap().unwrap().job.id, staging);
}

#[tokio::test]
async fn test_duplicate_trigger_returns_same_job() {
    let (queue, _) = default_queue();
    let first = queue
        .enqueue("prod", "app:2.0", TriggerSource::default())
        .await
        .unwrap();
    let leased = queue.lease("w1").await.unwrap().unwrap();

    // still deduplicated while running
    let second = queue
        .enqueue("prod", "app:2.0", TriggerSource::default())
        .await
        .unwrap();
    assert_eq!(first.job_id, second.job_id);
    assert!(second.deduplicated);
    assert_eq!(leased.job.id, first.job_id);

    // a different image is a new job
    let third = enqueue(&queue, "prod", "app:2.1").await;
    assert_ne!(third, first.job_id);
}

#[tokio::test]
async fn test_unknown_target_is_rejected() {
    let (queue, _) = default_queue();
    let err = queue
        .enqueue("Staging", "app:1", TriggerSource::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DeployerError::UnknownTarget(_)));
    assert!(queue.lease("w1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_retryable_failures_back_off_until_exhausted() {
    let (queue, clock) = default_queue();
    let job_id = enqueue(&queue, "staging", "app:bad").await;

    let mut delays = Vec::new();
    for attempt in 1..=3u32 {
        let leased = queue.lease("w1").await.unwrap().unwrap();
        assert_eq!(leased.lease.attempt, attempt);

        let status = queue
            .fail(&leased.lease, "health check failed", true)
            .await
            .unwrap();
        assert_eq!(status.attempt_count, attempt);

        if attempt < 3 {
            assert_eq!(status.state, JobState::Pending);
            let delay = status.attempts.last().unwrap().retry_delay_ms.unwrap();
            delays.push(delay);

            // not eligible before the backoff elapses
            assert!(queue.lease("w1").await.unwrap().is_none());
            clock.advance(Duration::from_millis(delay));
        } else {
            assert_eq!(status.state, JobState::Failed);
        }
    }

    assert_eq!(delays, vec![10_000, 20_000]);
    assert!(delays.windows(2).all(|w| w[0] <= w[1]));

    let status = queue.status(&job_id).await.unwrap();
    assert_eq!(status.state, JobState::Failed);
    assert_eq!(status.attempts.len(), 3);
    assert_eq!(status.last_error.as_deref(), Some("health check failed"));
    assert!(status.completed_at.is_some());
}

#[tokio::test]
async fn test_non_retryable_failure_is_terminal() {
    let (queue, _) = default_queue();
    let job_id = enqueue(&queue, "staging", "app:missing").await;
    let leased = queue.lease("w1").await.unwrap().unwrap();

    let status = queue
        .fail(&leased.lease, "manifest unknown", false)
        .await
        .unwrap();
    assert_eq!(status.state, JobState::Failed);
    assert_eq!(status.attempt_count, 1);
    assert_eq!(
        status.attempts[0].outcome,
        Some(AttemptOutcome::Failed)
    );
    assert!(queue.lease("w1").await.unwrap().is_none());
    assert_eq!(queue.status(&job_id).await.unwrap().state, JobState::Failed);
}

#[tokio::test]
async fn test_backing_off_job_blocks_its_target() {
    let (queue, clock) = default_queue();
    let first = enqueue(&queue, "staging", "app:1").await;
    enqueue(&queue, "staging", "app:2").await;

    let leased = queue.lease("w1").await.unwrap().unwrap();
    queue.fail(&leased.lease, "timeout", true).await.unwrap();

    assert!(queue.lease("w2").await.unwrap().is_none());

    clock.advance(Duration::from_secs(10));
    let retried = queue.lease("w2").await.unwrap().unwrap();
    assert_eq!(retried.job.id, first);
    assert_eq!(retried.lease.attempt, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_leases_grant_a_job_once() {
    let (queue, _) = default_queue();
    let queue = Arc::new(queue);
    let job_id = enqueue(&queue, "staging", "app:1").await;

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let queue = queue.clone();
            tokio::spawn(async move { queue.lease(&format!("w{}", i)).await.unwrap() })
        })
        .collect();

    let mut granted = Vec::new();
    for handle in handles {
        if let Some(leased) = handle.await.unwrap() {
            granted.push(leased);
        }
    }
    assert_eq!(granted.len(), 1);
    assert_eq!(granted[0].job.id, job_id);

    let status = queue.status(&job_id).await.unwrap();
    assert_eq!(status.leased_by.as_deref(), Some(granted[0].lease.worker_id.as_str()));
    assert_eq!(status.attempts.len(), 1);
}

#[tokio::test]
async fn test_expired_lease_is_reclaimed_by_another_worker() {
    let (queue, clock) = queue_with(vec![target("staging", 3, 0)]);
    let job_id = enqueue(&queue, "staging", "app:1").await;
    let stale = queue.lease("w1").await.unwrap().unwrap();

    // heartbeats keep the lease alive
    clock.advance(Duration::from_secs(40));
    assert_ok!(queue.heartbeat(&stale.lease).await);
    clock.advance(Duration::from_secs(40));
    assert!(queue.reclaim_expired().await.unwrap().is_empty());

    clock.advance(Duration::from_secs(61));
    let reclaimed = queue.reclaim_expired().await.unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].state, JobState::Pending);
    assert_eq!(reclaimed[0].attempt_count, 1);
    assert_eq!(
        reclaimed[0].attempts[0].outcome,
        Some(AttemptOutcome::Reclaimed)
    );
    assert!(reclaimed[0].notes[0].contains("reclaimed from w1"));

    let fresh = queue.lease("w2").await.unwrap().unwrap();
    assert_eq!(fresh.job.id, job_id);
    assert_eq!(fresh.lease.attempt, 2);

    let err = assert_err!(queue.heartbeat(&stale.lease).await);
    assert!(matches!(err, DeployerError::LeaseExpired(_)));
    assert_ok!(queue.heartbeat(&fresh.lease).await);
}

#[tokio::test]
async fn test_reclaim_exhausts_attempts() {
    let (queue, clock) = queue_with(vec![target("staging", 1, 0)]);
    let job_id = enqueue(&queue, "staging", "app:1").await;
    queue.lease("w1").await.unwrap().unwrap();

    clock.advance(Duration::from_secs(120));
    let reclaimed = queue.reclaim_expired().await.unwrap();
    assert_eq!(reclaimed[0].state, JobState::Failed);
    assert_eq!(queue.status(&job_id).await.unwrap().attempt_count, 1);
}

#[tokio::test]
async fn test_terminal_jobs_never_transition() {
    let (queue, _) = default_queue();
    let job_id = enqueue(&queue, "staging", "app:1").await;
    let leased = queue.lease("w1").await.unwrap().unwrap();

    let status = queue.complete(&leased.lease).await.unwrap();
    assert_eq!(status.state, JobState::Succeeded);
    assert_eq!(status.attempt_count, 1);

    assert!(matches!(
        queue.complete(&leased.lease).await,
        Err(DeployerError::LeaseExpired(_))
    ));
    assert!(matches!(
        queue.fail(&leased.lease, "late", true).await,
        Err(DeployerError::LeaseExpired(_))
    ));
    assert!(queue.add_note(&leased.lease, "late").await.is_err());

    let status = queue.status(&job_id).await.unwrap();
    assert_eq!(status.state, JobState::Succeeded);
    assert!(status.last_error.is_none());
}

#[tokio::test]
async fn test_unknown_job_status() {
    let (queue, _) = default_queue();
    assert!(matches!(
        queue.status(&JobId::new()).await,
        Err(DeployerError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_eviction_only_drops_old_terminal_jobs() {
    let (queue, clock) = default_queue();
    let done = enqueue(&queue, "staging", "app:1").await;
    let leased = queue.lease("w1").await.unwrap().unwrap();
    queue.complete(&leased.lease).await.unwrap();
    let waiting = enqueue(&queue, "prod", "app:1").await;

    clock.advance(Duration::from_secs(3600));
    assert_eq!(queue.evict_expired(Duration::from_secs(600)).await.unwrap(), 1);

    assert!(queue.status(&done).await.is_err());
    assert_eq!(queue.status(&waiting).await.unwrap().state, JobState::Pending);
}

#[tokio::test]
async fn test_queue_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("jobs.json");
    let clock = Arc::new(ManualClock::default());
    let targets = || vec![target("staging", 3, 10), target("prod", 3, 10)];

    let (done, waiting, running) = {
        let queue = JobQueue::open(config(targets()), File::new(&path), clock.clone())
            .await
            .unwrap();
        let done = enqueue(&queue, "staging", "app:1").await;
        let running = enqueue(&queue, "prod", "app:1").await;
        let waiting = enqueue(&queue, "staging", "app:2").await;

        let leased = queue.lease("w1").await.unwrap().unwrap();
        queue.complete(&leased.lease).await.unwrap();
        queue.lease("w1").await.unwrap().unwrap();
        (done, waiting, running)
    };

    let queue = JobQueue::open(config(targets()), File::new(&path), clock.clone())
        .await
        .unwrap();
    assert_eq!(queue.status(&done).await.unwrap().state, JobState::Succeeded);
    assert_eq!(queue.status(&waiting).await.unwrap().state, JobState::Pending);
    assert_eq!(queue.status(&running).await.unwrap().state, JobState::Running);

    // the running job keeps prod busy until its lease expires
    let next = queue.lease("w2").await.unwrap().unwrap();
    assert_eq!(next.job.id, waiting);
    assert!(queue.lease("w3").await.unwrap().is_none());
    queue.complete(&next.lease).await.unwrap();

    clock.advance(Duration::from_secs(61));
    assert_eq!(queue.reclaim_expired().await.unwrap().len(), 1);
    clock.advance(Duration::from_secs(10));
    let retried = queue.lease("w3").await.unwrap().unwrap();
    assert_eq!(retried.job.id, running);
    assert_eq!(retried.lease.attempt, 2);
}

#[tokio::test]
async fn test_reopen_fails_jobs_of_removed_targets() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("jobs.json");
    let clock = Arc::new(ManualClock::default());

    let orphan = {
        let queue = JobQueue::open(
            config(vec![target("staging", 3, 10), target("legacy", 3, 10)]),
            File::new(&path),
            clock.clone(),
        )
        .await
        .unwrap();
        enqueue(&queue, "legacy", "app:1").await
    };

    let queue = JobQueue::open(
        config(vec![target("staging", 3, 10)]),
        File::new(&path),
        clock.clone(),
    )
    .await
    .unwrap();
    let status = queue.status(&orphan).await.unwrap();
    assert_eq!(status.state, JobState::Failed);
    assert!(status.last_error.unwrap().contains("no longer configured"));
}
