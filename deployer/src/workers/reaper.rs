//! Lease reaper
//!
//! Periodically reclaims jobs whose worker stopped heartbeating and evicts
//! finished jobs past the retention window.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::notify::{StatusEvent, StatusNotifier};
use crate::queue::JobQueue;

/// Reaper worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Time between sweeps
    pub interval: Duration,

    /// Finished jobs older than this are dropped
    pub retention: Option<Duration>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            retention: None,
        }
    }
}

/// Run the reaper worker
pub async fn run<S, F>(
    options: &Options,
    queue: Arc<JobQueue>,
    notifier: Arc<dyn StatusNotifier>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Reaper worker starting...");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Reaper worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }

        sweep(options, &queue, notifier.as_ref()).await;
    }
}

/// One reclaim and eviction pass
pub async fn sweep(options: &Options, queue: &JobQueue, notifier: &dyn StatusNotifier) {
    match queue.reclaim_expired().await {
        Ok(reclaimed) => {
            for status in &reclaimed {
                notifier.notify(&StatusEvent::from_status(status)).await;
            }
            if !reclaimed.is_empty() {
                info!("Reclaimed {} expired lease(s)", reclaimed.len());
            }
        }
        Err(e) => error!("Lease reclaim failed: {}", e),
    }

    if let Some(retention) = options.retention {
        match queue.evict_expired(retention).await {
            Ok(evicted) => debug!("Retention sweep evicted {} job(s)", evicted),
            Err(e) => error!("Retention sweep failed: {}", e),
        }
    }
}
