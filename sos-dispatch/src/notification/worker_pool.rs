//! Worker pool draining one dispatch lane.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::dispatcher::NotificationDispatcher;
use crate::domain::Lane;

/// Configuration for a worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Number of concurrent workers.
    pub workers: usize,
    /// Poll interval in milliseconds when no wake-up arrives.
    pub poll_interval_ms: u64,
}

impl WorkerPoolConfig {
    pub fn expedited() -> Self {
        Self {
            workers: 8,
            poll_interval_ms: 50,
        }
    }

    pub fn standard() -> Self {
        Self {
            workers: 2,
            poll_interval_ms: 250,
        }
    }
}

/// Workers of one lane.
///
/// Each worker waits for a wake-up (or the poll interval), then claims and
/// processes jobs until the lane is empty. A job is always processed to
/// completion; cancellation is only observed between jobs.
pub struct DispatchWorkerPool {
    lane: Lane,
    config: WorkerPoolConfig,
    /// Workers currently processing a job.
    active_workers: Arc<AtomicUsize>,
    cancellation_token: CancellationToken,
    tasks: parking_lot::Mutex<Option<JoinSet<()>>>,
}

impl DispatchWorkerPool {
    pub fn new(lane: Lane, config: WorkerPoolConfig) -> Self {
        Self {
            lane,
            config,
            active_workers: Arc::new(AtomicUsize::new(0)),
            cancellation_token: CancellationToken::new(),
            tasks: parking_lot::Mutex::new(Some(JoinSet::new())),
        }
    }

    /// Spawn the workers.
    pub fn start(&self, dispatcher: Arc<NotificationDispatcher>) {
        let lane = self.lane;
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);

        info!(
            "Starting {} worker pool with {} workers",
            lane, self.config.workers
        );

        let mut tasks = self.tasks.lock();
        let Some(join_set) = tasks.as_mut() else {
            return;
        };

        for i in 0..self.config.workers {
            let cancellation_token = self.cancellation_token.clone();
            let dispatcher = dispatcher.clone();
            let notifier = dispatcher.queue().notifier(lane);
            let active_workers = self.active_workers.clone();

            join_set.spawn(async move {
                debug!("{} worker {} started", lane, i);

                loop {
                    tokio::select! {
                        _ = cancellation_token.cancelled() => break,
                        _ = notifier.notified() => {}
                        _ = tokio::time::sleep(poll_interval) => {}
                    }

                    while !cancellation_token.is_cancelled() {
                        let job = match dispatcher.queue().dequeue(lane).await {
                            Ok(Some(job)) => job,
                            Ok(None) => break,
                            Err(e) => {
                                error!("{} worker {} failed to claim a job: {}", lane, i, e);
                                break;
                            }
                        };

                        let job_id = job.id.clone();
                        active_workers.fetch_add(1, Ordering::SeqCst);
                        let outcome = dispatcher.process(job).await;
                        active_workers.fetch_sub(1, Ordering::SeqCst);

                        match outcome {
                            Ok(outcome) => {
                                debug!("{} worker {} finished job {}: {:?}", lane, i, job_id, outcome)
                            }
                            Err(e) => {
                                error!("Error processing job {}: {}", job_id, e);
                                match dispatcher.recover_job(&job_id, &e).await {
                                    Ok(Some(outcome)) => {
                                        info!("Recovered job {} after error: {:?}", job_id, outcome)
                                    }
                                    Ok(None) => {}
                                    Err(e) => error!("Failed to recover job {}: {}", job_id, e),
                                }
                            }
                        }
                    }
                }

                debug!("{} worker {} shutting down", lane, i);
            });
        }
    }

    /// Stop the pool, waiting for in-flight jobs to finish.
    pub async fn stop(&self) {
        info!("Stopping {} worker pool", self.lane);
        self.cancellation_token.cancel();

        let join_set = {
            let mut tasks = self.tasks.lock();
            tasks.take()
        };

        if let Some(mut join_set) = join_set {
            while join_set.join_next().await.is_some() {}
        }

        info!("{} worker pool stopped", self.lane);
    }

    pub fn active_count(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }

    pub fn lane(&self) -> Lane {
        self.lane
    }

    pub fn worker_count(&self) -> usize {
        self.config.workers
    }

    pub fn is_running(&self) -> bool {
        !self.cancellation_token.is_cancelled()
    }
}
