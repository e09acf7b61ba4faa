//! Lane-aware notification job queue.
//!
//! Jobs live in SQLite; this type adds the in-process signalling on top: a
//! `Notify` per lane to wake idle workers, an approximate depth counter and
//! the delayed requeue used for retries. A retry delay only parks a small
//! spawned task, never a worker.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Notify;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::channels::ErrorClass;
use super::job::{CancelledJob, JobStatus, NotificationJob};
use crate::Result;
use crate::database::repositories::NotificationJobRepository;
use crate::domain::Lane;

/// Bounds of the wait before a failed requeue is attempted again.
const REQUEUE_RETRY_MIN: Duration = Duration::from_millis(100);
const REQUEUE_RETRY_MAX: Duration = Duration::from_secs(5);

struct LaneState {
    notify: Arc<Notify>,
    depth: AtomicUsize,
}

impl LaneState {
    fn new() -> Self {
        Self {
            notify: Arc::new(Notify::new()),
            depth: AtomicUsize::new(0),
        }
    }

    fn increment(&self) {
        self.depth.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_one();
    }

    fn decrement(&self) {
        let _ = self
            .depth
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| d.checked_sub(1));
    }
}

/// The notification job queue.
pub struct NotificationQueue {
    repository: Arc<dyn NotificationJobRepository>,
    expedited: Arc<LaneState>,
    standard: Arc<LaneState>,
    /// Cancellation tokens of pending delayed requeues, by job id.
    scheduled_retries: Arc<DashMap<String, CancellationToken>>,
    cancellation_token: CancellationToken,
}

impl NotificationQueue {
    pub fn new(repository: Arc<dyn NotificationJobRepository>) -> Self {
        Self {
            repository,
            expedited: Arc::new(LaneState::new()),
            standard: Arc::new(LaneState::new()),
            scheduled_retries: Arc::new(DashMap::new()),
            cancellation_token: CancellationToken::new(),
        }
    }

    fn lane(&self, lane: Lane) -> &Arc<LaneState> {
        match lane {
            Lane::Expedited => &self.expedited,
            Lane::Standard => &self.standard,
        }
    }

    pub fn repository(&self) -> &Arc<dyn NotificationJobRepository> {
        &self.repository
    }

    /// Persist a job and wake a worker of its lane.
    pub async fn enqueue(&self, job: NotificationJob) -> Result<()> {
        self.repository.insert(&job).await?;
        self.lane(job.lane()).increment();
        debug!(
            job_id = %job.id,
            channel = %job.channel,
            lane = %job.lane(),
            "Enqueued notification job"
        );
        Ok(())
    }

    /// Claim the next job of `lane`, if any.
    pub async fn dequeue(&self, lane: Lane) -> Result<Option<NotificationJob>> {
        let job = self.repository.claim_next(lane).await?;
        if job.is_some() {
            self.lane(lane).decrement();
        }
        Ok(job)
    }

    /// Mark a failed job RETRY_SCHEDULED and requeue it after `delay`.
    pub async fn schedule_retry(
        &self,
        job: &NotificationJob,
        delay: Duration,
        error: &str,
        class: ErrorClass,
    ) -> Result<()> {
        self.repository
            .mark_retry_scheduled(&job.id, error, class)
            .await?;

        let token = self.cancellation_token.child_token();
        self.scheduled_retries.insert(job.id.clone(), token.clone());
        Self::spawn_requeue_detached(
            job.id.clone(),
            delay,
            token,
            self.repository.clone(),
            self.lane(job.lane()).clone(),
            self.scheduled_retries.clone(),
        );
        Ok(())
    }

    fn spawn_requeue_detached(
        job_id: String,
        delay: Duration,
        token: CancellationToken,
        repository: Arc<dyn NotificationJobRepository>,
        lane: Arc<LaneState>,
        scheduled_retries: Arc<DashMap<String, CancellationToken>>,
    ) {
        debug!(job_id = %job_id, ?delay, "Scheduling job requeue");

        tokio::spawn(async move {
            let mut wait = delay;
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        scheduled_retries.remove(&job_id);
                        return;
                    }
                    _ = sleep(wait) => {}
                }
                scheduled_retries.remove(&job_id);

                match repository.requeue(&job_id).await {
                    Ok(true) => {
                        lane.increment();
                        return;
                    }
                    Ok(false) => {
                        debug!(job_id = %job_id, "Job left RETRY_SCHEDULED before requeue");
                        return;
                    }
                    Err(e) => {
                        // The job is still RETRY_SCHEDULED and nothing else would
                        // requeue it before a restart.
                        wait = (wait * 2).clamp(REQUEUE_RETRY_MIN, REQUEUE_RETRY_MAX);
                        warn!(job_id = %job_id, error = %e, retry_in = ?wait, "Failed to requeue job");
                        scheduled_retries.insert(job_id.clone(), token.clone());
                    }
                }
            }
        });
    }

    /// Cancel every unclaimed job of an emergency. Claimed jobs are left to
    /// the dispatcher, which re-checks the emergency before sending.
    pub async fn cancel_for_emergency(&self, emergency_id: &str) -> Result<Vec<NotificationJob>> {
        let cancelled = self.repository.cancel_for_emergency(emergency_id).await?;
        for CancelledJob { job, previous } in &cancelled {
            if let Some((_, token)) = self.scheduled_retries.remove(&job.id) {
                token.cancel();
            }
            // Only PENDING jobs are counted in the lane depth.
            if *previous == JobStatus::Pending {
                self.lane(job.lane()).decrement();
            }
        }
        if !cancelled.is_empty() {
            info!(
                emergency_id,
                count = cancelled.len(),
                "Cancelled queued notification jobs"
            );
        }
        Ok(cancelled.into_iter().map(|c| c.job).collect())
    }

    /// Reset jobs interrupted by a previous shutdown and resync lane depths.
    pub async fn recover_interrupted(&self) -> Result<u64> {
        let reset = self.repository.reset_interrupted().await?;
        for lane in Lane::ALL {
            let pending = self
                .repository
                .count_by_status(lane, JobStatus::Pending)
                .await?;
            let state = self.lane(lane);
            state
                .depth
                .store(usize::try_from(pending).unwrap_or(0), Ordering::SeqCst);
            if pending > 0 {
                state.notify.notify_waiters();
            }
        }
        if reset > 0 {
            info!(count = reset, "Recovered interrupted notification jobs");
        }
        Ok(reset)
    }

    /// Wakes workers of `lane` when a job becomes available.
    pub fn notifier(&self, lane: Lane) -> Arc<Notify> {
        self.lane(lane).notify.clone()
    }

    /// Approximate number of claimable jobs in `lane`.
    pub fn depth(&self, lane: Lane) -> usize {
        self.lane(lane).depth.load(Ordering::SeqCst)
    }

    pub fn scheduled_retry_count(&self) -> usize {
        self.scheduled_retries.len()
    }

    /// Stop all pending delayed requeues. Their jobs stay RETRY_SCHEDULED
    /// and are picked up by `recover_interrupted` on the next start.
    pub fn shutdown(&self) {
        self.cancellation_token.cancel();
    }
}
