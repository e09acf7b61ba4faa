//! Notification dispatcher.
//!
//! Turns an activated emergency into one job per contact, then drives each
//! claimed job to a terminal outcome:
//!
//! 1. re-check that the emergency is still ACTIVE, then send through the
//!    channel's sender (bounded by the send timeout)
//! 2. on failure ask the [`RetryPolicyResolver`] whether to retry the same job
//! 3. only once it says stop, run the separate fallback step which may
//!    enqueue a new job on the next channel
//!
//! Batch counters are updated additively and never read back here.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::channels::{ErrorClass, SendResult, SenderRegistry};
use super::contacts::ContactDirectory;
use super::job::{JobStatus, NotificationJob};
use super::queue::NotificationQueue;
use super::retry::{RetryDecision, RetryPolicyResolver, StopReason};
use super::template::TemplateFields;
use crate::database::models::{BatchStatsDelta, NotificationBatchDbModel};
use crate::database::repositories::{BatchRepository, EmergencyRepository};
use crate::domain::{Channel, Emergency, EmergencyStatus, Lane};
use crate::{Error, Result};

/// Name used in alerts when the directory has none for the user.
const FALLBACK_DISPLAY_NAME: &str = "Your contact";

/// Dispatcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Upper bound on a single sender call.
    pub send_timeout_secs: u64,
    /// Base of the deep link put in every message.
    pub deep_link_base: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            send_timeout_secs: 30,
            deep_link_base: "sosapp://emergency".to_string(),
        }
    }
}

/// Result of fanning out one emergency.
#[derive(Debug, Clone)]
pub struct DispatchSummary {
    pub batch_id: String,
    pub jobs: Vec<NotificationJob>,
    /// Contacts skipped because they have no usable address.
    pub skipped_contacts: Vec<String>,
}

/// What happened to one claimed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Sent { message_id: Option<String> },
    RetryScheduled { delay: Duration },
    FallbackQueued { job_id: String, channel: Channel },
    Failed { reason: StopReason },
    /// The emergency ended after the job was claimed; nothing was sent.
    Cancelled,
}

/// Dispatcher statistics snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherStats {
    pub expedited_depth: usize,
    pub standard_depth: usize,
    pub scheduled_retries: usize,
    pub sent: u64,
    pub failed: u64,
    pub retried: u64,
    pub fallbacks: u64,
    pub delivered: u64,
}

#[derive(Default)]
struct Counters {
    sent: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    fallbacks: AtomicU64,
    delivered: AtomicU64,
}

/// The notification dispatcher.
pub struct NotificationDispatcher {
    queue: Arc<NotificationQueue>,
    batches: Arc<dyn BatchRepository>,
    emergencies: Arc<dyn EmergencyRepository>,
    contacts: Arc<dyn ContactDirectory>,
    senders: SenderRegistry,
    resolver: RetryPolicyResolver,
    config: DispatcherConfig,
    counters: Counters,
}

impl NotificationDispatcher {
    pub fn new(
        queue: Arc<NotificationQueue>,
        batches: Arc<dyn BatchRepository>,
        emergencies: Arc<dyn EmergencyRepository>,
        contacts: Arc<dyn ContactDirectory>,
        senders: SenderRegistry,
        resolver: RetryPolicyResolver,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            queue,
            batches,
            emergencies,
            contacts,
            senders,
            resolver,
            config,
            counters: Counters::default(),
        }
    }

    pub fn queue(&self) -> &Arc<NotificationQueue> {
        &self.queue
    }

    /// Create and enqueue one job per reachable contact of an ACTIVE emergency.
    pub async fn dispatch_emergency(&self, emergency: &Emergency) -> Result<DispatchSummary> {
        if !emergency.is_active() {
            return Err(Error::validation(format!(
                "emergency {} is {}, only ACTIVE emergencies are dispatched",
                emergency.id, emergency.status
            )));
        }

        let contacts = self.contacts.emergency_contacts(&emergency.user_id).await?;
        let user_name = self
            .contacts
            .display_name(&emergency.user_id)
            .await?
            .unwrap_or_else(|| FALLBACK_DISPLAY_NAME.to_string());
        let template =
            TemplateFields::for_emergency(emergency, &user_name, &self.config.deep_link_base);
        let priority = emergency.emergency_type.priority();

        let mut skipped_contacts = Vec::new();
        let mut pending = Vec::with_capacity(contacts.len());
        for contact in contacts {
            match contact.contact.primary_channel() {
                Some(channel) => pending.push((contact, channel)),
                None => {
                    warn!(
                        emergency_id = %emergency.id,
                        contact_id = %contact.id,
                        "Contact has no usable address, skipping"
                    );
                    skipped_contacts.push(contact.id);
                }
            }
        }

        let batch = NotificationBatchDbModel::new(&emergency.id, pending.len() as i64);
        self.batches.create_batch(&batch).await?;

        let jobs: Vec<NotificationJob> = pending
            .into_iter()
            .map(|(contact, channel)| {
                NotificationJob::new(
                    &batch.id,
                    &emergency.id,
                    contact.id,
                    contact.name,
                    channel,
                    priority,
                    template.clone(),
                    contact.contact,
                )
            })
            .collect();

        try_join_all(jobs.iter().map(|job| self.queue.enqueue(job.clone()))).await?;

        info!(
            emergency_id = %emergency.id,
            batch_id = %batch.id,
            jobs = jobs.len(),
            skipped = skipped_contacts.len(),
            %priority,
            lane = %priority.lane(),
            "Dispatched emergency notifications"
        );

        Ok(DispatchSummary {
            batch_id: batch.id,
            jobs,
            skipped_contacts,
        })
    }

    /// Drive one claimed job to its outcome for this attempt.
    pub async fn process(&self, job: NotificationJob) -> Result<JobOutcome> {
        if let Err(e) = job.validate() {
            warn!(job_id = %job.id, error = %e, "Dropping malformed job");
            self.queue
                .repository()
                .mark_failed(&job.id, &e.to_string(), ErrorClass::Permanent)
                .await?;
            return self.finish_failed(&job, StopReason::Permanent).await;
        }

        let emergency = self.emergencies.get_by_id(&job.emergency_id).await?;
        if !emergency.is_active() {
            return self.cancel_claimed(&job, emergency.status).await;
        }

        let result = self.send(&job).await;

        if result.success {
            self.queue
                .repository()
                .mark_sent(&job.id, result.message_id.as_deref())
                .await?;
            self.batches
                .update_batch_stats(&job.batch_id, BatchStatsDelta::sent())
                .await?;
            self.counters.sent.fetch_add(1, Ordering::Relaxed);
            debug!(job_id = %job.id, channel = %job.channel, "Notification sent");
            return Ok(JobOutcome::Sent {
                message_id: result.message_id,
            });
        }

        let class = result
            .effective_error_class()
            .unwrap_or(ErrorClass::Retryable);
        let error = result
            .error
            .unwrap_or_else(|| "delivery failed".to_string());
        self.handle_failure(&job, &error, class).await
    }

    async fn handle_failure(
        &self,
        job: &NotificationJob,
        error: &str,
        class: ErrorClass,
    ) -> Result<JobOutcome> {
        match self.resolver.decide(job.channel, job.attempts, Some(class)) {
            RetryDecision::Retry { delay } => {
                warn!(
                    job_id = %job.id,
                    channel = %job.channel,
                    attempt = job.attempts,
                    ?delay,
                    error = %error,
                    "Delivery failed, retry scheduled"
                );
                self.queue.schedule_retry(job, delay, error, class).await?;
                self.counters.retried.fetch_add(1, Ordering::Relaxed);
                Ok(JobOutcome::RetryScheduled { delay })
            }
            RetryDecision::Stop { reason } => {
                warn!(
                    job_id = %job.id,
                    channel = %job.channel,
                    attempt = job.attempts,
                    %reason,
                    error = %error,
                    "Delivery failed, no more retries on this channel"
                );
                self.queue
                    .repository()
                    .mark_failed(&job.id, error, class)
                    .await?;

                if let Some(fallback) = self.fallback(job).await? {
                    return Ok(JobOutcome::FallbackQueued {
                        job_id: fallback.id,
                        channel: fallback.channel,
                    });
                }
                self.finish_failed(job, reason).await
            }
        }
    }

    /// Settle a job whose `process` call returned an error so it does not
    /// sit in PROCESSING until the next restart.
    ///
    /// A job still PROCESSING is treated as a retryable delivery failure.
    /// A job already FAILED had its fallback or batch update cut short and is
    /// counted as failed. Any other status means the job was already settled.
    pub async fn recover_job(&self, job_id: &str, error: &Error) -> Result<Option<JobOutcome>> {
        let job = self.queue.repository().get(job_id).await?;
        match job.status {
            JobStatus::Processing => {
                let outcome = self
                    .handle_failure(&job, &error.to_string(), ErrorClass::Retryable)
                    .await?;
                Ok(Some(outcome))
            }
            JobStatus::Failed => Ok(Some(self.finish_failed(&job, StopReason::Permanent).await?)),
            _ => Ok(None),
        }
    }

    async fn cancel_claimed(
        &self,
        job: &NotificationJob,
        status: EmergencyStatus,
    ) -> Result<JobOutcome> {
        if self.queue.repository().cancel_claimed(&job.id).await? {
            self.batches
                .update_batch_stats(&job.batch_id, BatchStatsDelta::cancelled())
                .await?;
        }
        info!(
            job_id = %job.id,
            emergency_id = %job.emergency_id,
            %status,
            "Emergency no longer active, claimed job cancelled"
        );
        Ok(JobOutcome::Cancelled)
    }

    async fn send(&self, job: &NotificationJob) -> SendResult {
        let Some(sender) = self.senders.get(job.channel) else {
            return SendResult::permanent(format!("no sender registered for {}", job.channel));
        };
        let message = job.template.render(job.channel);
        let timeout = Duration::from_secs(self.config.send_timeout_secs);

        match tokio::time::timeout(timeout, sender.send(job, &message)).await {
            Ok(result) => result,
            Err(_) => SendResult::retryable(format!(
                "{} did not answer within {:?}",
                sender.name(),
                timeout
            )),
        }
    }

    /// Enqueue a job on the next channel if the contact has an address for it
    /// and the emergency is still ACTIVE.
    async fn fallback(&self, job: &NotificationJob) -> Result<Option<NotificationJob>> {
        let Some(next) = job.contact.fallback_after(job.channel) else {
            return Ok(None);
        };

        let emergency = self.emergencies.get_by_id(&job.emergency_id).await?;
        if !emergency.is_active() {
            debug!(
                job_id = %job.id,
                status = %emergency.status,
                "Emergency no longer active, no fallback"
            );
            return Ok(None);
        }

        let fallback = job.fallback_to(next);
        self.queue.enqueue(fallback.clone()).await?;
        self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
        info!(
            job_id = %job.id,
            fallback_job_id = %fallback.id,
            from = %job.channel,
            to = %next,
            "Falling back to next channel"
        );
        Ok(Some(fallback))
    }

    async fn finish_failed(&self, job: &NotificationJob, reason: StopReason) -> Result<JobOutcome> {
        self.batches
            .update_batch_stats(&job.batch_id, BatchStatsDelta::failed())
            .await?;
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        Ok(JobOutcome::Failed { reason })
    }

    /// Record a provider delivery confirmation. Returns false if the job was
    /// not in SENT (unknown, already confirmed or never sent).
    pub async fn confirm_delivery(&self, job_id: &str) -> Result<bool> {
        let job = self.queue.repository().get(job_id).await?;
        if !self.queue.repository().mark_delivered(job_id).await? {
            return Ok(false);
        }
        self.batches
            .update_batch_stats(&job.batch_id, BatchStatsDelta::delivered())
            .await?;
        self.counters.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    /// Cancel the unclaimed jobs of an emergency and release their pending counts.
    pub async fn cancel_for_emergency(&self, emergency_id: &str) -> Result<usize> {
        let cancelled = self.queue.cancel_for_emergency(emergency_id).await?;
        for job in &cancelled {
            self.batches
                .update_batch_stats(&job.batch_id, BatchStatsDelta::cancelled())
                .await?;
        }
        Ok(cancelled.len())
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            expedited_depth: self.queue.depth(Lane::Expedited),
            standard_depth: self.queue.depth(Lane::Standard),
            scheduled_retries: self.queue.scheduled_retry_count(),
            sent: self.counters.sent.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            retried: self.counters.retried.load(Ordering::Relaxed),
            fallbacks: self.counters.fallbacks.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
        }
    }
}
