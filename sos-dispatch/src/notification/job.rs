//! Notification job model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::channels::ErrorClass;
use super::template::TemplateFields;
use crate::domain::{Channel, ContactInfo, Lane, Priority};
use crate::{Error, Result};

/// Lifecycle of a single delivery attempt unit.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Waiting in its lane.
    Pending,
    /// Claimed by a worker.
    Processing,
    /// Failed, waiting for its delayed requeue.
    RetryScheduled,
    Sent,
    /// Provider confirmed delivery.
    Delivered,
    /// No more retries on this channel.
    Failed,
    /// Removed before being sent.
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::RetryScheduled => "RETRY_SCHEDULED",
            Self::Sent => "SENT",
            Self::Delivered => "DELIVERED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "PROCESSING" => Some(Self::Processing),
            "RETRY_SCHEDULED" => Some(Self::RetryScheduled),
            "SENT" => Some(Self::Sent),
            "DELIVERED" => Some(Self::Delivered),
            "FAILED" => Some(Self::Failed),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// The job has left the queue.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Sent | Self::Delivered | Self::Failed | Self::Cancelled
        )
    }
}

/// A job removed by an emergency-wide cancel, with the status it had.
#[derive(Debug, Clone)]
pub struct CancelledJob {
    pub job: NotificationJob,
    pub previous: JobStatus,
}

/// One delivery attempt unit for one contact on one channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationJob {
    pub id: String,
    /// Fan-out this job belongs to.
    pub batch_id: String,
    pub emergency_id: String,
    pub recipient_id: String,
    pub recipient_name: String,
    pub channel: Channel,
    pub priority: Priority,
    pub status: JobStatus,
    /// Attempts made so far, incremented by the queue on every claim.
    pub attempts: u32,
    pub template: TemplateFields,
    /// Contact snapshot; the fallback step reads the next channel's address from it.
    pub contact: ContactInfo,
    /// Job whose exhaustion produced this fallback job.
    pub parent_job_id: Option<String>,
    pub message_id: Option<String>,
    pub last_error: Option<String>,
    pub error_class: Option<ErrorClass>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationJob {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        batch_id: impl Into<String>,
        emergency_id: impl Into<String>,
        recipient_id: impl Into<String>,
        recipient_name: impl Into<String>,
        channel: Channel,
        priority: Priority,
        template: TemplateFields,
        contact: ContactInfo,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            batch_id: batch_id.into(),
            emergency_id: emergency_id.into(),
            recipient_id: recipient_id.into(),
            recipient_name: recipient_name.into(),
            channel,
            priority,
            status: JobStatus::Pending,
            attempts: 0,
            template,
            contact,
            parent_job_id: None,
            message_id: None,
            last_error: None,
            error_class: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn lane(&self) -> Lane {
        self.priority.lane()
    }

    /// Address for this job's channel.
    pub fn destination(&self) -> Option<&str> {
        self.contact.destination_for(self.channel)
    }

    pub fn validate(&self) -> Result<()> {
        if self.emergency_id.is_empty() || self.recipient_id.is_empty() {
            return Err(Error::MalformedJob(format!(
                "job {} is missing its emergency or recipient",
                self.id
            )));
        }
        if self.destination().is_none() {
            return Err(Error::MalformedJob(format!(
                "job {} has no {} destination for recipient {}",
                self.id, self.channel, self.recipient_id
            )));
        }
        Ok(())
    }

    /// Fresh job for the same recipient on `channel`, priority preserved.
    pub fn fallback_to(&self, channel: Channel) -> NotificationJob {
        let mut job = NotificationJob::new(
            self.batch_id.clone(),
            self.emergency_id.clone(),
            self.recipient_id.clone(),
            self.recipient_name.clone(),
            channel,
            self.priority,
            self.template.clone(),
            self.contact.clone(),
        );
        job.parent_job_id = Some(self.id.clone());
        job
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> TemplateFields {
        TemplateFields {
            user_name: "Dana".into(),
            emergency_type: "Fire".into(),
            location_text: "here".into(),
            deep_link: "sosapp://emergency/e1".into(),
        }
    }

    #[test]
    fn test_validate_requires_channel_destination() {
        let contact = ContactInfo::default().with_phone("+15550100");
        let job = NotificationJob::new(
            "b1", "e1", "c1", "Alex", Channel::Push, Priority::High, template(), contact.clone(),
        );
        assert!(matches!(job.validate(), Err(Error::MalformedJob(_))));

        let job = NotificationJob::new(
            "b1", "e1", "c1", "Alex", Channel::Sms, Priority::High, template(), contact,
        );
        assert!(job.validate().is_ok());
        assert_eq!(job.lane(), Lane::Expedited);
    }

    #[test]
    fn test_fallback_preserves_recipient_and_priority() {
        let contact = ContactInfo::default()
            .with_push_token("tok")
            .with_phone("+15550100");
        let mut job = NotificationJob::new(
            "b1", "e1", "c1", "Alex", Channel::Push, Priority::Emergency, template(), contact,
        );
        job.attempts = 3;

        let next = job.fallback_to(Channel::Sms);
        assert_ne!(next.id, job.id);
        assert_eq!(next.channel, Channel::Sms);
        assert_eq!(next.priority, Priority::Emergency);
        assert_eq!(next.recipient_id, "c1");
        assert_eq!(next.batch_id, "b1");
        assert_eq!(next.attempts, 0);
        assert_eq!(next.parent_job_id.as_deref(), Some(job.id.as_str()));
        assert_eq!(next.destination(), Some("+15550100"));
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(JobStatus::RetryScheduled.as_str(), "RETRY_SCHEDULED");
        assert_eq!(JobStatus::RetryScheduled.to_string(), "RETRY_SCHEDULED");
        assert_eq!(JobStatus::parse("SENT"), Some(JobStatus::Sent));
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::RetryScheduled.is_terminal());
    }
}
