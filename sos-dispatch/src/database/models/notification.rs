//! Notification job and batch database models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::{datetime_to_ms, ms_to_datetime, now_ms};
use crate::domain::{Channel, Priority};
use crate::notification::channels::ErrorClass;
use crate::notification::job::{JobStatus, NotificationJob};
use crate::{Error, Result};

/// Row of the `notification_jobs` table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct NotificationJobDbModel {
    pub id: String,
    pub batch_id: String,
    pub emergency_id: String,
    pub recipient_id: String,
    pub recipient_name: String,
    /// PUSH, SMS, EMAIL
    pub channel: String,
    pub priority: String,
    /// Numeric priority, higher is claimed first.
    pub priority_rank: i64,
    /// EXPEDITED, STANDARD
    pub lane: String,
    pub status: String,
    pub attempts: i64,
    /// JSON encoded `TemplateFields`
    pub template: String,
    /// JSON encoded `ContactInfo`
    pub contact: String,
    pub parent_job_id: Option<String>,
    pub message_id: Option<String>,
    pub last_error: Option<String>,
    pub error_class: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
}

impl NotificationJobDbModel {
    pub fn from_job(job: &NotificationJob) -> Result<Self> {
        Ok(Self {
            id: job.id.clone(),
            batch_id: job.batch_id.clone(),
            emergency_id: job.emergency_id.clone(),
            recipient_id: job.recipient_id.clone(),
            recipient_name: job.recipient_name.clone(),
            channel: job.channel.as_str().to_string(),
            priority: job.priority.as_str().to_string(),
            priority_rank: i64::from(job.priority.numeric_value()),
            lane: job.lane().as_str().to_string(),
            status: job.status.as_str().to_string(),
            attempts: i64::from(job.attempts),
            template: serde_json::to_string(&job.template)?,
            contact: serde_json::to_string(&job.contact)?,
            parent_job_id: job.parent_job_id.clone(),
            message_id: job.message_id.clone(),
            last_error: job.last_error.clone(),
            error_class: job.error_class.map(|c| c.to_string()),
            created_at: datetime_to_ms(job.created_at),
            updated_at: datetime_to_ms(job.updated_at),
            completed_at: None,
        })
    }

    pub fn into_job(self) -> Result<NotificationJob> {
        let channel = self
            .channel
            .parse::<Channel>()
            .map_err(|_| Error::Database(format!("unknown channel '{}'", self.channel)))?;
        let priority = Priority::parse(&self.priority)
            .ok_or_else(|| Error::Database(format!("unknown priority '{}'", self.priority)))?;
        let status = JobStatus::parse(&self.status)
            .ok_or_else(|| Error::Database(format!("unknown job status '{}'", self.status)))?;

        Ok(NotificationJob {
            id: self.id,
            batch_id: self.batch_id,
            emergency_id: self.emergency_id,
            recipient_id: self.recipient_id,
            recipient_name: self.recipient_name,
            channel,
            priority,
            status,
            attempts: u32::try_from(self.attempts).unwrap_or(0),
            template: serde_json::from_str(&self.template)?,
            contact: serde_json::from_str(&self.contact)?,
            parent_job_id: self.parent_job_id,
            message_id: self.message_id,
            last_error: self.last_error,
            error_class: self
                .error_class
                .as_deref()
                .and_then(|c| c.parse::<ErrorClass>().ok()),
            created_at: ms_to_datetime(self.created_at),
            updated_at: ms_to_datetime(self.updated_at),
        })
    }
}

/// Row of the `notification_batches` table.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct NotificationBatchDbModel {
    pub id: String,
    pub emergency_id: String,
    pub total: i64,
    pub sent: i64,
    pub delivered: i64,
    pub failed: i64,
    pub pending: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl NotificationBatchDbModel {
    /// New batch with every job pending.
    pub fn new(emergency_id: impl Into<String>, total: i64) -> Self {
        let now = now_ms();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            emergency_id: emergency_id.into(),
            total,
            sent: 0,
            delivered: 0,
            failed: 0,
            pending: total,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Additive change to a batch's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStatsDelta {
    pub sent: i64,
    pub delivered: i64,
    pub failed: i64,
    pub pending: i64,
}

impl BatchStatsDelta {
    /// One pending job was sent.
    pub fn sent() -> Self {
        Self {
            sent: 1,
            pending: -1,
            ..Default::default()
        }
    }

    pub fn delivered() -> Self {
        Self {
            delivered: 1,
            ..Default::default()
        }
    }

    /// One pending job failed for good.
    pub fn failed() -> Self {
        Self {
            failed: 1,
            pending: -1,
            ..Default::default()
        }
    }

    /// One pending job was cancelled before being sent.
    pub fn cancelled() -> Self {
        Self {
            pending: -1,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
