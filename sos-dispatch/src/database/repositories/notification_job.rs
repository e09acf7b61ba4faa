//! Durable notification job queue storage.
//!
//! Every state change is a single conditional UPDATE, so concurrent workers
//! coordinate through SQLite alone: a job can only be claimed by the worker
//! whose UPDATE moved it out of PENDING.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::NotificationJobDbModel;
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::now_ms;
use crate::domain::Lane;
use crate::notification::channels::ErrorClass;
use crate::notification::job::{CancelledJob, JobStatus, NotificationJob};
use crate::{Error, Result};

#[async_trait]
pub trait NotificationJobRepository: Send + Sync {
    async fn insert(&self, job: &NotificationJob) -> Result<()>;
    async fn get(&self, id: &str) -> Result<NotificationJob>;
    /// Atomically claim the best PENDING job of a lane, incrementing its
    /// attempt counter. Higher priority first, then oldest.
    async fn claim_next(&self, lane: Lane) -> Result<Option<NotificationJob>>;
    async fn mark_sent(&self, id: &str, message_id: Option<&str>) -> Result<()>;
    /// SENT -> DELIVERED. Returns false if the job was not SENT.
    async fn mark_delivered(&self, id: &str) -> Result<bool>;
    async fn mark_failed(&self, id: &str, error: &str, class: ErrorClass) -> Result<()>;
    async fn mark_retry_scheduled(&self, id: &str, error: &str, class: ErrorClass) -> Result<()>;
    /// RETRY_SCHEDULED -> PENDING. Returns false if the job moved on meanwhile.
    async fn requeue(&self, id: &str) -> Result<bool>;
    /// Cancel a job that has not been claimed yet.
    async fn cancel(&self, id: &str) -> Result<bool>;
    /// PROCESSING -> CANCELLED, for a claimed job whose emergency ended
    /// before it was sent. Returns false if the job was not PROCESSING.
    async fn cancel_claimed(&self, id: &str) -> Result<bool>;
    /// Cancel every unclaimed job of an emergency, returning each cancelled
    /// job with the status it had.
    async fn cancel_for_emergency(&self, emergency_id: &str) -> Result<Vec<CancelledJob>>;
    async fn count_by_status(&self, lane: Lane, status: JobStatus) -> Result<i64>;
    async fn list_for_emergency(&self, emergency_id: &str) -> Result<Vec<NotificationJob>>;
    /// Put jobs left PROCESSING or RETRY_SCHEDULED by a previous process back to PENDING.
    async fn reset_interrupted(&self) -> Result<u64>;
}

pub struct SqlxNotificationJobRepository {
    pool: SqlitePool,
}

impl SqlxNotificationJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn set_outcome(
        &self,
        op_name: &'static str,
        id: &str,
        status: JobStatus,
        error: &str,
        class: ErrorClass,
    ) -> Result<()> {
        let completed_at = status.is_terminal().then(now_ms);
        retry_on_sqlite_busy(op_name, || async {
            let now = now_ms();
            sqlx::query(
                r#"
                UPDATE notification_jobs SET
                    status = ?,
                    last_error = ?,
                    error_class = ?,
                    updated_at = ?,
                    completed_at = ?
                WHERE id = ?
                "#,
            )
            .bind(status.as_str())
            .bind(error)
            .bind(class.to_string())
            .bind(now)
            .bind(completed_at)
            .bind(id)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl NotificationJobRepository for SqlxNotificationJobRepository {
    async fn insert(&self, job: &NotificationJob) -> Result<()> {
        job.validate()?;
        let model = NotificationJobDbModel::from_job(job)?;
        retry_on_sqlite_busy("insert_notification_job", || async {
            sqlx::query(
                r#"
                INSERT INTO notification_jobs (
                    id, batch_id, emergency_id, recipient_id, recipient_name, channel,
                    priority, priority_rank, lane, status, attempts, template, contact,
                    parent_job_id, message_id, last_error, error_class,
                    created_at, updated_at, completed_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&model.id)
            .bind(&model.batch_id)
            .bind(&model.emergency_id)
            .bind(&model.recipient_id)
            .bind(&model.recipient_name)
            .bind(&model.channel)
            .bind(&model.priority)
            .bind(model.priority_rank)
            .bind(&model.lane)
            .bind(&model.status)
            .bind(model.attempts)
            .bind(&model.template)
            .bind(&model.contact)
            .bind(&model.parent_job_id)
            .bind(&model.message_id)
            .bind(&model.last_error)
            .bind(&model.error_class)
            .bind(model.created_at)
            .bind(model.updated_at)
            .bind(model.completed_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn get(&self, id: &str) -> Result<NotificationJob> {
        sqlx::query_as::<_, NotificationJobDbModel>("SELECT * FROM notification_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("NotificationJob", id))?
            .into_job()
    }

    async fn claim_next(&self, lane: Lane) -> Result<Option<NotificationJob>> {
        let claimed = retry_on_sqlite_busy("claim_notification_job", || async {
            let now = now_ms();
            let row = sqlx::query_as::<_, NotificationJobDbModel>(
                r#"
                UPDATE notification_jobs SET
                    status = 'PROCESSING',
                    attempts = attempts + 1,
                    updated_at = ?
                WHERE id = (
                    SELECT id FROM notification_jobs
                    WHERE lane = ? AND status = 'PENDING'
                    ORDER BY priority_rank DESC, created_at ASC, rowid ASC
                    LIMIT 1
                )
                AND status = 'PENDING'
                RETURNING *
                "#,
            )
            .bind(now)
            .bind(lane.as_str())
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        })
        .await?;

        claimed.map(NotificationJobDbModel::into_job).transpose()
    }

    async fn mark_sent(&self, id: &str, message_id: Option<&str>) -> Result<()> {
        retry_on_sqlite_busy("mark_job_sent", || async {
            let now = now_ms();
            sqlx::query(
                r#"
                UPDATE notification_jobs SET
                    status = 'SENT',
                    message_id = ?,
                    last_error = NULL,
                    error_class = NULL,
                    updated_at = ?,
                    completed_at = ?
                WHERE id = ?
                "#,
            )
            .bind(message_id)
            .bind(now)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn mark_delivered(&self, id: &str) -> Result<bool> {
        retry_on_sqlite_busy("mark_job_delivered", || async {
            let result = sqlx::query(
                "UPDATE notification_jobs SET status = 'DELIVERED', updated_at = ? WHERE id = ? AND status = 'SENT'",
            )
            .bind(now_ms())
            .bind(id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    async fn mark_failed(&self, id: &str, error: &str, class: ErrorClass) -> Result<()> {
        self.set_outcome("mark_job_failed", id, JobStatus::Failed, error, class)
            .await
    }

    async fn mark_retry_scheduled(&self, id: &str, error: &str, class: ErrorClass) -> Result<()> {
        self.set_outcome(
            "mark_job_retry_scheduled",
            id,
            JobStatus::RetryScheduled,
            error,
            class,
        )
        .await
    }

    async fn requeue(&self, id: &str) -> Result<bool> {
        retry_on_sqlite_busy("requeue_notification_job", || async {
            let result = sqlx::query(
                "UPDATE notification_jobs SET status = 'PENDING', updated_at = ? WHERE id = ? AND status = 'RETRY_SCHEDULED'",
            )
            .bind(now_ms())
            .bind(id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    async fn cancel(&self, id: &str) -> Result<bool> {
        retry_on_sqlite_busy("cancel_notification_job", || async {
            let now = now_ms();
            let result = sqlx::query(
                r#"
                UPDATE notification_jobs SET status = 'CANCELLED', updated_at = ?, completed_at = ?
                WHERE id = ? AND status IN ('PENDING', 'RETRY_SCHEDULED')
                "#,
            )
            .bind(now)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    async fn cancel_claimed(&self, id: &str) -> Result<bool> {
        retry_on_sqlite_busy("cancel_claimed_notification_job", || async {
            let now = now_ms();
            let result = sqlx::query(
                r#"
                UPDATE notification_jobs SET status = 'CANCELLED', updated_at = ?, completed_at = ?
                WHERE id = ? AND status = 'PROCESSING'
                "#,
            )
            .bind(now)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    async fn cancel_for_emergency(&self, emergency_id: &str) -> Result<Vec<CancelledJob>> {
        let rows = retry_on_sqlite_busy("cancel_jobs_for_emergency", || async {
            let now = now_ms();
            let mut tx = self.pool.begin().await?;
            let mut rows = Vec::new();
            // One UPDATE per source status, since RETURNING only sees the new row.
            for previous in [JobStatus::Pending, JobStatus::RetryScheduled] {
                let cancelled = sqlx::query_as::<_, NotificationJobDbModel>(
                    r#"
                    UPDATE notification_jobs SET status = 'CANCELLED', updated_at = ?, completed_at = ?
                    WHERE emergency_id = ? AND status = ?
                    RETURNING *
                    "#,
                )
                .bind(now)
                .bind(now)
                .bind(emergency_id)
                .bind(previous.as_str())
                .fetch_all(&mut *tx)
                .await?;
                rows.extend(cancelled.into_iter().map(|row| (row, previous)));
            }
            tx.commit().await?;
            Ok(rows)
        })
        .await?;

        rows.into_iter()
            .map(|(row, previous)| {
                Ok(CancelledJob {
                    job: row.into_job()?,
                    previous,
                })
            })
            .collect()
    }

    async fn count_by_status(&self, lane: Lane, status: JobStatus) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notification_jobs WHERE lane = ? AND status = ?",
        )
        .bind(lane.as_str())
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn list_for_emergency(&self, emergency_id: &str) -> Result<Vec<NotificationJob>> {
        sqlx::query_as::<_, NotificationJobDbModel>(
            "SELECT * FROM notification_jobs WHERE emergency_id = ? ORDER BY created_at, rowid",
        )
        .bind(emergency_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(NotificationJobDbModel::into_job)
        .collect()
    }

    async fn reset_interrupted(&self) -> Result<u64> {
        retry_on_sqlite_busy("reset_interrupted_jobs", || async {
            let result = sqlx::query(
                r#"
                UPDATE notification_jobs SET status = 'PENDING', updated_at = ?
                WHERE status IN ('PROCESSING', 'RETRY_SCHEDULED')
                "#,
            )
            .bind(now_ms())
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::NotificationBatchDbModel;
    use crate::database::repositories::{
        BatchRepository, EmergencyRepository, SqlxBatchRepository, SqlxEmergencyRepository,
    };
    use crate::database::{init_pool_with_size, run_migrations};
    use crate::domain::{Channel, ContactInfo, Emergency, EmergencyType, Location, Priority};
    use crate::notification::template::TemplateFields;

    struct Fixture {
        repo: SqlxNotificationJobRepository,
        emergency_id: String,
        batch_id: String,
    }

    async fn setup() -> Fixture {
        let pool = init_pool_with_size("sqlite::memory:", 1).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let emergency = Emergency::new("u1", EmergencyType::Fire, Location::new(0.0, 0.0), 0);
        SqlxEmergencyRepository::new(pool.clone())
            .create(&emergency)
            .await
            .unwrap();
        let batch = NotificationBatchDbModel::new(&emergency.id, 0);
        SqlxBatchRepository::new(pool.clone())
            .create_batch(&batch)
            .await
            .unwrap();

        Fixture {
            repo: SqlxNotificationJobRepository::new(pool),
            emergency_id: emergency.id,
            batch_id: batch.id,
        }
    }

    fn template() -> TemplateFields {
        TemplateFields {
            user_name: "Dana".into(),
            emergency_type: "Fire".into(),
            location_text: "1 Main St".into(),
            deep_link: "sosapp://emergency/x".into(),
        }
    }

    impl Fixture {
        fn job(&self, recipient: &str, priority: Priority) -> NotificationJob {
            NotificationJob::new(
                &self.batch_id,
                &self.emergency_id,
                recipient,
                recipient,
                Channel::Sms,
                priority,
                template(),
                ContactInfo::default().with_phone("+15550100"),
            )
        }
    }

    #[tokio::test]
    async fn test_claim_orders_by_priority_then_age() {
        let f = setup().await;
        let high = f.job("c-high", Priority::High);
        let emergency_old = f.job("c-emergency-1", Priority::Emergency);
        let mut emergency_new = f.job("c-emergency-2", Priority::Emergency);
        emergency_new.created_at = emergency_old.created_at + chrono::Duration::milliseconds(5);

        f.repo.insert(&high).await.unwrap();
        f.repo.insert(&emergency_new).await.unwrap();
        f.repo.insert(&emergency_old).await.unwrap();

        let first = f.repo.claim_next(Lane::Expedited).await.unwrap().unwrap();
        let second = f.repo.claim_next(Lane::Expedited).await.unwrap().unwrap();
        let third = f.repo.claim_next(Lane::Expedited).await.unwrap().unwrap();
        assert_eq!(first.id, emergency_old.id);
        assert_eq!(second.id, emergency_new.id);
        assert_eq!(third.id, high.id);
        assert_eq!(first.status, JobStatus::Processing);
        assert_eq!(first.attempts, 1);

        assert!(f.repo.claim_next(Lane::Expedited).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lanes_are_separate() {
        let f = setup().await;
        f.repo.insert(&f.job("c1", Priority::Low)).await.unwrap();

        assert!(f.repo.claim_next(Lane::Expedited).await.unwrap().is_none());
        assert!(f.repo.claim_next(Lane::Standard).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_retry_cycle_increments_attempts() {
        let f = setup().await;
        let job = f.job("c1", Priority::Emergency);
        f.repo.insert(&job).await.unwrap();

        let claimed = f.repo.claim_next(Lane::Expedited).await.unwrap().unwrap();
        f.repo
            .mark_retry_scheduled(&claimed.id, "timeout", ErrorClass::Retryable)
            .await
            .unwrap();
        assert_eq!(
            f.repo
                .count_by_status(Lane::Expedited, JobStatus::RetryScheduled)
                .await
                .unwrap(),
            1
        );
        // Not claimable while waiting for its requeue.
        assert!(f.repo.claim_next(Lane::Expedited).await.unwrap().is_none());

        assert!(f.repo.requeue(&claimed.id).await.unwrap());
        assert!(!f.repo.requeue(&claimed.id).await.unwrap());

        let again = f.repo.claim_next(Lane::Expedited).await.unwrap().unwrap();
        assert_eq!(again.attempts, 2);
        assert_eq!(again.last_error.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_sent_then_delivered_once() {
        let f = setup().await;
        let job = f.job("c1", Priority::High);
        f.repo.insert(&job).await.unwrap();
        f.repo.claim_next(Lane::Expedited).await.unwrap();

        f.repo.mark_sent(&job.id, Some("msg-1")).await.unwrap();
        assert!(f.repo.mark_delivered(&job.id).await.unwrap());
        assert!(!f.repo.mark_delivered(&job.id).await.unwrap());

        let stored = f.repo.get(&job.id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Delivered);
        assert_eq!(stored.message_id.as_deref(), Some("msg-1"));
    }

    #[tokio::test]
    async fn test_cancel_only_unclaimed() {
        let f = setup().await;
        let queued = f.job("c1", Priority::High);
        let claimed = f.job("c2", Priority::Emergency);
        f.repo.insert(&queued).await.unwrap();
        f.repo.insert(&claimed).await.unwrap();
        let in_flight = f.repo.claim_next(Lane::Expedited).await.unwrap().unwrap();
        assert_eq!(in_flight.id, claimed.id);

        let cancelled = f.repo.cancel_for_emergency(&f.emergency_id).await.unwrap();
        assert_eq!(cancelled.len(), 1);
        assert_eq!(cancelled[0].job.id, queued.id);
        assert_eq!(cancelled[0].job.status, JobStatus::Cancelled);
        assert_eq!(cancelled[0].previous, JobStatus::Pending);

        assert!(!f.repo.cancel(&claimed.id).await.unwrap());
        assert_eq!(
            f.repo.get(&claimed.id).await.unwrap().status,
            JobStatus::Processing
        );
    }

    #[tokio::test]
    async fn test_cancel_for_emergency_reports_previous_status() {
        let f = setup().await;
        let queued = f.job("c1", Priority::High);
        let waiting = f.job("c2", Priority::Emergency);
        f.repo.insert(&queued).await.unwrap();
        f.repo.insert(&waiting).await.unwrap();
        let claimed = f.repo.claim_next(Lane::Expedited).await.unwrap().unwrap();
        assert_eq!(claimed.id, waiting.id);
        f.repo
            .mark_retry_scheduled(&claimed.id, "rate limited", ErrorClass::Retryable)
            .await
            .unwrap();

        let cancelled = f.repo.cancel_for_emergency(&f.emergency_id).await.unwrap();
        assert_eq!(cancelled.len(), 2);
        let previous_of = |id: &str| {
            cancelled
                .iter()
                .find(|c| c.job.id == id)
                .map(|c| c.previous)
                .unwrap()
        };
        assert_eq!(previous_of(&queued.id), JobStatus::Pending);
        assert_eq!(previous_of(&waiting.id), JobStatus::RetryScheduled);
        assert!(!f.repo.requeue(&waiting.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_cancel_claimed_only_moves_processing_jobs() {
        let f = setup().await;
        let job = f.job("c1", Priority::High);
        f.repo.insert(&job).await.unwrap();
        assert!(!f.repo.cancel_claimed(&job.id).await.unwrap());

        f.repo.claim_next(Lane::Expedited).await.unwrap().unwrap();
        assert!(f.repo.cancel_claimed(&job.id).await.unwrap());
        assert_eq!(
            f.repo.get(&job.id).await.unwrap().status,
            JobStatus::Cancelled
        );
        assert!(!f.repo.cancel_claimed(&job.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_reset_interrupted() {
        let f = setup().await;
        f.repo.insert(&f.job("c1", Priority::High)).await.unwrap();
        f.repo.insert(&f.job("c2", Priority::High)).await.unwrap();
        let a = f.repo.claim_next(Lane::Expedited).await.unwrap().unwrap();
        let b = f.repo.claim_next(Lane::Expedited).await.unwrap().unwrap();
        f.repo
            .mark_retry_scheduled(&b.id, "rate limited", ErrorClass::Retryable)
            .await
            .unwrap();

        assert_eq!(f.repo.reset_interrupted().await.unwrap(), 2);
        assert_eq!(
            f.repo
                .count_by_status(Lane::Expedited, JobStatus::Pending)
                .await
                .unwrap(),
            2
        );
        assert_eq!(f.repo.get(&a.id).await.unwrap().attempts, 1);
    }

    #[tokio::test]
    async fn test_insert_rejects_malformed_job() {
        let f = setup().await;
        let mut job = f.job("c1", Priority::High);
        job.contact = ContactInfo::default().with_email("only@email.io");

        let err = f.repo.insert(&job).await.unwrap_err();
        assert!(matches!(err, Error::MalformedJob(_)));
        assert!(f.repo.list_for_emergency(&f.emergency_id).await.unwrap().is_empty());
    }
}
