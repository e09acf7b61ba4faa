//! Notification batch statistics.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::{BatchStatsDelta, NotificationBatchDbModel};
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::now_ms;
use crate::{Error, Result};

/// Batch repository trait.
///
/// Counters are write-only for the dispatcher; reporting reads them back.
#[async_trait]
pub trait BatchRepository: Send + Sync {
    async fn create_batch(&self, batch: &NotificationBatchDbModel) -> Result<()>;
    /// Add `delta` to the batch's counters.
    async fn update_batch_stats(&self, batch_id: &str, delta: BatchStatsDelta) -> Result<()>;
    async fn get_batch(&self, batch_id: &str) -> Result<NotificationBatchDbModel>;
    async fn list_for_emergency(&self, emergency_id: &str) -> Result<Vec<NotificationBatchDbModel>>;
}

pub struct SqlxBatchRepository {
    pool: SqlitePool,
}

impl SqlxBatchRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BatchRepository for SqlxBatchRepository {
    async fn create_batch(&self, batch: &NotificationBatchDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO notification_batches (
                id, emergency_id, total, sent, delivered, failed, pending, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&batch.id)
        .bind(&batch.emergency_id)
        .bind(batch.total)
        .bind(batch.sent)
        .bind(batch.delivered)
        .bind(batch.failed)
        .bind(batch.pending)
        .bind(batch.created_at)
        .bind(batch.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_batch_stats(&self, batch_id: &str, delta: BatchStatsDelta) -> Result<()> {
        if delta.is_empty() {
            return Ok(());
        }
        let affected = retry_on_sqlite_busy("update_batch_stats", || async {
            let result = sqlx::query(
                r#"
                UPDATE notification_batches SET
                    sent = sent + ?,
                    delivered = delivered + ?,
                    failed = failed + ?,
                    pending = pending + ?,
                    updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(delta.sent)
            .bind(delta.delivered)
            .bind(delta.failed)
            .bind(delta.pending)
            .bind(now_ms())
            .bind(batch_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        })
        .await?;

        if affected == 0 {
            return Err(Error::not_found("NotificationBatch", batch_id));
        }
        Ok(())
    }

    async fn get_batch(&self, batch_id: &str) -> Result<NotificationBatchDbModel> {
        sqlx::query_as::<_, NotificationBatchDbModel>(
            "SELECT * FROM notification_batches WHERE id = ?",
        )
        .bind(batch_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::not_found("NotificationBatch", batch_id))
    }

    async fn list_for_emergency(&self, emergency_id: &str) -> Result<Vec<NotificationBatchDbModel>> {
        let batches = sqlx::query_as::<_, NotificationBatchDbModel>(
            "SELECT * FROM notification_batches WHERE emergency_id = ? ORDER BY created_at",
        )
        .bind(emergency_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(batches)
    }
}
