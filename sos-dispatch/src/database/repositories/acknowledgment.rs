//! Acknowledgment ledger.
//!
//! Append-only: rows are inserted once per (emergency, contact) and never
//! updated. The distinct-contact count is what the escalation check reads.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::AcknowledgmentDbModel;
use crate::database::retry::retry_on_sqlite_busy;
use crate::domain::Acknowledgment;
use crate::{Error, Result};

#[async_trait]
pub trait AcknowledgmentRepository: Send + Sync {
    /// Insert one acknowledgment. A second one for the same pair fails with
    /// `DuplicateAcknowledgment` and the original row is kept.
    async fn record(&self, ack: &Acknowledgment) -> Result<()>;
    /// Number of distinct contacts who acknowledged.
    async fn count(&self, emergency_id: &str) -> Result<i64>;
    /// Oldest first.
    async fn list(&self, emergency_id: &str) -> Result<Vec<Acknowledgment>>;
    async fn has_contact_acknowledged(&self, emergency_id: &str, contact_id: &str) -> Result<bool>;
}

pub struct SqlxAcknowledgmentRepository {
    pool: SqlitePool,
}

impl SqlxAcknowledgmentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AcknowledgmentRepository for SqlxAcknowledgmentRepository {
    async fn record(&self, ack: &Acknowledgment) -> Result<()> {
        ack.validate()?;
        let model = AcknowledgmentDbModel::from_domain(ack)?;

        let inserted = retry_on_sqlite_busy("record_acknowledgment", || async {
            let result = sqlx::query(
                r#"
                INSERT INTO emergency_acknowledgments (
                    id, emergency_id, contact_id, contact_name, contact_phone,
                    contact_email, acknowledged_at, location, message
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (emergency_id, contact_id) DO NOTHING
                "#,
            )
            .bind(&model.id)
            .bind(&model.emergency_id)
            .bind(&model.contact_id)
            .bind(&model.contact_name)
            .bind(&model.contact_phone)
            .bind(&model.contact_email)
            .bind(model.acknowledged_at)
            .bind(&model.location)
            .bind(&model.message)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        })
        .await?;

        if inserted == 0 {
            return Err(Error::DuplicateAcknowledgment {
                emergency_id: ack.emergency_id.clone(),
                contact_id: ack.contact_id.clone(),
            });
        }
        Ok(())
    }

    async fn count(&self, emergency_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT contact_id) FROM emergency_acknowledgments WHERE emergency_id = ?",
        )
        .bind(emergency_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn list(&self, emergency_id: &str) -> Result<Vec<Acknowledgment>> {
        sqlx::query_as::<_, AcknowledgmentDbModel>(
            r#"
            SELECT * FROM emergency_acknowledgments
            WHERE emergency_id = ?
            ORDER BY acknowledged_at ASC, rowid ASC
            "#,
        )
        .bind(emergency_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(AcknowledgmentDbModel::into_domain)
        .collect()
    }

    async fn has_contact_acknowledged(&self, emergency_id: &str, contact_id: &str) -> Result<bool> {
        let exists: i64 = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM emergency_acknowledgments
                WHERE emergency_id = ? AND contact_id = ?
            )
            "#,
        )
        .bind(emergency_id)
        .bind(contact_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::repositories::{EmergencyRepository, SqlxEmergencyRepository};
    use crate::database::{init_pool_with_size, run_migrations};
    use crate::domain::{Emergency, EmergencyType, Location};
    use chrono::{Duration, Utc};

    async fn setup() -> (SqlxAcknowledgmentRepository, String) {
        let pool = init_pool_with_size("sqlite::memory:", 1).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let emergency = Emergency::new("u1", EmergencyType::Medical, Location::new(0.0, 0.0), 0);
        SqlxEmergencyRepository::new(pool.clone())
            .create(&emergency)
            .await
            .unwrap();
        (SqlxAcknowledgmentRepository::new(pool), emergency.id)
    }

    #[tokio::test]
    async fn test_duplicate_rejected_and_count_unchanged() {
        let (repo, emergency_id) = setup().await;
        let first = Acknowledgment::new(&emergency_id, "c1", "Alex")
            .with_phone("+15550001")
            .with_message("on my way");
        repo.record(&first).await.unwrap();
        assert_eq!(repo.count(&emergency_id).await.unwrap(), 1);

        let second = Acknowledgment::new(&emergency_id, "c1", "Alex")
            .with_phone("+15550001")
            .with_message("different text");
        let err = repo.record(&second).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateAcknowledgment { .. }));
        assert_eq!(repo.count(&emergency_id).await.unwrap(), 1);

        let stored = repo.list(&emergency_id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].message.as_deref(), Some("on my way"));
    }

    #[tokio::test]
    async fn test_list_oldest_first() {
        let (repo, emergency_id) = setup().await;
        let now = Utc::now();

        let mut late = Acknowledgment::new(&emergency_id, "c2", "Blair").with_email("b@x.io");
        late.acknowledged_at = now;
        let mut early = Acknowledgment::new(&emergency_id, "c1", "Alex").with_phone("+1");
        early.acknowledged_at = now - Duration::seconds(30);

        repo.record(&late).await.unwrap();
        repo.record(&early).await.unwrap();

        let list = repo.list(&emergency_id).await.unwrap();
        let ids: Vec<&str> = list.iter().map(|a| a.contact_id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2"]);
        assert_eq!(repo.count(&emergency_id).await.unwrap(), 2);
        assert!(repo.has_contact_acknowledged(&emergency_id, "c2").await.unwrap());
        assert!(!repo.has_contact_acknowledged(&emergency_id, "c3").await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_acknowledgment_not_stored() {
        let (repo, emergency_id) = setup().await;
        let no_contact_details = Acknowledgment::new(&emergency_id, "c1", "Alex");
        assert!(repo.record(&no_contact_details).await.is_err());
        assert_eq!(repo.count(&emergency_id).await.unwrap(), 0);
    }
}
