//! Emergency repository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::database::models::EmergencyDbModel;
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::{datetime_to_ms, opt_datetime_to_ms};
use crate::domain::{Emergency, EmergencyStatus, HistoryFilters};
use crate::{Error, Result};

/// Emergency repository trait.
#[async_trait]
pub trait EmergencyRepository: Send + Sync {
    /// Insert a new emergency. Fails with `EmergencyAlreadyActive` if the
    /// user already has an open one.
    async fn create(&self, emergency: &Emergency) -> Result<()>;
    async fn get_by_id(&self, id: &str) -> Result<Emergency>;
    async fn get_active_by_user_id(&self, user_id: &str) -> Result<Option<Emergency>>;
    async fn count_active_by_user_id(&self, user_id: &str) -> Result<i64>;
    /// Move an emergency to `new_status`, stamping the transition time.
    ///
    /// Rejected transitions leave the stored row unchanged.
    async fn update_status(&self, id: &str, new_status: EmergencyStatus) -> Result<Emergency>;
    /// ACTIVE -> RESOLVED with required notes.
    async fn resolve(&self, id: &str, notes: &str) -> Result<Emergency>;
    /// Filtered page of a user's emergencies, newest first, with the total match count.
    async fn list_with_filters(&self, filters: &HistoryFilters) -> Result<(Vec<Emergency>, i64)>;
}

/// SQLx implementation of EmergencyRepository.
pub struct SqlxEmergencyRepository {
    pool: SqlitePool,
}

impl SqlxEmergencyRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, id: &str) -> Result<Option<Emergency>> {
        sqlx::query_as::<_, EmergencyDbModel>("SELECT * FROM emergencies WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(EmergencyDbModel::into_domain)
            .transpose()
    }

    /// Persist an already transitioned entity, conditional on the status it
    /// was loaded with.
    async fn write_transition(&self, emergency: &Emergency, expected: EmergencyStatus) -> Result<()> {
        let affected = retry_on_sqlite_busy("emergency_transition", || async {
            let result = sqlx::query(
                r#"
                UPDATE emergencies SET
                    status = ?,
                    activated_at = ?,
                    cancelled_at = ?,
                    resolved_at = ?,
                    resolution_notes = ?
                WHERE id = ? AND status = ?
                "#,
            )
            .bind(emergency.status.as_str())
            .bind(opt_datetime_to_ms(emergency.activated_at))
            .bind(opt_datetime_to_ms(emergency.cancelled_at))
            .bind(opt_datetime_to_ms(emergency.resolved_at))
            .bind(&emergency.resolution_notes)
            .bind(&emergency.id)
            .bind(expected.as_str())
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        })
        .await?;

        if affected == 0 {
            // Someone else moved the row first; report against its real status.
            let current = self
                .fetch(&emergency.id)
                .await?
                .ok_or_else(|| Error::not_found("Emergency", &emergency.id))?;
            return Err(Error::invalid_transition(current.status, emergency.status));
        }
        Ok(())
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.is_unique_violation() || db_err.message().contains("UNIQUE constraint failed")
        }
        _ => false,
    }
}

#[async_trait]
impl EmergencyRepository for SqlxEmergencyRepository {
    async fn create(&self, emergency: &Emergency) -> Result<()> {
        let model = EmergencyDbModel::from_domain(emergency)?;
        let result = sqlx::query(
            r#"
            INSERT INTO emergencies (
                id, user_id, emergency_type, status, initial_location, initial_message,
                auto_triggered, triggered_by, countdown_seconds, created_at,
                activated_at, cancelled_at, resolved_at, resolution_notes, metadata
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&model.id)
        .bind(&model.user_id)
        .bind(&model.emergency_type)
        .bind(&model.status)
        .bind(&model.initial_location)
        .bind(&model.initial_message)
        .bind(model.auto_triggered)
        .bind(&model.triggered_by)
        .bind(model.countdown_seconds)
        .bind(model.created_at)
        .bind(model.activated_at)
        .bind(model.cancelled_at)
        .bind(model.resolved_at)
        .bind(&model.resolution_notes)
        .bind(&model.metadata)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(Error::EmergencyAlreadyActive {
                user_id: emergency.user_id.clone(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    async fn get_by_id(&self, id: &str) -> Result<Emergency> {
        self.fetch(id)
            .await?
            .ok_or_else(|| Error::not_found("Emergency", id))
    }

    async fn get_active_by_user_id(&self, user_id: &str) -> Result<Option<Emergency>> {
        sqlx::query_as::<_, EmergencyDbModel>(
            r#"
            SELECT * FROM emergencies
            WHERE user_id = ? AND status IN ('PENDING', 'ACTIVE')
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .map(EmergencyDbModel::into_domain)
        .transpose()
    }

    async fn count_active_by_user_id(&self, user_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM emergencies WHERE user_id = ? AND status IN ('PENDING', 'ACTIVE')",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn update_status(&self, id: &str, new_status: EmergencyStatus) -> Result<Emergency> {
        let mut emergency = self.get_by_id(id).await?;
        let expected = emergency.status;
        emergency.transition(new_status, Utc::now())?;
        self.write_transition(&emergency, expected).await?;
        Ok(emergency)
    }

    async fn resolve(&self, id: &str, notes: &str) -> Result<Emergency> {
        let mut emergency = self.get_by_id(id).await?;
        let expected = emergency.status;
        emergency.resolve(notes)?;
        self.write_transition(&emergency, expected).await?;
        Ok(emergency)
    }

    async fn list_with_filters(&self, filters: &HistoryFilters) -> Result<(Vec<Emergency>, i64)> {
        let mut conditions: Vec<&str> = vec!["user_id = ?"];
        if filters.status.is_some() {
            conditions.push("status = ?");
        }
        if filters.emergency_type.is_some() {
            conditions.push("emergency_type = ?");
        }
        if filters.start_date.is_some() {
            conditions.push("created_at >= ?");
        }
        if filters.end_date.is_some() {
            conditions.push("created_at <= ?");
        }
        let where_clause = format!("WHERE {}", conditions.join(" AND "));

        let count_sql = format!("SELECT COUNT(*) FROM emergencies {}", where_clause);
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql).bind(&filters.user_id);
        if let Some(status) = filters.status {
            count_query = count_query.bind(status.as_str());
        }
        if let Some(emergency_type) = filters.emergency_type {
            count_query = count_query.bind(emergency_type.as_str());
        }
        if let Some(start) = filters.start_date {
            count_query = count_query.bind(datetime_to_ms(start));
        }
        if let Some(end) = filters.end_date {
            count_query = count_query.bind(datetime_to_ms(end));
        }
        let total = count_query.fetch_one(&self.pool).await?;

        let sql = format!(
            "SELECT * FROM emergencies {} ORDER BY created_at DESC LIMIT ? OFFSET ?",
            where_clause
        );
        let mut query = sqlx::query_as::<_, EmergencyDbModel>(&sql).bind(&filters.user_id);
        if let Some(status) = filters.status {
            query = query.bind(status.as_str());
        }
        if let Some(emergency_type) = filters.emergency_type {
            query = query.bind(emergency_type.as_str());
        }
        if let Some(start) = filters.start_date {
            query = query.bind(datetime_to_ms(start));
        }
        if let Some(end) = filters.end_date {
            query = query.bind(datetime_to_ms(end));
        }
        query = query.bind(filters.limit()).bind(filters.offset());

        let emergencies = query
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(EmergencyDbModel::into_domain)
            .collect::<Result<Vec<_>>>()?;

        Ok((emergencies, total))
    }
}
