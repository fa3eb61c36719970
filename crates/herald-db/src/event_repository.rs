use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Pool, Postgres};

use herald_core::error::AppError;
use herald_core::job::JobId;
use herald_core::traits::{EventLevel, EventSink};

/// Appends structured job events to `job_events`.
#[derive(Clone)]
pub struct EventRepository {
    pool: Pool<Postgres>,
}

/// A persisted event, as read back for job inspection.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct StoredEvent {
    pub id: i64,
    pub job_id: JobId,
    pub level: String,
    pub message: String,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl EventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Events for a job, oldest first.
    pub async fn list_for_job(&self, job_id: JobId, limit: usize) -> Result<Vec<StoredEvent>, AppError> {
        sqlx::query_as::<_, StoredEvent>(
            r#"
            SELECT id, job_id, level, message, data, created_at
            FROM job_events
            WHERE job_id = $1
            ORDER BY id
            LIMIT $2
            "#,
        )
        .bind(job_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))
    }
}

impl EventSink for EventRepository {
    async fn append_structured_event(
        &self,
        job_id: JobId,
        level: EventLevel,
        message: &str,
        data: serde_json::Value,
    ) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO job_events (job_id, level, message, data) VALUES ($1, $2, $3, $4)",
        )
        .bind(job_id)
        .bind(level.as_str())
        .bind(message)
        .bind(&data)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(())
    }
}
