use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use herald_core::error::AppError;
use herald_core::job::{ErrorSummary, Job, JobId, JobOutcome, JobProgress, JobStatus, SourceReport};
use herald_core::traits::JobStore;

/// PostgreSQL-backed job store. Status moves are conditional updates, so
/// concurrent writers cannot move a job backwards.
#[derive(Clone)]
pub struct JobRepository {
    pool: Pool<Postgres>,
}

impl JobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Explains why a guarded update touched no row.
    async fn rejected_update(&self, job_id: JobId, to: JobStatus) -> AppError {
        match self.current_status(job_id).await {
            Ok(Some(from)) => AppError::InvalidTransition {
                from: from.as_str(),
                to: to.as_str(),
            },
            Ok(None) => AppError::NotFound(format!("Job {job_id}")),
            Err(e) => e,
        }
    }

    async fn current_status(&self, job_id: JobId) -> Result<Option<JobStatus>, AppError> {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        status.map(|s| parse_status(&s)).transpose()
    }
}

const STATUSES: [JobStatus; 5] = [
    JobStatus::New,
    JobStatus::InProgress,
    JobStatus::Successful,
    JobStatus::Partial,
    JobStatus::Failed,
];

/// Statuses a job may hold for `to` to be a legal next step.
fn predecessors(to: JobStatus) -> Vec<String> {
    STATUSES
        .iter()
        .filter(|from| from.can_transition_to(to))
        .map(|from| from.as_str().to_string())
        .collect()
}

fn parse_status(raw: &str) -> Result<JobStatus, AppError> {
    raw.parse().map_err(AppError::DatabaseError)
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    status: String,
    sources_requested: Vec<String>,
    articles_per_source: i32,
    total_articles_scraped: i64,
    total_errors: i64,
    total_duplicates: i64,
    total_skipped: i64,
    candidates_attempted: i64,
    error_summary: Json<ErrorSummary>,
    source_reports: Json<Vec<SourceReport>>,
    message: Option<String>,
    triggered_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for Job {
    type Error = AppError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Job {
            id: row.id,
            status: parse_status(&row.status)?,
            sources_requested: row.sources_requested,
            articles_per_source: row.articles_per_source.max(0) as u32,
            total_articles_scraped: row.total_articles_scraped as u64,
            total_errors: row.total_errors as u64,
            total_duplicates: row.total_duplicates as u64,
            total_skipped: row.total_skipped as u64,
            candidates_attempted: row.candidates_attempted as u64,
            error_summary: row.error_summary.0,
            source_reports: row.source_reports.0,
            triggered_at: row.triggered_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            message: row.message,
        })
    }
}

const JOB_COLUMNS: &str = r#"
    id, status, sources_requested, articles_per_source, total_articles_scraped,
    total_errors, total_duplicates, total_skipped, candidates_attempted,
    error_summary, source_reports, message, triggered_at, started_at, completed_at
"#;

impl JobStore for JobRepository {
    async fn create_job(&self, job: &Job) -> Result<(), AppError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO jobs (id, status, sources_requested, articles_per_source, triggered_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(job.id)
        .bind(job.status.as_str())
        .bind(&job.sources_requested)
        .bind(job.articles_per_source as i32)
        .bind(job.triggered_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        if inserted.rows_affected() == 0 {
            return Err(AppError::ValidationError(format!(
                "Job {} already exists",
                job.id
            )));
        }
        Ok(())
    }

    async fn transition_job(&self, job_id: JobId, to: JobStatus) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $2,
                started_at = CASE WHEN $2 = 'in-progress' THEN NOW() ELSE started_at END,
                completed_at = CASE WHEN $3 THEN NOW() ELSE completed_at END,
                updated_at = NOW()
            WHERE id = $1 AND status = ANY($4)
            "#,
        )
        .bind(job_id)
        .bind(to.as_str())
        .bind(to.is_terminal())
        .bind(predecessors(to))
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(self.rejected_update(job_id, to).await);
        }
        Ok(())
    }

    async fn record_progress(&self, job_id: JobId, progress: &JobProgress) -> Result<(), AppError> {
        let counts = &progress.counts;
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET candidates_attempted = $2, total_articles_scraped = $3, total_errors = $4,
                total_duplicates = $5, total_skipped = $6, error_summary = $7,
                updated_at = NOW()
            WHERE id = $1 AND status IN ('new', 'in-progress')
            "#,
        )
        .bind(job_id)
        .bind(counts.attempted as i64)
        .bind(counts.scraped as i64)
        .bind(counts.errors as i64)
        .bind(counts.duplicates as i64)
        .bind(counts.skipped as i64)
        .bind(Json(&progress.error_summary))
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(self.rejected_update(job_id, JobStatus::InProgress).await);
        }
        Ok(())
    }

    async fn finalize_job(&self, job_id: JobId, outcome: &JobOutcome) -> Result<(), AppError> {
        let counts = &outcome.progress.counts;
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $2, candidates_attempted = $3, total_articles_scraped = $4,
                total_errors = $5, total_duplicates = $6, total_skipped = $7,
                error_summary = $8, source_reports = $9, message = $10,
                completed_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = ANY($11)
            "#,
        )
        .bind(job_id)
        .bind(outcome.status.as_str())
        .bind(counts.attempted as i64)
        .bind(counts.scraped as i64)
        .bind(counts.errors as i64)
        .bind(counts.duplicates as i64)
        .bind(counts.skipped as i64)
        .bind(Json(&outcome.progress.error_summary))
        .bind(Json(&outcome.source_reports))
        .bind(&outcome.message)
        .bind(predecessors(outcome.status))
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(self.rejected_update(job_id, outcome.status).await);
        }
        Ok(())
    }

    async fn get_job(&self, job_id: JobId) -> Result<Option<Job>, AppError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        row.map(Job::try_from).transpose()
    }

    async fn list_jobs(&self, limit: usize) -> Result<Vec<Job>, AppError> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs ORDER BY triggered_at DESC LIMIT $1"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        rows.into_iter().map(Job::try_from).collect()
    }
}
