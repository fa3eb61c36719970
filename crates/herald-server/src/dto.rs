use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use herald_core::job::{JobCounts, JobStatusReport, SourceReport};
use herald_core::{Source, TriggerJobRequest};

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct CreateJobRequest {
    /// Source ids to run
    pub sources: Vec<String>,
    /// Candidates to take from each source
    pub articles_per_source: u32,
    /// Wall-clock budget; the server default applies when absent
    pub timeout_budget_secs: Option<u64>,
}

impl From<CreateJobRequest> for TriggerJobRequest {
    fn from(body: CreateJobRequest) -> Self {
        let request = TriggerJobRequest::new(body.sources, body.articles_per_source);
        match body.timeout_budget_secs {
            Some(secs) => request.with_timeout_budget(Duration::from_secs(secs)),
            None => request,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct CreateJobResponse {
    pub job_id: Uuid,
    pub status: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct CancelJobResponse {
    pub job_id: Uuid,
    pub cancelling: bool,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct JobCountsResponse {
    pub attempted: u64,
    pub scraped: u64,
    pub errors: u64,
    pub duplicates: u64,
    pub skipped: u64,
    pub sources_processed: u64,
    pub sources_failed: u64,
    pub sources_skipped: u64,
}

impl From<JobCounts> for JobCountsResponse {
    fn from(c: JobCounts) -> Self {
        Self {
            attempted: c.attempted,
            scraped: c.scraped,
            errors: c.errors,
            duplicates: c.duplicates,
            skipped: c.skipped,
            sources_processed: c.sources_processed,
            sources_failed: c.sources_failed,
            sources_skipped: c.sources_skipped,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SourceReportResponse {
    pub source_id: String,
    pub status: String,
    pub discovered: u64,
    pub attempted: u64,
    pub scraped: u64,
    pub errors: u64,
    pub duplicates: u64,
    pub skipped: u64,
    pub message: Option<String>,
}

impl From<SourceReport> for SourceReportResponse {
    fn from(r: SourceReport) -> Self {
        Self {
            source_id: r.source_id,
            status: r.status.to_string(),
            discovered: r.counts.discovered,
            attempted: r.counts.attempted,
            scraped: r.counts.scraped,
            errors: r.counts.errors,
            duplicates: r.counts.duplicates,
            skipped: r.counts.skipped,
            message: r.message,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct JobResponse {
    pub job_id: Uuid,
    pub status: String,
    pub counts: JobCountsResponse,
    /// Error events per category
    pub error_summary: BTreeMap<String, u64>,
    pub sources: Vec<SourceReportResponse>,
    pub triggered_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub message: Option<String>,
}

impl From<JobStatusReport> for JobResponse {
    fn from(report: JobStatusReport) -> Self {
        Self {
            job_id: report.job_id,
            status: report.status.to_string(),
            counts: report.counts.into(),
            error_summary: report
                .error_summary
                .into_iter()
                .map(|(category, count)| (category.to_string(), count))
                .collect(),
            sources: report.sources.into_iter().map(Into::into).collect(),
            triggered_at: report.triggered_at,
            completed_at: report.completed_at,
            message: report.message,
        }
    }
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ListJobsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct JobListResponse {
    pub jobs: Vec<JobResponse>,
    pub total: usize,
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SourceResponse {
    pub id: String,
    pub name: String,
    pub feed_url: String,
    pub enabled: bool,
    pub circuit_state: String,
    pub failure_count: u32,
    pub opened_at: Option<DateTime<Utc>>,
}

impl From<(Source, bool)> for SourceResponse {
    fn from((source, enabled): (Source, bool)) -> Self {
        Self {
            id: source.id,
            name: source.name,
            feed_url: source.feed_url,
            enabled,
            circuit_state: source.circuit.state.to_string(),
            failure_count: source.circuit.failure_count,
            opened_at: source.circuit.opened_at,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SourceListResponse {
    pub sources: Vec<SourceResponse>,
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
    pub active_jobs: usize,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
