use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, ErrorCategory};
use crate::models::SourceId;

pub type JobId = Uuid;

/// Error events per category.
pub type ErrorSummary = BTreeMap<ErrorCategory, u64>;

/// Lifecycle of a job. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    New,
    InProgress,
    Successful,
    Partial,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::New => "new",
            JobStatus::InProgress => "in-progress",
            JobStatus::Successful => "successful",
            JobStatus::Partial => "partial",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Successful | JobStatus::Partial | JobStatus::Failed
        )
    }

    /// `new → in-progress → {successful | partial | failed}`, plus
    /// `new → failed` for jobs that die before any work starts.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::New, JobStatus::InProgress | JobStatus::Failed) => true,
            (JobStatus::InProgress, next) => next.is_terminal(),
            _ => false,
        }
    }

    /// Guarded transition.
    pub fn transition(self, next: JobStatus) -> Result<JobStatus, AppError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(AppError::InvalidTransition {
                from: self.as_str(),
                to: next.as_str(),
            })
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "new" => Ok(JobStatus::New),
            "in-progress" => Ok(JobStatus::InProgress),
            "successful" => Ok(JobStatus::Successful),
            "partial" => Ok(JobStatus::Partial),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(format!("Unknown job status: {s}")),
        }
    }
}

/// How one source fared within a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceStatus {
    Pending,
    /// Every attempted candidate ended without an error.
    Succeeded,
    /// Some candidates errored.
    Degraded,
    /// Aborted, undiscoverable, unknown, or every attempt errored.
    Failed,
    /// Not attempted because its circuit is open.
    Skipped,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Pending => "pending",
            SourceStatus::Succeeded => "succeeded",
            SourceStatus::Degraded => "degraded",
            SourceStatus::Failed => "failed",
            SourceStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCounts {
    pub discovered: u64,
    pub attempted: u64,
    pub scraped: u64,
    pub errors: u64,
    pub duplicates: u64,
    pub skipped: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceReport {
    pub source_id: SourceId,
    pub status: SourceStatus,
    pub counts: SourceCounts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SourceReport {
    pub fn new(source_id: impl Into<SourceId>, status: SourceStatus) -> Self {
        Self {
            source_id: source_id.into(),
            status,
            counts: SourceCounts::default(),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Job-wide counters.
///
/// `scraped + errors + duplicates + skipped == attempted` once a job is
/// terminal; while it runs the left side may lag by in-flight candidates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub attempted: u64,
    pub scraped: u64,
    pub errors: u64,
    pub duplicates: u64,
    pub skipped: u64,
    pub sources_processed: u64,
    pub sources_failed: u64,
    pub sources_skipped: u64,
}

impl JobCounts {
    pub fn is_balanced(&self) -> bool {
        self.scraped + self.errors + self.duplicates + self.skipped == self.attempted
    }
}

/// Persisted job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub sources_requested: Vec<SourceId>,
    pub articles_per_source: u32,
    pub total_articles_scraped: u64,
    pub total_errors: u64,
    pub total_duplicates: u64,
    pub total_skipped: u64,
    pub candidates_attempted: u64,
    pub error_summary: ErrorSummary,
    pub source_reports: Vec<SourceReport>,
    pub triggered_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Why the job failed, when it failed before doing any work.
    pub message: Option<String>,
}

impl Job {
    pub fn new(id: JobId, request: &TriggerJobRequest) -> Self {
        Self {
            id,
            status: JobStatus::New,
            sources_requested: request.sources.clone(),
            articles_per_source: request.articles_per_source,
            total_articles_scraped: 0,
            total_errors: 0,
            total_duplicates: 0,
            total_skipped: 0,
            candidates_attempted: 0,
            error_summary: ErrorSummary::new(),
            source_reports: Vec::new(),
            triggered_at: Utc::now(),
            started_at: None,
            completed_at: None,
            message: None,
        }
    }

    pub fn counts(&self) -> JobCounts {
        let by_status = |s: SourceStatus| {
            self.source_reports
                .iter()
                .filter(|r| r.status == s)
                .count() as u64
        };
        JobCounts {
            attempted: self.candidates_attempted,
            scraped: self.total_articles_scraped,
            errors: self.total_errors,
            duplicates: self.total_duplicates,
            skipped: self.total_skipped,
            sources_processed: by_status(SourceStatus::Succeeded)
                + by_status(SourceStatus::Degraded)
                + by_status(SourceStatus::Failed),
            sources_failed: by_status(SourceStatus::Failed),
            sources_skipped: by_status(SourceStatus::Skipped),
        }
    }

    pub fn apply_progress(&mut self, progress: &JobProgress) {
        self.candidates_attempted = progress.counts.attempted;
        self.total_articles_scraped = progress.counts.scraped;
        self.total_errors = progress.counts.errors;
        self.total_duplicates = progress.counts.duplicates;
        self.total_skipped = progress.counts.skipped;
        self.error_summary = progress.error_summary.clone();
    }
}

/// Inbound request to run the pipeline over a set of sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerJobRequest {
    pub sources: Vec<SourceId>,
    pub articles_per_source: u32,
    /// Wall-clock budget; the orchestrator default applies when `None`.
    pub timeout_budget: Option<Duration>,
}

impl TriggerJobRequest {
    pub fn new(sources: Vec<SourceId>, articles_per_source: u32) -> Self {
        Self {
            sources,
            articles_per_source,
            timeout_budget: None,
        }
    }

    pub fn with_timeout_budget(mut self, budget: Duration) -> Self {
        self.timeout_budget = Some(budget);
        self
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.sources.is_empty() {
            return Err(AppError::ValidationError(
                "At least one source is required".into(),
            ));
        }
        if self.sources.iter().any(|s| s.trim().is_empty()) {
            return Err(AppError::ValidationError(
                "Source ids must not be blank".into(),
            ));
        }
        if self.articles_per_source == 0 {
            return Err(AppError::ValidationError(
                "articles_per_source must be at least 1".into(),
            ));
        }
        if self.timeout_budget.is_some_and(|b| b.is_zero()) {
            return Err(AppError::ValidationError(
                "timeout_budget must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Counter snapshot written to the job store while a job runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub counts: JobCounts,
    pub error_summary: ErrorSummary,
}

/// Final state written when a job becomes terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub status: JobStatus,
    pub progress: JobProgress,
    pub source_reports: Vec<SourceReport>,
    pub message: Option<String>,
}

/// Response of `get_job_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusReport {
    pub job_id: JobId,
    pub status: JobStatus,
    pub counts: JobCounts,
    pub error_summary: ErrorSummary,
    pub sources: Vec<SourceReport>,
    pub triggered_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<&Job> for JobStatusReport {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            counts: job.counts(),
            error_summary: job.error_summary.clone(),
            sources: job.source_reports.clone(),
            triggered_at: job.triggered_at,
            completed_at: job.completed_at,
            message: job.message.clone(),
        }
    }
}
