use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use crate::alert::Alert;
use crate::dedup::DuplicateReason;
use crate::error::{ErrorCategory, Severity};
use crate::job::{JobCounts, JobId, JobStatus, SourceReport};
use crate::models::{ErrorEvent, SourceId};
use crate::recovery::RecoveryStrategy;
use crate::traits::EventLevel;

/// Events emitted by the orchestrator for monitoring/logging.
///
/// Each event is rendered to `tracing` and pushed to the job's
/// [`EventSink`](crate::traits::EventSink) as `(level, message, data)`.
#[derive(Debug, Clone)]
pub enum JobEvent<'a> {
    JobStarted {
        sources: &'a [SourceId],
        articles_per_source: u32,
    },
    SourceNotEligible {
        source_id: &'a str,
    },
    SourceSkipped {
        source_id: &'a str,
        reason: &'a str,
    },
    CircuitTrial {
        source_id: &'a str,
    },
    /// The circuit opened mid-run; remaining candidates are not dispatched.
    CircuitOpened {
        source_id: &'a str,
    },
    CircuitClosed {
        source_id: &'a str,
    },
    CandidatesDiscovered {
        source_id: &'a str,
        count: usize,
    },
    AttemptFailed {
        source_id: &'a str,
        url: Option<&'a str>,
        category: ErrorCategory,
        severity: Severity,
        strategy: RecoveryStrategy,
        retry: u32,
        message: &'a str,
    },
    CandidateScraped {
        source_id: &'a str,
        url: &'a str,
        content_id: Uuid,
        quality_score: u8,
    },
    CandidateDuplicate {
        source_id: &'a str,
        url: &'a str,
        reason: DuplicateReason,
    },
    CandidateSkipped {
        source_id: &'a str,
        url: &'a str,
        reason: &'a str,
    },
    CandidateFailed {
        error: &'a ErrorEvent,
        strategy: RecoveryStrategy,
    },
    SourceFailed {
        source_id: &'a str,
        category: ErrorCategory,
        message: &'a str,
    },
    SourceFinished {
        report: &'a SourceReport,
    },
    AlertRaised {
        alert: &'a Alert,
    },
    BudgetExpired {
        budget: Duration,
    },
    Cancelled,
    JobFinished {
        status: JobStatus,
        counts: &'a JobCounts,
    },
}

impl JobEvent<'_> {
    pub fn level(&self) -> EventLevel {
        match self {
            JobEvent::JobStarted { .. }
            | JobEvent::SourceSkipped { .. }
            | JobEvent::CircuitTrial { .. }
            | JobEvent::CircuitClosed { .. }
            | JobEvent::CandidatesDiscovered { .. }
            | JobEvent::SourceFinished { .. }
            | JobEvent::Cancelled
            | JobEvent::JobFinished { .. } => EventLevel::Info,
            JobEvent::CandidateScraped { .. }
            | JobEvent::CandidateDuplicate { .. }
            | JobEvent::CandidateSkipped { .. }
            | JobEvent::AttemptFailed { .. } => EventLevel::Debug,
            JobEvent::SourceNotEligible { .. }
            | JobEvent::CircuitOpened { .. }
            | JobEvent::CandidateFailed { .. }
            | JobEvent::BudgetExpired { .. } => EventLevel::Warn,
            JobEvent::SourceFailed { .. } | JobEvent::AlertRaised { .. } => EventLevel::Error,
        }
    }

    pub fn message(&self) -> String {
        match self {
            JobEvent::JobStarted { sources, .. } => {
                format!("Job started with {} source(s)", sources.len())
            }
            JobEvent::SourceNotEligible { source_id } => {
                format!("Source {source_id} is unknown or disabled")
            }
            JobEvent::SourceSkipped { source_id, reason } => {
                format!("Source {source_id} skipped ({reason})")
            }
            JobEvent::CircuitTrial { source_id } => {
                format!("Source {source_id} circuit half-open, running trial")
            }
            JobEvent::CircuitOpened { source_id } => {
                format!("Source {source_id} circuit opened, stopping dispatch")
            }
            JobEvent::CircuitClosed { source_id } => {
                format!("Source {source_id} circuit closed after successful trial")
            }
            JobEvent::CandidatesDiscovered { source_id, count } => {
                format!("Discovered {count} candidate(s) for {source_id}")
            }
            JobEvent::AttemptFailed {
                category, strategy, ..
            } => format!("Attempt failed ({category}), next: {strategy}"),
            JobEvent::CandidateScraped { url, .. } => format!("Scraped {url}"),
            JobEvent::CandidateDuplicate { url, reason, .. } => {
                format!("Duplicate {url} ({reason})")
            }
            JobEvent::CandidateSkipped { url, reason, .. } => format!("Skipped {url}: {reason}"),
            JobEvent::CandidateFailed { error, .. } => format!(
                "Candidate failed ({}/{}): {}",
                error.category, error.severity, error.message
            ),
            JobEvent::SourceFailed {
                source_id, message, ..
            } => format!("Source {source_id} failed: {message}"),
            JobEvent::SourceFinished { report } => {
                format!("Source {} finished: {}", report.source_id, report.status)
            }
            JobEvent::AlertRaised { alert } => format!("Alert raised: {}", alert.context.message),
            JobEvent::BudgetExpired { budget } => {
                format!("Job budget of {}s expired, stopping dispatch", budget.as_secs())
            }
            JobEvent::Cancelled => "Job cancelled, stopping dispatch".to_string(),
            JobEvent::JobFinished { status, .. } => format!("Job finished: {status}"),
        }
    }

    pub fn data(&self) -> serde_json::Value {
        match self {
            JobEvent::JobStarted {
                sources,
                articles_per_source,
            } => json!({ "sources": sources, "articles_per_source": articles_per_source }),
            JobEvent::SourceNotEligible { source_id }
            | JobEvent::CircuitTrial { source_id }
            | JobEvent::CircuitOpened { source_id }
            | JobEvent::CircuitClosed { source_id } => json!({ "source_id": source_id }),
            JobEvent::SourceSkipped { source_id, reason } => {
                json!({ "source_id": source_id, "reason": reason })
            }
            JobEvent::CandidatesDiscovered { source_id, count } => {
                json!({ "source_id": source_id, "count": count })
            }
            JobEvent::AttemptFailed {
                source_id,
                url,
                category,
                severity,
                strategy,
                retry,
                message,
            } => json!({
                "source_id": source_id,
                "url": url,
                "category": category,
                "severity": severity,
                "strategy": strategy,
                "retry": retry,
                "error": message,
            }),
            JobEvent::CandidateScraped {
                source_id,
                url,
                content_id,
                quality_score,
            } => json!({
                "source_id": source_id,
                "url": url,
                "content_id": content_id,
                "quality_score": quality_score,
            }),
            JobEvent::CandidateDuplicate {
                source_id,
                url,
                reason,
            } => json!({ "source_id": source_id, "url": url, "reason": reason }),
            JobEvent::CandidateSkipped {
                source_id,
                url,
                reason,
            } => json!({ "source_id": source_id, "url": url, "reason": reason }),
            JobEvent::CandidateFailed { error, strategy } => json!({
                "error": error,
                "strategy": strategy,
            }),
            JobEvent::SourceFailed {
                source_id,
                category,
                message,
            } => json!({ "source_id": source_id, "category": category, "error": message }),
            JobEvent::SourceFinished { report } => json!(report),
            JobEvent::AlertRaised { alert } => json!(alert),
            JobEvent::BudgetExpired { budget } => json!({ "budget_secs": budget.as_secs() }),
            JobEvent::Cancelled => serde_json::Value::Null,
            JobEvent::JobFinished { status, counts } => {
                json!({ "status": status, "counts": counts })
            }
        }
    }

    /// Render to `tracing` with structured fields.
    pub fn log(&self, job_id: JobId) {
        match self {
            JobEvent::JobStarted {
                sources,
                articles_per_source,
            } => {
                tracing::info!(%job_id, sources = sources.len(), %articles_per_source, "Job started");
            }
            JobEvent::SourceNotEligible { source_id } => {
                tracing::warn!(%job_id, %source_id, "Requested source is not eligible");
            }
            JobEvent::SourceSkipped { source_id, reason } => {
                tracing::info!(%job_id, %source_id, "Source skipped ({reason})");
            }
            JobEvent::CircuitTrial { source_id } => {
                tracing::info!(%job_id, %source_id, "Circuit half-open, running trial");
            }
            JobEvent::CircuitOpened { source_id } => {
                tracing::warn!(%job_id, %source_id, "Circuit opened, stopping dispatch");
            }
            JobEvent::CircuitClosed { source_id } => {
                tracing::info!(%job_id, %source_id, "Circuit closed after successful trial");
            }
            JobEvent::CandidatesDiscovered { source_id, count } => {
                tracing::info!(%job_id, %source_id, %count, "Candidates discovered");
            }
            JobEvent::AttemptFailed {
                source_id,
                url,
                category,
                severity,
                strategy,
                retry,
                message,
            } => {
                tracing::debug!(
                    %job_id,
                    %source_id,
                    url = url.unwrap_or("-"),
                    %category,
                    %severity,
                    %strategy,
                    %retry,
                    error = %message,
                    "Attempt failed"
                );
            }
            JobEvent::CandidateScraped {
                source_id,
                url,
                content_id,
                quality_score,
            } => {
                tracing::debug!(%job_id, %source_id, %url, %content_id, %quality_score, "Candidate scraped");
            }
            JobEvent::CandidateDuplicate {
                source_id,
                url,
                reason,
            } => {
                tracing::debug!(%job_id, %source_id, %url, %reason, "Candidate is a duplicate");
            }
            JobEvent::CandidateSkipped {
                source_id,
                url,
                reason,
            } => {
                tracing::debug!(%job_id, %source_id, %url, %reason, "Candidate skipped");
            }
            JobEvent::CandidateFailed { error, strategy } => {
                tracing::warn!(
                    %job_id,
                    source_id = %error.source_id,
                    url = error.candidate_url.as_deref().unwrap_or("-"),
                    category = %error.category,
                    severity = %error.severity,
                    retries = error.retry_count,
                    %strategy,
                    error = %error.message,
                    "Candidate failed"
                );
            }
            JobEvent::SourceFailed {
                source_id,
                category,
                message,
            } => {
                tracing::error!(%job_id, %source_id, %category, error = %message, "Source failed");
            }
            JobEvent::SourceFinished { report } => {
                tracing::info!(
                    %job_id,
                    source_id = %report.source_id,
                    status = %report.status,
                    attempted = report.counts.attempted,
                    scraped = report.counts.scraped,
                    errors = report.counts.errors,
                    duplicates = report.counts.duplicates,
                    skipped = report.counts.skipped,
                    "Source finished"
                );
            }
            JobEvent::AlertRaised { alert } => {
                tracing::error!(
                    %job_id,
                    category = %alert.category,
                    severity = %alert.severity,
                    kind = ?alert.context.kind,
                    "Alert raised: {}",
                    alert.context.message
                );
            }
            JobEvent::BudgetExpired { budget } => {
                tracing::warn!(%job_id, budget_secs = budget.as_secs(), "Job budget expired");
            }
            JobEvent::Cancelled => {
                tracing::info!(%job_id, "Job cancelled");
            }
            JobEvent::JobFinished { status, counts } => {
                tracing::info!(
                    %job_id,
                    %status,
                    attempted = counts.attempted,
                    scraped = counts.scraped,
                    errors = counts.errors,
                    duplicates = counts.duplicates,
                    skipped = counts.skipped,
                    "Job finished"
                );
            }
        }
    }
}
