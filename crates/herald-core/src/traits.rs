use std::collections::HashSet;
use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::alert::Alert;
use crate::circuit_breaker::CircuitTransition;
use crate::error::AppError;
use crate::job::{Job, JobId, JobOutcome, JobProgress, JobStatus};
use crate::models::{Candidate, ExtractionResult, ScrapedContent};
use crate::source::{Source, SourceOutcome};

/// Fetches raw HTML content from a URL.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<String, AppError>> + Send;
}

/// Discovers article candidates for a source.
pub trait CandidateProvider: Send + Sync + Clone {
    /// Returns at most `limit` candidates, in listing order.
    fn discover(
        &self,
        source: &Source,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Candidate>, AppError>> + Send;
}

/// Turns article HTML into normalized fields. Never fails: malformed
/// markup degrades to empty fields and a rejection.
pub trait ContentExtractor: Send + Sync + Clone {
    fn extract(&self, html: &str, url: &str, trace: bool) -> ExtractionResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted(Uuid),
    /// The hash or normalized URL was already stored.
    Duplicate,
}

/// Scraped content persistence. Owns global dedup truth.
pub trait ContentStore: Send + Sync + Clone {
    /// Insert-if-absent on both the content hash and the normalized URL.
    fn upsert_scraped_content(
        &self,
        record: &ScrapedContent,
    ) -> impl Future<Output = Result<UpsertOutcome, AppError>> + Send;

    fn exists_by_hash(&self, hash: &str) -> impl Future<Output = Result<bool, AppError>> + Send;

    fn exists_by_normalized_url(
        &self,
        normalized_url: &str,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Batch form of [`exists_by_normalized_url`](Self::exists_by_normalized_url).
    /// Returns the subset of `urls` already stored.
    fn existing_normalized_urls(
        &self,
        urls: &[String],
    ) -> impl Future<Output = Result<HashSet<String>, AppError>> + Send {
        async move {
            let mut found = HashSet::new();
            for url in urls {
                if self.exists_by_normalized_url(url).await? {
                    found.insert(url.clone());
                }
            }
            Ok(found)
        }
    }

    /// Hamming distance to the closest stored fingerprint within
    /// `max_distance`, if any. Stores without fingerprints return `None`.
    fn find_near_duplicate(
        &self,
        _fingerprint: u64,
        _max_distance: u32,
    ) -> impl Future<Output = Result<Option<u32>, AppError>> + Send {
        async { Ok(None) }
    }
}

/// Persists job records.
pub trait JobStore: Send + Sync + Clone {
    fn create_job(&self, job: &Job) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Moves a job forward. Fails with `InvalidTransition` otherwise.
    fn transition_job(
        &self,
        job_id: JobId,
        to: JobStatus,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn record_progress(
        &self,
        job_id: JobId,
        progress: &JobProgress,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Writes the terminal status and final counters.
    fn finalize_job(
        &self,
        job_id: JobId,
        outcome: &JobOutcome,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn get_job(&self, job_id: JobId) -> impl Future<Output = Result<Option<Job>, AppError>> + Send;

    /// Most recent first.
    fn list_jobs(&self, limit: usize) -> impl Future<Output = Result<Vec<Job>, AppError>> + Send;
}

/// Lists sources and owns their circuit state.
pub trait SourceRegistry: Send + Sync + Clone {
    fn list_eligible_sources(&self) -> impl Future<Output = Result<Vec<Source>, AppError>> + Send;

    /// Applies the outcome to the source's circuit and returns the state
    /// change it caused, if any.
    fn report_source_outcome(
        &self,
        source_id: &str,
        outcome: SourceOutcome,
    ) -> impl Future<Output = Result<Option<CircuitTransition>, AppError>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl EventLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventLevel::Debug => "debug",
            EventLevel::Info => "info",
            EventLevel::Warn => "warn",
            EventLevel::Error => "error",
        }
    }
}

impl fmt::Display for EventLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Log/metrics collaborator for structured job events.
pub trait EventSink: Send + Sync + Clone {
    fn append_structured_event(
        &self,
        job_id: JobId,
        level: EventLevel,
        message: &str,
        data: serde_json::Value,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Monitoring collaborator for alerts.
pub trait AlertSink: Send + Sync + Clone {
    fn raise_alert(&self, alert: &Alert) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// EventSink that only writes to `tracing`.
#[derive(Debug, Clone, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    async fn append_structured_event(
        &self,
        job_id: JobId,
        level: EventLevel,
        message: &str,
        data: serde_json::Value,
    ) -> Result<(), AppError> {
        match level {
            EventLevel::Debug => tracing::debug!(%job_id, %data, "{message}"),
            EventLevel::Info => tracing::info!(%job_id, %data, "{message}"),
            EventLevel::Warn => tracing::warn!(%job_id, %data, "{message}"),
            EventLevel::Error => tracing::error!(%job_id, %data, "{message}"),
        }
        Ok(())
    }
}

/// AlertSink that logs alerts at error level.
#[derive(Debug, Clone, Default)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    async fn raise_alert(&self, alert: &Alert) -> Result<(), AppError> {
        tracing::error!(
            job_id = %alert.context.job_id,
            source_id = alert.context.source_id.as_deref().unwrap_or("-"),
            category = %alert.category,
            severity = %alert.severity,
            kind = ?alert.context.kind,
            "ALERT: {}",
            alert.context.message
        );
        Ok(())
    }
}
