use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{AppError, ErrorCategory, Severity};

/// Stable identifier of a source in the Source Registry.
pub type SourceId = String;

/// A discovered article URL awaiting extraction. Scoped to one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub url: String,
    pub source_id: SourceId,
    pub discovered_at: DateTime<Utc>,
    /// Link text or feed item title, when the listing offered one.
    pub title_hint: Option<String>,
    /// Position in the source listing (0 = first).
    pub position: usize,
}

impl Candidate {
    pub fn new(url: impl Into<String>, source_id: impl Into<SourceId>) -> Self {
        Self {
            url: url.into(),
            source_id: source_id.into(),
            discovered_at: Utc::now(),
            title_hint: None,
            position: 0,
        }
    }

    pub fn with_title_hint(mut self, hint: impl Into<String>) -> Self {
        self.title_hint = Some(hint.into());
        self
    }

    pub fn with_position(mut self, position: usize) -> Self {
        self.position = position;
        self
    }
}

/// The fields an extraction strategy can fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Title,
    Body,
    Author,
    PublishedAt,
}

impl Field {
    pub const ALL: [Field; 4] = [Field::Title, Field::Body, Field::Author, Field::PublishedAt];

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Title => "title",
            Field::Body => "body",
            Field::Author => "author",
            Field::PublishedAt => "published_at",
        }
    }
}

/// Extraction strategies, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyKind {
    #[serde(rename = "json-ld")]
    JsonLd,
    #[serde(rename = "selectors")]
    Selectors,
    #[serde(rename = "meta")]
    Meta,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::JsonLd => "json-ld",
            StrategyKind::Selectors => "selectors",
            StrategyKind::Meta => "meta",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a field value came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldTrace {
    pub field: Field,
    pub strategy: StrategyKind,
    /// CSS selector or JSON path that produced the value.
    pub selector: String,
    pub value: String,
}

/// Per-field provenance recorded when tracing is enabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractionTrace {
    /// The winning value for each filled field.
    pub selected: Vec<FieldTrace>,
    /// Every value a strategy offered, in evaluation order, winners included.
    pub considered: Vec<FieldTrace>,
}

impl ExtractionTrace {
    pub fn for_field(&self, field: Field) -> Option<&FieldTrace> {
        self.selected.iter().find(|t| t.field == field)
    }
}

/// Why the quality gate refused an extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Rejection {
    BodyTooShort { length: usize, minimum: usize },
    MissingTitle,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::BodyTooShort { length, minimum } => {
                write!(f, "body too short ({length} < {minimum} chars)")
            }
            Rejection::MissingTitle => write!(f, "missing title"),
        }
    }
}

/// Normalized article fields produced by a content extractor.
///
/// A rejected result has every content field empty; only `rejection`
/// (and `trace`, when requested) carry information.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractionResult {
    pub title: String,
    /// Paragraphs separated by a blank line.
    pub body: String,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    /// SHA-256 of the normalized body, empty when rejected.
    pub content_hash: String,
    /// 0–100.
    pub quality_score: u8,
    pub paragraph_count: usize,
    pub rejection: Option<Rejection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<ExtractionTrace>,
}

impl ExtractionResult {
    pub fn rejected(rejection: Rejection, trace: Option<ExtractionTrace>) -> Self {
        Self {
            rejection: Some(rejection),
            trace,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

/// Record handed to the content store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapedContent {
    pub job_id: Uuid,
    pub source_id: SourceId,
    pub url: String,
    pub normalized_url: String,
    pub title: String,
    pub body: String,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub content_hash: String,
    pub quality_score: u8,
    /// SimHash of the body, present when near-duplicate detection is on.
    pub fingerprint: Option<u64>,
}

impl ScrapedContent {
    pub fn new(
        job_id: Uuid,
        candidate: &Candidate,
        normalized_url: impl Into<String>,
        result: &ExtractionResult,
    ) -> Self {
        Self {
            job_id,
            source_id: candidate.source_id.clone(),
            url: candidate.url.clone(),
            normalized_url: normalized_url.into(),
            title: result.title.clone(),
            body: result.body.clone(),
            author: result.author.clone(),
            published_at: result.published_at,
            content_hash: result.content_hash.clone(),
            quality_score: result.quality_score,
            fingerprint: None,
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: Option<u64>) -> Self {
        self.fingerprint = fingerprint;
        self
    }
}

/// A categorized failure, attributed to a job, a source and optionally a candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub category: ErrorCategory,
    pub severity: Severity,
    pub recoverable: bool,
    pub retry_count: u32,
    pub message: String,
    pub job_id: Uuid,
    pub source_id: SourceId,
    pub candidate_url: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl ErrorEvent {
    /// `recoverable` is whether the strategy table would retry this
    /// failure's classification.
    pub fn from_error(
        error: &AppError,
        job_id: Uuid,
        source_id: &str,
        candidate_url: Option<&str>,
        retry_count: u32,
        recoverable: bool,
    ) -> Self {
        let (category, severity) = error.classify();
        Self {
            category,
            severity,
            recoverable,
            retry_count,
            message: error.to_string(),
            job_id,
            source_id: source_id.to_string(),
            candidate_url: candidate_url.map(str::to_string),
            occurred_at: Utc::now(),
        }
    }
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_hash_consistency() {
        let h1 = compute_hash("hello world");
        let h2 = compute_hash("hello world");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn test_compute_hash_different_inputs() {
        assert_ne!(compute_hash("hello"), compute_hash("world"));
    }

    #[test]
    fn test_error_event_carries_classification() {
        let job_id = Uuid::new_v4();
        let event = ErrorEvent::from_error(
            &AppError::Timeout(20),
            job_id,
            "daily-planet",
            Some("https://example.com/a"),
            2,
            true,
        );
        assert_eq!(event.category, ErrorCategory::Timeout);
        assert_eq!(event.severity, Severity::High);
        assert!(event.recoverable);
        assert_eq!(event.retry_count, 2);
        assert_eq!(event.job_id, job_id);
        assert_eq!(event.candidate_url.as_deref(), Some("https://example.com/a"));
    }

    #[test]
    fn test_rejected_result_is_empty() {
        let result = ExtractionResult::rejected(Rejection::MissingTitle, None);
        assert!(result.is_empty());
        assert!(result.title.is_empty());
        assert_eq!(result.quality_score, 0);
        assert_eq!(result.rejection, Some(Rejection::MissingTitle));
    }

    #[test]
    fn test_strategy_kind_serializes_kebab() {
        assert_eq!(
            serde_json::to_string(&StrategyKind::JsonLd).unwrap(),
            "\"json-ld\""
        );
        assert_eq!(StrategyKind::Selectors.to_string(), "selectors");
    }
}
