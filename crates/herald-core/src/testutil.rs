//! Test utilities: mock implementations of the collaborator traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use uuid::Uuid;

use crate::alert::Alert;
use crate::dedup::content_hash;
use crate::error::AppError;
use crate::models::{Candidate, ExtractionResult, ExtractionTrace, Rejection, SourceId};
use crate::source::Source;
use crate::traits::{AlertSink, CandidateProvider, ContentExtractor, EventLevel, EventSink, Fetcher};
use crate::util::collapse_whitespace;

// ---------------------------------------------------------------------------
// MockResponse
// ---------------------------------------------------------------------------

/// Scripted outcome of one fetch. Cloneable, unlike `AppError`.
#[derive(Debug, Clone)]
pub enum MockResponse {
    Html(String),
    Status(u16),
    Timeout,
    Network(String),
    /// Transport failure without a status line.
    HttpError(String),
    Config(String),
    /// Sleeps, then succeeds.
    Delayed(Duration, String),
}

impl MockResponse {
    async fn resolve(self, url: &str) -> Result<String, AppError> {
        match self {
            MockResponse::Html(html) => Ok(html),
            MockResponse::Status(status) => Err(AppError::HttpStatus {
                status,
                url: url.to_string(),
            }),
            MockResponse::Timeout => Err(AppError::Timeout(20)),
            MockResponse::Network(msg) => Err(AppError::NetworkError(msg)),
            MockResponse::HttpError(msg) => Err(AppError::HttpError(msg)),
            MockResponse::Config(msg) => Err(AppError::ConfigError(msg)),
            MockResponse::Delayed(delay, html) => {
                tokio::time::sleep(delay).await;
                Ok(html)
            }
        }
    }
}

/// Pops the next scripted item; the last one repeats forever.
fn next_scripted<T: Clone>(script: &mut Vec<T>) -> Option<T> {
    if script.len() > 1 {
        Some(script.remove(0))
    } else {
        script.first().cloned()
    }
}

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Mock fetcher with per-URL scripts and a fallback for everything else.
///
/// Without a fallback, unscripted URLs answer 404.
#[derive(Clone, Default)]
pub struct MockFetcher {
    scripts: Arc<Mutex<HashMap<String, Vec<MockResponse>>>>,
    fallback: Option<MockResponse>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockFetcher {
    /// Every URL returns `html`.
    pub fn new(html: &str) -> Self {
        Self::default().with_fallback(MockResponse::Html(html.to_string()))
    }

    pub fn with_fallback(mut self, response: MockResponse) -> Self {
        self.fallback = Some(response);
        self
    }

    pub fn respond(self, url: &str, responses: Vec<MockResponse>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(url.to_string(), responses);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        self.calls.lock().unwrap().push(url.to_string());
        let response = {
            let mut scripts = self.scripts.lock().unwrap();
            match scripts.get_mut(url) {
                Some(script) => next_scripted(script),
                None => self.fallback.clone(),
            }
        };
        response
            .unwrap_or(MockResponse::Status(404))
            .resolve(url)
            .await
    }
}

// ---------------------------------------------------------------------------
// MockCandidateProvider
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum MockDiscovery {
    Urls(Vec<String>),
    /// Sleeps, then yields the URLs.
    Delayed(Duration, Vec<String>),
    Fail(MockResponse),
}

/// Mock provider with per-source discovery scripts. Unknown sources yield
/// no candidates.
#[derive(Clone, Default)]
pub struct MockCandidateProvider {
    scripts: Arc<Mutex<HashMap<SourceId, Vec<MockDiscovery>>>>,
    calls: Arc<Mutex<Vec<SourceId>>>,
}

impl MockCandidateProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_urls(self, source_id: &str, urls: &[&str]) -> Self {
        let urls = urls.iter().map(|u| u.to_string()).collect();
        self.with_discovery(source_id, vec![MockDiscovery::Urls(urls)])
    }

    pub fn with_discovery(self, source_id: &str, script: Vec<MockDiscovery>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(source_id.to_string(), script);
        self
    }

    pub fn calls_for(&self, source_id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|s| *s == source_id)
            .count()
    }
}

impl CandidateProvider for MockCandidateProvider {
    async fn discover(&self, source: &Source, limit: usize) -> Result<Vec<Candidate>, AppError> {
        self.calls.lock().unwrap().push(source.id.clone());
        let step = {
            let mut scripts = self.scripts.lock().unwrap();
            scripts.get_mut(&source.id).and_then(next_scripted)
        };
        let urls = match step {
            None => return Ok(Vec::new()),
            Some(MockDiscovery::Urls(urls)) => urls,
            Some(MockDiscovery::Delayed(delay, urls)) => {
                tokio::time::sleep(delay).await;
                urls
            }
            Some(MockDiscovery::Fail(response)) => {
                return response.resolve(&source.feed_url).await.map(|_| Vec::new());
            }
        };
        Ok(urls
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(i, url)| Candidate::new(url, source.id.clone()).with_position(i))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MockExtractor
// ---------------------------------------------------------------------------

/// Strips tags and treats the remaining text as the body.
#[derive(Debug, Clone)]
pub struct MockExtractor {
    pub min_body_chars: usize,
    pub quality_score: u8,
}

impl Default for MockExtractor {
    fn default() -> Self {
        Self {
            min_body_chars: 40,
            quality_score: 60,
        }
    }
}

fn strip_tags(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                text.push(' ');
            }
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }
    collapse_whitespace(&text)
}

impl ContentExtractor for MockExtractor {
    fn extract(&self, html: &str, url: &str, trace: bool) -> ExtractionResult {
        let trace = trace.then(ExtractionTrace::default);
        let body = strip_tags(html);
        let length = body.chars().count();
        if length < self.min_body_chars {
            return ExtractionResult::rejected(
                Rejection::BodyTooShort {
                    length,
                    minimum: self.min_body_chars,
                },
                trace,
            );
        }
        ExtractionResult {
            title: format!("Article at {url}"),
            content_hash: content_hash(&body),
            body,
            quality_score: self.quality_score,
            paragraph_count: 1,
            trace,
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Recording sinks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub job_id: Uuid,
    pub level: EventLevel,
    pub message: String,
    pub data: serde_json::Value,
}

#[derive(Clone, Default)]
pub struct RecordingEventSink {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn with_message_containing(&self, needle: &str) -> Vec<RecordedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.message.contains(needle))
            .collect()
    }
}

impl EventSink for RecordingEventSink {
    async fn append_structured_event(
        &self,
        job_id: Uuid,
        level: EventLevel,
        message: &str,
        data: serde_json::Value,
    ) -> Result<(), AppError> {
        self.events.lock().unwrap().push(RecordedEvent {
            job_id,
            level,
            message: message.to_string(),
            data,
        });
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct RecordingAlertSink {
    alerts: Arc<Mutex<Vec<Alert>>>,
}

impl RecordingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }
}

impl AlertSink for RecordingAlertSink {
    async fn raise_alert(&self, alert: &Alert) -> Result<(), AppError> {
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(())
    }
}
