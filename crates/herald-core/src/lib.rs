pub mod alert;
pub mod circuit_breaker;
pub mod config;
pub mod dedup;
pub mod error;
pub mod events;
pub mod job;
pub mod memory;
pub mod models;
pub mod orchestrator;
pub mod recovery;
pub mod simhash;
pub mod source;
pub mod throttle;
pub mod traits;
pub mod util;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use alert::{Alert, AlertConfig, AlertKind, AlertMonitor};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, SourceCircuitState};
pub use config::OrchestratorConfig;
pub use error::{AppError, ErrorCategory, Severity};
pub use job::{Job, JobCounts, JobId, JobStatus, JobStatusReport, SourceReport, SourceStatus, TriggerJobRequest};
pub use models::{Candidate, ErrorEvent, ExtractionResult, ScrapedContent, SourceId, compute_hash};
pub use orchestrator::{Collaborators, Orchestrator};
pub use recovery::{RecoveryStrategy, RetryPolicy};
pub use source::{Source, SourceConfig, SourceDefinition, SourceOutcome};
pub use traits::{
    AlertSink, CandidateProvider, ContentExtractor, ContentStore, EventLevel, EventSink, Fetcher,
    JobStore, SourceRegistry, TracingAlertSink, TracingEventSink, UpsertOutcome,
};
