//! Job orchestrator: drives one job across its sources.
//!
//! Sources run through a bounded pool; inside a source, candidates run
//! through a second bounded pool gated by a per-source [`Throttle`]. Every
//! attempted candidate ends as exactly one of scraped, duplicate, skipped
//! or error, and counters are atomics so concurrent completions never lose
//! updates.
//!
//! Each failed attempt reaches the source's circuit as it happens. A failure
//! that opens the circuit stops the source mid-run. A half-open source runs
//! its candidates one at a time until a fetch succeeds or a candidate fails.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::alert::{Alert, AlertMonitor};
use crate::circuit_breaker::{CircuitState, CircuitTransition};
use crate::config::OrchestratorConfig;
use crate::dedup::{DuplicateDetector, DuplicateReason, normalize_url};
use crate::error::{AppError, ErrorCategory, Severity};
use crate::events::JobEvent;
use crate::job::{
    ErrorSummary, Job, JobCounts, JobId, JobOutcome, JobProgress, JobStatus, JobStatusReport,
    SourceCounts, SourceReport, SourceStatus, TriggerJobRequest,
};
use crate::models::{Candidate, ErrorEvent, ScrapedContent, SourceId};
use crate::recovery::{AttemptFailure, RecoveryEngine, RecoveryFailure, RecoveryStrategy, Scope};
use crate::source::{Source, SourceOutcome};
use crate::throttle::{Throttle, ThrottleConfig};
use crate::traits::{
    AlertSink, CandidateProvider, ContentExtractor, ContentStore, EventSink, Fetcher, JobStore,
    SourceRegistry, UpsertOutcome,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Everything the orchestrator talks to.
#[derive(Debug, Clone)]
pub struct Collaborators<F, P, X, S, J, R, E, A> {
    pub fetcher: F,
    pub provider: P,
    pub extractor: X,
    pub content: S,
    pub jobs: J,
    pub sources: R,
    pub events: E,
    pub alerts: A,
}

// ---------------------------------------------------------------------------
// Job-scoped state
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Counters {
    attempted: AtomicU64,
    scraped: AtomicU64,
    errors: AtomicU64,
    duplicates: AtomicU64,
    skipped: AtomicU64,
    by_category: [AtomicU64; ErrorCategory::ALL.len()],
}

impl Counters {
    fn bump(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn load(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    /// Error event not tied to a candidate (discovery, unknown source).
    fn record_source_error(&self, category: ErrorCategory) {
        Self::bump(&self.by_category[category.index()]);
    }

    fn record_candidate_error(&self, category: ErrorCategory) {
        Self::bump(&self.errors);
        self.record_source_error(category);
    }

    fn summary(&self) -> ErrorSummary {
        ErrorCategory::ALL
            .into_iter()
            .filter_map(|c| {
                let n = Self::load(&self.by_category[c.index()]);
                (n > 0).then_some((c, n))
            })
            .collect()
    }

    fn dominant_category(&self) -> ErrorCategory {
        ErrorCategory::ALL
            .into_iter()
            .max_by_key(|c| Self::load(&self.by_category[c.index()]))
            .unwrap_or(ErrorCategory::Unknown)
    }
}

struct JobRun<S> {
    job_id: JobId,
    request: TriggerJobRequest,
    budget: Duration,
    triggered_at: DateTime<Utc>,
    cancel: CancellationToken,
    budget_expired: AtomicBool,
    status: Mutex<JobStatus>,
    counters: Counters,
    reports: Mutex<Vec<SourceReport>>,
    detector: DuplicateDetector<S>,
}

impl<S: ContentStore> JobRun<S> {
    /// Requested source ids with duplicates removed, in request order.
    fn requested(&self) -> Vec<SourceId> {
        let mut seen = HashSet::new();
        self.request
            .sources
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect()
    }

    fn push_report(&self, report: SourceReport) {
        lock(&self.reports).push(report);
    }

    /// Finished reports in request order, with `pending` entries for
    /// sources that have not reported yet.
    fn reports(&self) -> Vec<SourceReport> {
        let done = lock(&self.reports).clone();
        self.requested()
            .into_iter()
            .map(|id| {
                done.iter()
                    .find(|r| r.source_id == id)
                    .cloned()
                    .unwrap_or_else(|| SourceReport::new(id, SourceStatus::Pending))
            })
            .collect()
    }

    fn counts(&self, reports: &[SourceReport]) -> JobCounts {
        let c = &self.counters;
        let tally = |pred: fn(SourceStatus) -> bool| {
            reports.iter().filter(|r| pred(r.status)).count() as u64
        };
        JobCounts {
            attempted: Counters::load(&c.attempted),
            scraped: Counters::load(&c.scraped),
            errors: Counters::load(&c.errors),
            duplicates: Counters::load(&c.duplicates),
            skipped: Counters::load(&c.skipped),
            sources_processed: tally(is_processed),
            sources_failed: tally(|s| s == SourceStatus::Failed),
            sources_skipped: tally(|s| s == SourceStatus::Skipped),
        }
    }

    fn progress(&self) -> JobProgress {
        JobProgress {
            counts: self.counts(&self.reports()),
            error_summary: self.counters.summary(),
        }
    }

    fn live_report(&self) -> JobStatusReport {
        let sources = self.reports();
        JobStatusReport {
            job_id: self.job_id,
            status: *lock(&self.status),
            counts: self.counts(&sources),
            error_summary: self.counters.summary(),
            sources,
            triggered_at: self.triggered_at,
            completed_at: None,
            message: None,
        }
    }
}

fn is_processed(status: SourceStatus) -> bool {
    matches!(
        status,
        SourceStatus::Succeeded | SourceStatus::Degraded | SourceStatus::Failed
    )
}

/// Terminal status from the per-source reports.
///
/// Failed when nothing was processed or every processed source failed.
/// Successful requires zero candidate errors, no failed source and a run
/// that was neither cancelled nor cut short by its budget.
fn final_status(reports: &[SourceReport], counts: &JobCounts, interrupted: bool) -> JobStatus {
    let processed: Vec<_> = reports.iter().filter(|r| is_processed(r.status)).collect();
    if processed.is_empty() || processed.iter().all(|r| r.status == SourceStatus::Failed) {
        return JobStatus::Failed;
    }
    let any_failed = processed.iter().any(|r| r.status == SourceStatus::Failed);
    if counts.errors == 0 && !any_failed && !interrupted {
        JobStatus::Successful
    } else {
        JobStatus::Partial
    }
}

// ---------------------------------------------------------------------------
// Source-scoped state
// ---------------------------------------------------------------------------

struct SourceRun {
    source: Source,
    /// Child of the job token; cancelled on `abort-source`.
    cancel: CancellationToken,
    abort_reason: Mutex<Option<String>>,
    throttle: Throttle,
    recovery: RecoveryEngine,
    max_fetches: usize,
    discovered: AtomicU64,
    attempted: AtomicU64,
    /// Candidates whose page fetch succeeded.
    fetched: AtomicU64,
    scraped: AtomicU64,
    errors: AtomicU64,
    duplicates: AtomicU64,
    skipped: AtomicU64,
    critical: AtomicU64,
}

impl SourceRun {
    fn new(
        source: Source,
        config: &OrchestratorConfig,
        recovery: &RecoveryEngine,
        cancel: CancellationToken,
    ) -> Self {
        let delay = source
            .config
            .request_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(config.politeness.delay);
        let throttle =
            Throttle::new(ThrottleConfig::new(delay).with_jitter(config.politeness.jitter));
        let max_fetches = source
            .config
            .max_concurrent_fetches
            .unwrap_or(config.max_concurrent_fetches)
            .max(1);

        Self {
            recovery: recovery.for_source(&source.config),
            source,
            cancel,
            abort_reason: Mutex::new(None),
            throttle,
            max_fetches,
            discovered: AtomicU64::new(0),
            attempted: AtomicU64::new(0),
            fetched: AtomicU64::new(0),
            scraped: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            critical: AtomicU64::new(0),
        }
    }

    fn id(&self) -> &str {
        &self.source.id
    }

    /// Records the first abort reason and stops dispatch for this source.
    fn abort(&self, reason: &str) {
        lock(&self.abort_reason).get_or_insert_with(|| reason.to_string());
        self.cancel.cancel();
    }

    fn counts(&self) -> SourceCounts {
        SourceCounts {
            discovered: Counters::load(&self.discovered),
            attempted: Counters::load(&self.attempted),
            scraped: Counters::load(&self.scraped),
            errors: Counters::load(&self.errors),
            duplicates: Counters::load(&self.duplicates),
            skipped: Counters::load(&self.skipped),
        }
    }

    fn report(&self) -> SourceReport {
        let counts = self.counts();
        let abort_reason = lock(&self.abort_reason).clone();

        let (status, message) = match abort_reason {
            Some(reason) => (SourceStatus::Failed, Some(format!("aborted: {reason}"))),
            None if counts.attempted > 0 && counts.errors == counts.attempted => (
                SourceStatus::Failed,
                Some(format!("all {} attempted candidates failed", counts.attempted)),
            ),
            None if counts.errors > 0 => (SourceStatus::Degraded, None),
            None if counts.attempted == 0
                && counts.discovered > 0
                && self.cancel.is_cancelled() =>
            {
                (
                    SourceStatus::Pending,
                    Some("job stopped before any candidate was attempted".to_string()),
                )
            }
            None => (SourceStatus::Succeeded, None),
        };

        SourceReport {
            source_id: self.source.id.clone(),
            status,
            counts,
            message,
        }
    }
}

/// How a candidate that did not error ended.
enum Finished {
    Scraped,
    Duplicate,
    Skipped,
}

struct CandidateFailure {
    error: AppError,
    strategy: RecoveryStrategy,
    retries: u32,
}

impl From<RecoveryFailure> for CandidateFailure {
    fn from(f: RecoveryFailure) -> Self {
        let strategy = if f.cancelled {
            RecoveryStrategy::Skip
        } else {
            f.decision.strategy
        };
        Self {
            error: f.error,
            strategy,
            retries: f.retries,
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

struct Inner<F, P, X, S, J, R, E, A> {
    c: Collaborators<F, P, X, S, J, R, E, A>,
    config: OrchestratorConfig,
    recovery: RecoveryEngine,
    monitor: AlertMonitor,
    active: Mutex<HashMap<JobId, Arc<JobRun<S>>>>,
}

pub struct Orchestrator<F, P, X, S, J, R, E, A> {
    inner: Arc<Inner<F, P, X, S, J, R, E, A>>,
}

impl<F, P, X, S, J, R, E, A> Clone for Orchestrator<F, P, X, S, J, R, E, A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F, P, X, S, J, R, E, A> Orchestrator<F, P, X, S, J, R, E, A>
where
    F: Fetcher + 'static,
    P: CandidateProvider + 'static,
    X: ContentExtractor + 'static,
    S: ContentStore + 'static,
    J: JobStore + 'static,
    R: SourceRegistry + 'static,
    E: EventSink + 'static,
    A: AlertSink + 'static,
{
    pub fn new(
        collaborators: Collaborators<F, P, X, S, J, R, E, A>,
        config: OrchestratorConfig,
    ) -> Self {
        let recovery = RecoveryEngine::new(config.strategies.clone(), config.retry.clone());
        let monitor = AlertMonitor::new(config.alerts.clone());
        Self {
            inner: Arc::new(Inner {
                c: collaborators,
                config,
                recovery,
                monitor,
                active: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// Validate and persist the job, then run it in the background.
    pub async fn trigger_job(&self, request: TriggerJobRequest) -> Result<JobId, AppError> {
        let run = self.prepare(request).await?;
        let job_id = run.job_id;
        let this = self.clone();
        tokio::spawn(async move {
            this.execute(run).await;
        });
        Ok(job_id)
    }

    /// Validate, persist and run the job to completion in the caller's task.
    pub async fn run_job(&self, request: TriggerJobRequest) -> Result<JobStatusReport, AppError> {
        let run = self.prepare(request).await?;
        Ok(self.execute(run).await)
    }

    /// Live counters for a job running in this process, the stored record otherwise.
    pub async fn get_job_status(&self, job_id: JobId) -> Result<Option<JobStatusReport>, AppError> {
        let live = lock(&self.inner.active).get(&job_id).cloned();
        if let Some(run) = live {
            return Ok(Some(run.live_report()));
        }
        let job = self.inner.c.jobs.get_job(job_id).await?;
        Ok(job.as_ref().map(JobStatusReport::from))
    }

    /// Cooperative cancellation. Returns false when the job is not running here.
    pub async fn cancel_job(&self, job_id: JobId) -> bool {
        let live = lock(&self.inner.active).get(&job_id).cloned();
        match live {
            Some(run) => {
                run.cancel.cancel();
                self.emit(job_id, JobEvent::Cancelled).await;
                true
            }
            None => false,
        }
    }

    /// Ids of jobs currently running in this process.
    pub fn active_jobs(&self) -> Vec<JobId> {
        lock(&self.inner.active).keys().copied().collect()
    }

    async fn prepare(&self, request: TriggerJobRequest) -> Result<Arc<JobRun<S>>, AppError> {
        request.validate()?;

        let job = Job::new(Uuid::new_v4(), &request);
        self.inner.c.jobs.create_job(&job).await?;

        let run = Arc::new(JobRun {
            job_id: job.id,
            budget: request.timeout_budget.unwrap_or(self.inner.config.job_timeout),
            request,
            triggered_at: job.triggered_at,
            cancel: CancellationToken::new(),
            budget_expired: AtomicBool::new(false),
            status: Mutex::new(JobStatus::New),
            counters: Counters::default(),
            reports: Mutex::new(Vec::new()),
            detector: DuplicateDetector::new(
                self.inner.c.content.clone(),
                self.inner.config.near_duplicate,
            ),
        });
        lock(&self.inner.active).insert(run.job_id, Arc::clone(&run));
        Ok(run)
    }

    async fn execute(&self, run: Arc<JobRun<S>>) -> JobStatusReport {
        let job_id = run.job_id;
        let watchdog = self.spawn_budget_watchdog(&run);

        if let Err(e) = self.inner.c.jobs.transition_job(job_id, JobStatus::InProgress).await {
            tracing::error!(%job_id, error = %e, "Failed to start job");
            watchdog.abort();
            let (category, _) = e.classify();
            run.counters.record_source_error(category);
            return self
                .finish(&run, JobStatus::Failed, Some(format!("Failed to start job: {e}")))
                .await;
        }
        *lock(&run.status) = JobStatus::InProgress;

        let requested = run.requested();
        self.emit(
            job_id,
            JobEvent::JobStarted {
                sources: &requested,
                articles_per_source: run.request.articles_per_source,
            },
        )
        .await;

        let eligible = match self.inner.c.sources.list_eligible_sources().await {
            Ok(sources) => sources,
            Err(e) => {
                watchdog.abort();
                let (category, _) = e.classify();
                run.counters.record_source_error(category);
                return self
                    .finish(&run, JobStatus::Failed, Some(format!("Cannot list sources: {e}")))
                    .await;
            }
        };

        let mut by_id: HashMap<SourceId, Source> =
            eligible.into_iter().map(|s| (s.id.clone(), s)).collect();
        let mut to_run = Vec::new();
        for id in &requested {
            match by_id.remove(id) {
                Some(source) => to_run.push(source),
                None => {
                    self.emit(job_id, JobEvent::SourceNotEligible { source_id: id })
                        .await;
                    run.counters
                        .record_source_error(ErrorCategory::Configuration);
                    run.push_report(
                        SourceReport::new(id.clone(), SourceStatus::Failed)
                            .with_message("source is unknown or disabled"),
                    );
                }
            }
        }

        stream::iter(to_run)
            .for_each_concurrent(self.inner.config.max_concurrent_sources, |source| {
                let this = self.clone();
                let run = Arc::clone(&run);
                async move {
                    let report = this.process_source(&run, source).await;
                    this.emit(run.job_id, JobEvent::SourceFinished { report: &report })
                        .await;
                    run.push_report(report);
                    if let Err(e) = this
                        .inner
                        .c
                        .jobs
                        .record_progress(run.job_id, &run.progress())
                        .await
                    {
                        tracing::warn!(job_id = %run.job_id, error = %e, "Failed to record progress");
                    }
                }
            })
            .await;

        watchdog.abort();

        let reports = run.reports();
        let counts = run.counts(&reports);
        let status = final_status(&reports, &counts, run.cancel.is_cancelled());
        self.finish(&run, status, None).await
    }

    fn spawn_budget_watchdog(&self, run: &Arc<JobRun<S>>) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        let run = Arc::clone(run);
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(run.budget) => {
                    run.budget_expired.store(true, Ordering::Relaxed);
                    run.cancel.cancel();
                    this.emit(run.job_id, JobEvent::BudgetExpired { budget: run.budget }).await;
                }
                () = run.cancel.cancelled() => {}
            }
        })
    }

    async fn finish(
        &self,
        run: &JobRun<S>,
        status: JobStatus,
        message: Option<String>,
    ) -> JobStatusReport {
        let job_id = run.job_id;
        let sources = run.reports();
        let counts = run.counts(&sources);
        let error_summary = run.counters.summary();

        let outcome = JobOutcome {
            status,
            progress: JobProgress {
                counts,
                error_summary: error_summary.clone(),
            },
            source_reports: sources.clone(),
            message: message.clone(),
        };
        if let Err(e) = self.inner.c.jobs.finalize_job(job_id, &outcome).await {
            tracing::error!(%job_id, error = %e, "Failed to finalize job");
        }
        *lock(&run.status) = status;

        self.emit(
            job_id,
            JobEvent::JobFinished {
                status,
                counts: &counts,
            },
        )
        .await;
        lock(&self.inner.active).remove(&job_id);

        JobStatusReport {
            job_id,
            status,
            counts,
            error_summary,
            sources,
            triggered_at: run.triggered_at,
            completed_at: Some(Utc::now()),
            message,
        }
    }

    async fn process_source(&self, run: &Arc<JobRun<S>>, source: Source) -> SourceReport {
        let job_id = run.job_id;
        let source_id = source.id.clone();

        let trial = source.circuit.state == CircuitState::HalfOpen;
        match source.circuit.state {
            CircuitState::Open => {
                self.emit(
                    job_id,
                    JobEvent::SourceSkipped {
                        source_id: &source_id,
                        reason: "circuit-open",
                    },
                )
                .await;
                self.report_outcome(&source_id, SourceOutcome::Skipped).await;
                return SourceReport::new(source_id, SourceStatus::Skipped)
                    .with_message("circuit-open");
            }
            CircuitState::HalfOpen => {
                self.emit(job_id, JobEvent::CircuitTrial { source_id: &source_id })
                    .await;
            }
            CircuitState::Closed => {}
        }

        if run.cancel.is_cancelled() {
            return SourceReport::new(source_id, SourceStatus::Pending)
                .with_message("job stopped before source started");
        }

        let src = Arc::new(SourceRun::new(
            source,
            &self.inner.config,
            &self.inner.recovery,
            run.cancel.child_token(),
        ));
        let limit = run.request.articles_per_source as usize;

        let provider = &self.inner.c.provider;
        let fetch_timeout = self.inner.config.fetch_timeout;
        let source_run: &SourceRun = &src;
        let recovered = src
            .recovery
            .execute(Scope::Source, &src.cancel, || async move {
                let result = match tokio::time::timeout(
                    fetch_timeout,
                    provider.discover(&source_run.source, limit),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(AppError::Timeout(fetch_timeout.as_secs())),
                };
                if let Err(e) = &result {
                    self.observe_failure(job_id, source_run, e).await;
                }
                result
            })
            .await;
        self.log_attempt_failures(job_id, &src, None, &recovered.failures)
            .await;

        let mut candidates = match recovered.result {
            Ok(candidates) => candidates,
            Err(failure) => return self.fail_discovery(run, &src, failure).await,
        };
        candidates.truncate(limit);
        src.discovered
            .store(candidates.len() as u64, Ordering::Relaxed);
        self.emit(
            job_id,
            JobEvent::CandidatesDiscovered {
                source_id: &source_id,
                count: candidates.len(),
            },
        )
        .await;

        let normalized: Vec<String> = candidates
            .iter()
            .filter_map(|c| normalize_url(&c.url).ok())
            .collect();
        let known = match run.detector.prefetch_known_urls(&normalized).await {
            Ok(known) => Some(known),
            Err(e) => {
                tracing::warn!(
                    %job_id,
                    %source_id,
                    error = %e,
                    "Batch URL pre-check failed, falling back to per-candidate lookups"
                );
                None
            }
        };
        let known = Arc::new(known);

        let mut candidates = candidates.into_iter();
        if trial {
            // Half-open: one candidate at a time until a fetch succeeds or
            // a candidate fails.
            for candidate in candidates.by_ref() {
                if src.cancel.is_cancelled() {
                    break;
                }
                self.process_candidate(run, &src, known.as_ref().as_ref(), candidate)
                    .await;
                if Counters::load(&src.fetched) > 0 {
                    self.close_after_trial(job_id, &src).await;
                    break;
                }
                if Counters::load(&src.errors) > 0 {
                    src.abort("circuit trial failed");
                    break;
                }
            }
        }

        stream::iter(candidates)
            .for_each_concurrent(src.max_fetches, |candidate| {
                let this = self.clone();
                let run = Arc::clone(run);
                let src = Arc::clone(&src);
                let known = Arc::clone(&known);
                async move {
                    this.process_candidate(&run, &src, known.as_ref().as_ref(), candidate)
                        .await;
                }
            })
            .await;

        let report = src.report();
        if matches!(
            report.status,
            SourceStatus::Succeeded | SourceStatus::Degraded
        ) {
            self.report_outcome(&source_id, SourceOutcome::Success).await;
        }
        report
    }

    async fn close_after_trial(&self, job_id: JobId, src: &SourceRun) {
        let transition = self.report_outcome(src.id(), SourceOutcome::Success).await;
        if transition.is_some_and(|t| t.to == CircuitState::Closed) {
            self.emit(job_id, JobEvent::CircuitClosed { source_id: src.id() })
                .await;
        }
    }

    async fn fail_discovery(
        &self,
        run: &JobRun<S>,
        src: &SourceRun,
        failure: RecoveryFailure,
    ) -> SourceReport {
        let (category, severity) = failure.error.classify();
        let message = failure.error.to_string();
        run.counters.record_source_error(category);

        self.emit(
            run.job_id,
            JobEvent::SourceFailed {
                source_id: src.id(),
                category,
                message: &message,
            },
        )
        .await;

        if failure.decision.strategy == RecoveryStrategy::Escalate
            && let Some(alert) =
                self.inner
                    .monitor
                    .escalation(run.job_id, src.id(), category, severity, &message)
        {
            self.raise(run.job_id, &alert).await;
        }
        if severity == Severity::Critical {
            let critical = Counters::bump(&src.critical);
            if let Some(alert) =
                self.inner
                    .monitor
                    .check_critical(run.job_id, src.id(), critical, category)
            {
                self.raise(run.job_id, &alert).await;
            }
        }

        SourceReport::new(src.id(), SourceStatus::Failed)
            .with_message(format!("discovery failed: {message}"))
    }

    async fn process_candidate(
        &self,
        run: &JobRun<S>,
        src: &SourceRun,
        known: Option<&HashSet<String>>,
        candidate: Candidate,
    ) {
        if src.cancel.is_cancelled() {
            return;
        }
        Counters::bump(&run.counters.attempted);
        Counters::bump(&src.attempted);

        match self.candidate_pipeline(run, src, known, &candidate).await {
            Ok(Finished::Scraped) => {
                Counters::bump(&run.counters.scraped);
                Counters::bump(&src.scraped);
            }
            Ok(Finished::Duplicate) => {
                Counters::bump(&run.counters.duplicates);
                Counters::bump(&src.duplicates);
            }
            Ok(Finished::Skipped) => {
                Counters::bump(&run.counters.skipped);
                Counters::bump(&src.skipped);
            }
            Err(failure) => self.record_candidate_error(run, src, &candidate, failure).await,
        }

        let c = &run.counters;
        if let Some(alert) = self.inner.monitor.check_error_rate(
            run.job_id,
            Counters::load(&c.attempted),
            Counters::load(&c.errors),
            c.dominant_category(),
        ) {
            self.raise(run.job_id, &alert).await;
        }
    }

    /// Errors not produced by the retry loop are never retried.
    fn immediate_failure(&self, src: &SourceRun, error: AppError) -> CandidateFailure {
        let (category, severity) = error.classify();
        let decision = src.recovery.decide(category, severity, 0, Scope::Candidate);
        let strategy = if decision.strategy.is_retry() {
            RecoveryStrategy::Skip
        } else {
            decision.strategy
        };
        CandidateFailure {
            error,
            strategy,
            retries: 0,
        }
    }

    async fn candidate_pipeline(
        &self,
        run: &JobRun<S>,
        src: &SourceRun,
        known: Option<&HashSet<String>>,
        candidate: &Candidate,
    ) -> Result<Finished, CandidateFailure> {
        let job_id = run.job_id;
        let url = candidate.url.as_str();

        let normalized = normalize_url(url).map_err(|e| self.immediate_failure(src, e))?;
        let verdict = run
            .detector
            .check_url(&normalized, known)
            .await
            .map_err(|e| self.immediate_failure(src, e))?;
        if let Some(reason) = verdict.reason.filter(|_| verdict.is_duplicate) {
            self.emit(
                job_id,
                JobEvent::CandidateDuplicate {
                    source_id: src.id(),
                    url,
                    reason,
                },
            )
            .await;
            return Ok(Finished::Duplicate);
        }

        let fetcher = &self.inner.c.fetcher;
        let fetch_timeout = self.inner.config.fetch_timeout;
        let recovered = src
            .recovery
            .execute(Scope::Candidate, &src.cancel, || async move {
                src.throttle.wait().await;
                let result = match tokio::time::timeout(fetch_timeout, fetcher.fetch(url)).await {
                    Ok(result) => result,
                    Err(_) => Err(AppError::Timeout(fetch_timeout.as_secs())),
                };
                if let Err(e) = &result {
                    self.observe_failure(job_id, src, e).await;
                }
                result
            })
            .await;
        self.log_attempt_failures(job_id, src, Some(url), &recovered.failures)
            .await;
        let html = recovered.result.map_err(CandidateFailure::from)?;
        Counters::bump(&src.fetched);

        let result = self
            .inner
            .c
            .extractor
            .extract(&html, url, self.inner.config.trace_extraction);
        if let Some(trace) = &result.trace {
            tracing::debug!(%job_id, %url, ?trace, "Extraction trace");
        }

        let rejection = match (&result.rejection, self.inner.config.min_quality_score) {
            (Some(rejection), _) => Some(rejection.to_string()),
            _ if result.title.is_empty() || result.body.is_empty() => {
                Some("empty extraction".to_string())
            }
            (None, Some(min)) if result.quality_score < min => Some(format!(
                "quality score {} below {min}",
                result.quality_score
            )),
            _ => None,
        };
        if let Some(reason) = rejection {
            self.emit(
                job_id,
                JobEvent::CandidateSkipped {
                    source_id: src.id(),
                    url,
                    reason: &reason,
                },
            )
            .await;
            return Ok(Finished::Skipped);
        }

        let (verdict, fingerprint) = run
            .detector
            .check_content(&result)
            .await
            .map_err(|e| self.immediate_failure(src, e))?;
        if let Some(reason) = verdict.reason.filter(|_| verdict.is_duplicate) {
            self.emit(
                job_id,
                JobEvent::CandidateDuplicate {
                    source_id: src.id(),
                    url,
                    reason,
                },
            )
            .await;
            return Ok(Finished::Duplicate);
        }

        let record = ScrapedContent::new(job_id, candidate, normalized, &result)
            .with_fingerprint(fingerprint);
        let store = &self.inner.c.content;
        let record = &record;
        let recovered = src
            .recovery
            .execute(Scope::Candidate, &src.cancel, || async move {
                let stored = store.upsert_scraped_content(record).await;
                if let Err(e) = &stored {
                    self.observe_failure(job_id, src, e).await;
                }
                stored
            })
            .await;
        self.log_attempt_failures(job_id, src, Some(url), &recovered.failures)
            .await;

        match recovered.result.map_err(CandidateFailure::from)? {
            UpsertOutcome::Inserted(content_id) => {
                self.emit(
                    job_id,
                    JobEvent::CandidateScraped {
                        source_id: src.id(),
                        url,
                        content_id,
                        quality_score: result.quality_score,
                    },
                )
                .await;
                Ok(Finished::Scraped)
            }
            UpsertOutcome::Duplicate => {
                self.emit(
                    job_id,
                    JobEvent::CandidateDuplicate {
                        source_id: src.id(),
                        url,
                        reason: DuplicateReason::StoreConflict,
                    },
                )
                .await;
                Ok(Finished::Duplicate)
            }
        }
    }

    async fn record_candidate_error(
        &self,
        run: &JobRun<S>,
        src: &SourceRun,
        candidate: &Candidate,
        failure: CandidateFailure,
    ) {
        let job_id = run.job_id;
        let (category, severity) = failure.error.classify();
        let recoverable = src
            .recovery
            .decide(category, severity, 0, Scope::Candidate)
            .strategy
            .is_retry();
        let event = ErrorEvent::from_error(
            &failure.error,
            job_id,
            src.id(),
            Some(&candidate.url),
            failure.retries,
            recoverable,
        );
        run.counters.record_candidate_error(event.category);
        Counters::bump(&src.errors);

        self.emit(
            job_id,
            JobEvent::CandidateFailed {
                error: &event,
                strategy: failure.strategy,
            },
        )
        .await;

        if event.severity == Severity::Critical {
            let critical = Counters::bump(&src.critical);
            if let Some(alert) =
                self.inner
                    .monitor
                    .check_critical(job_id, src.id(), critical, event.category)
            {
                self.raise(job_id, &alert).await;
            }
        }

        match failure.strategy {
            RecoveryStrategy::AbortSource => {
                src.abort(&event.message);
                self.emit(
                    job_id,
                    JobEvent::SourceFailed {
                        source_id: src.id(),
                        category: event.category,
                        message: &event.message,
                    },
                )
                .await;
            }
            RecoveryStrategy::Escalate => {
                if let Some(alert) = self.inner.monitor.escalation(
                    job_id,
                    src.id(),
                    event.category,
                    event.severity,
                    &event.message,
                ) {
                    self.raise(job_id, &alert).await;
                }
            }
            _ => {}
        }
    }

    /// Emits one event per failed attempt. The circuit already saw each one
    /// through [`Self::observe_failure`].
    async fn log_attempt_failures(
        &self,
        job_id: JobId,
        src: &SourceRun,
        url: Option<&str>,
        failures: &[AttemptFailure],
    ) {
        for failure in failures {
            self.emit(
                job_id,
                JobEvent::AttemptFailed {
                    source_id: src.id(),
                    url,
                    category: failure.category,
                    severity: failure.severity,
                    strategy: failure.decision.strategy,
                    retry: failure.retry,
                    message: &failure.message,
                },
            )
            .await;
        }
    }

    /// Feeds one failed attempt to the source's circuit. When that opens the
    /// circuit, the source stops: no new candidate or retry is dispatched.
    async fn observe_failure(&self, job_id: JobId, src: &SourceRun, error: &AppError) {
        let (category, severity) = error.classify();
        let transition = self
            .report_outcome(src.id(), SourceOutcome::Failure { category, severity })
            .await;
        if transition.is_some_and(|t| t.to == CircuitState::Open) {
            src.abort("circuit-open");
            self.emit(job_id, JobEvent::CircuitOpened { source_id: src.id() })
                .await;
        }
    }

    async fn report_outcome(
        &self,
        source_id: &str,
        outcome: SourceOutcome,
    ) -> Option<CircuitTransition> {
        match self
            .inner
            .c
            .sources
            .report_source_outcome(source_id, outcome)
            .await
        {
            Ok(transition) => transition,
            Err(e) => {
                tracing::warn!(%source_id, error = %e, "Failed to report source outcome");
                None
            }
        }
    }

    async fn raise(&self, job_id: JobId, alert: &Alert) {
        if let Err(e) = self.inner.c.alerts.raise_alert(alert).await {
            tracing::warn!(%job_id, error = %e, "Failed to deliver alert");
        }
        self.emit(job_id, JobEvent::AlertRaised { alert }).await;
    }

    async fn emit(&self, job_id: JobId, event: JobEvent<'_>) {
        event.log(job_id);
        if let Err(e) = self
            .inner
            .c
            .events
            .append_structured_event(job_id, event.level(), &event.message(), event.data())
            .await
        {
            tracing::warn!(%job_id, error = %e, "Failed to append job event");
        }
    }
}
