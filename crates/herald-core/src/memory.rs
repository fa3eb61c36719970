//! In-process collaborators for single-run use (CLI without a database)
//! and tests. Each one is cheaply cloneable and shares its state.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use uuid::Uuid;

use crate::circuit_breaker::{CircuitBreaker, CircuitTransition, SourceCircuitState};
use crate::error::AppError;
use crate::job::{Job, JobId, JobOutcome, JobProgress, JobStatus};
use crate::models::{ScrapedContent, SourceId};
use crate::simhash::hamming_distance;
use crate::source::{Source, SourceDefinition, SourceOutcome};
use crate::traits::{ContentStore, JobStore, SourceRegistry, UpsertOutcome};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("Recovered from poisoned mutex");
        poisoned.into_inner()
    })
}

// ---------------------------------------------------------------------------
// Content store
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ContentInner {
    by_hash: HashMap<String, Uuid>,
    by_url: HashMap<String, Uuid>,
    records: Vec<(Uuid, ScrapedContent)>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryContentStore {
    inner: Arc<Mutex<ContentInner>>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn records(&self) -> Vec<ScrapedContent> {
        lock(&self.inner)
            .records
            .iter()
            .map(|(_, r)| r.clone())
            .collect()
    }
}

impl ContentStore for InMemoryContentStore {
    async fn upsert_scraped_content(&self, record: &ScrapedContent) -> Result<UpsertOutcome, AppError> {
        let mut inner = lock(&self.inner);
        if inner.by_hash.contains_key(&record.content_hash)
            || inner.by_url.contains_key(&record.normalized_url)
        {
            return Ok(UpsertOutcome::Duplicate);
        }
        let id = Uuid::new_v4();
        inner.by_hash.insert(record.content_hash.clone(), id);
        inner.by_url.insert(record.normalized_url.clone(), id);
        inner.records.push((id, record.clone()));
        Ok(UpsertOutcome::Inserted(id))
    }

    async fn exists_by_hash(&self, hash: &str) -> Result<bool, AppError> {
        Ok(lock(&self.inner).by_hash.contains_key(hash))
    }

    async fn exists_by_normalized_url(&self, normalized_url: &str) -> Result<bool, AppError> {
        Ok(lock(&self.inner).by_url.contains_key(normalized_url))
    }

    async fn existing_normalized_urls(&self, urls: &[String]) -> Result<HashSet<String>, AppError> {
        let inner = lock(&self.inner);
        Ok(urls
            .iter()
            .filter(|u| inner.by_url.contains_key(*u))
            .cloned()
            .collect())
    }

    async fn find_near_duplicate(
        &self,
        fingerprint: u64,
        max_distance: u32,
    ) -> Result<Option<u32>, AppError> {
        Ok(lock(&self.inner)
            .records
            .iter()
            .filter_map(|(_, r)| r.fingerprint)
            .map(|fp| hamming_distance(fp, fingerprint))
            .filter(|d| *d <= max_distance)
            .min())
    }
}

// ---------------------------------------------------------------------------
// Job store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct InMemoryJobStore {
    jobs: Arc<Mutex<HashMap<JobId, Job>>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(job_id: JobId) -> AppError {
    AppError::NotFound(format!("Job {job_id}"))
}

impl JobStore for InMemoryJobStore {
    async fn create_job(&self, job: &Job) -> Result<(), AppError> {
        let mut jobs = lock(&self.jobs);
        if jobs.contains_key(&job.id) {
            return Err(AppError::ValidationError(format!(
                "Job {} already exists",
                job.id
            )));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn transition_job(&self, job_id: JobId, to: JobStatus) -> Result<(), AppError> {
        let mut jobs = lock(&self.jobs);
        let job = jobs.get_mut(&job_id).ok_or_else(|| not_found(job_id))?;
        job.status = job.status.transition(to)?;
        let now = Utc::now();
        if to == JobStatus::InProgress {
            job.started_at = Some(now);
        }
        if to.is_terminal() {
            job.completed_at = Some(now);
        }
        Ok(())
    }

    async fn record_progress(&self, job_id: JobId, progress: &JobProgress) -> Result<(), AppError> {
        let mut jobs = lock(&self.jobs);
        let job = jobs.get_mut(&job_id).ok_or_else(|| not_found(job_id))?;
        if job.status.is_terminal() {
            return Err(AppError::InvalidTransition {
                from: job.status.as_str(),
                to: JobStatus::InProgress.as_str(),
            });
        }
        job.apply_progress(progress);
        Ok(())
    }

    async fn finalize_job(&self, job_id: JobId, outcome: &JobOutcome) -> Result<(), AppError> {
        let mut jobs = lock(&self.jobs);
        let job = jobs.get_mut(&job_id).ok_or_else(|| not_found(job_id))?;
        job.status = job.status.transition(outcome.status)?;
        job.apply_progress(&outcome.progress);
        job.source_reports = outcome.source_reports.clone();
        job.message = outcome.message.clone();
        job.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn get_job(&self, job_id: JobId) -> Result<Option<Job>, AppError> {
        Ok(lock(&self.jobs).get(&job_id).cloned())
    }

    async fn list_jobs(&self, limit: usize) -> Result<Vec<Job>, AppError> {
        let mut jobs: Vec<Job> = lock(&self.jobs).values().cloned().collect();
        jobs.sort_by(|a, b| b.triggered_at.cmp(&a.triggered_at));
        jobs.truncate(limit);
        Ok(jobs)
    }
}

// ---------------------------------------------------------------------------
// Source registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct RegisteredSource {
    source: Source,
    enabled: bool,
}

#[derive(Debug, Clone, Default)]
pub struct InMemorySourceRegistry {
    breaker: CircuitBreaker,
    sources: Arc<Mutex<BTreeMap<SourceId, RegisteredSource>>>,
}

impl InMemorySourceRegistry {
    pub fn new(breaker: CircuitBreaker) -> Self {
        Self {
            breaker,
            sources: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    pub fn with_sources(self, sources: impl IntoIterator<Item = Source>) -> Self {
        for source in sources {
            self.add_source(source, true);
        }
        self
    }

    pub fn from_definitions(
        breaker: CircuitBreaker,
        definitions: impl IntoIterator<Item = SourceDefinition>,
    ) -> Self {
        let registry = Self::new(breaker);
        for def in definitions {
            let enabled = def.enabled;
            registry.add_source(def.into(), enabled);
        }
        registry
    }

    /// Reads a JSON array of source definitions.
    pub fn load_json(breaker: CircuitBreaker, path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::ConfigError(format!("Cannot read sources file {}: {e}", path.display()))
        })?;
        let definitions: Vec<SourceDefinition> = serde_json::from_str(&raw)?;
        Ok(Self::from_definitions(breaker, definitions))
    }

    pub fn add_source(&self, source: Source, enabled: bool) {
        lock(&self.sources).insert(source.id.clone(), RegisteredSource { source, enabled });
    }

    pub fn circuit(&self, source_id: &str) -> Option<SourceCircuitState> {
        lock(&self.sources)
            .get(source_id)
            .map(|r| r.source.circuit.clone())
    }

    pub fn all_sources(&self) -> Vec<(Source, bool)> {
        lock(&self.sources)
            .values()
            .map(|r| (r.source.clone(), r.enabled))
            .collect()
    }
}

impl SourceRegistry for InMemorySourceRegistry {
    async fn list_eligible_sources(&self) -> Result<Vec<Source>, AppError> {
        let now = Utc::now();
        let mut sources = lock(&self.sources);
        Ok(sources
            .values_mut()
            .filter(|r| r.enabled)
            .map(|r| {
                self.breaker.refresh(&mut r.source.circuit, now);
                r.source.clone()
            })
            .collect())
    }

    async fn report_source_outcome(
        &self,
        source_id: &str,
        outcome: SourceOutcome,
    ) -> Result<Option<CircuitTransition>, AppError> {
        let mut sources = lock(&self.sources);
        let registered = sources
            .get_mut(source_id)
            .ok_or_else(|| AppError::NotFound(format!("Source {source_id}")))?;
        Ok(self
            .breaker
            .apply(&mut registered.source.circuit, &outcome, Utc::now()))
    }
}
