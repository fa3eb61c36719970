use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use crate::alert::AlertConfig;
use crate::dedup::NearDuplicateConfig;
use crate::error::AppError;
use crate::recovery::{RetryPolicy, StrategyTable};
use crate::throttle::ThrottleConfig;

/// Orchestrator tuning.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_concurrent_sources: usize,
    /// Default per-source fetch concurrency; `SourceConfig` may override.
    pub max_concurrent_fetches: usize,
    /// Default politeness delay; `SourceConfig::request_delay_ms` may override.
    pub politeness: ThrottleConfig,
    pub fetch_timeout: Duration,
    /// Wall-clock budget when the request does not carry one.
    pub job_timeout: Duration,
    pub retry: RetryPolicy,
    pub strategies: StrategyTable,
    pub alerts: AlertConfig,
    pub near_duplicate: Option<NearDuplicateConfig>,
    /// Extractions scoring below this are skipped.
    pub min_quality_score: Option<u8>,
    /// Record per-field extraction provenance and debug-log it.
    pub trace_extraction: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sources: 4,
            max_concurrent_fetches: 4,
            politeness: ThrottleConfig::default(),
            fetch_timeout: Duration::from_secs(20),
            job_timeout: Duration::from_secs(30 * 60),
            retry: RetryPolicy::default(),
            strategies: StrategyTable::default(),
            alerts: AlertConfig::default(),
            near_duplicate: None,
            min_quality_score: None,
            trace_extraction: false,
        }
    }
}

impl OrchestratorConfig {
    /// Defaults overridden by `HERALD_*` environment variables.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let mut config = Self::default();

        if let Some(n) = parse_var::<usize>(&lookup, "HERALD_MAX_CONCURRENT_SOURCES")? {
            config.max_concurrent_sources = n;
        }
        if let Some(n) = parse_var::<usize>(&lookup, "HERALD_MAX_CONCURRENT_FETCHES")? {
            config.max_concurrent_fetches = n;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "HERALD_POLITENESS_DELAY_MS")? {
            config.politeness.delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "HERALD_POLITENESS_JITTER_MS")? {
            config.politeness.jitter = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "HERALD_FETCH_TIMEOUT_SECS")? {
            config.fetch_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "HERALD_JOB_TIMEOUT_SECS")? {
            config.job_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = parse_var::<u32>(&lookup, "HERALD_MAX_RETRIES")? {
            config.retry.max_retries = n;
        }
        if let Some(score) = parse_var::<u8>(&lookup, "HERALD_MIN_QUALITY_SCORE")? {
            config.min_quality_score = Some(score);
        }
        if let Some(distance) = parse_var::<u32>(&lookup, "HERALD_NEAR_DUPLICATE_DISTANCE")? {
            config.near_duplicate = Some(NearDuplicateConfig {
                max_distance: distance,
                ..Default::default()
            });
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.max_concurrent_sources == 0 {
            return Err(AppError::ConfigError(
                "max_concurrent_sources must be at least 1".into(),
            ));
        }
        if self.max_concurrent_fetches == 0 {
            return Err(AppError::ConfigError(
                "max_concurrent_fetches must be at least 1".into(),
            ));
        }
        if self.fetch_timeout.is_zero() || self.job_timeout.is_zero() {
            return Err(AppError::ConfigError("timeouts must be positive".into()));
        }
        if self.min_quality_score.is_some_and(|s| s > 100) {
            return Err(AppError::ConfigError(
                "min_quality_score must be within 0-100".into(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>, AppError>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| AppError::ConfigError(format!("{name}='{raw}': {e}"))),
    }
}
