//! Recovery engine: maps a classified failure to a strategy and drives retries.
//!
//! Strategy selection is a table lookup keyed by `(category, severity)`,
//! overridable per source. Retries use exponential backoff with bounded
//! jitter; once the retry cap is reached the decision becomes `skip` for
//! candidate-scoped work and `abort-source` for source-scoped work.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, ErrorCategory, Severity};
use crate::source::{SourceConfig, StrategyOverride};
use crate::util::jitter_ms;

/// What to do about a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecoveryStrategy {
    Retry,
    RetryWithBackoff,
    Skip,
    AbortSource,
    Escalate,
}

impl RecoveryStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryStrategy::Retry => "retry",
            RecoveryStrategy::RetryWithBackoff => "retry-with-backoff",
            RecoveryStrategy::Skip => "skip",
            RecoveryStrategy::AbortSource => "abort-source",
            RecoveryStrategy::Escalate => "escalate",
        }
    }

    pub fn is_retry(&self) -> bool {
        matches!(
            self,
            RecoveryStrategy::Retry | RecoveryStrategy::RetryWithBackoff
        )
    }
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Built-in strategy for a `(category, severity)` pair.
pub fn default_strategy(category: ErrorCategory, severity: Severity) -> RecoveryStrategy {
    use ErrorCategory as C;
    use RecoveryStrategy as R;
    use Severity as S;

    match (category, severity) {
        (C::Network, S::Low) => R::Retry,
        (C::Network, S::Medium | S::High) => R::RetryWithBackoff,
        (C::Network, S::Critical) => R::AbortSource,

        (C::HttpStatus, S::Low | S::High) => R::Skip,
        (C::HttpStatus, S::Medium) => R::RetryWithBackoff,
        (C::HttpStatus, S::Critical) => R::AbortSource,

        (C::Parsing | C::Validation, S::Critical) => R::Escalate,
        (C::Parsing | C::Validation, _) => R::Skip,

        (C::Resource, S::Critical) => R::Escalate,
        (C::Resource, _) => R::RetryWithBackoff,

        (C::Configuration, S::Critical) => R::Escalate,
        (C::Configuration, _) => R::AbortSource,

        (C::Timeout, S::Critical) => R::AbortSource,
        (C::Timeout, _) => R::RetryWithBackoff,

        (C::Unknown, S::Low | S::High) => R::Skip,
        (C::Unknown, S::Medium) => R::Retry,
        (C::Unknown, S::Critical) => R::Escalate,
    }
}

/// Strategy lookup table: built-in defaults plus explicit overrides.
#[derive(Debug, Clone, Default)]
pub struct StrategyTable {
    overrides: HashMap<(ErrorCategory, Severity), RecoveryStrategy>,
}

impl StrategyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_override(
        mut self,
        category: ErrorCategory,
        severity: Severity,
        strategy: RecoveryStrategy,
    ) -> Self {
        self.overrides.insert((category, severity), strategy);
        self
    }

    /// Layer source-level overrides on top of this table.
    pub fn with_source_overrides(&self, overrides: &[StrategyOverride]) -> Self {
        let mut table = self.clone();
        for o in overrides {
            match o.severity {
                Some(severity) => {
                    table.overrides.insert((o.category, severity), o.strategy);
                }
                None => {
                    for severity in Severity::ALL {
                        table.overrides.insert((o.category, severity), o.strategy);
                    }
                }
            }
        }
        table
    }

    pub fn lookup(&self, category: ErrorCategory, severity: Severity) -> RecoveryStrategy {
        self.overrides
            .get(&(category, severity))
            .copied()
            .unwrap_or_else(|| default_strategy(category, severity))
    }
}

/// Retry policy with exponential backoff.
///
/// The delay before retry `n` (1-indexed) is `base * 2^(n-1)` plus jitter
/// drawn from `[0, base * 2^(n-2))`, capped by `max_delay`. The jitter never
/// reaches the next doubling, so delays never decrease across retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Delay to wait before retry number `retry` (1-indexed).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        let base_ms = self.base_delay.as_millis() as u64;
        let backoff_ms = base_ms.saturating_mul(1u64 << exponent);
        let jitter = if self.jitter {
            jitter_ms(backoff_ms / 2)
        } else {
            0
        };
        std::cmp::min(
            Duration::from_millis(backoff_ms.saturating_add(jitter)),
            self.max_delay,
        )
    }
}

/// Whether a failure concerns one candidate or the whole source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Candidate,
    Source,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryDecision {
    pub strategy: RecoveryStrategy,
    /// Wait before the next attempt; `Some` only when retrying.
    pub delay: Option<Duration>,
    /// The table asked for a retry but the cap was reached.
    pub retries_exhausted: bool,
}

impl RecoveryDecision {
    pub fn will_retry(&self) -> bool {
        self.delay.is_some()
    }
}

/// One failed attempt observed while executing an operation.
#[derive(Debug, Clone)]
pub struct AttemptFailure {
    pub category: ErrorCategory,
    pub severity: Severity,
    pub message: String,
    pub decision: RecoveryDecision,
    /// Retries performed before this attempt.
    pub retry: u32,
}

/// Final failure after the engine gave up.
#[derive(Debug)]
pub struct RecoveryFailure {
    pub error: AppError,
    pub decision: RecoveryDecision,
    pub retries: u32,
    /// Gave up because the job was cancelled before or during a backoff wait.
    pub cancelled: bool,
}

/// Result of [`RecoveryEngine::execute`] plus every failed attempt on the way.
#[derive(Debug)]
pub struct Recovered<T> {
    pub result: Result<T, RecoveryFailure>,
    pub failures: Vec<AttemptFailure>,
}

#[derive(Debug, Clone, Default)]
pub struct RecoveryEngine {
    table: StrategyTable,
    policy: RetryPolicy,
}

impl RecoveryEngine {
    pub fn new(table: StrategyTable, policy: RetryPolicy) -> Self {
        Self { table, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Engine with a source's strategy overrides and retry cap applied.
    pub fn for_source(&self, config: &SourceConfig) -> Self {
        let mut policy = self.policy.clone();
        if let Some(max) = config.max_retries {
            policy.max_retries = max;
        }
        Self {
            table: self.table.with_source_overrides(&config.strategy_overrides),
            policy,
        }
    }

    /// Decide what to do after a failure, given how many retries already ran.
    pub fn decide(
        &self,
        category: ErrorCategory,
        severity: Severity,
        retries_so_far: u32,
        scope: Scope,
    ) -> RecoveryDecision {
        let strategy = self.table.lookup(category, severity);
        if !strategy.is_retry() {
            return RecoveryDecision {
                strategy,
                delay: None,
                retries_exhausted: false,
            };
        }

        if retries_so_far >= self.policy.max_retries {
            let strategy = match scope {
                Scope::Candidate => RecoveryStrategy::Skip,
                Scope::Source => RecoveryStrategy::AbortSource,
            };
            return RecoveryDecision {
                strategy,
                delay: None,
                retries_exhausted: true,
            };
        }

        let delay = match strategy {
            RecoveryStrategy::RetryWithBackoff => self.policy.delay_for_retry(retries_so_far + 1),
            _ => Duration::ZERO,
        };

        RecoveryDecision {
            strategy,
            delay: Some(delay),
            retries_exhausted: false,
        }
    }

    /// Run `operation` until it succeeds or the engine gives up.
    ///
    /// No retry starts once `cancel` has fired, and backoff waits end early
    /// when it fires; the last error is then returned with `cancelled = true`.
    pub async fn execute<T, F, Fut>(
        &self,
        scope: Scope,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Recovered<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let mut failures = Vec::new();
        let mut retries = 0;

        loop {
            let error = match operation().await {
                Ok(value) => {
                    return Recovered {
                        result: Ok(value),
                        failures,
                    };
                }
                Err(e) => e,
            };

            let (category, severity) = error.classify();
            let decision = self.decide(category, severity, retries, scope);
            failures.push(AttemptFailure {
                category,
                severity,
                message: error.to_string(),
                decision,
                retry: retries,
            });

            // `Some(cancelled)` ends the loop; `None` retries.
            let stopped = match decision.delay {
                None => Some(false),
                Some(_) if cancel.is_cancelled() => Some(true),
                Some(delay) => backoff(category, severity, retries, delay, cancel)
                    .await
                    .then_some(true),
            };
            if let Some(cancelled) = stopped {
                return Recovered {
                    result: Err(RecoveryFailure {
                        error,
                        decision,
                        retries,
                        cancelled,
                    }),
                    failures,
                };
            }
            retries += 1;
        }
    }
}

/// Sleeps for `delay`; returns true if `cancel` fired first.
async fn backoff(
    category: ErrorCategory,
    severity: Severity,
    retries: u32,
    delay: Duration,
    cancel: &CancellationToken,
) -> bool {
    if delay.is_zero() {
        return false;
    }
    tracing::debug!(
        %category,
        %severity,
        retry = retries + 1,
        delay_ms = delay.as_millis() as u64,
        "Backing off before retry"
    );
    tokio::select! {
        () = tokio::time::sleep(delay) => false,
        () = cancel.cancelled() => true,
    }
}
