//! Per-source circuit breaker.
//!
//! Stops the orchestrator from repeatedly hitting a source that keeps
//! failing badly. State is a plain [`SourceCircuitState`] owned by the
//! Source Registry and persisted across jobs; [`CircuitBreaker`] is the
//! policy that reads and mutates it.
//!
//! # Circuit States
//!
//! ```text
//! CLOSED --[N high-severity failures within window]--> OPEN --[cooldown]--> HALF_OPEN
//!                                                                               |
//!                                             <--[failure]--                    |
//!                                                                               |
//! CLOSED <---------------------------------[success]-----------------------------+
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Severity;
use crate::models::SourceId;
use crate::source::SourceOutcome;

/// Current state of a source's circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Source is processed normally.
    Closed,
    /// Source is skipped until the cooldown elapses.
    Open,
    /// One trial run is allowed to test recovery.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CircuitState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "closed" => Ok(CircuitState::Closed),
            "open" => Ok(CircuitState::Open),
            "half-open" => Ok(CircuitState::HalfOpen),
            _ => Err(format!("Unknown circuit state: {s}")),
        }
    }
}

/// Persisted circuit record for one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCircuitState {
    pub source_id: SourceId,
    pub state: CircuitState,
    /// Qualifying failures counted in the current window.
    pub failure_count: u32,
    pub window_start: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
}

impl SourceCircuitState {
    pub fn closed(source_id: impl Into<SourceId>) -> Self {
        Self {
            source_id: source_id.into(),
            state: CircuitState::Closed,
            failure_count: 0,
            window_start: None,
            opened_at: None,
            last_failure_at: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Qualifying failures within `window` that open the circuit.
    pub failure_threshold: u32,

    /// Trailing window over which failures are counted.
    pub window: Duration,

    /// Time an open circuit waits before allowing a trial.
    pub cooldown: Duration,

    /// Failures below this severity are ignored.
    pub min_severity: Severity,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window: Duration::from_secs(10 * 60),
            cooldown: Duration::from_secs(15 * 60),
            min_severity: Severity::High,
        }
    }
}

/// A state change produced by [`CircuitBreaker::apply`] or [`CircuitBreaker::refresh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitTransition {
    pub from: CircuitState,
    pub to: CircuitState,
}

#[derive(Debug, Clone, Default)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn cooldown(&self) -> TimeDelta {
        TimeDelta::from_std(self.config.cooldown).unwrap_or(TimeDelta::MAX)
    }

    fn window(&self) -> TimeDelta {
        TimeDelta::from_std(self.config.window).unwrap_or(TimeDelta::MAX)
    }

    fn cooldown_elapsed(&self, state: &SourceCircuitState, now: DateTime<Utc>) -> bool {
        match state.opened_at {
            Some(opened) => now.signed_duration_since(opened) >= self.cooldown(),
            // An open circuit with no timestamp cannot be timed; allow a trial.
            None => true,
        }
    }

    /// Lazy Open → HalfOpen transition once the cooldown has elapsed.
    pub fn refresh(
        &self,
        state: &mut SourceCircuitState,
        now: DateTime<Utc>,
    ) -> Option<CircuitTransition> {
        if state.state == CircuitState::Open && self.cooldown_elapsed(state, now) {
            tracing::info!(
                source_id = %state.source_id,
                "Circuit transitioning to half-open state"
            );
            state.state = CircuitState::HalfOpen;
            return Some(CircuitTransition {
                from: CircuitState::Open,
                to: CircuitState::HalfOpen,
            });
        }
        None
    }

    /// Record an outcome for the source and return the transition, if any.
    pub fn apply(
        &self,
        state: &mut SourceCircuitState,
        outcome: &SourceOutcome,
        now: DateTime<Utc>,
    ) -> Option<CircuitTransition> {
        let refreshed = self.refresh(state, now);
        let from = refreshed.map(|t| t.from).unwrap_or(state.state);

        match *outcome {
            SourceOutcome::Skipped => {}
            SourceOutcome::Success => {
                if state.state == CircuitState::HalfOpen {
                    tracing::info!(
                        source_id = %state.source_id,
                        "Circuit closing after successful trial"
                    );
                    state.state = CircuitState::Closed;
                    state.failure_count = 0;
                    state.window_start = None;
                    state.opened_at = None;
                }
            }
            SourceOutcome::Failure { category, severity } => {
                if severity >= self.config.min_severity {
                    state.last_failure_at = Some(now);
                    match state.state {
                        CircuitState::Closed => {
                            let expired = state
                                .window_start
                                .is_none_or(|start| now.signed_duration_since(start) > self.window());
                            if expired {
                                state.window_start = Some(now);
                                state.failure_count = 0;
                            }
                            state.failure_count += 1;

                            if state.failure_count >= self.config.failure_threshold {
                                tracing::warn!(
                                    source_id = %state.source_id,
                                    failures = state.failure_count,
                                    %category,
                                    %severity,
                                    "Circuit opening after {} failures in window",
                                    state.failure_count
                                );
                                state.state = CircuitState::Open;
                                state.opened_at = Some(now);
                            }
                        }
                        CircuitState::HalfOpen => {
                            tracing::warn!(
                                source_id = %state.source_id,
                                %category,
                                "Circuit trial failed, returning to open state"
                            );
                            state.state = CircuitState::Open;
                            state.opened_at = Some(now);
                        }
                        CircuitState::Open => {}
                    }
                }
            }
        }

        (from != state.state).then_some(CircuitTransition {
            from,
            to: state.state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;

    fn timeout_failure() -> SourceOutcome {
        SourceOutcome::Failure {
            category: ErrorCategory::Timeout,
            severity: Severity::High,
        }
    }

    fn minutes(n: i64) -> TimeDelta {
        TimeDelta::minutes(n)
    }

    #[test]
    fn test_circuit_starts_closed() {
        let cb = CircuitBreaker::default();
        let state = SourceCircuitState::closed("feed");
        assert_eq!(state.state, CircuitState::Closed);
        assert_eq!(state.failure_count, 0);
    }

    #[test]
    fn test_five_timeouts_within_window_open_circuit() {
        let cb = CircuitBreaker::default();
        let mut state = SourceCircuitState::closed("feed");
        let start = Utc::now();

        for i in 0..4 {
            assert_eq!(cb.apply(&mut state, &timeout_failure(), start + minutes(i * 2)), None);
        }
        let transition = cb.apply(&mut state, &timeout_failure(), start + minutes(9));
        assert_eq!(
            transition,
            Some(CircuitTransition {
                from: CircuitState::Closed,
                to: CircuitState::Open
            })
        );
        // Still inside the cooldown: stays open.
        let mut refreshed = state.clone();
        assert_eq!(cb.refresh(&mut refreshed, start + minutes(10)), None);
        assert_eq!(refreshed.state, CircuitState::Open);
    }

    #[test]
    fn test_failures_outside_window_do_not_accumulate() {
        let cb = CircuitBreaker::default();
        let mut state = SourceCircuitState::closed("feed");
        let start = Utc::now();

        for i in 0..4 {
            cb.apply(&mut state, &timeout_failure(), start + minutes(i));
        }
        // Window expired: count restarts at one.
        cb.apply(&mut state, &timeout_failure(), start + minutes(15));
        assert_eq!(state.state, CircuitState::Closed);
        assert_eq!(state.failure_count, 1);
    }

    #[test]
    fn test_low_severity_failures_are_ignored() {
        let cb = CircuitBreaker::default();
        let mut state = SourceCircuitState::closed("feed");
        let now = Utc::now();
        for _ in 0..10 {
            cb.apply(
                &mut state,
                &SourceOutcome::Failure {
                    category: ErrorCategory::HttpStatus,
                    severity: Severity::Low,
                },
                now,
            );
        }
        assert_eq!(state.state, CircuitState::Closed);
        assert_eq!(state.failure_count, 0);
    }

    #[test]
    fn test_open_until_cooldown_then_trial() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });
        let mut state = SourceCircuitState::closed("feed");
        let start = Utc::now();
        cb.apply(&mut state, &timeout_failure(), start);

        assert_eq!(cb.refresh(&mut state, start + minutes(5)), None);
        assert_eq!(state.state, CircuitState::Open);

        let transition = cb.refresh(&mut state, start + minutes(15));
        assert_eq!(transition.map(|t| t.to), Some(CircuitState::HalfOpen));
    }

    #[test]
    fn test_half_open_closes_on_success() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });
        let mut state = SourceCircuitState::closed("feed");
        let start = Utc::now();
        cb.apply(&mut state, &timeout_failure(), start);

        let transition = cb.apply(&mut state, &SourceOutcome::Success, start + minutes(20));
        assert_eq!(
            transition,
            Some(CircuitTransition {
                from: CircuitState::Open,
                to: CircuitState::Closed
            })
        );
        assert_eq!(state.failure_count, 0);
        assert_eq!(state.opened_at, None);
    }

    #[test]
    fn test_half_open_reopens_on_failure() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });
        let mut state = SourceCircuitState::closed("feed");
        let start = Utc::now();
        cb.apply(&mut state, &timeout_failure(), start);
        cb.refresh(&mut state, start + minutes(16));
        assert_eq!(state.state, CircuitState::HalfOpen);

        cb.apply(&mut state, &timeout_failure(), start + minutes(16));
        assert_eq!(state.state, CircuitState::Open);
        assert_eq!(state.opened_at, Some(start + minutes(16)));
    }

    #[test]
    fn test_skipped_outcome_changes_nothing() {
        let cb = CircuitBreaker::default();
        let mut state = SourceCircuitState::closed("feed");
        assert_eq!(cb.apply(&mut state, &SourceOutcome::Skipped, Utc::now()), None);
        assert_eq!(state, SourceCircuitState::closed("feed"));
    }

    #[test]
    fn test_state_str_roundtrip() {
        for state in [CircuitState::Closed, CircuitState::Open, CircuitState::HalfOpen] {
            assert_eq!(state.as_str().parse::<CircuitState>().unwrap(), state);
        }
        assert_eq!(
            serde_json::to_string(&CircuitState::HalfOpen).unwrap(),
            "\"half-open\""
        );
    }
}
