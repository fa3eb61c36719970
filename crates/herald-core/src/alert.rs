//! Threshold-based alerting with per-key cooldown.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorCategory, Severity};
use crate::models::SourceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlertKind {
    /// Job-wide error rate crossed the threshold.
    ErrorRate,
    /// Too many critical errors for one source.
    CriticalErrors,
    /// The recovery table selected `escalate`.
    Escalation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertContext {
    pub kind: AlertKind,
    pub job_id: Uuid,
    pub source_id: Option<SourceId>,
    pub message: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// An alert handed to the monitoring collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub category: ErrorCategory,
    pub severity: Severity,
    pub context: AlertContext,
}

#[derive(Debug, Clone)]
pub struct AlertConfig {
    /// Fraction of attempted candidates that errored, 0.0–1.0.
    pub error_rate_threshold: f64,
    /// Attempts needed before the error rate is evaluated.
    pub min_sample: u64,
    /// Critical errors for one source that raise an alert.
    pub critical_error_threshold: u64,
    /// Minimum spacing between two alerts with the same key.
    pub cooldown: Duration,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            error_rate_threshold: 0.5,
            min_sample: 10,
            critical_error_threshold: 1,
            cooldown: Duration::from_secs(15 * 60),
        }
    }
}

/// Decides when an alert should be raised. Shared across jobs so the
/// cooldown holds process-wide.
#[derive(Debug, Clone, Default)]
pub struct AlertMonitor {
    config: AlertConfig,
    last_raised: Arc<Mutex<HashMap<String, Instant>>>,
}

impl AlertMonitor {
    pub fn new(config: AlertConfig) -> Self {
        Self {
            config,
            last_raised: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns true and arms the cooldown when `key` may fire now.
    fn try_arm(&self, key: &str) -> bool {
        let mut last = self.last_raised.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned alert cooldown mutex");
            poisoned.into_inner()
        });
        let now = Instant::now();
        match last.get(key) {
            Some(at) if now.duration_since(*at) < self.config.cooldown => {
                tracing::debug!(alert_key = key, "Alert suppressed by cooldown");
                false
            }
            _ => {
                last.insert(key.to_string(), now);
                true
            }
        }
    }

    /// Job-wide error rate check, evaluated after each candidate completes.
    pub fn check_error_rate(
        &self,
        job_id: Uuid,
        attempted: u64,
        errors: u64,
        dominant: ErrorCategory,
    ) -> Option<Alert> {
        if attempted == 0 || attempted < self.config.min_sample {
            return None;
        }
        let rate = errors as f64 / attempted as f64;
        if rate < self.config.error_rate_threshold || !self.try_arm("error-rate") {
            return None;
        }

        Some(Alert {
            category: dominant,
            severity: Severity::High,
            context: AlertContext {
                kind: AlertKind::ErrorRate,
                job_id,
                source_id: None,
                message: format!(
                    "Error rate {:.0}% over {attempted} candidates exceeds {:.0}%",
                    rate * 100.0,
                    self.config.error_rate_threshold * 100.0
                ),
                data: serde_json::json!({
                    "attempted": attempted,
                    "errors": errors,
                    "rate": rate,
                }),
            },
        })
    }

    /// Per-source critical error count check.
    pub fn check_critical(
        &self,
        job_id: Uuid,
        source_id: &str,
        critical_errors: u64,
        category: ErrorCategory,
    ) -> Option<Alert> {
        if critical_errors < self.config.critical_error_threshold
            || !self.try_arm(&format!("critical:{source_id}"))
        {
            return None;
        }

        Some(Alert {
            category,
            severity: Severity::Critical,
            context: AlertContext {
                kind: AlertKind::CriticalErrors,
                job_id,
                source_id: Some(source_id.to_string()),
                message: format!("{critical_errors} critical error(s) for source {source_id}"),
                data: serde_json::json!({ "critical_errors": critical_errors }),
            },
        })
    }

    /// Alert for an `escalate` recovery decision.
    pub fn escalation(
        &self,
        job_id: Uuid,
        source_id: &str,
        category: ErrorCategory,
        severity: Severity,
        message: &str,
    ) -> Option<Alert> {
        if !self.try_arm(&format!("escalation:{source_id}:{category}")) {
            return None;
        }

        Some(Alert {
            category,
            severity,
            context: AlertContext {
                kind: AlertKind::Escalation,
                job_id,
                source_id: Some(source_id.to_string()),
                message: message.to_string(),
                data: serde_json::Value::Null,
            },
        })
    }
}
