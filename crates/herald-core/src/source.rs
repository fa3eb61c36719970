use serde::{Deserialize, Serialize};

use crate::circuit_breaker::SourceCircuitState;
use crate::error::{ErrorCategory, Severity};
use crate::models::SourceId;
use crate::recovery::RecoveryStrategy;

/// An article source as listed by the Source Registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: SourceId,
    pub name: String,
    /// Listing page or feed the candidate provider reads.
    pub feed_url: String,
    pub config: SourceConfig,
    pub circuit: SourceCircuitState,
}

impl Source {
    pub fn new(id: impl Into<SourceId>, feed_url: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            circuit: SourceCircuitState::closed(id.clone()),
            id,
            feed_url: feed_url.into(),
            config: SourceConfig::default(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_config(mut self, config: SourceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_circuit(mut self, circuit: SourceCircuitState) -> Self {
        self.circuit = circuit;
        self
    }
}

/// Per-source tuning. Every field falls back to the orchestrator default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub max_concurrent_fetches: Option<usize>,
    /// Politeness delay between requests to this source.
    pub request_delay_ms: Option<u64>,
    pub max_retries: Option<u32>,
    /// CSS selector for article links on the listing page.
    pub link_selector: Option<String>,
    pub strategy_overrides: Vec<StrategyOverride>,
}

/// Replaces the default recovery strategy for a category
/// (and optionally a single severity) on one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyOverride {
    pub category: ErrorCategory,
    /// `None` applies the override to every severity.
    #[serde(default)]
    pub severity: Option<Severity>,
    pub strategy: RecoveryStrategy,
}

/// What a source run reports back to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SourceOutcome {
    Success,
    Failure {
        category: ErrorCategory,
        severity: Severity,
    },
    /// The source was not attempted (open circuit, cancelled job).
    Skipped,
}

/// Serialized form used to seed a registry from a JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceDefinition {
    pub id: SourceId,
    #[serde(default)]
    pub name: Option<String>,
    pub feed_url: String,
    #[serde(default)]
    pub config: SourceConfig,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl From<SourceDefinition> for Source {
    fn from(def: SourceDefinition) -> Self {
        let source = Source::new(def.id, def.feed_url).with_config(def.config);
        match def.name {
            Some(name) => source.with_name(name),
            None => source,
        }
    }
}
