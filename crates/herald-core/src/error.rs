use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide error types for Herald.
#[derive(Error, Debug)]
pub enum AppError {
    /// The server answered with a non-success status code.
    #[error("HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },

    /// HTTP request failed for a reason other than the status code.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Markup or payload could not be parsed.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Input was well-formed but rejected (bad URL, empty source list, ...).
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// A bounded resource (pool, disk, quota) is exhausted.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// A job status change that would move backwards or out of a terminal state.
    #[error("Invalid job transition: {from} -> {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Maps the error onto the closed `(category, severity)` taxonomy.
    pub fn classify(&self) -> (ErrorCategory, Severity) {
        match self {
            AppError::HttpStatus { status, .. } => classify_status(*status),
            AppError::HttpError(_) => (ErrorCategory::HttpStatus, Severity::Medium),
            AppError::NetworkError(_) => (ErrorCategory::Network, Severity::Medium),
            AppError::Timeout(_) => (ErrorCategory::Timeout, Severity::High),
            AppError::ParseError(_) | AppError::SerializationError(_) => {
                (ErrorCategory::Parsing, Severity::Low)
            }
            AppError::ValidationError(_) | AppError::NotFound(_) => {
                (ErrorCategory::Validation, Severity::Low)
            }
            AppError::ResourceExhausted(_) => (ErrorCategory::Resource, Severity::High),
            AppError::ConfigError(_) => (ErrorCategory::Configuration, Severity::Critical),
            AppError::DatabaseError(_) => (ErrorCategory::Resource, Severity::Medium),
            AppError::InvalidTransition { .. } => (ErrorCategory::Unknown, Severity::High),
            AppError::Generic(_) => (ErrorCategory::Unknown, Severity::Medium),
        }
    }
}

fn classify_status(status: u16) -> (ErrorCategory, Severity) {
    match status {
        429 => (ErrorCategory::Resource, Severity::High),
        502..=504 => (ErrorCategory::Resource, Severity::Medium),
        500..=599 => (ErrorCategory::HttpStatus, Severity::Medium),
        401 | 403 => (ErrorCategory::HttpStatus, Severity::High),
        400..=499 => (ErrorCategory::HttpStatus, Severity::Low),
        _ => (ErrorCategory::HttpStatus, Severity::Medium),
    }
}

/// What kind of thing went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    Network,
    HttpStatus,
    Parsing,
    Validation,
    Resource,
    Configuration,
    Timeout,
    Unknown,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 8] = [
        ErrorCategory::Network,
        ErrorCategory::HttpStatus,
        ErrorCategory::Parsing,
        ErrorCategory::Validation,
        ErrorCategory::Resource,
        ErrorCategory::Configuration,
        ErrorCategory::Timeout,
        ErrorCategory::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::HttpStatus => "http-status",
            ErrorCategory::Parsing => "parsing",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Resource => "resource",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Unknown => "unknown",
        }
    }

    /// Position in [`ErrorCategory::ALL`], used for per-category counters.
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ErrorCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ErrorCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s.to_lowercase())
            .ok_or_else(|| format!("Unknown error category: {s}"))
    }
}

/// How bad it is. Ordered from `Low` to `Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Severity::ALL
            .into_iter()
            .find(|v| v.as_str() == s.to_lowercase())
            .ok_or_else(|| format!("Unknown severity: {s}"))
    }
}
