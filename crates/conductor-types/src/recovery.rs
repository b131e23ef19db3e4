//! Retry and circuit-breaker vocabulary.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How the wait between attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Constant,
    Linear,
    #[default]
    Exponential,
    Fibonacci,
    /// Exponential plus up to 10% random spread.
    Jitter,
}

impl FromStr for BackoffStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "constant" => Ok(Self::Constant),
            "linear" => Ok(Self::Linear),
            "exponential" => Ok(Self::Exponential),
            "fibonacci" => Ok(Self::Fibonacci),
            "jitter" => Ok(Self::Jitter),
            other => Err(format!("invalid backoff strategy: '{other}'")),
        }
    }
}

/// Coarse classification of a failure, used to decide retryability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Timeout,
    RateLimit,
    Auth,
    Resource,
    Validation,
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::RateLimit => "rate_limit",
            Self::Auth => "auth",
            Self::Resource => "resource",
            Self::Validation => "validation",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Circuit breaker position for one context key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Per-context error statistics. Observability only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorStats {
    pub total_errors: u64,
    pub by_category: HashMap<ErrorCategory, u64>,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

impl ErrorStats {
    pub fn record(&mut self, category: ErrorCategory, message: &str) {
        self.total_errors += 1;
        *self.by_category.entry(category).or_insert(0) += 1;
        self.last_error = Some(message.to_string());
        self.last_error_at = Some(Utc::now());
    }
}
