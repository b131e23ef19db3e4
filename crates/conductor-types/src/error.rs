//! Configuration errors shared across crates.

use thiserror::Error;

/// A configuration value was rejected at construction time.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    MustBePositive { field: &'static str },

    #[error("base delay ({base}s) exceeds max delay ({max}s)")]
    DelayRange { base: f64, max: f64 },

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
