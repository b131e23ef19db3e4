//! Error recovery: retry with configurable backoff plus per-context
//! circuit breaking.
//!
//! [`ErrorRecovery`] is the single call path used by the workflow engine
//! (one context per step) and the agent orchestrator (one context per
//! agent).

pub mod breaker;
pub mod classify;
pub mod executor;
pub mod policy;

pub use breaker::CircuitBreaker;
pub use classify::categorize_error;
pub use executor::{ErrorRecovery, RecoveryError};
pub use policy::{Fallback, RetryPolicy};
