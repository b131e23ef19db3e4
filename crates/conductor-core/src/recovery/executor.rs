//! `ErrorRecovery`: wraps an operation with a retry policy and a
//! per-context circuit breaker.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use conductor_types::config::RecoveryConfig;
use conductor_types::event::AutomationEvent;
use conductor_types::recovery::{CircuitState, ErrorCategory, ErrorStats};

use super::breaker::CircuitBreaker;
use super::classify::categorize_error;
use super::policy::RetryPolicy;
use crate::event::EventBus;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum RecoveryError {
    #[error("circuit breaker open for context '{context}'")]
    CircuitOpen { context: String },

    #[error("non-retryable {category} error after {attempts} attempt(s): {message}")]
    NonRetryable {
        category: ErrorCategory,
        message: String,
        attempts: u32,
    },

    #[error("retries exhausted after {attempts} attempt(s): {message}")]
    Exhausted {
        category: ErrorCategory,
        message: String,
        attempts: u32,
    },

    #[error("cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },
}

impl RecoveryError {
    /// Number of times the operation was actually invoked.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::CircuitOpen { .. } => 0,
            Self::NonRetryable { attempts, .. }
            | Self::Exhausted { attempts, .. }
            | Self::Cancelled { attempts } => *attempts,
        }
    }

    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            Self::NonRetryable { category, .. } | Self::Exhausted { category, .. } => {
                Some(*category)
            }
            Self::CircuitOpen { .. } | Self::Cancelled { .. } => None,
        }
    }

    /// The operation's own error text when there is one.
    pub fn last_message(&self) -> String {
        match self {
            Self::NonRetryable { message, .. } | Self::Exhausted { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// ErrorRecovery
// ---------------------------------------------------------------------------

/// Retry executor with circuit breakers and error statistics keyed by
/// context string.
///
/// All maps are sharded (`DashMap`); guards are never held across an
/// await, so concurrent calls on different contexts do not contend.
pub struct ErrorRecovery {
    breakers: DashMap<String, CircuitBreaker>,
    stats: DashMap<String, ErrorStats>,
    /// Replace the caller's policy for calls under that context.
    policies: DashMap<String, RetryPolicy>,
    default_policy: RetryPolicy,
    threshold: u32,
    cooldown: Duration,
    events: Option<EventBus>,
}

impl ErrorRecovery {
    pub fn new(config: &RecoveryConfig) -> Self {
        let default_policy = RetryPolicy::from_config(config);
        let policies = DashMap::new();
        for (context, custom) in &config.policies {
            policies.insert(context.clone(), default_policy.clone().with_override(custom));
        }
        Self {
            breakers: DashMap::new(),
            stats: DashMap::new(),
            policies,
            default_policy,
            threshold: config.failure_threshold.max(1),
            cooldown: config.cooldown(),
            events: None,
        }
    }

    /// Publish `circuit_opened` events on `bus`.
    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    /// Use `policy` for every call under `context`, whatever policy the
    /// caller passes.
    pub fn set_custom_policy(&self, context: impl Into<String>, policy: RetryPolicy) {
        let context = context.into();
        tracing::debug!(context = %context, max_attempts = policy.max_attempts, "custom retry policy set");
        self.policies.insert(context, policy);
    }

    pub fn remove_custom_policy(&self, context: &str) -> Option<RetryPolicy> {
        self.policies.remove(context).map(|(_, policy)| policy)
    }

    /// The custom policy for `context`, or the configured default.
    pub fn policy_for(&self, context: &str) -> RetryPolicy {
        self.policies
            .get(context)
            .map(|policy| policy.clone())
            .unwrap_or_else(|| self.default_policy.clone())
    }

    /// Run `operation` under `policy`, keyed by `context` for breaker and
    /// statistics purposes. A custom policy set for `context` takes
    /// precedence over `policy`.
    pub async fn execute_with_retry<F, Fut, E>(
        &self,
        operation: F,
        policy: &RetryPolicy,
        context: &str,
    ) -> Result<Value, RecoveryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
        E: Display,
    {
        self.run(operation, policy, context, None).await
    }

    /// Like [`execute_with_retry`](Self::execute_with_retry), but the backoff
    /// sleep returns early with [`RecoveryError::Cancelled`] when `cancel`
    /// fires. An in-flight attempt is never interrupted.
    pub async fn execute_with_retry_cancellable<F, Fut, E>(
        &self,
        operation: F,
        policy: &RetryPolicy,
        context: &str,
        cancel: &CancellationToken,
    ) -> Result<Value, RecoveryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
        E: Display,
    {
        self.run(operation, policy, context, Some(cancel)).await
    }

    async fn run<F, Fut, E>(
        &self,
        mut operation: F,
        policy: &RetryPolicy,
        context: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<Value, RecoveryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
        E: Display,
    {
        let custom = self.policies.get(context).map(|policy| policy.clone());
        let policy = custom.as_ref().unwrap_or(policy);

        if !self.try_acquire(context) {
            tracing::warn!(context, "circuit breaker open, failing fast");
            return Err(RecoveryError::CircuitOpen {
                context: context.to_string(),
            });
        }

        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;

        let failure = loop {
            if cancel.is_some_and(|c| c.is_cancelled()) {
                self.release_probe(context);
                return Err(RecoveryError::Cancelled { attempts: attempt });
            }

            attempt += 1;
            let message = match operation().await {
                Ok(value) => {
                    self.record_success(context);
                    if attempt > 1 {
                        tracing::info!(context, attempt, "operation recovered after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err.to_string(),
            };

            let category = categorize_error(&message, std::any::type_name::<E>());
            self.record_error(context, category, &message);

            if !policy.is_retryable(category) {
                tracing::warn!(context, attempt, %category, error = %message, "non-retryable error");
                break RecoveryError::NonRetryable {
                    category,
                    message,
                    attempts: attempt,
                };
            }

            if attempt >= max_attempts {
                tracing::warn!(context, attempt, %category, error = %message, "retries exhausted");
                break RecoveryError::Exhausted {
                    category,
                    message,
                    attempts: attempt,
                };
            }

            let delay = policy.calculate_delay(attempt);
            tracing::warn!(
                context,
                attempt,
                max_attempts,
                %category,
                delay_ms = delay.as_millis() as u64,
                error = %message,
                "attempt failed, backing off"
            );

            match cancel {
                Some(token) => {
                    tokio::select! {
                        _ = token.cancelled() => {
                            self.release_probe(context);
                            return Err(RecoveryError::Cancelled { attempts: attempt });
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
        };

        self.record_terminal_failure(context);

        if let Some(fallback) = &policy.fallback {
            tracing::info!(context, "executing fallback");
            match fallback(failure.last_message()).await {
                Ok(value) => return Ok(value),
                Err(fallback_err) => {
                    tracing::warn!(context, error = %fallback_err, "fallback failed");
                }
            }
        }

        Err(failure)
    }

    // -----------------------------------------------------------------------
    // Breaker bookkeeping
    // -----------------------------------------------------------------------

    fn try_acquire(&self, context: &str) -> bool {
        match self.breakers.get_mut(context) {
            Some(mut breaker) => breaker.try_acquire(),
            None => true,
        }
    }

    fn release_probe(&self, context: &str) {
        if let Some(mut breaker) = self.breakers.get_mut(context) {
            breaker.release_probe();
        }
    }

    fn record_success(&self, context: &str) {
        if let Some(mut breaker) = self.breakers.get_mut(context) {
            breaker.record_success();
        }
    }

    fn record_terminal_failure(&self, context: &str) {
        let (opened, failure_count) = {
            let mut breaker = self
                .breakers
                .entry(context.to_string())
                .or_insert_with(|| CircuitBreaker::new(self.threshold, self.cooldown));
            let opened = breaker.record_failure();
            (opened, breaker.failure_count())
        };

        if opened {
            tracing::warn!(context, failure_count, "circuit breaker opened");
            if let Some(events) = &self.events {
                events.publish(AutomationEvent::CircuitOpened {
                    context: context.to_string(),
                    failure_count,
                    timestamp: chrono::Utc::now(),
                });
            }
        }
    }

    fn record_error(&self, context: &str, category: ErrorCategory, message: &str) {
        self.stats
            .entry(context.to_string())
            .or_default()
            .record(category, message);
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Breaker state for `context`; contexts that never failed are closed.
    pub fn breaker_state(&self, context: &str) -> CircuitState {
        self.breakers
            .get(context)
            .map(|b| b.state())
            .unwrap_or(CircuitState::Closed)
    }

    /// Contexts whose breaker is currently open.
    pub fn open_circuits(&self) -> usize {
        self.breakers
            .iter()
            .filter(|b| b.state() == CircuitState::Open)
            .count()
    }

    pub fn failure_count(&self, context: &str) -> u32 {
        self.breakers
            .get(context)
            .map(|b| b.failure_count())
            .unwrap_or(0)
    }

    /// Manually close the breaker for `context`.
    pub fn reset_circuit_breaker(&self, context: &str) {
        if let Some(mut breaker) = self.breakers.get_mut(context) {
            breaker.reset();
            tracing::info!(context, "circuit breaker reset");
        }
    }

    pub fn error_stats(&self, context: &str) -> Option<ErrorStats> {
        self.stats.get(context).map(|s| s.clone())
    }

    pub fn all_error_stats(&self) -> Vec<(String, ErrorStats)> {
        let mut all: Vec<_> = self
            .stats
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}

impl Default for ErrorRecovery {
    fn default() -> Self {
        Self::new(&RecoveryConfig::default())
    }
}
