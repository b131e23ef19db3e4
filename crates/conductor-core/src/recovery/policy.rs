//! Retry policy: attempt budget, backoff curve, retryable categories and an
//! optional fallback.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use rand::Rng;
use serde_json::Value;

use conductor_types::config::{PolicyOverride, RecoveryConfig};
use conductor_types::recovery::{BackoffStrategy, ErrorCategory};

/// Called with the last error message once retries are exhausted.
pub type Fallback = Arc<dyn Fn(String) -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;

/// How an operation is retried. Immutable once built; share it by reference
/// across calls for the same context.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    pub backoff: BackoffStrategy,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub retryable: HashSet<ErrorCategory>,
    pub fallback: Option<Fallback>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    pub fn from_config(config: &RecoveryConfig) -> Self {
        Self {
            max_attempts: config.default_max_attempts.max(1),
            base_delay: secs_or(config.base_delay_secs, Duration::from_secs(1)),
            max_delay: secs_or(config.max_delay_secs, Duration::from_secs(60)),
            ..Self::default()
        }
    }

    /// Apply the fields `custom` sets.
    pub fn with_override(mut self, custom: &PolicyOverride) -> Self {
        if let Some(attempts) = custom.max_attempts {
            self.max_attempts = attempts.max(1);
        }
        if let Some(backoff) = custom.backoff {
            self.backoff = backoff;
        }
        if let Some(secs) = custom.base_delay_secs {
            self.base_delay = secs_or(secs, self.base_delay);
        }
        if let Some(secs) = custom.max_delay_secs {
            self.max_delay = secs_or(secs, self.max_delay);
        }
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_retryable(mut self, categories: impl IntoIterator<Item = ErrorCategory>) -> Self {
        self.retryable = categories.into_iter().collect();
        self
    }

    /// Install an async fallback invoked with the last error message.
    pub fn with_fallback<F, Fut>(mut self, fallback: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        self.fallback = Some(Arc::new(move |err| Box::pin(fallback(err))));
        self
    }

    pub fn is_retryable(&self, category: ErrorCategory) -> bool {
        self.retryable.contains(&category)
    }

    /// Delay before retrying after attempt `attempt` (1-indexed), capped at
    /// `max_delay`.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base = self.base_delay.as_secs_f64();
        let cap = self.max_delay.as_secs_f64();

        let secs = match self.backoff {
            BackoffStrategy::Constant => base,
            BackoffStrategy::Linear => base * f64::from(attempt),
            BackoffStrategy::Exponential => exponential(base, attempt),
            BackoffStrategy::Fibonacci => base * fibonacci(attempt),
            BackoffStrategy::Jitter => {
                let exp = exponential(base, attempt);
                let spread = 0.1 * exp;
                if spread > 0.0 && spread.is_finite() {
                    exp + rand::thread_rng().gen_range(0.0..spread)
                } else {
                    exp
                }
            }
        };

        Duration::from_secs_f64(secs.min(cap).max(0.0))
    }
}

/// Seconds from config, or `fallback` when negative or not finite.
pub(crate) fn secs_or(secs: f64, fallback: Duration) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(fallback)
}

fn exponential(base: f64, attempt: u32) -> f64 {
    // 2^1023 is the largest finite power; anything beyond is capped anyway.
    let exponent = (attempt - 1).min(1023) as i32;
    base * 2f64.powi(exponent)
}

/// fib(1) = fib(2) = 1.
fn fibonacci(n: u32) -> f64 {
    let (mut a, mut b) = (0f64, 1f64);
    for _ in 1..n.min(1476) {
        let next = a + b;
        a = b;
        b = next;
    }
    b
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffStrategy::Exponential,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            retryable: [
                ErrorCategory::Network,
                ErrorCategory::Timeout,
                ErrorCategory::RateLimit,
            ]
            .into_iter()
            .collect(),
            fallback: None,
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("retryable", &self.retryable)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}
