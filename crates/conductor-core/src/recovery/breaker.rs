//! Per-context circuit breaker.
//!
//! Closed -> Open after `threshold` terminal failures. Open rejects calls
//! until `cooldown` has elapsed, then admits exactly one half-open probe:
//! the probe's success closes the circuit, its failure reopens it.
//!
//! Time comes from `tokio::time::Instant` so paused-clock tests can drive
//! the cool-down.

use std::time::Duration;

use tokio::time::Instant;

use conductor_types::recovery::CircuitState;

#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed,
    Open { opened_at: Instant },
    HalfOpen { probe_in_flight: bool },
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    phase: Phase,
    failure_count: u32,
    threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            phase: Phase::Closed,
            failure_count: 0,
            threshold: threshold.max(1),
            cooldown,
        }
    }

    pub fn state(&self) -> CircuitState {
        match self.phase {
            Phase::Closed => CircuitState::Closed,
            Phase::Open { .. } => CircuitState::Open,
            Phase::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn opened_at(&self) -> Option<Instant> {
        match self.phase {
            Phase::Open { opened_at } => Some(opened_at),
            _ => None,
        }
    }

    /// Ask to make a call. Moves Open -> HalfOpen once the cool-down has
    /// elapsed and hands out the single probe slot.
    pub fn try_acquire(&mut self) -> bool {
        match self.phase {
            Phase::Closed => true,
            Phase::Open { opened_at } => {
                if opened_at.elapsed() >= self.cooldown {
                    self.phase = Phase::HalfOpen { probe_in_flight: true };
                    true
                } else {
                    false
                }
            }
            Phase::HalfOpen { probe_in_flight: true } => false,
            Phase::HalfOpen { probe_in_flight: false } => {
                self.phase = Phase::HalfOpen { probe_in_flight: true };
                true
            }
        }
    }

    /// Return an unused probe slot (the call was cancelled before an outcome).
    pub fn release_probe(&mut self) {
        if let Phase::HalfOpen { .. } = self.phase {
            self.phase = Phase::HalfOpen { probe_in_flight: false };
        }
    }

    pub fn record_success(&mut self) {
        self.phase = Phase::Closed;
        self.failure_count = 0;
    }

    /// Count a terminal failure. Returns `true` if this call opened the
    /// circuit.
    pub fn record_failure(&mut self) -> bool {
        self.failure_count = self.failure_count.saturating_add(1);
        match self.phase {
            Phase::HalfOpen { .. } => {
                self.phase = Phase::Open { opened_at: Instant::now() };
                true
            }
            Phase::Closed if self.failure_count >= self.threshold => {
                self.phase = Phase::Open { opened_at: Instant::now() };
                true
            }
            Phase::Closed | Phase::Open { .. } => false,
        }
    }

    /// Force the circuit closed and clear the failure count.
    pub fn reset(&mut self) {
        self.record_success();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn opens_at_threshold() {
        let mut breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        assert!(!breaker.record_failure());
        assert!(!breaker.record_failure());
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.record_failure());
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.failure_count(), 3);
        assert!(!breaker.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_a_single_probe() {
        let mut breaker = CircuitBreaker::new(1, Duration::from_secs(60));
        breaker.record_failure();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(!breaker.try_acquire());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(breaker.try_acquire());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(!breaker.try_acquire(), "second probe must be rejected");
    }

    #[tokio::test(start_paused = true)]
    async fn probe_success_closes() {
        let mut breaker = CircuitBreaker::new(1, Duration::from_secs(5));
        breaker.record_failure();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(breaker.try_acquire());
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
        assert!(breaker.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn probe_failure_reopens_with_fresh_cooldown() {
        let mut breaker = CircuitBreaker::new(1, Duration::from_secs(5));
        breaker.record_failure();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(breaker.try_acquire());
        assert!(breaker.record_failure());
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(!breaker.try_acquire());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(breaker.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn released_probe_can_be_reacquired() {
        let mut breaker = CircuitBreaker::new(1, Duration::ZERO);
        breaker.record_failure();
        assert!(breaker.try_acquire());
        breaker.release_probe();
        assert!(breaker.try_acquire());
    }
}
