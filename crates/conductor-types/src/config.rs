//! Global configuration types for Conductor.
//!
//! `GlobalConfig` represents the top-level `config.toml`. Every section and
//! field has a default, so an empty file (or no file) yields a working setup.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::recovery::BackoffStrategy;
use crate::workflow::SkippedStepPolicy;

/// Top-level configuration.
///
/// Loaded from `~/.conductor/config.toml` unless overridden.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl GlobalConfig {
    /// Reject values that would make a component misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.recovery.validate()?;
        self.engine.validate()?;
        self.scheduler.validate()?;
        self.orchestrator.validate()?;
        if self.events.capacity == 0 {
            return Err(ConfigError::MustBePositive { field: "events.capacity" });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Recovery
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Terminal failures before a circuit opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// How long an open circuit rejects calls.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub default_max_attempts: u32,
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: f64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: f64,
    /// Per-context retry overrides, e.g. `[recovery.policies."agent:deploy"]`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub policies: BTreeMap<String, PolicyOverride>,
}

/// Fields left unset fall back to the recovery defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff: Option<BackoffStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_delay_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_secs: Option<f64>,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_cooldown_secs() -> u64 {
    60
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_secs() -> f64 {
    1.0
}
fn default_max_delay_secs() -> f64 {
    60.0
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
            default_max_attempts: default_max_attempts(),
            base_delay_secs: default_base_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
            policies: BTreeMap::new(),
        }
    }
}

impl RecoveryConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::MustBePositive { field: "recovery.failure_threshold" });
        }
        if self.default_max_attempts == 0 {
            return Err(ConfigError::MustBePositive { field: "recovery.default_max_attempts" });
        }
        check_delays(self.base_delay_secs, self.max_delay_secs)?;
        for policy in self.policies.values() {
            if policy.max_attempts == Some(0) {
                return Err(ConfigError::MustBePositive { field: "recovery.policies.max_attempts" });
            }
            check_delays(
                policy.base_delay_secs.unwrap_or(self.base_delay_secs),
                policy.max_delay_secs.unwrap_or(self.max_delay_secs),
            )?;
        }
        Ok(())
    }
}

fn check_delays(base: f64, max: f64) -> Result<(), ConfigError> {
    if !(base.is_finite() && base >= 0.0) {
        return Err(ConfigError::Invalid {
            field: "base_delay_secs",
            reason: format!("{base} is not a non-negative number"),
        });
    }
    if !max.is_finite() || base > max {
        return Err(ConfigError::DelayRange { base, max });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Workflow engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub skipped_step_policy: SkippedStepPolicy,
    #[serde(default)]
    pub step_backoff: BackoffStrategy,
    #[serde(default = "default_base_delay_secs")]
    pub step_base_delay_secs: f64,
    #[serde(default = "default_max_delay_secs")]
    pub step_max_delay_secs: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            skipped_step_policy: SkippedStepPolicy::default(),
            step_backoff: BackoffStrategy::Exponential,
            step_base_delay_secs: default_base_delay_secs(),
            step_max_delay_secs: default_max_delay_secs(),
        }
    }
}

impl EngineConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        check_delays(self.step_base_delay_secs, self.step_max_delay_secs)
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    /// Drain the queue as soon as a running slot frees instead of waiting
    /// for the next tick.
    #[serde(default = "default_redrain")]
    pub redrain_on_release: bool,
}

fn default_max_concurrent() -> usize {
    5
}
fn default_check_interval_secs() -> u64 {
    10
}
fn default_redrain() -> bool {
    true
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            check_interval_secs: default_check_interval_secs(),
            redrain_on_release: default_redrain(),
        }
    }
}

impl SchedulerConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::MustBePositive { field: "scheduler.max_concurrent" });
        }
        if self.check_interval_secs == 0 {
            return Err(ConfigError::MustBePositive { field: "scheduler.check_interval_secs" });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
    #[serde(default = "default_history_limit")]
    pub message_history_limit: usize,
    #[serde(default = "default_agent_timeout_secs")]
    pub default_timeout_secs: u64,
    /// Attempts per agent call; 1 disables retries.
    #[serde(default = "default_agent_attempts")]
    pub max_attempts: u32,
}

fn default_mailbox_capacity() -> usize {
    256
}
fn default_history_limit() -> usize {
    1000
}
fn default_agent_timeout_secs() -> u64 {
    300
}
fn default_agent_attempts() -> u32 {
    1
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: default_mailbox_capacity(),
            message_history_limit: default_history_limit(),
            default_timeout_secs: default_agent_timeout_secs(),
            max_attempts: default_agent_attempts(),
        }
    }
}

impl OrchestratorConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.mailbox_capacity == 0 {
            return Err(ConfigError::MustBePositive { field: "orchestrator.mailbox_capacity" });
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::MustBePositive { field: "orchestrator.max_attempts" });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Events & metrics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Broadcast channel capacity.
    #[serde(default = "default_event_capacity")]
    pub capacity: usize,
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: default_event_capacity(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Gauge name -> maximum value before an alert is raised.
    #[serde(default)]
    pub thresholds: HashMap<String, f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = GlobalConfig::default();
        assert_eq!(config.recovery.failure_threshold, 5);
        assert_eq!(config.recovery.cooldown_secs, 60);
        assert_eq!(config.scheduler.max_concurrent, 5);
        assert_eq!(config.scheduler.check_interval_secs, 10);
        assert!(config.scheduler.redrain_on_release);
        assert_eq!(config.orchestrator.mailbox_capacity, 256);
        assert_eq!(config.engine.skipped_step_policy, SkippedStepPolicy::Ignore);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let toml_str = r#"
[scheduler]
max_concurrent = 2

[engine]
skipped_step_policy = "count_as_failure"

[metrics.thresholds]
cpu_percent = 90.0
"#;
        let config: GlobalConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.scheduler.max_concurrent, 2);
        assert_eq!(config.scheduler.check_interval_secs, 10);
        assert_eq!(config.engine.skipped_step_policy, SkippedStepPolicy::CountAsFailure);
        assert_eq!(config.metrics.thresholds["cpu_percent"], 90.0);
        assert_eq!(config.recovery, RecoveryConfig::default());
    }

    #[test]
    fn recovery_policy_overrides() {
        let toml_str = r#"
[recovery.policies."agent:deploy"]
max_attempts = 5
backoff = "linear"

[recovery.policies."workflow:nightly:copy"]
base_delay_secs = 0.5
"#;
        let config: GlobalConfig = toml::from_str(toml_str).unwrap();
        let deploy = &config.recovery.policies["agent:deploy"];
        assert_eq!(deploy.max_attempts, Some(5));
        assert_eq!(deploy.backoff, Some(BackoffStrategy::Linear));
        assert_eq!(deploy.base_delay_secs, None);
        assert_eq!(
            config.recovery.policies["workflow:nightly:copy"].base_delay_secs,
            Some(0.5)
        );
        assert!(config.validate().is_ok());

        let bad: GlobalConfig =
            toml::from_str("[recovery.policies.x]\nmax_attempts = 0\n").unwrap();
        assert_eq!(
            bad.validate(),
            Err(ConfigError::MustBePositive { field: "recovery.policies.max_attempts" })
        );

        let inverted: GlobalConfig =
            toml::from_str("[recovery.policies.x]\nbase_delay_secs = 120.0\n").unwrap();
        assert!(matches!(inverted.validate(), Err(ConfigError::DelayRange { .. })));
    }

    #[test]
    fn empty_toml_is_default() {
        let config: GlobalConfig = toml::from_str("").unwrap();
        assert_eq!(config, GlobalConfig::default());
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let mut config = GlobalConfig::default();
        config.scheduler.max_concurrent = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::MustBePositive { field: "scheduler.max_concurrent" })
        );
    }

    #[test]
    fn validate_rejects_inverted_delays() {
        let mut config = GlobalConfig::default();
        config.recovery.base_delay_secs = 120.0;
        assert!(matches!(config.validate(), Err(ConfigError::DelayRange { .. })));
    }
}
