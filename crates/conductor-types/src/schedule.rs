//! Schedule types for the task scheduler.
//!
//! A `ScheduledTaskConfig` is what a user writes in a schedule file; the
//! scheduler turns it into a runtime task that tracks run counts and the
//! next due time.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// When a scheduled task becomes due.
///
/// Internally tagged by `type`:
/// ```yaml
/// schedule:
///   type: cron
///   minute: 30
///   hour: "*"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    /// Run a single time, at `at` or as soon as possible.
    Once {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        at: Option<DateTime<Utc>>,
    },
    /// Run every `interval_secs` seconds after the previous run.
    Interval {
        #[serde(default = "default_interval_secs")]
        interval_secs: u64,
    },
    /// Minute/hour match with `*` wildcards, or a full cron expression
    /// when `expression` is present.
    Cron {
        #[serde(default)]
        minute: CronField,
        #[serde(default)]
        hour: CronField,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expression: Option<String>,
    },
    /// Always due; gated externally by rules enabling or disabling the task.
    Conditional,
}

fn default_interval_secs() -> u64 {
    300
}

impl Schedule {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Once { .. } => "once",
            Self::Interval { .. } => "interval",
            Self::Cron { .. } => "cron",
            Self::Conditional => "conditional",
        }
    }
}

/// One field of the minimal cron subset.
///
/// Serialises as `"*"` or an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "CronFieldRepr", into = "CronFieldRepr")]
pub enum CronField {
    #[default]
    Any,
    At(u32),
}

impl CronField {
    pub fn matches(&self, value: u32) -> bool {
        match self {
            Self::Any => true,
            Self::At(v) => *v == value,
        }
    }
}

impl fmt::Display for CronField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "*"),
            Self::At(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum CronFieldRepr {
    Number(u32),
    Text(String),
}

impl TryFrom<CronFieldRepr> for CronField {
    type Error = String;

    fn try_from(repr: CronFieldRepr) -> Result<Self, Self::Error> {
        match repr {
            CronFieldRepr::Number(n) => Ok(Self::At(n)),
            CronFieldRepr::Text(s) if s.trim() == "*" => Ok(Self::Any),
            CronFieldRepr::Text(s) => s
                .trim()
                .parse::<u32>()
                .map(Self::At)
                .map_err(|_| format!("invalid cron field '{s}': expected '*' or a number")),
        }
    }
}

impl From<CronField> for CronFieldRepr {
    fn from(field: CronField) -> Self {
        match field {
            CronField::Any => CronFieldRepr::Text("*".to_string()),
            CronField::At(n) => CronFieldRepr::Number(n),
        }
    }
}

/// A scheduled task as declared in a schedule file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTaskConfig {
    #[serde(default = "new_task_id")]
    pub id: String,
    pub workflow_id: String,
    pub schedule: Schedule,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Stop after this many runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_runs: Option<u32>,
    /// Lower runs first.
    #[serde(default = "default_priority")]
    pub priority: i32,
}

fn new_task_id() -> String {
    Uuid::now_v7().to_string()
}

fn default_enabled() -> bool {
    true
}

pub fn default_priority() -> i32 {
    5
}

/// Point-in-time counters for a running scheduler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchedulerStats {
    pub total_tasks: usize,
    pub enabled_tasks: usize,
    pub queued: usize,
    pub running: usize,
    pub max_concurrent: usize,
}
