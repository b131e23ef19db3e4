//! Runtime scheduled task: due-time computation and run bookkeeping.
//!
//! Cron schedules come in two flavours:
//! - the minimal `minute`/`hour` subset, where each field is an exact value
//!   or `*` (no ranges, steps or lists);
//! - a full 5-field expression evaluated by `croner`, used whenever
//!   `expression` is set. Human shorthands are normalised first.

use chrono::{DateTime, Duration as ChronoDuration, DurationRound, Timelike, Utc};
use serde::{Deserialize, Serialize};

use conductor_types::schedule::{CronField, Schedule, ScheduledTaskConfig};

/// How far ahead the minute/hour matcher looks. Any valid pair matches
/// within a day.
const CRON_SEARCH_MINUTES: i64 = 48 * 60;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SchedulerError {
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("scheduled task not found: {0}")]
    TaskNotFound(String),

    #[error("scheduled task already exists: {0}")]
    DuplicateTask(String),

    #[error("scheduler is already running")]
    AlreadyRunning,
}

// ---------------------------------------------------------------------------
// Shorthand normalisation
// ---------------------------------------------------------------------------

/// Normalise a schedule string to a 5-field cron expression.
///
/// Accepted (case-insensitive): `hourly`, `daily`, `weekly`,
/// `every minute`, `every hour`, `every day`, `every N minutes`,
/// `every N hours`. Anything with five whitespace-separated fields passes
/// through unchanged.
pub fn normalize_cron(input: &str) -> Result<String, SchedulerError> {
    let trimmed = input.trim();
    let invalid = |reason: &str| SchedulerError::InvalidCron {
        expression: input.to_string(),
        reason: reason.to_string(),
    };

    if trimmed.split_whitespace().count() == 5 {
        return Ok(trimmed.to_string());
    }

    let lower = trimmed.to_lowercase();
    match lower.as_str() {
        "every minute" => return Ok("* * * * *".to_string()),
        "hourly" | "every hour" => return Ok("0 * * * *".to_string()),
        "daily" | "every day" => return Ok("0 0 * * *".to_string()),
        "weekly" | "every week" => return Ok("0 0 * * 0".to_string()),
        _ => {}
    }

    let Some(rest) = lower.strip_prefix("every ") else {
        return Err(invalid("expected five fields or a shorthand"));
    };
    let words: Vec<&str> = rest.split_whitespace().collect();
    let [count, unit] = words.as_slice() else {
        return Err(invalid("expected 'every N minutes' or 'every N hours'"));
    };
    let n: u32 = count.parse().map_err(|_| invalid("interval is not a number"))?;
    if n == 0 {
        return Err(invalid("interval must be > 0"));
    }
    match unit.trim_end_matches('s') {
        "minute" if n < 60 => Ok(format!("*/{n} * * * *")),
        "hour" if n < 24 => Ok(format!("0 */{n} * * *")),
        "minute" | "hour" => Err(invalid("interval out of range")),
        _ => Err(invalid("unknown unit")),
    }
}

fn parse_cron(expression: &str) -> Result<croner::Cron, SchedulerError> {
    let normalized = normalize_cron(expression)?;
    normalized
        .parse::<croner::Cron>()
        .map_err(|e| SchedulerError::InvalidCron {
            expression: expression.to_string(),
            reason: e.to_string(),
        })
}

// ---------------------------------------------------------------------------
// ScheduledTask
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: String,
    pub workflow_id: String,
    pub schedule: Schedule,
    pub enabled: bool,
    pub max_runs: Option<u32>,
    pub run_count: u32,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    /// Lower runs first.
    pub priority: i32,
    /// One-shot task created by `run_now`; removed after it runs.
    pub ephemeral: bool,
    pub error_count: u32,
    pub last_error: Option<String>,
}

impl From<ScheduledTaskConfig> for ScheduledTask {
    fn from(config: ScheduledTaskConfig) -> Self {
        Self {
            id: config.id,
            workflow_id: config.workflow_id,
            schedule: config.schedule,
            enabled: config.enabled,
            max_runs: config.max_runs,
            run_count: 0,
            last_run: None,
            next_run: None,
            priority: config.priority,
            ephemeral: false,
            error_count: 0,
            last_error: None,
        }
    }
}

impl ScheduledTask {
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.workflow_id.trim().is_empty() {
            return Err(SchedulerError::InvalidSchedule(format!(
                "task '{}' has no workflow_id",
                self.id
            )));
        }
        match &self.schedule {
            Schedule::Interval { interval_secs: 0 } => Err(SchedulerError::InvalidSchedule(
                "interval must be > 0 seconds".to_string(),
            )),
            Schedule::Cron {
                expression: Some(expression),
                ..
            } => parse_cron(expression).map(|_| ()),
            Schedule::Cron { minute, hour, .. } => {
                if matches!(minute, CronField::At(m) if *m > 59) {
                    return Err(SchedulerError::InvalidSchedule(format!(
                        "cron minute {minute} out of range 0-59"
                    )));
                }
                if matches!(hour, CronField::At(h) if *h > 23) {
                    return Err(SchedulerError::InvalidSchedule(format!(
                        "cron hour {hour} out of range 0-23"
                    )));
                }
                Ok(())
            }
            Schedule::Once { .. } | Schedule::Interval { .. } | Schedule::Conditional => Ok(()),
        }
    }

    /// No more runs will ever happen: `max_runs` reached, or a one-shot
    /// task has already run.
    pub fn is_exhausted(&self) -> bool {
        if self.max_runs.is_some_and(|max| self.run_count >= max) {
            return true;
        }
        matches!(self.schedule, Schedule::Once { .. }) && self.run_count > 0
    }

    pub fn should_run_at(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled || self.is_exhausted() {
            return false;
        }
        self.next_run.is_none_or(|next| now >= next)
    }

    /// Next due time as of `now`, or `None` when the task will not run
    /// again.
    pub fn calculate_next_run(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.is_exhausted() {
            return None;
        }
        match &self.schedule {
            Schedule::Once { at } => Some(at.unwrap_or(now)),
            Schedule::Interval { interval_secs } => {
                let interval = ChronoDuration::seconds(i64::try_from(*interval_secs).ok()?);
                self.last_run.unwrap_or(now).checked_add_signed(interval)
            }
            Schedule::Cron {
                expression: Some(expression),
                ..
            } => match parse_cron(expression) {
                Ok(cron) => cron.iter_after(now).next(),
                Err(err) => {
                    tracing::warn!(task_id = %self.id, error = %err, "cannot compute next cron run");
                    None
                }
            },
            Schedule::Cron { minute, hour, .. } => next_minute_hour_match(*minute, *hour, now),
            Schedule::Conditional => Some(now),
        }
    }

    pub fn refresh_next_run(&mut self, now: DateTime<Utc>) {
        self.next_run = self.calculate_next_run(now);
    }

    /// Count a launch.
    pub fn record_run(&mut self, now: DateTime<Utc>) {
        self.run_count = self.run_count.saturating_add(1);
        self.last_run = Some(now);
    }

    pub fn record_error(&mut self, error: impl Into<String>) {
        self.error_count = self.error_count.saturating_add(1);
        self.last_error = Some(error.into());
    }
}

/// First minute boundary strictly after `now` whose minute and hour match.
fn next_minute_hour_match(
    minute: CronField,
    hour: CronField,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let step = ChronoDuration::minutes(1);
    let start = now.duration_trunc(step).ok()? + step;
    (0..CRON_SEARCH_MINUTES)
        .map(|i| start + ChronoDuration::minutes(i))
        .find(|t| minute.matches(t.minute()) && hour.matches(t.hour()))
}
