//! Agent orchestration types: messages, statistics, task outcomes and
//! multi-agent coordination results.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A message between two registered agents.
///
/// Consumed once from the recipient's mailbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub id: Uuid,
    pub from: String,
    pub to: String,
    pub message_type: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl AgentMessage {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        message_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            from: from.into(),
            to: to.into(),
            message_type: message_type.into(),
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// Running counters for one agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentStats {
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    /// Exponential moving average over successful calls.
    pub avg_response_time_secs: f64,
    pub last_active: Option<DateTime<Utc>>,
}

impl AgentStats {
    /// Total tasks handled, used as the load measure for routing.
    pub fn load(&self) -> u64 {
        self.tasks_completed + self.tasks_failed
    }

    /// Fraction of handled tasks that failed, `0.0` when idle.
    pub fn error_rate(&self) -> f64 {
        match self.load() {
            0 => 0.0,
            total => self.tasks_failed as f64 / total as f64,
        }
    }
}

/// Result of running one task on one agent. Failures are reported here
/// rather than raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub success: bool,
    /// `None` when no agent could be selected.
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub response_time_secs: f64,
}

/// How several agents share one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CoordinationStrategy {
    /// One after another, each seeing the previous outcome in its context.
    #[default]
    Sequential,
    /// All at once, joined at the end.
    Parallel,
    /// Each agent's result becomes the next agent's input.
    Pipeline,
}

impl fmt::Display for CoordinationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::Parallel => write!(f, "parallel"),
            Self::Pipeline => write!(f, "pipeline"),
        }
    }
}

impl FromStr for CoordinationStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "parallel" => Ok(Self::Parallel),
            "pipeline" => Ok(Self::Pipeline),
            other => Err(format!("invalid coordination strategy: '{other}'")),
        }
    }
}

/// One agent's contribution to a coordinated task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRun {
    pub agent: String,
    pub outcome: TaskOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinationResult {
    /// AND of every run's success.
    pub success: bool,
    pub strategy: CoordinationStrategy,
    pub agents: Vec<String>,
    /// In the order the agents were given.
    pub results: Vec<AgentRun>,
}

/// Closed set of routing categories derived from task text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    Email,
    Web,
    System,
    General,
}

impl TaskCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Web => "web",
            Self::System => "system",
            Self::General => "general",
        }
    }
}

impl fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registry view of one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    pub name: String,
    pub capabilities: Vec<String>,
    pub stats: AgentStats,
    pub pending_messages: usize,
}
