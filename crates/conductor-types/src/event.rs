//! Status events emitted by the orchestration core.
//!
//! Consumers (a UI channel, a log sink, a notifier) subscribe to the event
//! bus and receive these. Serialised with a `type` tag so they can be
//! forwarded as JSON unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rule::AlertSeverity;
use crate::workflow::{StepStatus, WorkflowStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AutomationEvent {
    WorkflowUpdate {
        workflow_id: String,
        status: WorkflowStatus,
        message: String,
        timestamp: DateTime<Utc>,
    },
    StepUpdate {
        workflow_id: String,
        step_id: String,
        status: StepStatus,
        message: String,
        timestamp: DateTime<Utc>,
    },
    ThresholdAlert {
        alerts: Vec<String>,
        timestamp: DateTime<Utc>,
    },
    RuleAlert {
        rule_id: String,
        message: String,
        severity: AlertSeverity,
        timestamp: DateTime<Utc>,
    },
    CircuitOpened {
        context: String,
        failure_count: u32,
        timestamp: DateTime<Utc>,
    },
    TaskError {
        task_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl AutomationEvent {
    pub fn workflow_update(
        workflow_id: impl Into<String>,
        status: WorkflowStatus,
        message: impl Into<String>,
    ) -> Self {
        Self::WorkflowUpdate {
            workflow_id: workflow_id.into(),
            status,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn step_update(
        workflow_id: impl Into<String>,
        step_id: impl Into<String>,
        status: StepStatus,
        message: impl Into<String>,
    ) -> Self {
        Self::StepUpdate {
            workflow_id: workflow_id.into(),
            step_id: step_id.into(),
            status,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// The serialised `type` tag.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::WorkflowUpdate { .. } => "workflow_update",
            Self::StepUpdate { .. } => "step_update",
            Self::ThresholdAlert { .. } => "threshold_alert",
            Self::RuleAlert { .. } => "rule_alert",
            Self::CircuitOpened { .. } => "circuit_opened",
            Self::TaskError { .. } => "task_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_update_serializes_with_type_tag() {
        let event = AutomationEvent::workflow_update("wf-1", WorkflowStatus::Running, "started");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "workflow_update");
        assert_eq!(json["workflow_id"], "wf-1");
        assert_eq!(json["status"], "running");
        assert!(json["timestamp"].is_string());
        assert_eq!(event.type_name(), "workflow_update");
    }
}
