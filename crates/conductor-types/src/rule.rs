//! Declarative automation rules.
//!
//! A rule is an AND of conditions guarding a list of actions. OR logic is
//! expressed as separate rules.
//!
//! ```yaml
//! id: cpu-alert
//! name: High CPU
//! type: threshold
//! conditions:
//!   - field: cpu_percent
//!     operator: ">"
//!     value: 90
//!     source: metrics
//! actions:
//!   - type: alert
//!     message: "CPU usage exceeded 90%"
//!     severity: warning
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    /// Event-based.
    Trigger,
    #[default]
    Condition,
    /// Time-based.
    Schedule,
    /// Metric-based.
    Threshold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleOperator {
    #[serde(rename = "==")]
    Equals,
    #[serde(rename = "!=")]
    NotEquals,
    #[serde(rename = ">")]
    Greater,
    #[serde(rename = ">=")]
    GreaterEqual,
    #[serde(rename = "<")]
    Less,
    #[serde(rename = "<=")]
    LessEqual,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "not_contains")]
    NotContains,
    /// Regex search anywhere in the value.
    #[serde(rename = "matches")]
    Matches,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not_in")]
    NotIn,
}

impl fmt::Display for RuleOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Equals => "==",
            Self::NotEquals => "!=",
            Self::Greater => ">",
            Self::GreaterEqual => ">=",
            Self::Less => "<",
            Self::LessEqual => "<=",
            Self::Contains => "contains",
            Self::NotContains => "not_contains",
            Self::Matches => "matches",
            Self::In => "in",
            Self::NotIn => "not_in",
        };
        f.write_str(s)
    }
}

/// Where a condition reads its left-hand value from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConditionSource {
    /// Dot-path lookup into the merged evaluation context.
    #[default]
    Context,
    /// External gauge lookup.
    Metrics,
    /// Fields of the current UTC time.
    Time,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleCondition {
    pub field: String,
    pub operator: RuleOperator,
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(default)]
    pub source: ConditionSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    #[default]
    Warning,
    Critical,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// What a satisfied rule does.
///
/// Workflow-targeting actions fall back to `workflow.id` in the evaluation
/// context when no id is given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleAction {
    Alert {
        message: String,
        #[serde(default)]
        severity: AlertSeverity,
    },
    RunWorkflow {
        workflow_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        priority: Option<i32>,
    },
    PauseWorkflow {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workflow_id: Option<String>,
    },
    ResumeWorkflow {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workflow_id: Option<String>,
    },
    CancelWorkflow {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workflow_id: Option<String>,
    },
    EnableTask {
        task_id: String,
    },
    DisableTask {
        task_id: String,
    },
}

impl RuleAction {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Alert { .. } => "alert",
            Self::RunWorkflow { .. } => "run_workflow",
            Self::PauseWorkflow { .. } => "pause_workflow",
            Self::ResumeWorkflow { .. } => "resume_workflow",
            Self::CancelWorkflow { .. } => "cancel_workflow",
            Self::EnableTask { .. } => "enable_task",
            Self::DisableTask { .. } => "disable_task",
        }
    }
}

/// A rule plus its evaluation counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default = "new_rule_id")]
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub rule_type: RuleType,
    #[serde(default)]
    pub conditions: Vec<RuleCondition>,
    #[serde(default)]
    pub actions: Vec<RuleAction>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Lower evaluates first.
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default)]
    pub evaluation_count: u64,
    #[serde(default)]
    pub trigger_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_triggered: Option<DateTime<Utc>>,
}

fn new_rule_id() -> String {
    format!("rule_{}", Uuid::now_v7())
}

fn default_enabled() -> bool {
    true
}

fn default_priority() -> i32 {
    5
}

/// A rule that fired during one evaluation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggeredRule {
    pub rule_id: String,
    pub rule_name: String,
    pub actions: Vec<RuleAction>,
    /// Actions whose executor returned an error.
    pub failed_actions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rule_parses_with_defaults() {
        let rule: Rule = serde_json::from_value(json!({
            "name": "urgent mail",
            "conditions": [
                {"field": "email.subject", "operator": "contains", "value": "urgent"}
            ],
            "actions": [
                {"type": "run_workflow", "workflow_id": "triage"}
            ]
        }))
        .unwrap();

        assert!(rule.id.starts_with("rule_"));
        assert_eq!(rule.rule_type, RuleType::Condition);
        assert!(rule.enabled);
        assert_eq!(rule.priority, 5);
        assert_eq!(rule.conditions[0].source, ConditionSource::Context);
        assert_eq!(rule.conditions[0].operator, RuleOperator::Contains);
        assert_eq!(
            rule.actions[0],
            RuleAction::RunWorkflow {
                workflow_id: "triage".into(),
                priority: None
            }
        );
    }

    #[test]
    fn operator_symbols_deserialize() {
        let ops: Vec<RuleOperator> =
            serde_json::from_value(json!(["==", "!=", ">", ">=", "<", "<=", "not_in"])).unwrap();
        assert_eq!(ops[4], RuleOperator::Less);
        assert_eq!(ops[6].to_string(), "not_in");
    }

    #[test]
    fn unknown_operator_is_rejected() {
        let result: Result<RuleCondition, _> = serde_json::from_value(json!({
            "field": "x", "operator": "~=", "value": 1
        }));
        assert!(result.is_err());
    }

    #[test]
    fn pause_action_without_target() {
        let action: RuleAction = serde_json::from_value(json!({"type": "pause_workflow"})).unwrap();
        assert_eq!(action, RuleAction::PauseWorkflow { workflow_id: None });
        assert_eq!(action.kind(), "pause_workflow");
    }
}
