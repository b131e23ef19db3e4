//! Ready-made rules for common automation needs.

use serde_json::json;

use conductor_types::rule::{
    AlertSeverity, ConditionSource, Rule, RuleAction, RuleCondition, RuleOperator, RuleType,
};

fn base(id: &str, name: &str, rule_type: RuleType) -> Rule {
    Rule {
        id: id.to_string(),
        name: name.to_string(),
        rule_type,
        conditions: Vec::new(),
        actions: Vec::new(),
        enabled: true,
        priority: 5,
        evaluation_count: 0,
        trigger_count: 0,
        last_triggered: None,
    }
}

/// Warn when the `cpu_percent` gauge exceeds `threshold`.
pub fn high_cpu_alert(threshold: f64) -> Rule {
    Rule {
        conditions: vec![RuleCondition {
            field: "cpu_percent".into(),
            operator: RuleOperator::Greater,
            value: json!(threshold),
            source: ConditionSource::Metrics,
        }],
        actions: vec![RuleAction::Alert {
            message: format!("CPU usage exceeded {threshold}%"),
            severity: AlertSeverity::Warning,
        }],
        ..base("high_cpu_alert", "High CPU Alert", RuleType::Threshold)
    }
}

/// Pause the workflow in context and raise a critical alert once it has
/// failed `failure_count` times.
pub fn workflow_failure_escalation(failure_count: u32) -> Rule {
    Rule {
        conditions: vec![
            RuleCondition {
                field: "workflow.status".into(),
                operator: RuleOperator::Equals,
                value: json!("failed"),
                source: ConditionSource::Context,
            },
            RuleCondition {
                field: "workflow.failure_count".into(),
                operator: RuleOperator::GreaterEqual,
                value: json!(failure_count),
                source: ConditionSource::Context,
            },
        ],
        actions: vec![
            RuleAction::PauseWorkflow { workflow_id: None },
            RuleAction::Alert {
                message: format!("Workflow failed {failure_count} times, pausing execution"),
                severity: AlertSeverity::Critical,
            },
        ],
        ..base(
            "workflow_failure_escalation",
            "Workflow Failure Escalation",
            RuleType::Trigger,
        )
    }
}

/// Run `backup_workflow` when the UTC clock reads `hour:minute`.
pub fn scheduled_backup(hour: u32, minute: u32) -> Rule {
    let at = |field: &str, value: u32| RuleCondition {
        field: field.into(),
        operator: RuleOperator::Equals,
        value: json!(value),
        source: ConditionSource::Time,
    };
    Rule {
        conditions: vec![at("time.hour", hour), at("time.minute", minute)],
        actions: vec![RuleAction::RunWorkflow {
            workflow_id: "backup_workflow".into(),
            priority: None,
        }],
        ..base("scheduled_backup", "Scheduled Backup", RuleType::Schedule)
    }
}
