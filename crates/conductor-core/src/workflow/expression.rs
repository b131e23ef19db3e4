//! JEXL evaluation of step `condition` predicates.
//!
//! Conditions see the accumulated state of the run:
//!
//! ```json
//! {
//!   "results":  { "<step_id>": <result> },
//!   "steps":    { "<step_id>": { "status": "success", "result": ..., "error": ... } },
//!   "workflow": { "id": "...", "name": "..." }
//! }
//! ```
//!
//! so `steps.fetch.status == 'success'` or `results.count > 10` work.
//! Step data is always passed as context, never spliced into the
//! expression text.

use serde_json::{Map, Value, json};

use conductor_types::workflow::Workflow;

#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    #[error("expression evaluation failed: {0}")]
    EvalFailed(String),

    #[error("invalid context: {0}")]
    InvalidContext(String),
}

/// JEXL evaluator with string and collection transforms registered.
pub struct ConditionEvaluator {
    evaluator: jexl_eval::Evaluator<'static>,
}

impl ConditionEvaluator {
    pub fn new() -> Self {
        let evaluator = jexl_eval::Evaluator::new()
            .with_transform("lower", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_lowercase()))
            })
            .with_transform("upper", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_uppercase()))
            })
            .with_transform("contains", |args: &[Value]| {
                let found = match (args.first(), args.get(1)) {
                    (Some(Value::Array(items)), Some(needle)) => items.contains(needle),
                    (Some(Value::String(s)), Some(Value::String(needle))) => s.contains(needle.as_str()),
                    _ => false,
                };
                Ok(json!(found))
            })
            .with_transform("startsWith", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let prefix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.starts_with(prefix)))
            })
            .with_transform("endsWith", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let suffix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.ends_with(suffix)))
            })
            .with_transform("length", |args: &[Value]| {
                let len = match args.first() {
                    Some(Value::String(s)) => s.chars().count(),
                    Some(Value::Array(a)) => a.len(),
                    Some(Value::Object(o)) => o.len(),
                    _ => 0,
                };
                Ok(json!(len as f64))
            });

        Self { evaluator }
    }

    /// Evaluate to a boolean using JavaScript-like truthiness.
    pub fn evaluate_bool(&self, expression: &str, context: &Value) -> Result<bool, ExpressionError> {
        if !context.is_object() {
            return Err(ExpressionError::InvalidContext(
                "context must be a JSON object".to_string(),
            ));
        }
        let result = self
            .evaluator
            .eval_in_context(expression, context)
            .map_err(|e| ExpressionError::EvalFailed(e.to_string()))?;
        Ok(truthy(&result))
    }

    /// Evaluate a step condition against a run. Evaluation errors count as
    /// "condition not met".
    pub fn condition_met(&self, expression: &str, workflow: &Workflow) -> bool {
        match self.evaluate_bool(expression, &condition_context(workflow)) {
            Ok(met) => met,
            Err(err) => {
                tracing::warn!(
                    workflow_id = %workflow.id,
                    expression,
                    error = %err,
                    "condition evaluation failed, treating as not met"
                );
                false
            }
        }
    }
}

impl Default for ConditionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Build the JSON object conditions evaluate against.
pub fn condition_context(workflow: &Workflow) -> Value {
    let mut steps = Map::new();
    for step in &workflow.steps {
        steps.insert(
            step.id.clone(),
            json!({
                "status": step.status,
                "result": step.result,
                "error": step.error,
            }),
        );
    }

    json!({
        "results": workflow.results,
        "steps": steps,
        "workflow": {
            "id": workflow.id,
            "name": workflow.name,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_types::workflow::{StepDefinition, StepStatus, WorkflowDefinition};

    fn workflow() -> Workflow {
        let mut wf = Workflow::from_definition(WorkflowDefinition {
            id: "wf".into(),
            name: "demo".into(),
            description: None,
            parallel: false,
            steps: vec![StepDefinition {
                id: "fetch".into(),
                command: "download".into(),
                agent: "auto".into(),
                depends_on: vec![],
                retry_count: 1,
                timeout_secs: 10,
                condition: None,
            }],
        });
        let step = wf.step_mut("fetch").unwrap();
        step.status = StepStatus::Success;
        step.result = Some(json!({"count": 12, "title": "Weekly Report"}));
        wf.results
            .insert("fetch".into(), json!({"count": 12, "title": "Weekly Report"}));
        wf
    }

    #[test]
    fn status_and_result_are_addressable() {
        let eval = ConditionEvaluator::new();
        let wf = workflow();
        assert!(eval.condition_met("steps.fetch.status == 'success'", &wf));
        assert!(eval.condition_met("results.fetch.count > 10", &wf));
        assert!(!eval.condition_met("results.fetch.count > 100", &wf));
        assert!(eval.condition_met("workflow.name == 'demo'", &wf));
    }

    #[test]
    fn transforms_are_available() {
        let eval = ConditionEvaluator::new();
        let wf = workflow();
        assert!(eval.condition_met("results.fetch.title|lower|startsWith('weekly')", &wf));
        assert!(eval.condition_met("results.fetch.title|length == 13", &wf));
    }

    #[test]
    fn errors_count_as_not_met() {
        let eval = ConditionEvaluator::new();
        assert!(!eval.condition_met("steps.fetch.status ==", &workflow()));
    }

    #[test]
    fn non_object_context_is_rejected() {
        let eval = ConditionEvaluator::new();
        assert!(matches!(
            eval.evaluate_bool("true", &json!(1)),
            Err(ExpressionError::InvalidContext(_))
        ));
    }

    #[test]
    fn truthiness_coercion() {
        assert!(!truthy(&Value::Null));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!("")));
        assert!(truthy(&json!([])));
        assert!(truthy(&json!("x")));
    }
}
