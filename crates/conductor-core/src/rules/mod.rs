//! Declarative automation rules: AND-of-conditions guards that fire
//! actions.

pub mod actions;
pub mod condition;
pub mod engine;
pub mod templates;

use conductor_types::rule::{Rule, RuleOperator};

pub use actions::{ActionError, ActionExecutor, AutomationActions, LoggingActions};
pub use condition::{evaluate_operator, lookup_path, resolve_field};
pub use engine::RulesEngine;

#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("invalid rule: {0}")]
    Parse(String),

    #[error("invalid regex '{pattern}': {reason}")]
    InvalidRegex { pattern: String, reason: String },

    #[error("type mismatch for '{operator}': {detail}")]
    TypeMismatch { operator: RuleOperator, detail: String },

    #[error("unknown time field: {0}")]
    UnknownTimeField(String),

    #[error("rule not found: {0}")]
    UnknownRule(String),
}

/// Parse a YAML (or JSON) document holding either a list of rules or a
/// `rules:` mapping.
pub fn parse_rules(text: &str) -> Result<Vec<Rule>, RuleError> {
    #[derive(serde::Deserialize)]
    #[serde(untagged)]
    enum Document {
        List(Vec<Rule>),
        Wrapped { rules: Vec<Rule> },
    }

    let document: Document =
        serde_yaml_ng::from_str(text).map_err(|err| RuleError::Parse(err.to_string()))?;
    Ok(match document {
        Document::List(rules) | Document::Wrapped { rules } => rules,
    })
}
