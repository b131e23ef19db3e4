//! `conductor rules`: evaluate a rules file once with logged actions.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde_json::{Map, Value};

use conductor_core::rules::{LoggingActions, RulesEngine, parse_rules};
use conductor_types::rule::Rule;

use crate::state::AppState;

/// Read and parse a rules file (YAML, or JSON which YAML accepts too).
pub fn load_rules_file(path: &Path) -> Result<Vec<Rule>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read rules file {}", path.display()))?;
    parse_rules(&text).with_context(|| format!("Failed to parse rules file {}", path.display()))
}

/// Register `rules`, failing on the first invalid one.
pub fn install_rules(engine: &RulesEngine, rules: Vec<Rule>) -> Result<()> {
    for rule in rules {
        let id = rule.id.clone();
        engine
            .add_rule(rule)
            .with_context(|| format!("Invalid rule '{id}'"))?;
    }
    Ok(())
}

pub fn parse_context(raw: Option<&str>) -> Result<Map<String, Value>> {
    match raw {
        None => Ok(Map::new()),
        Some(raw) => match serde_json::from_str::<Value>(raw).context("--context is not valid JSON")? {
            Value::Object(map) => Ok(map),
            other => bail!("--context must be a JSON object, got {other}"),
        },
    }
}

pub fn evaluate(state: &AppState, file: &Path, context: Option<&str>, json: bool) -> Result<()> {
    let engine = state.rules_engine(Arc::new(LoggingActions));
    install_rules(&engine, load_rules_file(file)?)?;
    let fired = engine.evaluate_all_rules(parse_context(context)?);

    if json {
        println!("{}", serde_json::to_string_pretty(&fired)?);
        return Ok(());
    }

    println!();
    if fired.is_empty() {
        println!(
            "  {} No rules triggered ({} evaluated)",
            style("-").dim(),
            engine.len()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Rule").fg(Color::Cyan),
            Cell::new("Name"),
            Cell::new("Actions"),
        ]);
    for rule in &fired {
        let actions: Vec<&str> = rule.actions.iter().map(|a| a.kind()).collect();
        table.add_row(vec![
            Cell::new(&rule.rule_id),
            Cell::new(&rule.rule_name),
            Cell::new(actions.join(", ")),
        ]);
    }
    println!(
        "  {} {} of {} rules triggered",
        style("*").green().bold(),
        fired.len(),
        engine.len()
    );
    println!();
    println!("{table}");
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn context_must_be_an_object() {
        assert!(parse_context(None).unwrap().is_empty());
        assert_eq!(parse_context(Some(r#"{"a": 1}"#)).unwrap()["a"], 1);
        assert!(parse_context(Some("[1, 2]")).is_err());
        assert!(parse_context(Some("{nope")).is_err());
    }

    #[test]
    fn loads_yaml_and_json_rule_files() {
        let tmp = TempDir::new().unwrap();
        let yaml = tmp.path().join("rules.yaml");
        std::fs::write(
            &yaml,
            r#"
rules:
  - id: urgent
    name: Urgent mail
    conditions:
      - field: email.subject
        operator: contains
        value: urgent
    actions:
      - type: run_workflow
        workflow_id: triage
"#,
        )
        .unwrap();
        let rules = load_rules_file(&yaml).unwrap();
        assert_eq!(rules[0].id, "urgent");

        let json = tmp.path().join("rules.json");
        std::fs::write(&json, r#"[{"id": "x", "name": "X"}]"#).unwrap();
        assert_eq!(load_rules_file(&json).unwrap()[0].name, "X");

        let engine = RulesEngine::new();
        install_rules(&engine, rules).unwrap();
        assert_eq!(engine.len(), 1);
    }
}
