//! `conductor validate`: structural checks plus the dependency-level plan.

use std::path::Path;

use anyhow::{Result, anyhow};
use console::style;

use conductor_core::workflow::{WorkflowError, compute_levels, definition_warnings, load_workflow_file};

pub fn validate(file: &Path, json: bool) -> Result<()> {
    let def = load_workflow_file(file).map_err(|e| match e {
        WorkflowError::Parse(msg) => anyhow!("Failed to parse workflow: {msg}"),
        WorkflowError::Validation(msg) => anyhow!("Workflow validation failed: {msg}"),
        other => anyhow!("Failed to load workflow: {other}"),
    })?;
    let plan = compute_levels(&def.steps).map_err(|e| anyhow!("Workflow validation failed: {e}"))?;
    let warnings = definition_warnings(&def);

    if json {
        let out = serde_json::json!({
            "id": def.id,
            "name": def.name,
            "parallel": def.parallel,
            "steps": def.steps.len(),
            "levels": plan.levels,
            "unresolved": plan.unresolved,
            "warnings": warnings,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Workflow '{}' is valid ({} steps, {})",
        style("✓").green().bold(),
        style(&def.name).cyan(),
        def.steps.len(),
        if def.parallel { "parallel" } else { "sequential" }
    );
    println!();
    for (depth, ids) in plan.levels.iter().enumerate() {
        println!("  {} {}", style(format!("level {depth}:")).dim(), ids.join(", "));
    }
    if !plan.unresolved.is_empty() {
        println!(
            "  {} {}",
            style("never runs:").dim(),
            plan.unresolved.join(", ")
        );
    }
    if !warnings.is_empty() {
        println!();
        for warning in &warnings {
            println!("  {} {warning}", style("!").yellow().bold());
        }
    }
    println!();
    Ok(())
}
