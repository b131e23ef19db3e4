//! `conductor run`: execute one workflow and report per-step outcomes.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use conductor_core::workflow::load_workflow_file;
use conductor_types::event::AutomationEvent;
use conductor_types::workflow::{Workflow, WorkflowRunSummary, WorkflowStatus};

use super::{step_status_color, styled_workflow_status};
use crate::state::AppState;

pub async fn run(
    state: &AppState,
    file: &Path,
    parallel: Option<bool>,
    json: bool,
    quiet: bool,
) -> Result<()> {
    let mut def = load_workflow_file(file)
        .with_context(|| format!("Failed to load workflow {}", file.display()))?;
    if let Some(parallel) = parallel {
        def.parallel = parallel;
    }

    let spinner = (!json && !quiet).then(ProgressBar::new_spinner);
    let progress = match &spinner {
        Some(spinner) => {
            spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
            spinner.set_message(format!("Running {}...", def.name));
            spinner.enable_steady_tick(Duration::from_millis(100));
            Some(follow_steps(state, spinner.clone()))
        }
        None => None,
    };

    let result = state.engine.execute(Workflow::from_definition(def)).await;

    if let Some(progress) = progress {
        progress.abort();
    }
    if let Some(spinner) = &spinner {
        spinner.finish_and_clear();
    }
    let workflow = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&workflow)?);
    } else if !quiet {
        print_report(&workflow);
    }

    if workflow.status != WorkflowStatus::Success {
        let summary = WorkflowRunSummary::from(&workflow);
        bail!(
            "workflow '{}' finished {} ({} failed, {} skipped)",
            workflow.name,
            summary.status,
            summary.failed,
            summary.skipped
        );
    }
    Ok(())
}

/// Mirror step events into the spinner message.
fn follow_steps(state: &AppState, spinner: ProgressBar) -> tokio::task::JoinHandle<()> {
    let mut rx = state.events.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            if let AutomationEvent::StepUpdate { step_id, status, .. } = event {
                spinner.set_message(format!("{step_id}: {status}"));
            }
        }
    })
}

fn print_report(workflow: &Workflow) {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Status"),
            Cell::new("Attempts"),
            Cell::new("Result / Error"),
        ]);

    for step in &workflow.steps {
        let detail = match (&step.result, &step.error) {
            (Some(result), _) => result
                .get("output")
                .and_then(|o| o.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| result.to_string()),
            (None, Some(error)) => error.clone(),
            (None, None) => String::new(),
        };
        table.add_row(vec![
            Cell::new(&step.id),
            Cell::new(step.status.to_string()).fg(step_status_color(step.status)),
            Cell::new(step.attempts),
            Cell::new(detail),
        ]);
    }

    let elapsed = match (workflow.started_at, workflow.finished_at) {
        (Some(start), Some(end)) => format!("{:.2}s", (end - start).num_milliseconds() as f64 / 1000.0),
        _ => "-".to_string(),
    };

    println!();
    println!(
        "  {} {} in {}",
        style(&workflow.name).cyan().bold(),
        styled_workflow_status(workflow.status),
        elapsed
    );
    println!();
    println!("{table}");
    println!();
}
