//! `conductor serve`: long-running scheduler plus periodic rule
//! evaluation, stopped gracefully on Ctrl+C or SIGTERM.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use console::style;
use serde_json::{Map, Value, json};
use tokio::sync::broadcast::error::RecvError;

use conductor_core::rules::RulesEngine;
use conductor_core::workflow::load_workflow_file;
use conductor_types::event::AutomationEvent;
use conductor_types::rule::TriggeredRule;
use conductor_types::schedule::ScheduledTaskConfig;
use conductor_types::workflow::{WorkflowDefinition, WorkflowStatus};

use super::rules::{install_rules, load_rules_file};
use crate::state::AppState;

pub struct ServeArgs<'a> {
    pub workflows: &'a Path,
    pub schedule: Option<&'a Path>,
    pub rules: Option<&'a Path>,
    pub rules_interval: Duration,
}

pub async fn serve(state: &AppState, args: ServeArgs<'_>, quiet: bool) -> Result<()> {
    for def in load_workflow_dir(args.workflows)? {
        let id = def.id.clone();
        state
            .catalog
            .insert(def)
            .with_context(|| format!("Invalid workflow '{id}'"))?;
    }
    if state.catalog.is_empty() {
        bail!("no workflow definitions found in {}", args.workflows.display());
    }

    if let Some(path) = args.schedule {
        for task in load_schedule_file(path)? {
            let id = task.id.clone();
            state
                .scheduler
                .add_task(task)
                .with_context(|| format!("Invalid scheduled task '{id}'"))?;
        }
    }

    let rules = Arc::new(state.rules_engine(Arc::new(state.automation_actions())));
    if let Some(path) = args.rules {
        install_rules(&rules, load_rules_file(path)?)?;
    }

    state.scheduler.start()?;
    if !quiet {
        println!();
        println!(
            "  {} Conductor serving {} workflows, {} scheduled tasks, {} rules",
            style("⚡").bold(),
            state.catalog.len(),
            state.scheduler.list_tasks().len(),
            rules.len()
        );
        println!("  {}", style("Press Ctrl+C to stop").dim());
    }

    let events = tokio::spawn(react_to_events(state.events.subscribe(), Arc::clone(&rules)));
    let mut ticker = tokio::time::interval(args.rules_interval);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                let fired = rules_tick(state, &rules);
                if !fired.is_empty() {
                    tracing::info!(count = fired.len(), "rules triggered");
                }
            }
        }
    }

    state.scheduler.stop().await;
    events.abort();
    if !quiet {
        println!("\n  Conductor stopped.");
    }
    Ok(())
}

/// Sample gauges, raise threshold alerts, then evaluate every rule.
fn rules_tick(state: &AppState, rules: &RulesEngine) -> Vec<TriggeredRule> {
    state.sample_metrics();
    state.metrics.check_thresholds();
    rules.evaluate_all_rules(periodic_context(state))
}

/// Snapshot fed to periodic rule evaluation.
fn periodic_context(state: &AppState) -> Map<String, Value> {
    let mut context = Map::new();
    context.insert("scheduler".into(), json!(state.scheduler.stats()));
    context.insert("agents".into(), json!(state.orchestrator.system_status()));
    context
}

/// Log every event, and evaluate rules on workflow completions with a
/// `workflow` context carrying the running failure count.
async fn react_to_events(
    mut rx: tokio::sync::broadcast::Receiver<AutomationEvent>,
    rules: Arc<RulesEngine>,
) {
    let mut failures: HashMap<String, u64> = HashMap::new();
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event consumer lagged");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        tracing::debug!(event = event.type_name(), ?event, "event");

        if let AutomationEvent::WorkflowUpdate { workflow_id, status, .. } = event {
            if !status.is_terminal() {
                continue;
            }
            let count = failures.entry(workflow_id.clone()).or_default();
            if status == WorkflowStatus::Failed {
                *count += 1;
            }
            let mut context = Map::new();
            context.insert(
                "workflow".into(),
                json!({ "id": workflow_id, "status": status, "failure_count": *count }),
            );
            rules.evaluate_all_rules(context);
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Every `.yaml`, `.yml` and `.json` file in `dir`, sorted by file name.
pub fn load_workflow_dir(dir: &Path) -> Result<Vec<WorkflowDefinition>> {
    let mut paths: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read workflow directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| matches!(e, "yaml" | "yml" | "json"))
        })
        .collect();
    paths.sort();

    paths
        .iter()
        .map(|path| {
            load_workflow_file(path)
                .with_context(|| format!("Failed to load workflow {}", path.display()))
        })
        .collect()
}

/// A list of scheduled tasks, or a `tasks:` mapping holding one.
pub fn load_schedule_file(path: &Path) -> Result<Vec<ScheduledTaskConfig>> {
    #[derive(serde::Deserialize)]
    #[serde(untagged)]
    enum Document {
        List(Vec<ScheduledTaskConfig>),
        Wrapped { tasks: Vec<ScheduledTaskConfig> },
    }

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read schedule file {}", path.display()))?;
    let document: Document = if super::is_json(path) {
        serde_json::from_str(&text)?
    } else {
        serde_yaml_ng::from_str(&text)?
    };
    Ok(match document {
        Document::List(tasks) | Document::Wrapped { tasks } => tasks,
    })
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
