//! CLI command definitions for the `conductor` binary.

pub mod config;
pub mod rules;
pub mod run;
pub mod serve;
pub mod validate;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::{StyledObject, style};

use conductor_types::workflow::{StepStatus, WorkflowStatus};

/// Run workflows, schedules and automation rules.
#[derive(Parser)]
#[command(name = "conductor", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to config.toml.
    #[arg(long, global = true, env = "CONDUCTOR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Parse and validate a workflow file, and show its dependency levels.
    Validate {
        /// Workflow file (.yaml, .yml or .json).
        file: PathBuf,
    },

    /// Execute a workflow once with the dry-run echo agents.
    Run {
        /// Workflow file (.yaml, .yml or .json).
        file: PathBuf,

        /// Force level-parallel execution.
        #[arg(long, conflicts_with = "sequential")]
        parallel: bool,

        /// Force one-step-at-a-time execution.
        #[arg(long)]
        sequential: bool,
    },

    /// Evaluate a rules file once against a context, logging actions.
    Rules {
        /// Rules file (.yaml, .yml or .json).
        file: PathBuf,

        /// Event context as a JSON object.
        #[arg(long)]
        context: Option<String>,
    },

    /// Run the scheduler and rules loop until Ctrl+C.
    Serve {
        /// Directory of workflow definition files.
        #[arg(long)]
        workflows: PathBuf,

        /// Scheduled task file.
        #[arg(long)]
        schedule: Option<PathBuf>,

        /// Rules file.
        #[arg(long)]
        rules: Option<PathBuf>,

        /// Seconds between rule evaluations.
        #[arg(long, default_value = "30")]
        rules_interval: u64,
    },

    /// Print the effective configuration.
    Config,

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

// ---------------------------------------------------------------------------
// Shared formatting
// ---------------------------------------------------------------------------

pub fn styled_workflow_status(status: WorkflowStatus) -> StyledObject<String> {
    let text = status.to_string();
    match status {
        WorkflowStatus::Success => style(text).green(),
        WorkflowStatus::Failed => style(text).red(),
        WorkflowStatus::Cancelled => style(text).red().dim(),
        WorkflowStatus::Running | WorkflowStatus::Paused => style(text).yellow(),
        WorkflowStatus::Pending => style(text).dim(),
    }
}

pub fn step_status_color(status: StepStatus) -> comfy_table::Color {
    match status {
        StepStatus::Success => comfy_table::Color::Green,
        StepStatus::Failed => comfy_table::Color::Red,
        StepStatus::Skipped => comfy_table::Color::Yellow,
        StepStatus::Running => comfy_table::Color::Cyan,
        StepStatus::Pending => comfy_table::Color::Grey,
    }
}

/// Whether `path` names a JSON file (by extension).
pub fn is_json(path: &std::path::Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}
