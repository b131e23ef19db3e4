//! Conductor CLI entry point.
//!
//! Binary name: `conductor`
//!
//! Parses arguments, sets up tracing, loads configuration, wires the core
//! components and dispatches to a command handler.

mod cli;
mod config;
mod executor;
mod state;

use std::time::Duration;

use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions need neither tracing nor state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "conductor", &mut std::io::stdout());
        return Ok(());
    }

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,conductor_core=debug",
        _ => "trace",
    };
    conductor_observe::init_tracing(cli.otel, filter)
        .map_err(|e| anyhow::anyhow!("failed to initialise tracing: {e}"))?;

    let result = dispatch(cli).await;
    conductor_observe::shutdown_tracing();
    result
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);
    let global = config::load_global_config(&config_path).await?;

    match cli.command {
        Commands::Validate { file } => cli::validate::validate(&file, cli.json),

        Commands::Run {
            file,
            parallel,
            sequential,
        } => {
            let mode = match (parallel, sequential) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            let state = AppState::init(&global)?;
            cli::run::run(&state, &file, mode, cli.json, cli.quiet).await
        }

        Commands::Rules { file, context } => {
            let state = AppState::init(&global)?;
            cli::rules::evaluate(&state, &file, context.as_deref(), cli.json)
        }

        Commands::Serve {
            workflows,
            schedule,
            rules,
            rules_interval,
        } => {
            let state = AppState::init(&global)?;
            let args = cli::serve::ServeArgs {
                workflows: &workflows,
                schedule: schedule.as_deref(),
                rules: rules.as_deref(),
                rules_interval: Duration::from_secs(rules_interval.max(1)),
            };
            cli::serve::serve(&state, args, cli.quiet).await
        }

        Commands::Config => cli::config::show(&global, &config_path, cli.json),

        Commands::Completions { .. } => Ok(()),
    }
}
