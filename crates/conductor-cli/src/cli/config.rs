//! `conductor config`: print the effective configuration.

use std::path::Path;

use anyhow::Result;
use console::style;

use conductor_types::config::GlobalConfig;

pub fn show(config: &GlobalConfig, source: &Path, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(config)?);
        return Ok(());
    }

    let origin = if source.exists() {
        source.display().to_string()
    } else {
        format!("{} (not found, defaults)", source.display())
    };
    println!();
    println!("  {} {}", style("Config:").bold(), style(origin).dim());
    println!();
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
