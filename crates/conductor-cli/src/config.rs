//! Global configuration loader.
//!
//! Reads `config.toml` from `--config`, `CONDUCTOR_CONFIG`, or
//! `~/.conductor/config.toml`, and falls back to defaults when the file is
//! missing or unreadable. A file that parses but holds invalid values is
//! an error.

use std::path::{Path, PathBuf};

use anyhow::Context;

use conductor_types::config::GlobalConfig;

/// Default config location: `~/.conductor/config.toml`, or
/// `.conductor/config.toml` when there is no home directory.
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".conductor")
        .join("config.toml")
}

pub async fn load_global_config(path: &Path) -> anyhow::Result<GlobalConfig> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config found at {}, using defaults", path.display());
            return Ok(GlobalConfig::default());
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return Ok(GlobalConfig::default());
        }
    };

    let config = match toml::from_str::<GlobalConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            return Ok(GlobalConfig::default());
        }
    };

    config
        .validate()
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;
    Ok(config)
}
