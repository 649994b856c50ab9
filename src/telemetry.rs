use anyhow::{anyhow, Context, Result};
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::config::{Config, TelemetryConfig};

/// Default filter when `RUST_LOG` is unset
const DEFAULT_FILTER: &str = "info";

/// Initialize logging
///
/// Writes to the configured log file when telemetry is enabled, otherwise to
/// stdout. `RUST_LOG` overrides the default `info` filter.
///
/// # Errors
/// Returns error if the log file cannot be opened or a subscriber is already set.
pub fn init(config: &TelemetryConfig) -> Result<()> {
    let Some(path) = log_file_path(config)? else {
        // Basic stdout logging only
        tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .with_target(false)
            .try_init()
            .map_err(|e| anyhow!(e))?;
        return Ok(());
    };

    // Create parent directory if needed
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("failed to create log directory")?;
    }

    // Set up file appender
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .context("failed to open log file")?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(file)
        .with_target(false)
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow!(e))?;

    tracing::info!(path = %path.display(), "telemetry initialized");

    Ok(())
}

/// Expanded log file path, `None` when logging to stdout
///
/// # Errors
/// Returns error if the path uses `~/` and HOME is unset.
pub fn log_file_path(config: &TelemetryConfig) -> Result<Option<PathBuf>> {
    if !config.enabled {
        return Ok(None);
    }
    Config::expand_path(&config.log_path).map(Some)
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}
