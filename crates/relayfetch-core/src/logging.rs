//! Logging init: file under XDG state dir, or graceful fallback to stderr.
//!
//! Verbosity comes from `RELAYFETCH_LOG`, then `RUST_LOG`, then a default
//! that keeps retry decisions at debug and per-exchange transport chatter at
//! info.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// Environment variable with relayfetch's own filter directives.
pub const LOG_ENV: &str = "RELAYFETCH_LOG";

const DEFAULT_FILTER: &str =
    "info,relayfetch=debug,relayfetch_core::retry=debug,relayfetch_core::transport=info";

/// Pick the filter directives: `RELAYFETCH_LOG` wins over `RUST_LOG`, and
/// blank or unparsable values are skipped.
fn filter_spec(relay_env: Option<String>, rust_env: Option<String>) -> String {
    [relay_env, rust_env]
        .into_iter()
        .flatten()
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty() && EnvFilter::try_new(s).is_ok())
        .unwrap_or_else(|| DEFAULT_FILTER.to_string())
}

fn env_filter() -> EnvFilter {
    let spec = filter_spec(std::env::var(LOG_ENV).ok(), std::env::var("RUST_LOG").ok());
    EnvFilter::try_new(&spec).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// `~/.local/state/relayfetch/relayfetch.log`, creating the directory.
pub fn log_file_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("relayfetch")?;
    xdg_dirs
        .place_state_file("relayfetch.log")
        .context("create relayfetch state dir")
}

/// Initialize structured logging to [`log_file_path`].
/// On failure (e.g. log dir unwritable), returns Err so the caller can fall back to stderr.
pub fn init_logging() -> Result<()> {
    let path = log_file_path()?;
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("open log file {}", path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("install log subscriber: {e}"))?;

    tracing::info!(pid = std::process::id(), "relayfetch logging to {}", path.display());
    Ok(())
}

/// Initialize logging to stderr only. Use when init_logging() fails so the CLI doesn't crash.
pub fn init_logging_stderr() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}
