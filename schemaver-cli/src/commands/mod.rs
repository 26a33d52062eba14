//! CLI command implementations

pub mod doctor;
pub mod hash;
pub mod history;
pub mod logs;
pub mod migrate;
pub mod pending;
pub mod status;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use schemaver_core::config::Config;
use schemaver_core::services::{EntryPoint, LogEvent, LoggingService};
use schemaver_core::SchemaverContext;

/// Resolve the schemaver directory: `--dir` / SCHEMAVER_DIR, else ~/.schemaver
pub fn get_schemaver_dir(explicit: Option<PathBuf>) -> Result<PathBuf> {
    match explicit {
        Some(dir) => Ok(dir),
        None => Ok(dirs::home_dir()
            .context("Could not find home directory")?
            .join(".schemaver")),
    }
}

/// Open the configured database and catalog
pub fn get_context(dir: &Path) -> Result<SchemaverContext> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create schemaver directory: {:?}", dir))?;

    SchemaverContext::new(dir).context("Failed to initialize schemaver context")
}

/// Directory of the run log: next to the configured database
pub fn get_log_dir(dir: &Path) -> Result<PathBuf> {
    let config = Config::load(dir)?;
    Ok(config
        .database
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| dir.to_path_buf()))
}

/// Get the logging service for CLI operations
///
/// Returns None if logging fails to initialize (shouldn't block operations)
pub fn get_logger(log_dir: &Path) -> Option<LoggingService> {
    std::fs::create_dir_all(log_dir).ok()?;
    match LoggingService::new(log_dir, EntryPoint::Cli, env!("CARGO_PKG_VERSION")) {
        Ok(logger) => Some(logger),
        Err(e) => {
            tracing::debug!(error = %e, "run log unavailable");
            None
        }
    }
}

/// Log an event, ignoring any errors (logging should never break the app)
pub fn log_event(logger: &Option<LoggingService>, event: LogEvent) {
    if let Some(l) = logger {
        let _ = l.log(event);
    }
}
