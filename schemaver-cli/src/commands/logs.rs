//! Logs command - read and prune the migration run log

use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use comfy_table::Cell;
use dialoguer::Confirm;

use schemaver_core::services::{EntryPoint, LogEntry, LoggingService};

use super::get_log_dir;
use crate::output::{self, format_timestamp_ms};

#[derive(Subcommand)]
pub enum LogsCommands {
    /// Show the most recent runs, newest first
    List {
        #[arg(short, long, default_value = "50")]
        limit: usize,
        /// Only failed runs and other entries with an error
        #[arg(long)]
        errors: bool,
        #[arg(long)]
        json: bool,
    },
    /// Delete entries older than a number of days
    Clear {
        #[arg(long, default_value = "30")]
        older_than_days: u32,
        /// Do not ask for confirmation
        #[arg(long, short = 'f')]
        force: bool,
        #[arg(long)]
        json: bool,
    },
}

pub fn run(dir: &Path, command: LogsCommands) -> Result<ExitCode> {
    let log_dir = get_log_dir(dir)?;
    std::fs::create_dir_all(&log_dir)?;
    let service = LoggingService::new(&log_dir, EntryPoint::Cli, env!("CARGO_PKG_VERSION"))?;

    match command {
        LogsCommands::List { limit, errors, json } => list(&service, limit, errors, json),
        LogsCommands::Clear {
            older_than_days,
            force,
            json,
        } => clear(&service, older_than_days, force, json),
    }
}

fn list(service: &LoggingService, limit: usize, errors: bool, json: bool) -> Result<ExitCode> {
    let entries = if errors {
        service.get_errors(limit)?
    } else {
        service.get_recent(limit)?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else if entries.is_empty() {
        output::info("The run log is empty");
    } else {
        let mut table = output::create_table();
        table.set_header(vec!["Time", "Event", "Version", "Source", "Detail"]);
        for entry in &entries {
            table.add_row(row(entry));
        }
        println!("{}", table);
    }

    Ok(ExitCode::SUCCESS)
}

fn row(entry: &LogEntry) -> Vec<Cell> {
    let source = match &entry.command {
        Some(command) => format!("{} {}", entry.entry_point, command),
        None => entry.entry_point.clone(),
    };
    let detail = match (&entry.error_message, &entry.error_details) {
        (Some(message), _) => message.red().to_string(),
        (None, Some(details)) => details.yellow().to_string(),
        (None, None) => String::new(),
    };

    vec![
        Cell::new(format_timestamp_ms(entry.logged_at)),
        Cell::new(&entry.event),
        Cell::new(entry.schema_version.map(|v| v.to_string()).unwrap_or_default()),
        Cell::new(source),
        Cell::new(detail),
    ]
}

/// Unix milliseconds `days` before `now_ms`
fn cutoff_ms(now_ms: i64, days: u32) -> i64 {
    now_ms - i64::from(days) * 24 * 60 * 60 * 1000
}

fn clear(service: &LoggingService, older_than_days: u32, force: bool, json: bool) -> Result<ExitCode> {
    if !force && !json {
        let confirmed = Confirm::new()
            .with_prompt(format!("Delete run log entries older than {} days?", older_than_days))
            .default(false)
            .interact()?;
        if !confirmed {
            output::info("Nothing deleted");
            return Ok(ExitCode::SUCCESS);
        }
    }

    let cutoff = cutoff_ms(chrono::Utc::now().timestamp_millis(), older_than_days);
    let deleted = service.delete_before(cutoff)?;
    let remaining = service.count()?;

    if json {
        println!(
            "{}",
            serde_json::json!({ "deleted": deleted, "remaining": remaining })
        );
    } else {
        output::success(&format!(
            "Deleted {} entries from {} ({} remaining)",
            deleted,
            service.db_path().display(),
            remaining
        ));
    }

    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cutoff_ms() {
        assert_eq!(cutoff_ms(86_400_000 * 3, 1), 86_400_000 * 2);
        assert_eq!(cutoff_ms(1_000, 0), 1_000);
    }
}
