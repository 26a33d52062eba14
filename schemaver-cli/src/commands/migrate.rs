//! Migrate command - bring the database up to the catalog's version

use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use colored::Colorize;
use comfy_table::Cell;

use schemaver_core::services::EntryPoint;
use schemaver_core::{MigrationReport, OperationResult, SchemaDrift};

use super::get_context;
use crate::output;

pub fn run(dir: &Path, json: bool) -> Result<ExitCode> {
    let ctx = get_context(dir)?;
    let result = ctx.migrate_logged(EntryPoint::Cli, Some("migrate"));

    if json {
        let failed = result.is_err();
        let envelope: OperationResult<MigrationReport> = result.into();
        println!("{}", serde_json::to_string_pretty(&envelope)?);
        return Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS });
    }

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            output::error(&format!("Migration failed: {}", e));
            if e.is_integrity_violation() {
                output::warning(
                    "The database history does not match this build. Do not start the application against it.",
                );
            }
            return Ok(ExitCode::FAILURE);
        }
    };

    print_report(&report);
    Ok(ExitCode::SUCCESS)
}

fn print_report(report: &MigrationReport) {
    let mut table = output::create_table();
    table.add_row(vec![Cell::new("Initial version"), Cell::new(report.initial_version)]);
    table.add_row(vec![
        Cell::new("Application version"),
        Cell::new(report.application_version),
    ]);
    table.add_row(vec![Cell::new("Current version"), Cell::new(report.current_version)]);
    table.add_row(vec![Cell::new("Applied"), Cell::new(report.applied.len())]);
    table.add_row(vec![Cell::new("Already applied"), Cell::new(report.already_applied)]);
    if report.conflicts_resolved > 0 {
        table.add_row(vec![
            Cell::new("Concurrent conflicts"),
            Cell::new(report.conflicts_resolved),
        ]);
    }
    println!("{}", table);

    if !report.applied.is_empty() {
        let ids: Vec<String> = report.applied.iter().map(|i| i.to_string()).collect();
        println!("Applied statements: {}", ids.join(", ").bold());
    }

    match report.drift {
        SchemaDrift::UpToDate => output::success("Database is up to date"),
        SchemaDrift::DatabaseAhead { extra } => output::warning(&format!(
            "Database is at newer version: {} statement(s) are unknown to this build",
            extra
        )),
    }
}
