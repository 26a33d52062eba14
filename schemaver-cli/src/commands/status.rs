//! Status command - show database and application versions

use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use colored::Colorize;
use comfy_table::{ContentArrangement, Table};

use schemaver_core::services::VersionState;

use super::get_context;
use crate::output;

pub fn run(dir: &Path, json: bool) -> Result<ExitCode> {
    let ctx = get_context(dir)?;
    let status = ctx.status_service.get_status(&ctx.catalog)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(ExitCode::SUCCESS);
    }

    println!("{}", "Schema Version Status".bold());
    println!();

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);

    let database = ctx.config.database.display().to_string();
    let catalog_source = match &ctx.config.catalog_dir {
        Some(d) => d.display().to_string(),
        None => "compiled-in".to_string(),
    };
    table.add_row(vec!["Database", database.as_str()]);
    table.add_row(vec!["Catalog", catalog_source.as_str()]);
    table.add_row(vec!["Database version", &status.database_version.to_string()]);
    table.add_row(vec!["Application version", &status.application_version.to_string()]);
    table.add_row(vec![
        "Last applied",
        status.last_applied.as_deref().unwrap_or("never"),
    ]);

    println!("{}", table);
    println!();

    match status.state {
        VersionState::UpToDate => output::success("Database is up to date"),
        VersionState::Behind { pending } => {
            output::info(&format!("{} statement(s) pending, run `sv migrate`", pending))
        }
        VersionState::DatabaseAhead { extra } => output::warning(&format!(
            "Database is at newer version: {} statement(s) are unknown to this build",
            extra
        )),
    }

    Ok(ExitCode::SUCCESS)
}
