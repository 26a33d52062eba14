//! History command - list ledger rows

use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use comfy_table::Cell;

use schemaver_core::fetch_schema_version;

use super::get_context;
use crate::output;

const SUMMARY_WIDTH: usize = 60;

pub fn run(dir: &Path, full: bool, json: bool) -> Result<ExitCode> {
    let ctx = get_context(dir)?;

    let ledger = if ctx.migration_service().ledger_exists()? {
        fetch_schema_version(ctx.store.as_ref())?
    } else {
        Vec::new()
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&ledger)?);
        return Ok(ExitCode::SUCCESS);
    }

    if ledger.is_empty() {
        println!("No statements applied yet.");
        return Ok(ExitCode::SUCCESS);
    }

    let mut table = output::create_table();
    table.set_header(vec!["ID", "Applied", "Hash", "Statement"]);

    for entry in &ledger {
        let statement = if full {
            entry.statement.clone()
        } else {
            entry.summary(SUMMARY_WIDTH)
        };
        table.add_row(vec![
            Cell::new(entry.statement_id),
            Cell::new(output::format_time(&entry.insert_time)),
            Cell::new(&entry.statement_hash),
            Cell::new(statement),
        ]);
    }

    println!("{}", table);
    Ok(ExitCode::SUCCESS)
}
