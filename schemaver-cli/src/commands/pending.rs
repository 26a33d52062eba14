//! Pending command - statements the next migration would apply

use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use comfy_table::Cell;

use schemaver_core::domain::summarize;

use super::get_context;
use crate::output;

pub fn run(dir: &Path, json: bool) -> Result<ExitCode> {
    let ctx = get_context(dir)?;
    let pending = ctx.migration_service().pending(&ctx.catalog)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&pending)?);
        return Ok(ExitCode::SUCCESS);
    }

    if pending.is_empty() {
        output::success("Nothing to apply");
        return Ok(ExitCode::SUCCESS);
    }

    let mut table = output::create_table();
    table.set_header(vec!["ID", "Hash", "Statement"]);
    for statement in &pending {
        table.add_row(vec![
            Cell::new(statement.statement_id),
            Cell::new(&statement.statement_hash),
            Cell::new(summarize(&statement.statement, 80)),
        ]);
    }
    println!("{}", table);
    output::info(&format!("{} statement(s) pending", pending.len()));

    Ok(ExitCode::SUCCESS)
}
