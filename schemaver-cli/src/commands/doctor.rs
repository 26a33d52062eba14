//! Doctor command - verify the ledger against the catalog

use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use colored::Colorize;
use comfy_table::{Cell, Color, ContentArrangement, Table};
use serde_json::Value;

use schemaver_core::services::logging::EVENT_COMMAND_EXECUTED;
use schemaver_core::services::LogEvent;

use super::{get_context, get_logger, log_event};

// Stable display order; the service returns a map
const CHECK_ORDER: &[&str] = &[
    "ledger_table",
    "ledger_sequence",
    "statement_hashes",
    "schema_drift",
    "catalog_syntax",
];

/// Format a detail JSON value for display
fn format_detail(value: &Value) -> String {
    match value {
        Value::Object(map) => map
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| match v {
                Value::String(s) if s.chars().count() > 48 => {
                    format!("{}: {}...", k, s.chars().take(45).collect::<String>())
                }
                Value::String(s) => format!("{}: {}", k, s),
                _ => format!("{}: {}", k, v),
            })
            .collect::<Vec<_>>()
            .join(", "),
        Value::String(s) => s.clone(),
        _ => value.to_string(),
    }
}

pub fn run(dir: &Path, verbose: bool, json: bool) -> Result<ExitCode> {
    let ctx = get_context(dir)?;
    let result = ctx.doctor_service.run_checks(&ctx.catalog)?;

    let mut event = LogEvent::new(EVENT_COMMAND_EXECUTED).with_command("doctor");
    if result.has_errors() {
        event = event.with_error(format!("{} check(s) failed", result.summary.errors));
    }
    log_event(&get_logger(ctx.data_dir()), event);

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(if result.has_errors() {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        });
    }

    println!("{}", "Schema Health Check".bold());
    println!();

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Check", "Status", "Message"]);

    for check_name in CHECK_ORDER {
        let Some(check_result) = result.checks.get(*check_name) else {
            continue;
        };
        let status_cell = match check_result.status.as_str() {
            "pass" => Cell::new("PASS").fg(Color::Green),
            "warning" => Cell::new("WARN").fg(Color::Yellow),
            "error" => Cell::new("ERROR").fg(Color::Red),
            _ => Cell::new(&check_result.status),
        };

        table.add_row(vec![
            Cell::new(check_name),
            status_cell,
            Cell::new(&check_result.message),
        ]);

        if verbose {
            if let Some(details) = &check_result.details {
                for detail in details {
                    table.add_row(vec![
                        Cell::new(""),
                        Cell::new(""),
                        Cell::new(format!("  - {}", format_detail(detail))),
                    ]);
                }
            }
        }
    }

    println!("{}", table);
    println!();

    println!(
        "Summary: {} passed, {} warnings, {} errors",
        result.summary.passed.to_string().green(),
        result.summary.warnings.to_string().yellow(),
        result.summary.errors.to_string().red(),
    );

    Ok(if result.has_errors() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_detail_object() {
        let detail = json!({"statement_id": 2, "reason": null});
        assert_eq!(format_detail(&detail), "statement_id: 2");
    }

    #[test]
    fn test_format_detail_truncates_long_strings() {
        let detail = json!({"recorded": "x".repeat(60)});
        let formatted = format_detail(&detail);
        assert!(formatted.ends_with("..."));
        assert_eq!(formatted.len(), "recorded: ".len() + 45 + 3);
    }
}
