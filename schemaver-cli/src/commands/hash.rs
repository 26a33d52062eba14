//! Hash command - print a statement fingerprint

use std::path::Path;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};

use schemaver_core::domain::hash::normalize;
use schemaver_core::statement_hash;

pub fn run(statement: Option<&str>, file: Option<&Path>, json: bool) -> Result<ExitCode> {
    let text = match (statement, file) {
        (Some(s), None) => s.to_string(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        (Some(_), Some(_)) => bail!("Pass either a statement or --file, not both"),
        (None, None) => bail!("Pass a statement or --file"),
    };

    let hash = statement_hash(&text);

    if json {
        println!(
            "{}",
            serde_json::json!({
                "hash": hash,
                "normalized": normalize(&text),
            })
        );
    } else {
        println!("{}", hash);
    }

    Ok(ExitCode::SUCCESS)
}
