//! Ledger domain model

use serde::{Deserialize, Serialize};

use crate::domain::result::{Error, Result};

/// One applied catalog statement, as recorded in the ledger table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Catalog index (1-based), primary key
    pub statement_id: u32,
    /// Fingerprint of the whitespace-normalized statement
    pub statement_hash: String,
    /// RFC 3339 time the statement was applied
    pub insert_time: String,
    /// Full statement text as it was applied
    pub statement: String,
}

impl LedgerEntry {
    pub fn new(
        statement_id: u32,
        statement_hash: impl Into<String>,
        insert_time: impl Into<String>,
        statement: impl Into<String>,
    ) -> Self {
        Self {
            statement_id,
            statement_hash: statement_hash.into(),
            insert_time: insert_time.into(),
            statement: statement.into(),
        }
    }

    /// Decode a `statement_id, statement_hash, insert_time, statement` row
    pub fn from_row(row: &[serde_json::Value]) -> Result<Self> {
        let statement_id = match row.first() {
            Some(serde_json::Value::Number(n)) => n.as_u64(),
            Some(serde_json::Value::String(s)) => s.parse().ok(),
            _ => None,
        }
        .and_then(|id| u32::try_from(id).ok())
        .ok_or_else(|| Error::database(format!("invalid statement_id in ledger row: {:?}", row.first())))?;

        Ok(Self {
            statement_id,
            statement_hash: text_column(row, 1),
            insert_time: text_column(row, 2),
            statement: text_column(row, 3),
        })
    }

    /// Statement text collapsed to a single line of at most `max` characters
    pub fn summary(&self, max: usize) -> String {
        summarize(&self.statement, max)
    }
}

/// Collapse whitespace runs and cut to `max` characters
pub fn summarize(statement: &str, max: usize) -> String {
    let flat = statement.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > max {
        let cut: String = flat.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    } else {
        flat
    }
}

fn text_column(row: &[serde_json::Value], idx: usize) -> String {
    match row.get(idx) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Current schema version of a ledger: its row count
pub fn schema_version(ledger: &[LedgerEntry]) -> usize {
    ledger.len()
}
