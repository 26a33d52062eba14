//! Logging service - persistent run log in DuckDB
//!
//! Records migration events in logs.duckdb next to the migrated database so
//! operators can see when each instance ran, what it applied and why it
//! refused to start. Statement text is never stored here; it lives in the
//! ledger.
//!
//! The log database has its own small catalog and is migrated by the same
//! engine as the application database.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::adapters::duckdb::{DuckDbStore, DEFAULT_OPEN_RETRIES};
use crate::domain::result::Error;
use crate::log_migrations::log_catalog;
use crate::ports::SchemaStore;
use crate::services::migration::{MigrationReport, MigrationService, SchemaDrift};

/// File name of the run log, created next to the migrated database
pub const LOG_DB_FILE: &str = "logs.duckdb";

pub const EVENT_MIGRATION_STARTED: &str = "migration_started";
pub const EVENT_MIGRATION_COMPLETED: &str = "migration_completed";
pub const EVENT_MIGRATION_FAILED: &str = "migration_failed";
pub const EVENT_DRIFT_DETECTED: &str = "drift_detected";
pub const EVENT_COMMAND_EXECUTED: &str = "command_executed";

const LOG_COLUMNS: &str = "id, logged_at, entry_point, app_version, platform, \
    event, command, schema_version, error_message, error_details";

/// Counter for generating unique IDs within the same millisecond
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a unique ID based on timestamp + counter
fn generate_id() -> u64 {
    // Lower 48 bits carry the timestamp, upper 16 the counter
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed) & 0xFFFF;
    ((now_ms() as u64) << 16) | counter
}

/// Current unix timestamp in milliseconds
fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

fn detect_platform() -> &'static str {
    if cfg!(target_os = "macos") {
        "macos"
    } else if cfg!(target_os = "windows") {
        "windows"
    } else if cfg!(target_os = "linux") {
        "linux"
    } else {
        "unknown"
    }
}

/// Which program wrote a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryPoint {
    Cli,
    /// An application embedding the engine and migrating on startup
    Library,
}

impl EntryPoint {
    fn as_str(&self) -> &'static str {
        match self {
            EntryPoint::Cli => "cli",
            EntryPoint::Library => "library",
        }
    }
}

/// A log event to be recorded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
}

impl LogEvent {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            command: None,
            schema_version: None,
            error_message: None,
            error_details: None,
        }
    }

    /// Set the command context (for CLI events)
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_optional_command(self, command: Option<&str>) -> Self {
        match command {
            Some(command) => self.with_command(command),
            None => self,
        }
    }

    /// Set the ledger length the event refers to
    pub fn with_schema_version(mut self, version: u32) -> Self {
        self.schema_version = Some(version);
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_error_details(mut self, details: impl Into<String>) -> Self {
        self.error_details = Some(details.into());
        self
    }
}

/// A log entry as stored in the database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: u64,
    /// Unix milliseconds
    pub logged_at: i64,
    pub entry_point: String,
    pub app_version: String,
    pub platform: String,
    pub event: String,
    pub command: Option<String>,
    pub schema_version: Option<u32>,
    pub error_message: Option<String>,
    pub error_details: Option<String>,
}

impl LogEntry {
    fn from_row(row: &[serde_json::Value]) -> Result<Self> {
        let text = |i: usize| row.get(i).and_then(|v| v.as_str()).map(str::to_string);
        let required = |i: usize, name: &str| {
            text(i).ok_or_else(|| anyhow!("log row is missing column {}", name))
        };

        Ok(Self {
            id: row
                .first()
                .and_then(|v| v.as_u64())
                .ok_or_else(|| anyhow!("log row is missing column id"))?,
            logged_at: row
                .get(1)
                .and_then(|v| v.as_i64())
                .ok_or_else(|| anyhow!("log row is missing column logged_at"))?,
            entry_point: required(2, "entry_point")?,
            app_version: required(3, "app_version")?,
            platform: required(4, "platform")?,
            event: required(5, "event")?,
            command: text(6),
            schema_version: row.get(7).and_then(|v| v.as_u64()).map(|v| v as u32),
            error_message: text(8),
            error_details: text(9),
        })
    }
}

/// Service for the persistent run log
pub struct LoggingService {
    store: DuckDbStore,
    db_path: PathBuf,
    entry_point: EntryPoint,
    app_version: String,
    platform: &'static str,
}

impl LoggingService {
    /// Open or create logs.duckdb in `dir` and bring its schema up to date
    pub fn new(dir: &Path, entry_point: EntryPoint, app_version: impl Into<String>) -> Result<Self> {
        let db_path = dir.join(LOG_DB_FILE);
        let store = DuckDbStore::open(&db_path, DEFAULT_OPEN_RETRIES)
            .with_context(|| format!("Failed to open {}", db_path.display()))?;

        MigrationService::new(&store)
            .migrate(&log_catalog())
            .context("Failed to migrate the log database")?;

        Ok(Self {
            store,
            db_path,
            entry_point,
            app_version: app_version.into(),
            platform: detect_platform(),
        })
    }

    /// Record an event. Entry point, version and platform come from the
    /// service.
    pub fn log(&self, event: LogEvent) -> Result<()> {
        let mut tx = self.store.begin()?;
        tx.execute_with_params(
            &format!(
                "INSERT INTO sys_logs ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                LOG_COLUMNS
            ),
            &[
                serde_json::json!(generate_id()),
                serde_json::json!(now_ms()),
                serde_json::json!(self.entry_point.as_str()),
                serde_json::json!(self.app_version),
                serde_json::json!(self.platform),
                serde_json::json!(event.event),
                serde_json::json!(event.command),
                serde_json::json!(event.schema_version),
                serde_json::json!(event.error_message),
                serde_json::json!(event.error_details),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Record the start of a migration run
    pub fn log_migration_started(&self, command: Option<&str>) -> Result<()> {
        self.log(LogEvent::new(EVENT_MIGRATION_STARTED).with_optional_command(command))
    }

    /// Record how a migration run ended. A database ahead of the catalog
    /// gets a separate drift event.
    pub fn log_migration_outcome(
        &self,
        command: Option<&str>,
        outcome: &std::result::Result<MigrationReport, Error>,
    ) -> Result<()> {
        match outcome {
            Ok(report) => {
                let version = report.current_version as u32;
                self.log(
                    LogEvent::new(EVENT_MIGRATION_COMPLETED)
                        .with_optional_command(command)
                        .with_schema_version(version),
                )?;
                if let SchemaDrift::DatabaseAhead { extra } = report.drift {
                    self.log(
                        LogEvent::new(EVENT_DRIFT_DETECTED)
                            .with_optional_command(command)
                            .with_schema_version(version)
                            .with_error_details(format!("{} statement(s) unknown to this build", extra)),
                    )?;
                }
                Ok(())
            }
            Err(e) => {
                let kind = if e.is_integrity_violation() {
                    "integrity violation"
                } else {
                    "migration aborted"
                };
                self.log(
                    LogEvent::new(EVENT_MIGRATION_FAILED)
                        .with_optional_command(command)
                        .with_error(e.to_string())
                        .with_error_details(kind),
                )
            }
        }
    }

    /// Most recent entries first
    pub fn get_recent(&self, limit: usize) -> Result<Vec<LogEntry>> {
        self.select(&format!(
            "SELECT {} FROM sys_logs ORDER BY logged_at DESC, id DESC LIMIT {}",
            LOG_COLUMNS, limit
        ))
    }

    /// Most recent entries carrying an error message
    pub fn get_errors(&self, limit: usize) -> Result<Vec<LogEntry>> {
        self.select(&format!(
            "SELECT {} FROM sys_logs WHERE error_message IS NOT NULL \
             ORDER BY logged_at DESC, id DESC LIMIT {}",
            LOG_COLUMNS, limit
        ))
    }

    fn select(&self, sql: &str) -> Result<Vec<LogEntry>> {
        let result = self.store.query(sql)?;
        result.rows.iter().map(|row| LogEntry::from_row(row)).collect()
    }

    /// Total number of log entries
    pub fn count(&self) -> Result<u64> {
        let result = self.store.query("SELECT COUNT(*) FROM sys_logs")?;
        Ok(result
            .rows
            .first()
            .and_then(|row| row.first())
            .and_then(|v| v.as_u64())
            .unwrap_or(0))
    }

    /// Delete entries logged before `timestamp_ms` (unix ms)
    pub fn delete_before(&self, timestamp_ms: i64) -> Result<u64> {
        let mut tx = self.store.begin()?;
        let deleted = tx.execute_with_params(
            "DELETE FROM sys_logs WHERE logged_at < ?",
            &[serde_json::json!(timestamp_ms)],
        )?;
        tx.commit()?;
        Ok(deleted as u64)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}
