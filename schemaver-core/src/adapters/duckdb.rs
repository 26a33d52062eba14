//! DuckDB schema store implementation

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use duckdb::Connection;

use crate::domain::result::{Error, Result};
use crate::ports::{QueryResult, SchemaStore, StoreTransaction};

/// Default number of attempts when the database file is locked
pub const DEFAULT_OPEN_RETRIES: u32 = 5;

/// Initial retry delay in milliseconds (doubles each retry: 50, 100, 200, 400, 800ms)
const INITIAL_RETRY_DELAY_MS: u64 = 50;

/// Check if an error message indicates a file locking issue that should be retried
fn is_retryable_error(err_msg: &str) -> bool {
    let lower = err_msg.to_lowercase();
    // Windows error messages
    lower.contains("being used by another process")
        || lower.contains("cannot access the file")
        // Unix/macOS error messages
        || lower.contains("resource temporarily unavailable")
        || lower.contains("database is locked")
        || lower.contains("file is already open")
        || lower.contains("could not set lock on file")
}

/// Check if an error message reports a rejected primary key or unique constraint
fn is_unique_violation(err_msg: &str) -> bool {
    let lower = err_msg.to_lowercase();
    // DuckDB: Constraint Error: Duplicate key "statement_id: 1" violates primary key constraint
    lower.contains("duplicate key")
        || lower.contains("violates primary key")
        || lower.contains("violates unique constraint")
        // SQLite wording, for stores attached through DuckDB
        || lower.contains("unique constraint failed")
}

/// Check if an error message reports a clash with another open transaction
fn is_transaction_conflict(err_msg: &str) -> bool {
    let lower = err_msg.to_lowercase();
    // DuckDB: TransactionContext Error: Catalog write-write conflict on create with "a"
    lower.contains("write-write conflict")
        || (lower.contains("transactioncontext error") && lower.contains("conflict"))
}

/// Map a driver error onto the store error taxonomy
fn store_error(err: duckdb::Error) -> Error {
    let msg = err.to_string();
    if is_unique_violation(&msg) {
        Error::UniqueViolation(msg)
    } else if is_transaction_conflict(&msg) {
        Error::TransactionConflict(msg)
    } else {
        Error::Database(msg)
    }
}

/// DuckDB-backed [`SchemaStore`]
pub struct DuckDbStore {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl DuckDbStore {
    /// Open (or create) a database file
    ///
    /// Includes retry logic with exponential backoff for file locking errors,
    /// which occur when several processes start against the same file at once.
    pub fn open(db_path: &Path, max_retries: u32) -> Result<Self> {
        let attempts = max_retries.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            match Self::try_open_connection(db_path) {
                Ok(conn) => {
                    return Ok(Self {
                        conn: Mutex::new(conn),
                        db_path: Some(db_path.to_path_buf()),
                    });
                }
                Err(e) => {
                    let err_msg = e.to_string();
                    if is_retryable_error(&err_msg) && attempt < attempts - 1 {
                        let delay =
                            Duration::from_millis(INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt));
                        tracing::warn!(
                            retry = attempt + 1,
                            max_retries = attempts,
                            next_retry_ms = delay.as_millis() as u64,
                            error = %err_msg,
                            "database busy, waiting"
                        );
                        thread::sleep(delay);
                        last_error = Some(e);
                        continue;
                    }
                    return Err(store_error(e));
                }
            }
        }

        Err(last_error.map(store_error).unwrap_or_else(|| {
            Error::database(format!("Failed to open database after {} retries", attempts))
        }))
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let config = duckdb::Config::default()
            .enable_autoload_extension(false)
            .map_err(store_error)?;
        let conn = Connection::open_in_memory_with_flags(config).map_err(store_error)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: None,
        })
    }

    fn try_open_connection(db_path: &Path) -> duckdb::Result<Connection> {
        // Extension autoloading stays off: the engine only needs core SQL
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        Connection::open_with_flags(db_path, config)
    }

    /// A second connection to the same database instance.
    ///
    /// Each connection has its own transaction state, so two clones behave
    /// like two application instances sharing one database.
    pub fn try_clone(&self) -> Result<Self> {
        let conn = self.lock()?.try_clone().map_err(store_error)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: self.db_path.clone(),
        })
    }

    /// Path of the database file, `None` for in-memory databases
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| Error::database(format!("Lock poisoned: {}", e)))
    }
}

impl SchemaStore for DuckDbStore {
    fn execute(&self, sql: &str) -> Result<()> {
        self.lock()?.execute_batch(sql).map_err(store_error)
    }

    fn query(&self, sql: &str) -> Result<QueryResult> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql).map_err(store_error)?;
        let mut result_rows = stmt.query([]).map_err(store_error)?;

        let mut rows: Vec<Vec<serde_json::Value>> = Vec::new();
        let mut column_count = 0;

        while let Some(row) = result_rows.next().map_err(store_error)? {
            if rows.is_empty() {
                column_count = row.as_ref().column_count();
            }
            rows.push((0..column_count).map(|i| column_value(row, i)).collect());
        }

        // Release the borrow on stmt before reading column names
        drop(result_rows);

        let count = if column_count > 0 {
            column_count
        } else {
            stmt.column_count()
        };
        let columns = (0..count)
            .map(|i| {
                stmt.column_name(i)
                    .map(|s| s.to_string())
                    .unwrap_or_else(|_| format!("col{}", i))
            })
            .collect();

        let row_count = rows.len();
        Ok(QueryResult {
            columns,
            rows,
            row_count,
        })
    }

    fn begin(&self) -> Result<Box<dyn StoreTransaction + '_>> {
        let conn = self.lock()?;
        conn.execute_batch("BEGIN TRANSACTION").map_err(store_error)?;
        Ok(Box::new(DuckDbTransaction {
            conn,
            finished: false,
        }))
    }
}

/// Explicit transaction holding the store's connection.
///
/// Rolls back on drop unless [`StoreTransaction::commit`] succeeded.
pub struct DuckDbTransaction<'a> {
    conn: MutexGuard<'a, Connection>,
    finished: bool,
}

impl StoreTransaction for DuckDbTransaction<'_> {
    fn execute(&mut self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql).map_err(store_error)
    }

    fn execute_with_params(&mut self, sql: &str, params: &[serde_json::Value]) -> Result<usize> {
        let duckdb_params: Vec<Box<dyn duckdb::ToSql>> =
            params.iter().map(json_to_duckdb_param).collect();
        let param_refs: Vec<&dyn duckdb::ToSql> =
            duckdb_params.iter().map(|b| b.as_ref()).collect();

        let mut stmt = self.conn.prepare(sql).map_err(store_error)?;
        stmt.execute(param_refs.as_slice()).map_err(store_error)
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        // On failure `finished` stays false and drop issues the ROLLBACK
        self.conn.execute_batch("COMMIT").map_err(store_error)?;
        self.finished = true;
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> Result<()> {
        self.finished = true;
        self.conn.execute_batch("ROLLBACK").map_err(store_error)
    }
}

impl Drop for DuckDbTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                tracing::warn!(error = %e, "rollback of abandoned transaction failed");
            }
        }
    }
}

/// Convert JSON value to DuckDB parameter
fn json_to_duckdb_param(value: &serde_json::Value) -> Box<dyn duckdb::ToSql> {
    match value {
        serde_json::Value::Null => Box::new(None::<String>),
        serde_json::Value::Bool(b) => Box::new(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Box::new(i)
            } else if let Some(f) = n.as_f64() {
                Box::new(f)
            } else {
                Box::new(n.to_string())
            }
        }
        serde_json::Value::String(s) => Box::new(s.clone()),
        // Structured values are stored as their JSON text
        other => Box::new(other.to_string()),
    }
}

fn column_value(row: &duckdb::Row, idx: usize) -> serde_json::Value {
    use duckdb::types::ValueRef;

    match row.get_ref(idx) {
        Ok(ValueRef::Null) => serde_json::Value::Null,
        Ok(ValueRef::Boolean(b)) => serde_json::Value::Bool(b),
        Ok(ValueRef::TinyInt(i)) => serde_json::json!(i),
        Ok(ValueRef::SmallInt(i)) => serde_json::json!(i),
        Ok(ValueRef::Int(i)) => serde_json::json!(i),
        Ok(ValueRef::BigInt(i)) => serde_json::json!(i),
        Ok(ValueRef::HugeInt(i)) => serde_json::json!(i.to_string()),
        Ok(ValueRef::UTinyInt(i)) => serde_json::json!(i),
        Ok(ValueRef::USmallInt(i)) => serde_json::json!(i),
        Ok(ValueRef::UInt(i)) => serde_json::json!(i),
        Ok(ValueRef::UBigInt(i)) => serde_json::json!(i),
        Ok(ValueRef::Float(f)) => serde_json::json!(f),
        Ok(ValueRef::Double(f)) => serde_json::json!(f),
        Ok(ValueRef::Text(bytes)) => {
            serde_json::Value::String(String::from_utf8_lossy(bytes).to_string())
        }
        Ok(ValueRef::Blob(bytes)) => {
            serde_json::Value::String(format!("<blob {} bytes>", bytes.len()))
        }
        Ok(ValueRef::Timestamp(_, ts)) => {
            // Microseconds since epoch
            let dt = chrono::DateTime::from_timestamp_micros(ts)
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_else(|| ts.to_string());
            serde_json::Value::String(dt)
        }
        _ => serde_json::Value::Null,
    }
}
