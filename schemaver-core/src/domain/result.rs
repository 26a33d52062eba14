//! Result and error types for the core library

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Core library error type
#[derive(Error, Debug)]
pub enum Error {
    /// The store failed to execute or query (connectivity, permissions, syntax)
    #[error("Database error: {0}")]
    Database(String),

    /// A write was rejected by a primary key or unique constraint
    #[error("Unique constraint violation: {0}")]
    UniqueViolation(String),

    /// The store aborted a write because another open transaction touched the
    /// same catalog entry or row
    #[error("Transaction conflict: {0}")]
    TransactionConflict(String),

    /// A settled ledger entry disagrees with the catalog at the same index
    #[error("Database integrity check failed, statement {index} has a different hash. statement: {statement}")]
    Integrity { index: u32, statement: String },

    /// Ledger rows are not a gapless 1..K sequence
    #[error("Database integrity check failed, ledger row {position} has statement_id {found}, expected {expected}")]
    LedgerGap {
        position: usize,
        expected: u32,
        found: i64,
    },

    /// Another instance kept winning the race to apply the same index
    #[error("Statement {index} was applied concurrently by another instance and retries were exhausted")]
    ConcurrentApplication { index: u32 },

    /// The engine observed a state its own scan should have made impossible
    #[error("Migration invariant violated: {0}")]
    Invariant(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a database error
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create an invariant violation
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error means the ledger and the catalog disagree.
    ///
    /// These need a human to reconcile the deployed history with the build;
    /// retrying the process will not help.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(self, Self::Integrity { .. } | Self::LedgerGap { .. })
    }
}

/// Core library result type
pub type Result<T> = std::result::Result<T, Error>;

/// Operation result with optional context (for machine-readable output)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub context: Option<HashMap<String, serde_json::Value>>,
}

impl<T> OperationResult<T> {
    /// Create a successful result
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            context: None,
        }
    }

    /// Create a failed result
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            context: None,
        }
    }

    /// Create a failed result with context
    pub fn fail_with_context(
        error: impl Into<String>,
        context: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            context: Some(context),
        }
    }
}

impl<T> From<Result<T>> for OperationResult<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => {
                let mut context = HashMap::new();
                match &e {
                    Error::Integrity { index, .. } => {
                        context.insert("statement_id".to_string(), serde_json::json!(index));
                    }
                    Error::LedgerGap { expected, found, .. } => {
                        context.insert("expected".to_string(), serde_json::json!(expected));
                        context.insert("found".to_string(), serde_json::json!(found));
                    }
                    Error::ConcurrentApplication { index } => {
                        context.insert("statement_id".to_string(), serde_json::json!(index));
                    }
                    _ => {}
                }
                if context.is_empty() {
                    Self::fail(e.to_string())
                } else {
                    Self::fail_with_context(e.to_string(), context)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_result_ok() {
        let result: OperationResult<i32> = OperationResult::ok(42);
        assert!(result.success);
        assert_eq!(result.data, Some(42));
        assert!(result.error.is_none());
    }

    #[test]
    fn test_integrity_message_names_index_and_statement() {
        let err = Error::Integrity {
            index: 2,
            statement: "CREATE TABLE t (a INT)".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("integrity check failed"));
        assert!(msg.contains("statement 2"));
        assert!(msg.contains("CREATE TABLE t (a INT)"));
        assert!(err.is_integrity_violation());
    }

    #[test]
    fn test_from_result_carries_context() {
        let err: Result<i32> = Err(Error::Integrity {
            index: 7,
            statement: "x".to_string(),
        });
        let result: OperationResult<i32> = err.into();
        assert!(!result.success);
        let context = result.context.unwrap();
        assert_eq!(context["statement_id"], serde_json::json!(7));

        let err: Result<i32> = Err(Error::database("connection refused"));
        let result: OperationResult<i32> = err.into();
        assert!(result.error.unwrap().contains("Database error"));
        assert!(result.context.is_none());
    }
}
