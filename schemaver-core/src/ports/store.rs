//! Schema store port - database abstraction

use crate::domain::result::Result;

/// Rows returned by a store query, in result order
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub row_count: usize,
}

/// The capabilities the migration engine needs from a relational database.
///
/// Implementations report a rejected primary key or unique constraint as
/// [`Error::UniqueViolation`](crate::Error::UniqueViolation); every other
/// failure is [`Error::Database`](crate::Error::Database).
pub trait SchemaStore: Send + Sync {
    /// Execute one or more statements outside any explicit transaction
    fn execute(&self, sql: &str) -> Result<()>;

    /// Run a read query
    fn query(&self, sql: &str) -> Result<QueryResult>;

    /// Start a transaction. The returned value holds the connection until it
    /// is committed, rolled back or dropped; dropping it without a commit
    /// rolls back.
    fn begin(&self) -> Result<Box<dyn StoreTransaction + '_>>;
}

/// An open transaction on a [`SchemaStore`]
pub trait StoreTransaction {
    /// Execute one or more statements inside the transaction
    fn execute(&mut self, sql: &str) -> Result<()>;

    /// Execute a single statement with `?` placeholders bound to `params`.
    /// Returns the affected row count.
    fn execute_with_params(&mut self, sql: &str, params: &[serde_json::Value]) -> Result<usize>;

    /// Make every change in the transaction visible
    fn commit(self: Box<Self>) -> Result<()>;

    /// Discard every change in the transaction
    fn rollback(self: Box<Self>) -> Result<()>;
}
