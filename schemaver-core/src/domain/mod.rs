//! Core domain entities
//!
//! The catalog, the ledger rows and the fingerprint that ties them together.
//! Pure data structures - no database access lives here.

mod catalog;
pub mod hash;
mod ledger;
pub mod result;

pub use catalog::{CatalogIssue, StatementCatalog};
pub use hash::statement_hash;
pub use ledger::{schema_version, summarize, LedgerEntry};
