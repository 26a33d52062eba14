//! Log database schema - embedded SQL files
//!
//! The run log keeps its own small catalog and is migrated by the same
//! engine as the application database.

use crate::domain::StatementCatalog;

/// All log statements, embedded at compile time.
/// Format: (filename, sql_content)
pub const LOG_MIGRATIONS: &[(&str, &str)] = &[(
    "001_event_log.sql",
    include_str!("001_event_log.sql"),
)];

/// Catalog for the log database
pub fn log_catalog() -> StatementCatalog {
    StatementCatalog::new(
        LOG_MIGRATIONS
            .iter()
            .map(|(_, sql)| sql.to_string())
            .collect(),
    )
}
