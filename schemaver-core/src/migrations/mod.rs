//! Application schema - embedded SQL files
//!
//! Statements are compiled into the binary at build time using include_str!.
//! Each entry is a tuple of (name, sql_content); the position in the list is
//! the catalog index recorded in the ledger.

use crate::domain::StatementCatalog;

/// All application statements, embedded at compile time.
/// Format: (filename, sql_content)
///
/// IMPORTANT: a statement must never change once deployed (reformatting is
/// fine). To evolve the schema:
/// 1. Create the SQL file: NNN_description.sql
/// 2. Append an entry here
pub const MIGRATIONS: &[(&str, &str)] = &[
    ("001_product.sql", include_str!("001_product.sql")),
    ("002_user_account.sql", include_str!("002_user_account.sql")),
    ("003_order.sql", include_str!("003_order.sql")),
];

/// The application's compiled-in catalog
pub fn app_catalog() -> StatementCatalog {
    StatementCatalog::new(MIGRATIONS.iter().map(|(_, sql)| sql.to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_ordered() {
        let names: Vec<&str> = MIGRATIONS.iter().map(|(n, _)| *n).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    #[test]
    fn test_app_catalog_parses() {
        let catalog = app_catalog();
        assert_eq!(catalog.len(), MIGRATIONS.len());
        assert!(catalog.lint().is_empty(), "{:?}", catalog.lint());
    }
}
