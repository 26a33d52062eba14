//! Statement catalog domain model

use std::path::Path;

use serde::Serialize;
use sqlparser::dialect::DuckDbDialect;
use sqlparser::parser::Parser;

use crate::domain::result::{Error, Result};

/// Ordered, immutable list of schema-defining statements.
///
/// Index 1 is the first statement. Once an index has been applied to a live
/// database its text may only change in whitespace; anything else is treated
/// as corruption by the migration engine. New statements are appended, never
/// inserted or reordered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatementCatalog {
    statements: Vec<String>,
}

/// A lint finding for one catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogIssue {
    pub index: u32,
    pub message: String,
}

impl StatementCatalog {
    pub fn new(statements: Vec<String>) -> Self {
        Self { statements }
    }

    /// Build a catalog from statements compiled into the binary
    pub fn from_static(statements: &[&str]) -> Self {
        Self::new(statements.iter().map(|s| s.to_string()).collect())
    }

    /// Load every `*.sql` file in `dir`, one statement per file, ordered by
    /// file name (`001_products.sql`, `002_users.sql`, ...)
    pub fn load_dir(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(Error::config(format!(
                "catalog directory not found: {}",
                dir.display()
            )));
        }

        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "sql") {
                files.push(path);
            }
        }
        files.sort();

        let mut statements = Vec::with_capacity(files.len());
        for path in files {
            statements.push(std::fs::read_to_string(&path)?);
        }

        Ok(Self::new(statements))
    }

    /// Number of statements (the application's schema version)
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Statement at a 1-based index
    pub fn get(&self, index: u32) -> Option<&str> {
        let position = (index as usize).checked_sub(1)?;
        self.statements.get(position).map(String::as_str)
    }

    /// Iterate `(index, statement)` pairs in application order
    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> + '_ {
        self.statements
            .iter()
            .enumerate()
            .map(|(i, s)| (i as u32 + 1, s.as_str()))
    }

    /// The first `len` statements, as an older build would have shipped them
    pub fn truncated(&self, len: usize) -> Self {
        Self::new(self.statements.iter().take(len).cloned().collect())
    }

    /// Check every statement parses. Findings are advisory: the store is the
    /// final judge of what it accepts.
    pub fn lint(&self) -> Vec<CatalogIssue> {
        let dialect = DuckDbDialect {};
        self.iter()
            .filter_map(|(index, sql)| {
                if sql.trim().is_empty() {
                    return Some(CatalogIssue {
                        index,
                        message: "empty statement".to_string(),
                    });
                }
                Parser::parse_sql(&dialect, sql).err().map(|e| CatalogIssue {
                    index,
                    message: e.to_string().trim_start_matches("sql parser error: ").to_string(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_one_based_indexing() {
        let catalog = StatementCatalog::from_static(&["S1", "S2", "S3"]);
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.get(0), None);
        assert_eq!(catalog.get(1), Some("S1"));
        assert_eq!(catalog.get(3), Some("S3"));
        assert_eq!(catalog.get(4), None);

        let indices: Vec<u32> = catalog.iter().map(|(i, _)| i).collect();
        assert_eq!(indices, vec![1, 2, 3]);
    }

    #[test]
    fn test_truncated_keeps_prefix() {
        let catalog = StatementCatalog::from_static(&["S1", "S2", "S3"]);
        assert_eq!(catalog.truncated(2), StatementCatalog::from_static(&["S1", "S2"]));
        assert_eq!(catalog.truncated(10).len(), 3);
    }

    #[test]
    fn test_load_dir_orders_by_file_name() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("002_users.sql"), "CREATE TABLE users (id INTEGER)").unwrap();
        std::fs::write(dir.path().join("001_products.sql"), "CREATE TABLE products (id INTEGER)").unwrap();
        std::fs::write(dir.path().join("README.md"), "not a statement").unwrap();

        let catalog = StatementCatalog::load_dir(dir.path()).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get(1), Some("CREATE TABLE products (id INTEGER)"));
        assert_eq!(catalog.get(2), Some("CREATE TABLE users (id INTEGER)"));
    }

    #[test]
    fn test_load_missing_dir_is_config_error() {
        let dir = tempdir().unwrap();
        let result = StatementCatalog::load_dir(&dir.path().join("nope"));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_lint_reports_broken_statements() {
        let catalog = StatementCatalog::from_static(&[
            "CREATE TABLE t (a INTEGER)",
            "CREATE TABEL u (a INTEGER)",
            "   ",
        ]);
        let issues = catalog.lint();
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].index, 2);
        assert_eq!(issues[1].index, 3);
        assert_eq!(issues[1].message, "empty statement");
    }
}
