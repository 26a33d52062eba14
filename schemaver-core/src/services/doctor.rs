//! Doctor service - ledger health checks
//!
//! Unlike a migration run, which stops at the first problem, the doctor
//! inspects the whole ledger and reports every finding. Nothing is written.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use serde_json::json;

use crate::domain::{statement_hash, LedgerEntry, StatementCatalog};
use crate::ports::SchemaStore;
use crate::services::migration::{MigrationService, LEDGER_TABLE};

/// Doctor service for health checks
pub struct DoctorService {
    store: Arc<dyn SchemaStore>,
}

impl DoctorService {
    pub fn new(store: Arc<dyn SchemaStore>) -> Self {
        Self { store }
    }

    /// Run all health checks against `catalog`
    pub fn run_checks(&self, catalog: &StatementCatalog) -> Result<DoctorResult> {
        let migrations = MigrationService::new(self.store.as_ref());
        let mut checks = HashMap::new();

        // Ledger table
        let ledger_exists = migrations.ledger_exists()?;
        checks.insert(
            "ledger_table".to_string(),
            if ledger_exists {
                CheckResult::pass(format!("Ledger table {} exists", LEDGER_TABLE))
            } else {
                CheckResult::warning(format!(
                    "Ledger table {} not found, the database was never migrated",
                    LEDGER_TABLE
                ))
            },
        );

        let ledger = if ledger_exists {
            migrations.fetch_versions()?
        } else {
            Vec::new()
        };

        checks.insert("ledger_sequence".to_string(), check_sequence(&ledger));
        checks.insert("statement_hashes".to_string(), check_hashes(&ledger, catalog));
        checks.insert("schema_drift".to_string(), check_drift(ledger.len(), catalog.len()));

        // Catalog syntax, advisory: statements DuckDB accepts may still
        // trip the parser
        let issues = catalog.lint();
        checks.insert(
            "catalog_syntax".to_string(),
            if issues.is_empty() {
                CheckResult::pass(format!("All {} catalog statement(s) parse", catalog.len()))
            } else {
                CheckResult::warning(format!(
                    "{} catalog statement(s) failed to parse",
                    issues.len()
                ))
                .with_details(
                    issues
                        .iter()
                        .map(|i| json!({"statement_id": i.index, "message": i.message}))
                        .collect(),
                )
            },
        );

        Ok(DoctorResult::from_checks(checks))
    }
}

/// Ledger ids must run 1..K without gaps or duplicates
fn check_sequence(ledger: &[LedgerEntry]) -> CheckResult {
    let out_of_place: Vec<serde_json::Value> = ledger
        .iter()
        .enumerate()
        .filter(|(pos, entry)| entry.statement_id as usize != pos + 1)
        .map(|(pos, entry)| json!({"position": pos + 1, "statement_id": entry.statement_id}))
        .collect();

    if out_of_place.is_empty() {
        CheckResult::pass(format!("Ledger ids run 1..{} without gaps", ledger.len()))
    } else {
        CheckResult::error(format!(
            "{} ledger row(s) out of sequence",
            out_of_place.len()
        ))
        .with_details(out_of_place)
    }
}

/// Every recorded hash must match the catalog statement at the same index
/// and the statement text stored next to it
fn check_hashes(ledger: &[LedgerEntry], catalog: &StatementCatalog) -> CheckResult {
    let mut mismatches = Vec::new();
    let mut unverifiable = Vec::new();

    for entry in ledger {
        if let Some(statement) = catalog.get(entry.statement_id) {
            if statement_hash(statement) != entry.statement_hash {
                mismatches.push(json!({
                    "statement_id": entry.statement_id,
                    "recorded": entry.statement_hash,
                    "expected": statement_hash(statement),
                }));
                continue;
            }
        }
        // Rows written by a newer build can only be checked against their
        // own stored text
        if !entry.statement.is_empty() && statement_hash(&entry.statement) != entry.statement_hash {
            unverifiable.push(json!({
                "statement_id": entry.statement_id,
                "reason": "stored statement text does not match its hash",
            }));
        }
    }

    if !mismatches.is_empty() {
        let count = mismatches.len();
        mismatches.extend(unverifiable);
        CheckResult::error(format!(
            "{} applied statement(s) differ from the catalog",
            count
        ))
        .with_details(mismatches)
    } else if !unverifiable.is_empty() {
        CheckResult::warning(format!(
            "{} ledger row(s) store text that does not match their hash",
            unverifiable.len()
        ))
        .with_details(unverifiable)
    } else {
        CheckResult::pass(format!("{} recorded hash(es) verified", ledger.len()))
    }
}

fn check_drift(database_version: usize, application_version: usize) -> CheckResult {
    let details = vec![json!({
        "database_version": database_version,
        "application_version": application_version,
    })];

    if database_version == application_version {
        CheckResult::pass(format!("Database is at version {}", database_version))
    } else if database_version > application_version {
        CheckResult::warning(format!(
            "Database is at newer version ({} statement(s) unknown to this build)",
            database_version - application_version
        ))
        .with_details(details)
    } else {
        CheckResult::warning(format!(
            "{} statement(s) pending",
            application_version - database_version
        ))
        .with_details(details)
    }
}

#[derive(Debug, Serialize)]
pub struct DoctorResult {
    pub checks: HashMap<String, CheckResult>,
    pub summary: DoctorSummary,
}

impl DoctorResult {
    fn from_checks(checks: HashMap<String, CheckResult>) -> Self {
        let count = |status: &str| checks.values().filter(|c| c.status == status).count() as i64;
        let summary = DoctorSummary {
            passed: count("pass"),
            warnings: count("warning"),
            errors: count("error"),
        };
        Self { checks, summary }
    }

    pub fn has_errors(&self) -> bool {
        self.summary.errors > 0
    }
}

#[derive(Debug, Serialize)]
pub struct CheckResult {
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<serde_json::Value>>,
}

impl CheckResult {
    fn with_status(status: &str, message: String) -> Self {
        Self {
            status: status.to_string(),
            message,
            details: None,
        }
    }

    fn pass(message: String) -> Self {
        Self::with_status("pass", message)
    }

    fn warning(message: String) -> Self {
        Self::with_status("warning", message)
    }

    fn error(message: String) -> Self {
        Self::with_status("error", message)
    }

    fn with_details(mut self, details: Vec<serde_json::Value>) -> Self {
        self.details = Some(details);
        self
    }
}

#[derive(Debug, Serialize)]
pub struct DoctorSummary {
    pub passed: i64,
    pub warnings: i64,
    pub errors: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::duckdb::DuckDbStore;

    const STATEMENTS: &[&str] = &[
        "CREATE TABLE a (x INTEGER)",
        "CREATE TABLE b (y INTEGER)",
    ];

    fn setup() -> (Arc<DuckDbStore>, DoctorService) {
        let store = Arc::new(DuckDbStore::open_in_memory().unwrap());
        let service = DoctorService::new(store.clone());
        (store, service)
    }

    fn status_of<'a>(result: &'a DoctorResult, check: &str) -> &'a str {
        &result.checks[check].status
    }

    #[test]
    fn test_healthy_database() {
        let (store, service) = setup();
        let catalog = StatementCatalog::from_static(STATEMENTS);
        MigrationService::new(store.as_ref()).migrate(&catalog).unwrap();

        let result = service.run_checks(&catalog).unwrap();
        assert_eq!(result.summary.passed, 5);
        assert_eq!(result.summary.errors, 0);
        assert!(!result.has_errors());
    }

    #[test]
    fn test_fresh_database_warns() {
        let (_store, service) = setup();
        let result = service
            .run_checks(&StatementCatalog::from_static(STATEMENTS))
            .unwrap();

        assert_eq!(status_of(&result, "ledger_table"), "warning");
        assert_eq!(status_of(&result, "schema_drift"), "warning");
        assert_eq!(status_of(&result, "ledger_sequence"), "pass");
        assert!(!result.has_errors());
    }

    #[test]
    fn test_reports_hash_mismatch() {
        let (store, service) = setup();
        MigrationService::new(store.as_ref())
            .migrate(&StatementCatalog::from_static(STATEMENTS))
            .unwrap();

        let changed = StatementCatalog::from_static(&[STATEMENTS[0], "CREATE TABLE b (y BIGINT)"]);
        let result = service.run_checks(&changed).unwrap();

        assert_eq!(status_of(&result, "statement_hashes"), "error");
        let details = result.checks["statement_hashes"].details.as_ref().unwrap();
        assert_eq!(details[0]["statement_id"], 2);
        assert!(result.has_errors());
    }

    #[test]
    fn test_reports_gap_and_newer_database() {
        let (store, service) = setup();
        let catalog = StatementCatalog::from_static(STATEMENTS);
        MigrationService::new(store.as_ref()).migrate(&catalog).unwrap();
        store.execute("DELETE FROM schemaversion WHERE statement_id = 1").unwrap();

        let result = service.run_checks(&catalog.truncated(0)).unwrap();
        assert_eq!(status_of(&result, "ledger_sequence"), "error");
        assert_eq!(status_of(&result, "schema_drift"), "warning");
    }

    #[test]
    fn test_reports_unparseable_statement() {
        let (_store, service) = setup();
        let catalog = StatementCatalog::from_static(&["CREATE TABEL broken (a INTEGER)"]);

        let result = service.run_checks(&catalog).unwrap();
        assert_eq!(status_of(&result, "catalog_syntax"), "warning");
    }
}
