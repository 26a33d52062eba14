//! Migration service - brings a database to the catalog's schema version
//!
//! Every statement the application has ever shipped lives in a
//! [`StatementCatalog`]. The `schemaversion` ledger table inside the target
//! database records which catalog indices were applied, each with the
//! fingerprint of the statement text. On every start the service:
//!
//! 1. Creates the ledger table if it is missing
//! 2. Loads the ledger
//! 3. Walks the catalog in order, verifying the fingerprint of every index the
//!    ledger already has and applying every index it does not
//! 4. Re-reads the ledger and reports how it compares to the catalog
//!
//! Each statement is applied in its own transaction together with its ledger
//! row, so an interrupted run resumes at the first unrecorded index.

use std::thread;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use crate::domain::result::{Error, Result};
use crate::domain::{statement_hash, summarize, LedgerEntry, StatementCatalog};
use crate::ports::SchemaStore;

/// Name of the ledger table
pub const LEDGER_TABLE: &str = "schemaversion";

/// Create the ledger table if it does not exist yet
const LEDGER_DDL: &str = "CREATE TABLE IF NOT EXISTS schemaversion \
    (statement_id INTEGER PRIMARY KEY, statement_hash VARCHAR(64), insert_time VARCHAR(64), statement TEXT)";

const LEDGER_SELECT: &str = "SELECT statement_id, statement_hash, insert_time, statement \
    FROM schemaversion ORDER BY statement_id";

const LEDGER_INSERT: &str = "INSERT INTO schemaversion \
    (statement_id, statement_hash, insert_time, statement) VALUES (?, ?, ?, ?)";

/// Reconciliation restarts allowed after losing an application race
pub const DEFAULT_CONFLICT_RETRIES: u32 = 1;

/// Pause before re-reading the ledger after a race (doubles each restart)
const CONFLICT_BACKOFF_MS: u64 = 50;

/// How the ledger compares to the catalog after a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SchemaDrift {
    /// Ledger and catalog have the same length
    UpToDate,
    /// The ledger holds statements this build does not know about, written
    /// by a newer application version
    DatabaseAhead { extra: usize },
}

/// Result of running migrations
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    /// Ledger length before this run
    pub initial_version: usize,
    /// Catalog length
    pub application_version: usize,
    /// Ledger length after this run
    pub current_version: usize,
    /// Indices applied by this run, ascending
    pub applied: Vec<u32>,
    /// Catalog indices that were already recorded and verified
    pub already_applied: usize,
    /// Times reconciliation restarted because another instance applied an
    /// index first
    pub conflicts_resolved: u32,
    pub drift: SchemaDrift,
}

/// A catalog statement the next run would apply
#[derive(Debug, Clone, Serialize)]
pub struct PendingStatement {
    pub statement_id: u32,
    pub statement_hash: String,
    pub statement: String,
}

/// Outcome of a single reconciliation pass
enum Pass {
    Completed { applied: Vec<u32>, verified: usize },
    /// Another instance recorded `index` while this pass was applying it
    Conflict { index: u32, applied: Vec<u32> },
}

/// Service for managing schema migrations
pub struct MigrationService<'a> {
    store: &'a dyn SchemaStore,
    conflict_retries: u32,
}

impl<'a> MigrationService<'a> {
    /// Create a new migration service on a store
    pub fn new(store: &'a dyn SchemaStore) -> Self {
        Self {
            store,
            conflict_retries: DEFAULT_CONFLICT_RETRIES,
        }
    }

    /// Set how many times reconciliation restarts after a concurrent
    /// application race before the race is reported as an error
    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.conflict_retries = retries;
        self
    }

    /// Bring the database up to date with `catalog`
    ///
    /// This is the main entry point, meant to run once at process start
    /// before serving traffic. Any error means the schema could not be
    /// verified and the process should not start.
    pub fn migrate(&self, catalog: &StatementCatalog) -> Result<MigrationReport> {
        tracing::info!(total_migrations = catalog.len(), "migrating database");

        match self.run(catalog) {
            Ok(report) => Ok(report),
            Err(e) => {
                tracing::error!(error = %e, "database migration failed");
                Err(e)
            }
        }
    }

    fn run(&self, catalog: &StatementCatalog) -> Result<MigrationReport> {
        self.ensure_ledger_exists()?;

        let initial = self.fetch_versions()?;
        let initial_version = initial.len();

        let mut ledger = initial;
        let mut applied = Vec::new();
        let mut conflicts_resolved = 0;

        let already_applied = loop {
            match self.reconcile_pass(&ledger, catalog)? {
                Pass::Completed {
                    applied: newly,
                    verified,
                } => {
                    // Indices applied on an earlier pass were verified again
                    // on this one
                    let reverified = applied.len();
                    applied.extend(newly);
                    break verified - reverified;
                }
                Pass::Conflict {
                    index,
                    applied: newly,
                } => {
                    applied.extend(newly);
                    if conflicts_resolved >= self.conflict_retries {
                        return Err(Error::ConcurrentApplication { index });
                    }
                    conflicts_resolved += 1;
                    tracing::info!(
                        statement_id = index,
                        attempt = conflicts_resolved,
                        "statement applied by another instance, reconciling again"
                    );
                    thread::sleep(conflict_backoff(conflicts_resolved));
                    ledger = self.fetch_versions()?;
                }
            }
        };

        let current = self.fetch_versions()?;
        let drift = drift_of(current.len(), catalog.len())?;

        let report = MigrationReport {
            initial_version,
            application_version: catalog.len(),
            current_version: current.len(),
            already_applied,
            applied,
            conflicts_resolved,
            drift,
        };
        log_report(&report);
        Ok(report)
    }

    /// Create the ledger table if it is absent. Safe to call on every start.
    pub fn ensure_ledger_exists(&self) -> Result<()> {
        self.store.execute(LEDGER_DDL)
    }

    /// Whether the ledger table exists, without creating it
    pub fn ledger_exists(&self) -> Result<bool> {
        let result = self.store.query(&format!(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = '{}'",
            LEDGER_TABLE
        ))?;
        let count = result
            .rows
            .first()
            .and_then(|row| row.first())
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        Ok(count > 0)
    }

    /// All ledger rows ascending by `statement_id`; empty when nothing has
    /// been applied yet
    pub fn fetch_versions(&self) -> Result<Vec<LedgerEntry>> {
        let result = self.store.query(LEDGER_SELECT)?;
        result
            .rows
            .iter()
            .map(|row| LedgerEntry::from_row(row))
            .collect()
    }

    /// Walk `catalog` against `ledger`, verifying recorded indices and
    /// applying missing ones. Returns the indices applied.
    ///
    /// Unlike [`migrate`](Self::migrate) this makes a single pass: losing an
    /// application race to another instance is reported as
    /// [`Error::ConcurrentApplication`].
    pub fn reconcile(&self, ledger: &[LedgerEntry], catalog: &StatementCatalog) -> Result<Vec<u32>> {
        match self.reconcile_pass(ledger, catalog)? {
            Pass::Completed { applied, .. } => Ok(applied),
            Pass::Conflict { index, .. } => Err(Error::ConcurrentApplication { index }),
        }
    }

    fn reconcile_pass(&self, ledger: &[LedgerEntry], catalog: &StatementCatalog) -> Result<Pass> {
        let mut applied = Vec::new();
        let mut verified = 0;

        for (index, statement) in catalog.iter() {
            let expected = statement_hash(statement);
            let position = index as usize - 1;

            if let Some(entry) = ledger.get(position) {
                verify_entry(position, entry, statement, &expected)?;
                verified += 1;
                continue;
            }

            if let Err(e) = self.apply_and_record(index, statement, &expected) {
                if self.applied_elsewhere(index, &e)? {
                    return Ok(Pass::Conflict { index, applied });
                }
                tracing::error!(
                    version = index,
                    statement = %summarize(statement, 120),
                    error = %e,
                    "error migrating to version"
                );
                return Err(e);
            }
            tracing::info!(version = index, hash = %expected, "migrated");
            applied.push(index);
        }

        Ok(Pass::Completed { applied, verified })
    }

    /// Execute one statement and record it, atomically.
    ///
    /// The transaction rolls back on every path that does not reach the
    /// commit, including unwinding out of this function.
    pub fn apply_and_record(&self, index: u32, statement: &str, hash: &str) -> Result<()> {
        let mut tx = self.store.begin()?;

        tx.execute(statement)?;
        tx.execute_with_params(
            LEDGER_INSERT,
            &[
                serde_json::json!(index),
                serde_json::json!(hash),
                serde_json::json!(now()),
                serde_json::json!(statement),
            ],
        )?;

        tx.commit()
    }

    /// Decide whether a failed application means another instance got there
    /// first.
    ///
    /// A uniqueness violation on the ledger insert is the direct signal. So
    /// is a transaction conflict: the other instance still holds its
    /// transaction open, so its row is not visible yet. A failing statement
    /// (for example a table that now already exists) counts too when a fresh
    /// ledger read shows the index recorded.
    fn applied_elsewhere(&self, index: u32, err: &Error) -> Result<bool> {
        if matches!(err, Error::UniqueViolation(_) | Error::TransactionConflict(_)) {
            return Ok(true);
        }
        if !matches!(err, Error::Database(_)) {
            return Ok(false);
        }
        let ledger = self.fetch_versions()?;
        Ok(ledger.iter().any(|entry| entry.statement_id == index))
    }

    /// Catalog statements the next run would apply, without writing anything.
    ///
    /// The overlapping part of the ledger is verified first, so a corrupted
    /// history is reported here exactly as `migrate` would report it.
    pub fn pending(&self, catalog: &StatementCatalog) -> Result<Vec<PendingStatement>> {
        let ledger = if self.ledger_exists()? {
            self.fetch_versions()?
        } else {
            Vec::new()
        };

        let mut pending = Vec::new();
        for (index, statement) in catalog.iter() {
            let expected = statement_hash(statement);
            let position = index as usize - 1;
            match ledger.get(position) {
                Some(entry) => verify_entry(position, entry, statement, &expected)?,
                None => pending.push(PendingStatement {
                    statement_id: index,
                    statement_hash: expected,
                    statement: statement.to_string(),
                }),
            }
        }
        Ok(pending)
    }
}

/// Check a recorded ledger row against the catalog statement at its position
fn verify_entry(position: usize, entry: &LedgerEntry, statement: &str, expected: &str) -> Result<()> {
    let index = position as u32 + 1;
    if entry.statement_id != index {
        return Err(Error::LedgerGap {
            position: position + 1,
            expected: index,
            found: entry.statement_id as i64,
        });
    }
    if entry.statement_hash != expected {
        return Err(Error::Integrity {
            index,
            statement: statement.to_string(),
        });
    }
    Ok(())
}

/// Classify the final ledger length against the catalog length
fn drift_of(ledger_len: usize, catalog_len: usize) -> Result<SchemaDrift> {
    match ledger_len.cmp(&catalog_len) {
        std::cmp::Ordering::Equal => Ok(SchemaDrift::UpToDate),
        std::cmp::Ordering::Greater => Ok(SchemaDrift::DatabaseAhead {
            extra: ledger_len - catalog_len,
        }),
        std::cmp::Ordering::Less => Err(Error::invariant(format!(
            "ledger has {} rows after a completed run, catalog has {}",
            ledger_len, catalog_len
        ))),
    }
}

/// Backoff before the `attempt`th re-read of the ledger, starting at 1
fn conflict_backoff(attempt: u32) -> Duration {
    Duration::from_millis(CONFLICT_BACKOFF_MS << attempt.saturating_sub(1).min(6))
}

fn log_report(report: &MigrationReport) {
    match report.drift {
        SchemaDrift::UpToDate => tracing::info!(
            initial_db_version = report.initial_version,
            application_version = report.application_version,
            current_db_version = report.current_version,
            applied = report.applied.len(),
            already_applied = report.already_applied,
            "database migration complete"
        ),
        SchemaDrift::DatabaseAhead { extra } => tracing::warn!(
            initial_db_version = report.initial_version,
            application_version = report.application_version,
            current_db_version = report.current_version,
            applied = report.applied.len(),
            already_applied = report.already_applied,
            extra,
            reason = "database is at newer version",
            "database migration complete"
        ),
    }
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::duckdb::DuckDbStore;
    use std::sync::{Arc, Mutex};
    use tracing::field::{Field, Visit};
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    const V1_CREATE_TEST_TABLE: &str = "CREATE TABLE testtable (huisnummer INTEGER, naam VARCHAR(16))";
    const V2_CREATE_ANOTHER_TABLE: &str = "CREATE TABLE anothertable (x INTEGER, y INTEGER)";
    const V3_CREATE_INDEX: &str = "CREATE INDEX idx_naam ON testtable (naam)";

    fn test_catalog() -> StatementCatalog {
        StatementCatalog::from_static(&[V1_CREATE_TEST_TABLE, V2_CREATE_ANOTHER_TABLE, V3_CREATE_INDEX])
    }

    #[test]
    fn test_migrate_full() {
        let store = DuckDbStore::open_in_memory().unwrap();
        let service = MigrationService::new(&store);

        let report = service.migrate(&test_catalog()).unwrap();

        assert_eq!(report.applied, vec![1, 2, 3]);
        assert_eq!(report.already_applied, 0);
        assert_eq!(report.initial_version, 0);
        assert_eq!(report.current_version, 3);
        assert_eq!(report.drift, SchemaDrift::UpToDate);

        let ledger = service.fetch_versions().unwrap();
        let hashes: Vec<&str> = ledger.iter().map(|e| e.statement_hash.as_str()).collect();
        assert_eq!(
            hashes,
            vec![
                statement_hash(V1_CREATE_TEST_TABLE).as_str(),
                statement_hash(V2_CREATE_ANOTHER_TABLE).as_str(),
                statement_hash(V3_CREATE_INDEX).as_str(),
            ]
        );
        assert_eq!(ledger[0].statement, V1_CREATE_TEST_TABLE);
        assert!(chrono::DateTime::parse_from_rfc3339(&ledger[0].insert_time).is_ok());
    }

    #[test]
    fn test_migrate_twice_applies_nothing() {
        let store = DuckDbStore::open_in_memory().unwrap();
        let service = MigrationService::new(&store);

        service.migrate(&test_catalog()).unwrap();
        let before = service.fetch_versions().unwrap();

        let report = service.migrate(&test_catalog()).unwrap();
        assert!(report.applied.is_empty());
        assert_eq!(report.already_applied, 3);
        assert_eq!(service.fetch_versions().unwrap(), before);
    }

    #[test]
    fn test_migrate_partial() {
        let store = DuckDbStore::open_in_memory().unwrap();
        let service = MigrationService::new(&store);

        service.migrate(&test_catalog().truncated(2)).unwrap();
        let report = service.migrate(&test_catalog()).unwrap();

        assert_eq!(report.initial_version, 2);
        assert_eq!(report.applied, vec![3]);
        assert_eq!(report.already_applied, 2);
    }

    #[test]
    fn test_fetch_versions_empty_ledger() {
        let store = DuckDbStore::open_in_memory().unwrap();
        let service = MigrationService::new(&store);

        service.ensure_ledger_exists().unwrap();
        service.ensure_ledger_exists().unwrap();
        assert!(service.fetch_versions().unwrap().is_empty());
    }

    #[test]
    fn test_fetch_versions_without_table_is_an_error() {
        let store = DuckDbStore::open_in_memory().unwrap();
        let service = MigrationService::new(&store);

        assert!(!service.ledger_exists().unwrap());
        assert!(matches!(service.fetch_versions(), Err(Error::Database(_))));
    }

    #[test]
    fn test_hash_mismatch_is_integrity_error() {
        let store = DuckDbStore::open_in_memory().unwrap();
        let service = MigrationService::new(&store);
        service.migrate(&test_catalog().truncated(2)).unwrap();

        let edited = StatementCatalog::from_static(&[
            V1_CREATE_TEST_TABLE,
            "CREATE TABLE anothertable (x INTEGER, y BIGINT)",
            V3_CREATE_INDEX,
        ]);
        let err = service.migrate(&edited).unwrap_err();

        match err {
            Error::Integrity { index, statement } => {
                assert_eq!(index, 2);
                assert!(statement.contains("y BIGINT"));
            }
            other => panic!("expected integrity error, got {:?}", other),
        }
        // Index 3 was never attempted
        assert_eq!(service.fetch_versions().unwrap().len(), 2);
    }

    #[test]
    fn test_reformatted_history_still_verifies() {
        let store = DuckDbStore::open_in_memory().unwrap();
        let service = MigrationService::new(&store);
        service.migrate(&test_catalog()).unwrap();

        let reformatted = StatementCatalog::from_static(&[
            "CREATE TABLE testtable (\n\thuisnummer INTEGER,\n\tnaam VARCHAR(16)\n)",
            V2_CREATE_ANOTHER_TABLE,
            V3_CREATE_INDEX,
        ]);
        let report = service.migrate(&reformatted).unwrap();
        assert!(report.applied.is_empty());
    }

    #[test]
    fn test_database_ahead_is_a_warning() {
        let store = DuckDbStore::open_in_memory().unwrap();
        let service = MigrationService::new(&store);
        service.migrate(&test_catalog()).unwrap();

        let report = service.migrate(&test_catalog().truncated(2)).unwrap();
        assert!(report.applied.is_empty());
        assert_eq!(report.current_version, 3);
        assert_eq!(report.application_version, 2);
        assert_eq!(report.drift, SchemaDrift::DatabaseAhead { extra: 1 });
        assert_eq!(service.fetch_versions().unwrap().len(), 3);
    }

    /// Collects the fields of every event, rendered with `Debug`
    #[derive(Clone, Default)]
    struct EventFields(Arc<Mutex<Vec<Vec<(String, String)>>>>);

    struct FieldVisitor(Vec<(String, String)>);

    impl Visit for FieldVisitor {
        fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
            self.0.push((field.name().to_string(), format!("{:?}", value)));
        }
    }

    impl<S: tracing::Subscriber> Layer<S> for EventFields {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            let mut visitor = FieldVisitor(Vec::new());
            event.record(&mut visitor);
            self.0.lock().unwrap().push(visitor.0);
        }
    }

    impl EventFields {
        fn summary(&self) -> Vec<(String, String)> {
            let events = self.0.lock().unwrap();
            events
                .iter()
                .find(|fields| {
                    fields
                        .iter()
                        .any(|(k, v)| k == "message" && v == "database migration complete")
                })
                .cloned()
                .expect("no summary event")
        }
    }

    fn field<'f>(fields: &'f [(String, String)], name: &str) -> Option<&'f str> {
        fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_summary_counts_when_database_ahead() {
        let store = DuckDbStore::open_in_memory().unwrap();
        let service = MigrationService::new(&store);
        service.migrate(&test_catalog()).unwrap();

        let events = EventFields::default();
        let subscriber = tracing_subscriber::registry().with(events.clone());
        tracing::subscriber::with_default(subscriber, || {
            service.migrate(&test_catalog().truncated(2)).unwrap();
        });

        let summary = events.summary();
        assert_eq!(field(&summary, "applied"), Some("0"));
        assert_eq!(field(&summary, "already_applied"), Some("2"));
        assert_eq!(field(&summary, "extra"), Some("1"));
    }

    #[test]
    fn test_summary_counts_when_up_to_date() {
        let store = DuckDbStore::open_in_memory().unwrap();
        let service = MigrationService::new(&store);
        service.migrate(&test_catalog().truncated(1)).unwrap();

        let events = EventFields::default();
        let subscriber = tracing_subscriber::registry().with(events.clone());
        tracing::subscriber::with_default(subscriber, || {
            service.migrate(&test_catalog()).unwrap();
        });

        let summary = events.summary();
        assert_eq!(field(&summary, "applied"), Some("2"));
        assert_eq!(field(&summary, "already_applied"), Some("1"));
    }

    #[test]
    fn test_conflict_backoff_doubles() {
        assert_eq!(conflict_backoff(1), Duration::from_millis(50));
        assert_eq!(conflict_backoff(2), Duration::from_millis(100));
        assert_eq!(conflict_backoff(3), Duration::from_millis(200));
        assert_eq!(conflict_backoff(0), Duration::from_millis(50));
    }

    #[test]
    fn test_transaction_conflict_counts_as_applied_elsewhere() {
        let store = DuckDbStore::open_in_memory().unwrap();
        let service = MigrationService::new(&store);
        service.ensure_ledger_exists().unwrap();

        // The winner's row is not visible yet
        let conflict = Error::TransactionConflict("Catalog write-write conflict".into());
        assert!(service.applied_elsewhere(1, &conflict).unwrap());

        let failed = Error::database("Catalog Error: Table with name a already exists!");
        assert!(!service.applied_elsewhere(1, &failed).unwrap());
    }

    #[test]
    fn test_failed_statement_rolls_back_and_stops() {
        let store = DuckDbStore::open_in_memory().unwrap();
        let service = MigrationService::new(&store);

        let catalog = StatementCatalog::from_static(&[
            V1_CREATE_TEST_TABLE,
            "CREATE TABLE half_done (a INTEGER); INSERT INTO missing_table VALUES (1);",
            V2_CREATE_ANOTHER_TABLE,
        ]);
        let err = service.migrate(&catalog).unwrap_err();
        assert!(matches!(err, Error::Database(_)));

        let ledger = service.fetch_versions().unwrap();
        assert_eq!(ledger.len(), 1);
        // The first half of statement 2 was undone with it
        assert!(store.query("SELECT * FROM half_done").is_err());
        // Statement 3 never ran
        assert!(store.query("SELECT * FROM anothertable").is_err());
    }

    #[test]
    fn test_reconcile_single_pass() {
        let store = DuckDbStore::open_in_memory().unwrap();
        let service = MigrationService::new(&store);
        service.ensure_ledger_exists().unwrap();

        let applied = service.reconcile(&[], &test_catalog()).unwrap();
        assert_eq!(applied, vec![1, 2, 3]);

        let ledger = service.fetch_versions().unwrap();
        let applied = service.reconcile(&ledger, &test_catalog()).unwrap();
        assert!(applied.is_empty());
    }

    #[test]
    fn test_ledger_gap_is_reported() {
        let store = DuckDbStore::open_in_memory().unwrap();
        let service = MigrationService::new(&store);
        service.ensure_ledger_exists().unwrap();

        let ledger = vec![
            LedgerEntry::new(1, statement_hash(V1_CREATE_TEST_TABLE), "t", V1_CREATE_TEST_TABLE),
            LedgerEntry::new(3, statement_hash(V3_CREATE_INDEX), "t", V3_CREATE_INDEX),
        ];
        let err = service.reconcile(&ledger, &test_catalog()).unwrap_err();
        assert!(matches!(
            err,
            Error::LedgerGap {
                position: 2,
                expected: 2,
                found: 3
            }
        ));
    }

    #[test]
    fn test_pending_lists_missing_statements() {
        let store = DuckDbStore::open_in_memory().unwrap();
        let service = MigrationService::new(&store);

        let pending = service.pending(&test_catalog()).unwrap();
        assert_eq!(pending.len(), 3);
        // Planning does not create the ledger
        assert!(!service.ledger_exists().unwrap());

        service.migrate(&test_catalog().truncated(1)).unwrap();
        let pending = service.pending(&test_catalog()).unwrap();
        let ids: Vec<u32> = pending.iter().map(|p| p.statement_id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(pending[0].statement_hash, statement_hash(V2_CREATE_ANOTHER_TABLE));
    }

    #[test]
    fn test_drift_of() {
        assert_eq!(drift_of(3, 3).unwrap(), SchemaDrift::UpToDate);
        assert_eq!(drift_of(5, 3).unwrap(), SchemaDrift::DatabaseAhead { extra: 2 });
        assert!(matches!(drift_of(2, 3), Err(Error::Invariant(_))));
    }
}
