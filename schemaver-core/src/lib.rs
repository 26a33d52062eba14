//! Schemaver Core - forward-only schema migrations
//!
//! This crate implements the migration engine following hexagonal architecture:
//!
//! - **domain**: Catalog, ledger rows, statement fingerprints, errors
//! - **ports**: Trait definitions for the target database (SchemaStore)
//! - **services**: Migration, status, doctor and run-log orchestration
//! - **adapters**: Concrete implementations (DuckDB)
//!
//! An application embedding the engine calls [`migrate_database`] once at
//! startup and refuses to serve traffic if it returns an error.

pub mod adapters;
pub mod config;
pub mod domain;
pub mod log_migrations;
pub mod migrations;
pub mod ports;
pub mod services;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use adapters::duckdb::DuckDbStore;
use config::Config;
use services::*;

// Re-export commonly used types at crate root
pub use domain::result::{Error, OperationResult};
pub use domain::{statement_hash, CatalogIssue, LedgerEntry, StatementCatalog};
pub use migrations::app_catalog;
pub use ports::{QueryResult, SchemaStore, StoreTransaction};
pub use services::{MigrationReport, PendingStatement, SchemaDrift};

/// Bring `store` up to date with the application's compiled-in catalog
pub fn migrate_database(store: &dyn SchemaStore) -> domain::result::Result<MigrationReport> {
    migrate(store, &app_catalog())
}

/// Bring `store` up to date with an explicitly supplied catalog
pub fn migrate(
    store: &dyn SchemaStore,
    catalog: &StatementCatalog,
) -> domain::result::Result<MigrationReport> {
    MigrationService::new(store).migrate(catalog)
}

/// Ledger rows ascending by statement id. Read-only; fails if the ledger
/// table does not exist yet.
pub fn fetch_schema_version(store: &dyn SchemaStore) -> domain::result::Result<Vec<LedgerEntry>> {
    MigrationService::new(store).fetch_versions()
}

/// Main context for Schemaver operations
///
/// Holds the configuration, the opened database, the catalog in effect and
/// the read-only services.
pub struct SchemaverContext {
    pub config: Config,
    pub store: Arc<DuckDbStore>,
    pub catalog: StatementCatalog,
    pub status_service: StatusService,
    pub doctor_service: DoctorService,
}

impl SchemaverContext {
    /// Create a new context from a schemaver directory
    pub fn new(dir: &Path) -> Result<Self> {
        let config = Config::load(dir)?;

        if let Some(parent) = config.database.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let store = Arc::new(
            DuckDbStore::open(&config.database, config.open_retries)
                .with_context(|| format!("Failed to open {}", config.database.display()))?,
        );

        let catalog = match &config.catalog_dir {
            Some(catalog_dir) => StatementCatalog::load_dir(catalog_dir)?,
            None => app_catalog(),
        };

        let status_service = StatusService::new(store.clone());
        let doctor_service = DoctorService::new(store.clone());

        Ok(Self {
            config,
            store,
            catalog,
            status_service,
            doctor_service,
        })
    }

    /// Migration service over the context's store, honoring the configured
    /// conflict retries
    pub fn migration_service(&self) -> MigrationService<'_> {
        MigrationService::new(self.store.as_ref()).with_conflict_retries(self.config.conflict_retries)
    }

    /// Run the catalog in effect against the database, recording the run in
    /// the run log as an embedding application
    pub fn migrate(&self) -> domain::result::Result<MigrationReport> {
        self.migrate_logged(EntryPoint::Library, None)
    }

    /// Run the catalog in effect and record the run in the run log next to
    /// the database. A run log that cannot be opened or written is skipped;
    /// it never changes the migration outcome.
    pub fn migrate_logged(
        &self,
        entry_point: EntryPoint,
        command: Option<&str>,
    ) -> domain::result::Result<MigrationReport> {
        let logger = match LoggingService::new(self.data_dir(), entry_point, env!("CARGO_PKG_VERSION")) {
            Ok(logger) => Some(logger),
            Err(e) => {
                tracing::debug!(error = %e, "run log unavailable");
                None
            }
        };

        record(&logger, |l| l.log_migration_started(command));
        let result = self.migration_service().migrate(&self.catalog);
        record(&logger, |l| l.log_migration_outcome(command, &result));
        result
    }

    /// Directory holding the database file; the run log lives here too
    pub fn data_dir(&self) -> &Path {
        self.config.database.parent().unwrap_or_else(|| Path::new("."))
    }
}

fn record(logger: &Option<LoggingService>, write: impl FnOnce(&LoggingService) -> Result<()>) {
    if let Some(logger) = logger {
        if let Err(e) = write(logger) {
            tracing::debug!(error = %e, "failed to write run log");
        }
    }
}
