//! Status service - database version summary

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use crate::domain::{schema_version, StatementCatalog};
use crate::ports::SchemaStore;
use crate::services::migration::MigrationService;

/// Status service for version summaries
pub struct StatusService {
    store: Arc<dyn SchemaStore>,
}

impl StatusService {
    pub fn new(store: Arc<dyn SchemaStore>) -> Self {
        Self { store }
    }

    /// Compare the ledger against `catalog` without writing anything.
    ///
    /// Hashes are not verified here; `DoctorService` and `MigrationService::pending`
    /// do that.
    pub fn get_status(&self, catalog: &StatementCatalog) -> Result<StatusSummary> {
        let migrations = MigrationService::new(self.store.as_ref());

        let ledger_exists = migrations.ledger_exists()?;
        let ledger = if ledger_exists {
            migrations.fetch_versions()?
        } else {
            Vec::new()
        };

        let database_version = schema_version(&ledger);
        let application_version = catalog.len();

        let state = if database_version > application_version {
            VersionState::DatabaseAhead {
                extra: database_version - application_version,
            }
        } else if database_version < application_version {
            VersionState::Behind {
                pending: application_version - database_version,
            }
        } else {
            VersionState::UpToDate
        };

        Ok(StatusSummary {
            ledger_exists,
            database_version,
            application_version,
            state,
            last_applied: ledger.last().map(|e| e.insert_time.clone()),
            last_statement_id: ledger.last().map(|e| e.statement_id),
        })
    }
}

/// Where the database stands relative to the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum VersionState {
    UpToDate,
    /// The next migration run would apply `pending` statements
    Behind { pending: usize },
    /// Written by a newer application version
    DatabaseAhead { extra: usize },
}

impl VersionState {
    /// Statements the next run would apply
    pub fn pending(&self) -> usize {
        match self {
            VersionState::Behind { pending } => *pending,
            _ => 0,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusSummary {
    pub ledger_exists: bool,
    pub database_version: usize,
    pub application_version: usize,
    pub state: VersionState,
    /// Insert time of the highest ledger row
    pub last_applied: Option<String>,
    pub last_statement_id: Option<u32>,
}
