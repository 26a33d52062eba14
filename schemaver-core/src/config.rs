//! Configuration management
//!
//! Read from `schemaver.json` in the schemaver directory:
//! ```json
//! {
//!   "database": "app.duckdb",
//!   "catalogDir": "sql",
//!   "conflictRetries": 1,
//!   "openRetries": 5
//! }
//! ```
//! Every field is optional. Relative paths resolve against the directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::adapters::duckdb::DEFAULT_OPEN_RETRIES;
use crate::services::migration::DEFAULT_CONFLICT_RETRIES;

/// Name of the settings file inside the schemaver directory
pub const SETTINGS_FILE: &str = "schemaver.json";

/// Default database file name
pub const DEFAULT_DATABASE: &str = "schemaver.duckdb";

/// Raw schemaver.json structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    catalog_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    conflict_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    open_retries: Option<u32>,
    // Keys other tools put in the file survive a save
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

/// Schemaver configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database file to migrate
    pub database: PathBuf,
    /// Directory of `*.sql` files replacing the compiled-in catalog
    pub catalog_dir: Option<PathBuf>,
    /// Reconciliation restarts after a concurrent application race
    pub conflict_retries: u32,
    /// Attempts to open a locked database file
    pub open_retries: u32,
    _raw_settings: SettingsFile,
}

impl Config {
    /// Defaults for a schemaver directory
    pub fn defaults(dir: &Path) -> Self {
        Self::from_settings(dir, SettingsFile::default())
    }

    /// Load config from the schemaver directory
    ///
    /// The database and catalog locations can be overridden through the
    /// SCHEMAVER_DATABASE and SCHEMAVER_CATALOG_DIR environment variables
    /// (for deployments and CI).
    pub fn load(dir: &Path) -> Result<Self> {
        let settings_path = dir.join(SETTINGS_FILE);

        let raw: SettingsFile = if settings_path.exists() {
            let content = std::fs::read_to_string(&settings_path)
                .with_context(|| format!("Failed to read {}", settings_path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Invalid settings in {}", settings_path.display()))?
        } else {
            SettingsFile::default()
        };

        let mut config = Self::from_settings(dir, raw);

        if let Some(database) = non_empty_env("SCHEMAVER_DATABASE") {
            config.database = resolve(dir, &database);
        }
        if let Some(catalog_dir) = non_empty_env("SCHEMAVER_CATALOG_DIR") {
            config.catalog_dir = Some(resolve(dir, &catalog_dir));
        }

        Ok(config)
    }

    fn from_settings(dir: &Path, raw: SettingsFile) -> Self {
        Self {
            database: resolve(dir, raw.database.as_deref().unwrap_or(DEFAULT_DATABASE)),
            catalog_dir: raw.catalog_dir.as_deref().map(|d| resolve(dir, d)),
            conflict_retries: raw.conflict_retries.unwrap_or(DEFAULT_CONFLICT_RETRIES),
            open_retries: raw.open_retries.unwrap_or(DEFAULT_OPEN_RETRIES),
            _raw_settings: raw,
        }
    }

    /// Save config to the schemaver directory
    /// Preserves settings that schemaver does not manage
    pub fn save(&self, dir: &Path) -> Result<()> {
        let settings_path = dir.join(SETTINGS_FILE);

        let mut settings = self._raw_settings.clone();
        settings.database = Some(self.database.to_string_lossy().to_string());
        settings.catalog_dir = self
            .catalog_dir
            .as_ref()
            .map(|d| d.to_string_lossy().to_string());
        settings.conflict_retries = Some(self.conflict_retries);
        settings.open_retries = Some(self.open_retries);

        let content = serde_json::to_string_pretty(&settings)?;
        std::fs::write(&settings_path, content)
            .with_context(|| format!("Failed to write {}", settings_path.display()))?;
        Ok(())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn resolve(dir: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        dir.join(path)
    }
}
