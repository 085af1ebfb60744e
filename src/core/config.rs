//! Registry configuration.
//!
//! Resolution order for the file: explicit path, `$ESS_REGISTRY_CONFIG`,
//! `./ess-registry.toml`, else built-in defaults. `$ESS_REGISTRY_DB` then
//! overrides the database path from whichever source won.

use crate::core::error::{RegistryError, Result};
use crate::core::schemas;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "ess-registry.toml";
pub const CONFIG_ENV: &str = "ESS_REGISTRY_CONFIG";
pub const DB_ENV: &str = "ESS_REGISTRY_DB";

pub const DEFAULT_TEMPLATES_WORKGROUP: &str = "_templates";
pub const DEFAULT_LOCK_TTL_SECS: u64 = 30 * 60;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegistryConfig {
    pub db_path: PathBuf,
    /// Workgroup holding the read-only template library ("zoo").
    pub templates_workgroup: String,
    pub lock_ttl_secs: u64,
    /// Append broker events to `broker.events.jsonl` beside the database.
    pub audit_log: bool,
    pub log_filter: Option<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(schemas::REGISTRY_DB_NAME),
            templates_workgroup: DEFAULT_TEMPLATES_WORKGROUP.to_string(),
            lock_ttl_secs: DEFAULT_LOCK_TTL_SECS,
            audit_log: false,
            log_filter: None,
        }
    }
}

impl RegistryConfig {
    /// Config rooted at a database file, everything else default.
    pub fn for_db(db_path: &Path) -> Self {
        Self {
            db_path: db_path.to_path_buf(),
            ..Self::default()
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: RegistryConfig =
            toml::from_str(content).map_err(|e| RegistryError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(RegistryError::Io)?;
        Self::from_toml_str(&content)
    }

    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load_file(path)?,
            None => match std::env::var_os(CONFIG_ENV) {
                Some(path) => Self::load_file(Path::new(&path))?,
                None if Path::new(CONFIG_FILE_NAME).exists() => {
                    Self::load_file(Path::new(CONFIG_FILE_NAME))?
                }
                None => Self::default(),
            },
        };

        if let Some(db) = std::env::var_os(DB_ENV) {
            config.db_path = PathBuf::from(db);
        }
        Ok(config)
    }

    pub fn audit_log_path(&self) -> Option<PathBuf> {
        if !self.audit_log {
            return None;
        }
        let dir = self.db_path.parent().unwrap_or_else(|| Path::new(""));
        Some(dir.join(schemas::REGISTRY_EVENTS_NAME))
    }

    fn validate(&self) -> Result<()> {
        if self.templates_workgroup.trim().is_empty() {
            return Err(RegistryError::Config(
                "templates_workgroup must not be empty".to_string(),
            ));
        }
        if self.lock_ttl_secs == 0 {
            return Err(RegistryError::Config(
                "lock_ttl_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
