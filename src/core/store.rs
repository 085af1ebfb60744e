//! Store handle for the registry.
//!
//! A `Store` is the injected handle every registry operation takes by
//! reference. It owns the broker (the single path to the database) and the
//! resolved configuration; there is no global registry state.

use crate::core::broker::DbBroker;
use crate::core::config::RegistryConfig;
use crate::core::db;
use crate::core::error::Result;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct Store {
    broker: DbBroker,
    config: RegistryConfig,
}

impl Store {
    /// Initialize (or migrate) the database named by `config` and return a
    /// handle to it.
    pub fn open(config: &RegistryConfig) -> Result<Store> {
        db::initialize_registry_db(&config.db_path)?;

        let mut broker = DbBroker::new(&config.db_path);
        if let Some(audit) = config.audit_log_path() {
            broker = broker.with_audit_log(&audit);
        }

        tracing::debug!(db = %config.db_path.display(), "registry store opened");
        Ok(Store {
            broker,
            config: config.clone(),
        })
    }

    /// Open with default settings at `db_path`.
    pub fn open_path(db_path: &Path) -> Result<Store> {
        Self::open(&RegistryConfig::for_db(db_path))
    }

    pub fn broker(&self) -> &DbBroker {
        &self.broker
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn templates_workgroup(&self) -> &str {
        &self.config.templates_workgroup
    }

    pub fn lock_ttl_secs(&self) -> i64 {
        self.config.lock_ttl_secs as i64
    }
}
