use crate::core::db;
use crate::core::error::{RegistryError, Result};
use crate::core::time;
use rusqlite::{Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// The DB Broker is the "thin waist" for registry state access.
///
/// Reads get a plain connection and never block writers (WAL). Mutations run
/// inside `BEGIN IMMEDIATE`, which takes the database write lock before the
/// first read, so every read-compare-write sequence is serialized against
/// all other writers on the same file.
#[derive(Debug, Clone)]
pub struct DbBroker {
    db_path: PathBuf,
    audit_log_path: Option<PathBuf>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BrokerEvent {
    pub ts: String,
    pub event_id: String,
    pub actor: String,
    pub op: String,
    pub db_id: String,
    pub status: String,
}

impl DbBroker {
    pub fn new(db_path: &Path) -> Self {
        Self {
            db_path: db_path.to_path_buf(),
            audit_log_path: None,
        }
    }

    /// Append one JSON line per mutation to `path`.
    pub fn with_audit_log(mut self, path: &Path) -> Self {
        self.audit_log_path = Some(path.to_path_buf());
        self
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Run a read-only closure on a fresh connection.
    pub fn with_conn<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        let conn = db::db_connect(&self.db_path)?;
        f(&conn)
    }

    /// Run a mutating closure inside one immediate transaction. The
    /// transaction commits only when the closure returns `Ok`.
    pub fn with_tx<F, R>(&self, actor: &str, op_name: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        let mut conn = db::db_connect(&self.db_path)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let result = match f(&tx) {
            Ok(value) => tx.commit().map(|_| value).map_err(RegistryError::Sqlite),
            Err(e) => Err(e),
        };

        let status = if result.is_ok() { "success" } else { "error" };
        tracing::debug!(op = op_name, actor, status, "broker transaction finished");
        // The transaction outcome is already decided; audit failures never replace it.
        if let Err(e) = self.log_event(actor, op_name, status) {
            tracing::warn!(op = op_name, actor, error = %e, "audit log append failed");
        }

        result
    }

    fn log_event(&self, actor: &str, op: &str, status: &str) -> Result<()> {
        let Some(audit_log_path) = &self.audit_log_path else {
            return Ok(());
        };

        let ev = BrokerEvent {
            ts: time::now_epoch_z(),
            event_id: time::new_event_id(),
            actor: actor.to_string(),
            op: op.to_string(),
            db_id: self
                .db_path
                .file_name()
                .unwrap_or_default()
                .to_string_lossy()
                .to_string(),
            status: status.to_string(),
        };

        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(audit_log_path)
            .map_err(RegistryError::Io)?;

        writeln!(f, "{}", serde_json::to_string(&ev)?).map_err(RegistryError::Io)?;
        Ok(())
    }
}
