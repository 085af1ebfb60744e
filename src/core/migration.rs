//! Schema versioning for the registry database.
//!
//! The version lives in `PRAGMA user_version`. Migrations are forward-only;
//! a database written by a newer binary is refused rather than guessed at.

use crate::core::error::{RegistryError, Result};
use crate::core::schemas;
use rusqlite::Connection;

/// Run all pending migrations.
pub fn run(conn: &Connection) -> Result<()> {
    let current: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    let target = schemas::REGISTRY_SCHEMA_VERSION;

    if current == 0 {
        tracing::info!(version = target, "initializing registry schema");
        let tx = conn.unchecked_transaction()?;
        for stmt in schemas::SCHEMA_V1 {
            tx.execute_batch(stmt)?;
        }
        tx.pragma_update(None, "user_version", target)?;
        tx.commit()?;
    } else if current < target {
        for version in (current + 1)..=target {
            tracing::info!(version, "running registry migration");
            run_migration(conn, version)?;
            conn.pragma_update(None, "user_version", version)?;
        }
    } else if current > target {
        return Err(RegistryError::Migration(format!(
            "database schema v{} is newer than supported v{}",
            current, target
        )));
    }

    Ok(())
}

// Incremental steps land here as `2 => migrate_v2(conn)` once schema v2 exists.
fn run_migration(_conn: &Connection, version: u32) -> Result<()> {
    Err(RegistryError::Migration(format!(
        "unknown migration version: {}",
        version
    )))
}
