use crate::core::error::{RegistryError, Result};
use crate::core::migration;
use rusqlite::Connection;
use std::fs;
use std::path::Path;

/// Open a connection with the pragmas every registry connection relies on.
pub fn db_connect(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))
        .map_err(RegistryError::Sqlite)?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))
        .map_err(RegistryError::Sqlite)?;
    conn.execute("PRAGMA foreign_keys=ON;", [])
        .map_err(RegistryError::Sqlite)?;
    Ok(conn)
}

/// Create the parent directory and bring the schema up to date.
pub fn initialize_registry_db(db_path: &Path) -> Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(RegistryError::Io)?;
        }
    }
    let conn = db_connect(db_path)?;
    migration::run(&conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn connect_enables_foreign_keys_and_wal() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("reg.db");
        let conn = db_connect(&path).unwrap();
        let fk: i64 = conn
            .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fk, 1);
        let mode: String = conn
            .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "wal");
    }

    #[test]
    fn initialize_creates_missing_parent_dirs() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("nested").join("dir").join("reg.db");
        initialize_registry_db(&path).unwrap();
        assert!(path.exists());
    }
}
