//! System rows: lookup, listing and explicit creation.

use crate::core::error::{Conflict, RegistryError, Result};
use crate::core::names;
use crate::core::schemas::SYSTEMS_NEXT_SEQ;
use crate::core::store::Store;
use crate::core::time;
use crate::registry::model::{MAIN_VERSION, Provenance, System, is_latest};
use rusqlite::{Connection, OptionalExtension, Row, params};

const SYSTEM_COLUMNS: &str = "id, workgroup, name, version, description, author, forked_from, \
     forked_at, created_at, updated_at, updated_by";

fn system_from_row(row: &Row<'_>) -> rusqlite::Result<System> {
    Ok(System {
        id: row.get(0)?,
        workgroup: row.get(1)?,
        name: row.get(2)?,
        version: row.get(3)?,
        description: row.get(4)?,
        author: row.get(5)?,
        forked_from: row.get(6)?,
        forked_at: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
        updated_by: row.get(10)?,
        protocols: Vec::new(),
        script_count: 0,
    })
}

/// Fill the derived `protocols` and `script_count` fields.
fn populate(conn: &Connection, system: &mut System) -> Result<()> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT protocol FROM ess_scripts
         WHERE system_id = ?1 AND protocol != '' ORDER BY protocol",
    )?;
    let rows = stmt.query_map(params![system.id], |row| row.get::<_, String>(0))?;
    let mut protocols = Vec::new();
    for r in rows {
        protocols.push(r?);
    }
    system.protocols = protocols;

    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM ess_scripts WHERE system_id = ?1",
        params![system.id],
        |row| row.get(0),
    )?;
    system.script_count = count as usize;
    Ok(())
}

/// Resolve `(workgroup, name, version)` on an open connection. An empty or
/// `latest` version picks the row of any label written most recently,
/// by `update_seq`.
pub(crate) fn find_system(
    conn: &Connection,
    workgroup: &str,
    name: &str,
    version: &str,
) -> Result<Option<System>> {
    let found = if is_latest(version) {
        conn.query_row(
            &format!(
                "SELECT {} FROM ess_systems WHERE workgroup = ?1 AND name = ?2
                 ORDER BY update_seq DESC, id DESC LIMIT 1",
                SYSTEM_COLUMNS
            ),
            params![workgroup, name],
            system_from_row,
        )
        .optional()?
    } else {
        conn.query_row(
            &format!(
                "SELECT {} FROM ess_systems WHERE workgroup = ?1 AND name = ?2 AND version = ?3",
                SYSTEM_COLUMNS
            ),
            params![workgroup, name, version],
            system_from_row,
        )
        .optional()?
    };

    match found {
        Some(mut system) => {
            populate(conn, &mut system)?;
            Ok(Some(system))
        }
        None => Ok(None),
    }
}

/// Like `find_system`, but absence is `NotFound`.
pub(crate) fn require_system(
    conn: &Connection,
    workgroup: &str,
    name: &str,
    version: &str,
) -> Result<System> {
    find_system(conn, workgroup, name, version)?.ok_or_else(|| {
        RegistryError::NotFound(format!(
            "system {}/{}@{}",
            workgroup,
            name,
            if version.is_empty() { "latest" } else { version }
        ))
    })
}

pub(crate) fn system_by_id(conn: &Connection, id: i64) -> Result<Option<System>> {
    let found = conn
        .query_row(
            &format!("SELECT {} FROM ess_systems WHERE id = ?1", SYSTEM_COLUMNS),
            params![id],
            system_from_row,
        )
        .optional()?;
    match found {
        Some(mut system) => {
            populate(conn, &mut system)?;
            Ok(Some(system))
        }
        None => Ok(None),
    }
}

pub(crate) fn list_in_workgroup(conn: &Connection, workgroup: &str) -> Result<Vec<System>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM ess_systems WHERE workgroup = ?1 ORDER BY name, version",
        SYSTEM_COLUMNS
    ))?;
    let rows = stmt.query_map(params![workgroup], system_from_row)?;
    let mut systems = Vec::new();
    for r in rows {
        let mut system = r?;
        populate(conn, &mut system)?;
        systems.push(system);
    }
    Ok(systems)
}

/// Everything needed to insert a new system row.
pub(crate) struct NewSystem<'a> {
    pub workgroup: &'a str,
    pub name: &'a str,
    pub version: &'a str,
    pub description: &'a str,
    pub author: &'a str,
    pub forked_from: Option<&'a Provenance>,
}

/// Insert a system row, or fail with `AlreadyExists` if the
/// `(workgroup, name, version)` triple is taken.
pub(crate) fn insert_system(conn: &Connection, new: &NewSystem<'_>, now: i64) -> Result<System> {
    if find_system(conn, new.workgroup, new.name, new.version)?.is_some() {
        return Err(RegistryError::Conflict(Conflict::AlreadyExists(format!(
            "system {}/{}@{}",
            new.workgroup, new.name, new.version
        ))));
    }

    let forked_at = new.forked_from.map(|_| now);
    conn.execute(
        &format!(
            "INSERT INTO ess_systems
                (workgroup, name, version, description, author, forked_from, forked_at,
                 created_at, updated_at, updated_by, update_seq)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8, ?5, {})",
            SYSTEMS_NEXT_SEQ
        ),
        params![
            new.workgroup,
            new.name,
            new.version,
            new.description,
            new.author,
            new.forked_from,
            forked_at,
            now
        ],
    )?;
    let id = conn.last_insert_rowid();
    system_by_id(conn, id)?
        .ok_or_else(|| RegistryError::NotFound(format!("system #{} after insert", id)))
}

pub(crate) fn touch_system(conn: &Connection, system_id: i64, by: &str, now: i64) -> Result<()> {
    conn.execute(
        &format!(
            "UPDATE ess_systems SET updated_at = ?1, updated_by = ?2, update_seq = {}
             WHERE id = ?3",
            SYSTEMS_NEXT_SEQ
        ),
        params![now, by, system_id],
    )?;
    Ok(())
}

/// Fetch one system. Absence is `Ok(None)`, not an error.
pub fn get_system(
    store: &Store,
    workgroup: &str,
    name: &str,
    version: &str,
) -> Result<Option<System>> {
    store
        .broker()
        .with_conn(|conn| find_system(conn, workgroup, name, version))
}

/// All systems in a workgroup, every version label, ordered by name then
/// version.
pub fn list_systems(store: &Store, workgroup: &str) -> Result<Vec<System>> {
    store
        .broker()
        .with_conn(|conn| list_in_workgroup(conn, workgroup))
}

/// Create an empty system row. `version` defaults to `main`.
pub fn create_system(
    store: &Store,
    workgroup: &str,
    name: &str,
    version: &str,
    description: &str,
    created_by: &str,
) -> Result<System> {
    let version = if version.is_empty() {
        MAIN_VERSION
    } else {
        version
    };
    names::validate_name("workgroup", workgroup)?;
    names::validate_name("system", name)?;
    validate_version_label(version)?;
    names::require("createdBy", created_by)?;

    let system = store
        .broker()
        .with_tx(created_by, "system.create", |conn| {
            insert_system(
                conn,
                &NewSystem {
                    workgroup,
                    name,
                    version,
                    description,
                    author: created_by,
                    forked_from: None,
                },
                time::now_epoch(),
            )
        })?;

    tracing::info!(
        workgroup,
        system = name,
        version,
        id = system.id,
        "system created"
    );
    Ok(system)
}

/// Version labels share the name grammar, and `latest` is reserved for
/// lookups.
pub(crate) fn validate_version_label(version: &str) -> Result<()> {
    names::validate_name("version", version)?;
    if is_latest(version) {
        return Err(RegistryError::InvalidInput(
            "'latest' is reserved and cannot be used as a version label".to_string(),
        ));
    }
    Ok(())
}
