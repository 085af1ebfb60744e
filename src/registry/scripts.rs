//! Script reads and the checksum compare-and-set write path.
//!
//! Every accepted write recomputes the checksum from content, upserts the
//! script row, appends a history snapshot and touches the owning system,
//! all inside the caller's immediate transaction.

use crate::core::checksum::compute_checksum;
use crate::core::error::{Conflict, RegistryError, Result, short_checksum};
use crate::core::names;
use crate::core::store::Store;
use crate::core::time;
use crate::registry::model::{
    Provenance, Script, ScriptHistory, ScriptKey, ScriptType, ScriptWrite, System,
};
use crate::registry::systems;
use rusqlite::{Connection, OptionalExtension, Row, params};

const SCRIPT_COLUMNS: &str =
    "id, system_id, protocol, type, filename, content, checksum, forked_from, updated_at, updated_by";

fn script_from_row(row: &Row<'_>) -> rusqlite::Result<Script> {
    Ok(Script {
        id: row.get(0)?,
        system_id: row.get(1)?,
        protocol: row.get(2)?,
        script_type: row.get(3)?,
        filename: row.get(4)?,
        content: row.get(5)?,
        checksum: row.get(6)?,
        forked_from: row.get(7)?,
        updated_at: row.get(8)?,
        updated_by: row.get(9)?,
    })
}

fn history_from_row(row: &Row<'_>) -> rusqlite::Result<ScriptHistory> {
    Ok(ScriptHistory {
        id: row.get(0)?,
        script_id: row.get(1)?,
        checksum: row.get(2)?,
        content: row.get(3)?,
        comment: row.get(4)?,
        saved_by: row.get(5)?,
        saved_at: row.get(6)?,
    })
}

pub(crate) fn find_script(
    conn: &Connection,
    system_id: i64,
    protocol: &str,
    script_type: ScriptType,
) -> Result<Option<Script>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {} FROM ess_scripts WHERE system_id = ?1 AND protocol = ?2 AND type = ?3",
                SCRIPT_COLUMNS
            ),
            params![system_id, protocol, script_type],
            script_from_row,
        )
        .optional()?)
}

pub(crate) fn script_by_id(conn: &Connection, id: i64) -> Result<Option<Script>> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM ess_scripts WHERE id = ?1", SCRIPT_COLUMNS),
            params![id],
            script_from_row,
        )
        .optional()?)
}

/// All scripts of a system ordered by protocol, then type.
pub(crate) fn scripts_for_system(conn: &Connection, system_id: i64) -> Result<Vec<Script>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM ess_scripts WHERE system_id = ?1 ORDER BY protocol, type",
        SCRIPT_COLUMNS
    ))?;
    let rows = stmt.query_map(params![system_id], script_from_row)?;
    let mut scripts = Vec::new();
    for r in rows {
        scripts.push(r?);
    }
    Ok(scripts)
}

/// Compare the caller's expected checksum against what is stored.
///
/// An empty expectation always passes (blind write). A non-empty one must
/// equal the stored checksum; a missing row with a non-empty expectation
/// is a mismatch with no current value.
pub(crate) fn check_expected(key: &str, expected: &str, current: Option<&str>) -> Result<()> {
    if expected.is_empty() || current == Some(expected) {
        return Ok(());
    }
    tracing::warn!(
        key,
        expected = short_checksum(expected),
        current = current.map(short_checksum).unwrap_or("none"),
        "checksum mismatch"
    );
    Err(RegistryError::Conflict(Conflict::ChecksumMismatch {
        key: key.to_string(),
        expected: expected.to_string(),
        current: current.map(str::to_string),
    }))
}

/// One script write as seen by the store, already validated.
pub(crate) struct StoredWrite<'a> {
    pub protocol: &'a str,
    pub script_type: ScriptType,
    pub filename: &'a str,
    pub content: &'a str,
    pub updated_by: &'a str,
    pub forked_from: Option<&'a Provenance>,
    pub comment: &'a str,
}

/// Upsert one script of `system`, append its history row and touch the
/// system. No checksum comparison happens here.
pub(crate) fn write_script(
    conn: &Connection,
    system: &System,
    write: &StoredWrite<'_>,
    now: i64,
) -> Result<Script> {
    let checksum = compute_checksum(write.content);

    conn.execute(
        "INSERT INTO ess_scripts
            (system_id, protocol, type, filename, content, checksum, forked_from, updated_at, updated_by)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(system_id, protocol, type) DO UPDATE SET
            filename = excluded.filename,
            content = excluded.content,
            checksum = excluded.checksum,
            forked_from = COALESCE(excluded.forked_from, ess_scripts.forked_from),
            updated_at = excluded.updated_at,
            updated_by = excluded.updated_by",
        params![
            system.id,
            write.protocol,
            write.script_type,
            write.filename,
            write.content,
            checksum,
            write.forked_from,
            now,
            write.updated_by
        ],
    )?;

    let script = find_script(conn, system.id, write.protocol, write.script_type)?.ok_or_else(
        || {
            RegistryError::NotFound(format!(
                "script {} after upsert",
                ScriptKey::new(write.protocol, write.script_type)
            ))
        },
    )?;

    conn.execute(
        "INSERT INTO ess_script_history (script_id, content, checksum, saved_at, saved_by, comment)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            script.id,
            write.content,
            checksum,
            now,
            write.updated_by,
            write.comment
        ],
    )?;

    systems::touch_system(conn, system.id, write.updated_by, now)?;
    Ok(script)
}

fn conflict_key(system: &System, protocol: &str, script_type: ScriptType) -> String {
    format!(
        "{}:{}",
        system.lock_key(),
        ScriptKey::new(protocol, script_type)
    )
}

pub fn get_script(
    store: &Store,
    system_id: i64,
    protocol: &str,
    script_type: ScriptType,
) -> Result<Option<Script>> {
    store
        .broker()
        .with_conn(|conn| find_script(conn, system_id, protocol, script_type))
}

pub fn get_script_by_id(store: &Store, script_id: i64) -> Result<Option<Script>> {
    store
        .broker()
        .with_conn(|conn| script_by_id(conn, script_id))
}

pub fn get_scripts(store: &Store, system_id: i64) -> Result<Vec<Script>> {
    store
        .broker()
        .with_conn(|conn| scripts_for_system(conn, system_id))
}

/// Save a script with optimistic concurrency.
///
/// With a non-empty `expected_checksum` the write only happens if the
/// stored checksum still equals it; otherwise `Conflict::ChecksumMismatch`
/// is returned and nothing is written. Returns the stored script, whose
/// checksum is always derived from the saved content.
pub fn save_script(
    store: &Store,
    write: &ScriptWrite,
    expected_checksum: &str,
    comment: &str,
) -> Result<Script> {
    names::require("updatedBy", &write.updated_by)?;
    if !write.protocol.is_empty() {
        names::validate_name("protocol", &write.protocol)?;
    }
    if write.content.is_empty() {
        return Err(RegistryError::InvalidInput(
            "script content must not be empty".to_string(),
        ));
    }
    if let Some(filename) = &write.filename {
        names::require("filename", filename)?;
    }

    let script = store
        .broker()
        .with_tx(&write.updated_by, "script.save", |conn| {
            let system = systems::system_by_id(conn, write.system_id)?.ok_or_else(|| {
                RegistryError::NotFound(format!("system #{}", write.system_id))
            })?;

            let current = find_script(conn, system.id, &write.protocol, write.script_type)?;
            check_expected(
                &conflict_key(&system, &write.protocol, write.script_type),
                expected_checksum,
                current.as_ref().map(|s| s.checksum.as_str()),
            )?;

            let filename = match (&write.filename, &current) {
                (Some(f), _) => f.clone(),
                (None, Some(existing)) => existing.filename.clone(),
                (None, None) => write
                    .script_type
                    .default_filename(&system.name, &write.protocol),
            };

            write_script(
                conn,
                &system,
                &StoredWrite {
                    protocol: &write.protocol,
                    script_type: write.script_type,
                    filename: &filename,
                    content: &write.content,
                    updated_by: &write.updated_by,
                    forked_from: None,
                    comment,
                },
                time::now_epoch(),
            )
        })?;

    tracing::info!(
        system_id = script.system_id,
        key = %script.key(),
        checksum = short_checksum(&script.checksum),
        by = %script.updated_by,
        "script saved"
    );
    Ok(script)
}

/// History of one script, newest first. `limit == 0` returns everything.
pub fn get_script_history(
    store: &Store,
    script_id: i64,
    limit: u32,
) -> Result<Vec<ScriptHistory>> {
    let limit: i64 = if limit == 0 { -1 } else { limit as i64 };
    store.broker().with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, script_id, checksum, content, comment, saved_by, saved_at
             FROM ess_script_history WHERE script_id = ?1
             ORDER BY saved_at DESC, id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![script_id, limit], history_from_row)?;
        let mut history = Vec::new();
        for r in rows {
            history.push(r?);
        }
        Ok(history)
    })
}

/// Restore the content of history row `history_id` as a new save of the
/// same script, under the same checksum rule as `save_script`.
pub fn rollback_script(
    store: &Store,
    script_id: i64,
    history_id: i64,
    expected_checksum: &str,
    updated_by: &str,
) -> Result<Script> {
    names::require("updatedBy", updated_by)?;

    let script = store
        .broker()
        .with_tx(updated_by, "script.rollback", |conn| {
            let current = script_by_id(conn, script_id)?
                .ok_or_else(|| RegistryError::NotFound(format!("script #{}", script_id)))?;
            let system = systems::system_by_id(conn, current.system_id)?.ok_or_else(|| {
                RegistryError::NotFound(format!("system #{}", current.system_id))
            })?;

            let snapshot: Option<String> = conn
                .query_row(
                    "SELECT content FROM ess_script_history WHERE id = ?1 AND script_id = ?2",
                    params![history_id, script_id],
                    |row| row.get(0),
                )
                .optional()?;
            let content = snapshot.ok_or_else(|| {
                RegistryError::NotFound(format!(
                    "history #{} for script #{}",
                    history_id, script_id
                ))
            })?;

            check_expected(
                &conflict_key(&system, &current.protocol, current.script_type),
                expected_checksum,
                Some(current.checksum.as_str()),
            )?;

            let comment = format!("rollback to #{}", history_id);
            write_script(
                conn,
                &system,
                &StoredWrite {
                    protocol: &current.protocol,
                    script_type: current.script_type,
                    filename: &current.filename,
                    content: &content,
                    updated_by,
                    forked_from: None,
                    comment: &comment,
                },
                time::now_epoch(),
            )
        })?;

    tracing::info!(
        script_id,
        history_id,
        checksum = short_checksum(&script.checksum),
        "script rolled back"
    );
    Ok(script)
}
