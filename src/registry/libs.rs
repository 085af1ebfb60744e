//! Shared libraries: versioned support files scoped by workgroup.

use crate::core::checksum::compute_checksum;
use crate::core::error::{RegistryError, Result, short_checksum};
use crate::core::names;
use crate::core::schemas::LIBS_NEXT_SEQ;
use crate::core::store::Store;
use crate::core::time;
use crate::registry::model::{LibWrite, Library, MAIN_VERSION, Provenance, is_latest};
use crate::registry::scripts::check_expected;
use rusqlite::{Connection, OptionalExtension, Row, params};

const LIB_COLUMNS: &str =
    "id, workgroup, name, version, filename, content, checksum, forked_from, created_at, updated_at";

fn lib_from_row(row: &Row<'_>) -> rusqlite::Result<Library> {
    Ok(Library {
        id: row.get(0)?,
        workgroup: row.get(1)?,
        name: row.get(2)?,
        version: row.get(3)?,
        filename: row.get(4)?,
        content: row.get(5)?,
        checksum: row.get(6)?,
        forked_from: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

pub(crate) fn find_lib(
    conn: &Connection,
    workgroup: &str,
    name: &str,
    version: &str,
) -> Result<Option<Library>> {
    let lib = if is_latest(version) {
        conn.query_row(
            &format!(
                "SELECT {} FROM ess_libs WHERE workgroup = ?1 AND name = ?2
                 ORDER BY update_seq DESC, id DESC LIMIT 1",
                LIB_COLUMNS
            ),
            params![workgroup, name],
            lib_from_row,
        )
        .optional()?
    } else {
        conn.query_row(
            &format!(
                "SELECT {} FROM ess_libs WHERE workgroup = ?1 AND name = ?2 AND version = ?3",
                LIB_COLUMNS
            ),
            params![workgroup, name, version],
            lib_from_row,
        )
        .optional()?
    };
    Ok(lib)
}

/// Libraries of a workgroup with content, ordered by name then version.
pub(crate) fn libs_in_workgroup(conn: &Connection, workgroup: &str) -> Result<Vec<Library>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM ess_libs WHERE workgroup = ?1 ORDER BY name, version",
        LIB_COLUMNS
    ))?;
    let rows = stmt.query_map(params![workgroup], lib_from_row)?;
    let mut libs = Vec::new();
    for r in rows {
        libs.push(r?);
    }
    Ok(libs)
}

/// Insert a copy of `lib` into `workgroup` unless that `(name, version)`
/// already exists there. Returns whether a row was written.
pub(crate) fn copy_lib_into(
    conn: &Connection,
    lib: &Library,
    workgroup: &str,
    now: i64,
) -> Result<bool> {
    let provenance = Provenance::versioned(&lib.workgroup, &lib.name, &lib.version);
    let inserted = conn.execute(
        &format!(
            "INSERT INTO ess_libs
                (workgroup, name, version, filename, content, checksum, forked_from,
                 created_at, updated_at, update_seq)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8, {})
             ON CONFLICT(workgroup, name, version) DO NOTHING",
            LIBS_NEXT_SEQ
        ),
        params![
            workgroup,
            lib.name,
            lib.version,
            lib.filename,
            lib.content,
            compute_checksum(&lib.content),
            provenance,
            now
        ],
    )?;
    Ok(inserted > 0)
}

/// Library listing without content.
pub fn list_libs(store: &Store, workgroup: &str) -> Result<Vec<Library>> {
    store.broker().with_conn(|conn| {
        let mut libs = libs_in_workgroup(conn, workgroup)?;
        for lib in &mut libs {
            lib.content.clear();
        }
        Ok(libs)
    })
}

/// Fetch one library with content. Empty or `latest` version follows the
/// same rule as system lookup.
pub fn get_lib(
    store: &Store,
    workgroup: &str,
    name: &str,
    version: &str,
) -> Result<Option<Library>> {
    store
        .broker()
        .with_conn(|conn| find_lib(conn, workgroup, name, version))
}

/// Save a library under the same checksum compare-and-set rule as scripts.
pub fn save_lib(store: &Store, write: &LibWrite, expected_checksum: &str) -> Result<Library> {
    let version = if write.version.is_empty() {
        MAIN_VERSION
    } else {
        write.version.as_str()
    };
    names::validate_name("workgroup", &write.workgroup)?;
    names::validate_name("library", &write.name)?;
    crate::registry::systems::validate_version_label(version)?;
    if write.content.is_empty() {
        return Err(RegistryError::InvalidInput(
            "library content must not be empty".to_string(),
        ));
    }

    let key = format!("{}/{}@{}", write.workgroup, write.name, version);
    let lib = store.broker().with_tx("registry", "lib.save", |conn| {
        let current = find_lib(conn, &write.workgroup, &write.name, version)?;
        check_expected(
            &key,
            expected_checksum,
            current.as_ref().map(|l| l.checksum.as_str()),
        )?;

        let filename = match (&write.filename, &current) {
            (Some(f), _) => f.clone(),
            (None, Some(existing)) => existing.filename.clone(),
            (None, None) => format!("{}.tcl", write.name),
        };
        let now = time::now_epoch();
        conn.execute(
            &format!(
                "INSERT INTO ess_libs
                    (workgroup, name, version, filename, content, checksum,
                     created_at, updated_at, update_seq)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, {})
                 ON CONFLICT(workgroup, name, version) DO UPDATE SET
                    filename = excluded.filename,
                    content = excluded.content,
                    checksum = excluded.checksum,
                    updated_at = excluded.updated_at,
                    update_seq = excluded.update_seq",
                LIBS_NEXT_SEQ
            ),
            params![
                write.workgroup,
                write.name,
                version,
                filename,
                write.content,
                compute_checksum(&write.content),
                now
            ],
        )?;
        find_lib(conn, &write.workgroup, &write.name, version)?
            .ok_or_else(|| RegistryError::NotFound(format!("library {} after save", key)))
    })?;

    tracing::info!(
        key = %key,
        checksum = short_checksum(&lib.checksum),
        "library saved"
    );
    Ok(lib)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::Conflict;
    use tempfile::tempdir;

    fn lib_write(content: &str) -> LibWrite {
        LibWrite {
            workgroup: "lab".into(),
            name: "planko".into(),
            version: "".into(),
            filename: None,
            content: content.into(),
        }
    }

    #[test]
    fn save_then_cas_update() {
        let tmp = tempdir().unwrap();
        let store = Store::open_path(&tmp.path().join("r.db")).unwrap();

        let v1 = save_lib(&store, &lib_write("proc a {} {}"), "").unwrap();
        assert_eq!(v1.version, "main");
        assert_eq!(v1.filename, "planko.tcl");
        assert_eq!(v1.checksum, compute_checksum("proc a {} {}"));

        let err = save_lib(&store, &lib_write("proc b {} {}"), "stale").unwrap_err();
        assert!(matches!(err.conflict(), Some(Conflict::ChecksumMismatch { .. })));

        let v2 = save_lib(&store, &lib_write("proc b {} {}"), &v1.checksum).unwrap();
        assert_eq!(v2.id, v1.id);
        assert_eq!(
            get_lib(&store, "lab", "planko", "latest").unwrap().unwrap().content,
            "proc b {} {}"
        );
    }

    #[test]
    fn latest_lib_is_last_written_not_last_created() {
        let tmp = tempdir().unwrap();
        let store = Store::open_path(&tmp.path().join("r.db")).unwrap();
        let main = save_lib(&store, &lib_write("main v1"), "").unwrap();
        let dev = LibWrite {
            version: "dev".into(),
            ..lib_write("dev v1")
        };
        save_lib(&store, &dev, "").unwrap();
        save_lib(&store, &lib_write("main v2"), &main.checksum).unwrap();

        let latest = get_lib(&store, "lab", "planko", "").unwrap().unwrap();
        assert_eq!(latest.version, "main");
        assert_eq!(latest.content, "main v2");
    }

    #[test]
    fn listing_strips_content() {
        let tmp = tempdir().unwrap();
        let store = Store::open_path(&tmp.path().join("r.db")).unwrap();
        save_lib(&store, &lib_write("x"), "").unwrap();
        let libs = list_libs(&store, "lab").unwrap();
        assert_eq!(libs.len(), 1);
        assert!(libs[0].content.is_empty());
        assert_eq!(libs[0].checksum, compute_checksum("x"));
    }
}
