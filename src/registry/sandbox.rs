//! Sandbox lifecycle: create, promote, sync, delete and version listing.
//!
//! A sandbox is any non-`main` version of a system. Promote and sync copy
//! scripts key by key (`protocol/type`) in opposite directions. Both are
//! whole-file overwrites: keys present only in the destination are left
//! alone, keys with equal checksums are not rewritten.

use crate::core::error::{Conflict, RegistryError, Result};
use crate::core::names;
use crate::core::store::Store;
use crate::core::time;
use crate::registry::model::{MAIN_VERSION, Provenance, System};
use crate::registry::scripts::{self, StoredWrite};
use crate::registry::systems::{self, NewSystem};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};

/// One row of a version listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub version: String,
    pub description: String,
    pub updated_at: i64,
    pub updated_by: String,
    pub script_count: usize,
    pub is_main: bool,
}

/// Outcome of a promote or sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyReport {
    pub from_version: String,
    pub to_version: String,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
}

/// The version a sandbox was forked from within its own system, else `main`.
fn base_version_of(system: &System) -> String {
    match &system.forked_from {
        Some(Provenance::Versioned {
            workgroup,
            name,
            version,
        }) if *workgroup == system.workgroup && *name == system.name => version.clone(),
        _ => MAIN_VERSION.to_string(),
    }
}

/// Copy every script of `from` into `to`, key by key.
fn copy_scripts(
    conn: &Connection,
    from: &System,
    to: &System,
    by: &str,
    comment: &str,
    forked_from: Option<&Provenance>,
    now: i64,
) -> Result<CopyReport> {
    let mut report = CopyReport {
        from_version: from.version.clone(),
        to_version: to.version.clone(),
        ..CopyReport::default()
    };

    for src in scripts::scripts_for_system(conn, from.id)? {
        let existing = scripts::find_script(conn, to.id, &src.protocol, src.script_type)?;
        match &existing {
            Some(dst) if dst.checksum == src.checksum => {
                report.unchanged += 1;
                continue;
            }
            Some(_) => report.updated += 1,
            None => report.created += 1,
        }
        scripts::write_script(
            conn,
            to,
            &StoredWrite {
                protocol: &src.protocol,
                script_type: src.script_type,
                filename: &src.filename,
                content: &src.content,
                updated_by: by,
                forked_from,
                comment,
            },
            now,
        )?;
    }
    Ok(report)
}

/// A sandbox label names one concrete non-`main` version; the `latest`
/// aliases are rejected so lookups cannot land on `main`.
fn require_non_main(version: &str, action: &str) -> Result<()> {
    if version == MAIN_VERSION {
        return Err(RegistryError::InvalidInput(format!(
            "cannot {} '{}': it is not a sandbox",
            action, MAIN_VERSION
        )));
    }
    systems::validate_version_label(version)
}

/// Resolve a sandbox row, refusing anything that resolved to `main`.
fn require_sandbox(
    conn: &Connection,
    workgroup: &str,
    system: &str,
    label: &str,
    action: &str,
) -> Result<System> {
    let sandbox = systems::require_system(conn, workgroup, system, label)?;
    if sandbox.is_main() {
        return Err(RegistryError::InvalidInput(format!(
            "cannot {} '{}': it is not a sandbox",
            action, MAIN_VERSION
        )));
    }
    Ok(sandbox)
}

/// Fork `base` (default `main`) of a system into a new version `label`,
/// copying every script.
pub fn create_sandbox(
    store: &Store,
    workgroup: &str,
    system: &str,
    base: &str,
    label: &str,
    created_by: &str,
    comment: Option<&str>,
) -> Result<System> {
    let base = if base.is_empty() { MAIN_VERSION } else { base };
    names::validate_name("workgroup", workgroup)?;
    names::validate_name("system", system)?;
    systems::validate_version_label(label)?;
    names::require("createdBy", created_by)?;
    if label == base {
        return Err(RegistryError::InvalidInput(format!(
            "sandbox label '{}' must differ from its base",
            label
        )));
    }

    let description = match comment.map(str::trim).filter(|c| !c.is_empty()) {
        Some(c) => format!("Sandbox: {}", c),
        None => format!("Sandbox from {}", base),
    };

    let sandbox = store
        .broker()
        .with_tx(created_by, "sandbox.create", |conn| {
            let base_sys = systems::require_system(conn, workgroup, system, base)?;
            let provenance = Provenance::versioned(workgroup, system, &base_sys.version);
            let now = time::now_epoch();

            let sandbox = systems::insert_system(
                conn,
                &NewSystem {
                    workgroup,
                    name: system,
                    version: label,
                    description: &description,
                    author: created_by,
                    forked_from: Some(&provenance),
                },
                now,
            )?;
            copy_scripts(
                conn,
                &base_sys,
                &sandbox,
                created_by,
                &format!("sandbox from {}", base_sys.version),
                Some(&provenance),
                now,
            )?;
            systems::require_system(conn, workgroup, system, label)
        })?;

    tracing::info!(
        workgroup,
        system,
        base,
        label,
        scripts = sandbox.script_count,
        "sandbox created"
    );
    Ok(sandbox)
}

/// Overwrite the sandbox's base with the sandbox's scripts.
///
/// The target is `target` when given, else the version recorded in the
/// sandbox's `forked_from` (falling back to `main`). A target that does
/// not exist yet is created.
pub fn promote_sandbox(
    store: &Store,
    workgroup: &str,
    system: &str,
    label: &str,
    target: Option<&str>,
    promoted_by: &str,
) -> Result<CopyReport> {
    names::require("promotedBy", promoted_by)?;
    require_non_main(label, "promote")?;
    if let Some(t) = target {
        systems::validate_version_label(t)?;
    }

    let report = store
        .broker()
        .with_tx(promoted_by, "sandbox.promote", |conn| {
            let sandbox = require_sandbox(conn, workgroup, system, label, "promote")?;
            let target_version = target
                .map(str::to_string)
                .unwrap_or_else(|| base_version_of(&sandbox));
            if target_version == label {
                return Err(RegistryError::InvalidInput(format!(
                    "cannot promote '{}' onto itself",
                    label
                )));
            }
            let now = time::now_epoch();

            let dest = match systems::find_system(conn, workgroup, system, &target_version)? {
                Some(dest) => dest,
                None => systems::insert_system(
                    conn,
                    &NewSystem {
                        workgroup,
                        name: system,
                        version: &target_version,
                        description: &sandbox.description,
                        author: promoted_by,
                        forked_from: None,
                    },
                    now,
                )?,
            };

            copy_scripts(
                conn,
                &sandbox,
                &dest,
                promoted_by,
                &format!("promoted from {}", label),
                None,
                now,
            )
        })?;

    tracing::info!(
        workgroup,
        system,
        from = %report.from_version,
        to = %report.to_version,
        created = report.created,
        updated = report.updated,
        unchanged = report.unchanged,
        "sandbox promoted"
    );
    Ok(report)
}

/// Pull the base's current scripts into the sandbox.
pub fn sync_sandbox(
    store: &Store,
    workgroup: &str,
    system: &str,
    label: &str,
    synced_by: &str,
) -> Result<CopyReport> {
    names::require("syncedBy", synced_by)?;
    require_non_main(label, "sync")?;

    let report = store
        .broker()
        .with_tx(synced_by, "sandbox.sync", |conn| {
            let sandbox = require_sandbox(conn, workgroup, system, label, "sync")?;
            let base = systems::require_system(conn, workgroup, system, &base_version_of(&sandbox))?;
            copy_scripts(
                conn,
                &base,
                &sandbox,
                synced_by,
                &format!("synced from {}", base.version),
                None,
                time::now_epoch(),
            )
        })?;

    tracing::info!(
        workgroup,
        system,
        from = %report.from_version,
        to = %report.to_version,
        created = report.created,
        updated = report.updated,
        unchanged = report.unchanged,
        "sandbox synced"
    );
    Ok(report)
}

/// Delete a sandbox and its scripts. `main` is protected.
pub fn delete_sandbox(
    store: &Store,
    workgroup: &str,
    system: &str,
    label: &str,
    deleted_by: &str,
) -> Result<()> {
    names::require("deletedBy", deleted_by)?;
    if label == MAIN_VERSION {
        return Err(RegistryError::Conflict(Conflict::ProtectedVersion(
            MAIN_VERSION.to_string(),
        )));
    }
    systems::validate_version_label(label)?;

    store
        .broker()
        .with_tx(deleted_by, "sandbox.delete", |conn| {
            let sandbox = systems::require_system(conn, workgroup, system, label)?;
            if sandbox.is_main() {
                return Err(RegistryError::Conflict(Conflict::ProtectedVersion(
                    MAIN_VERSION.to_string(),
                )));
            }
            conn.execute("DELETE FROM ess_systems WHERE id = ?1", params![sandbox.id])?;
            Ok(())
        })?;

    tracing::info!(workgroup, system, label, "sandbox deleted");
    Ok(())
}

/// All versions of a system: `main` first, then in creation order.
pub fn list_versions(store: &Store, workgroup: &str, system: &str) -> Result<Vec<VersionInfo>> {
    let versions = store.broker().with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT s.version, s.description, s.updated_at, s.updated_by,
                    (SELECT COUNT(*) FROM ess_scripts WHERE system_id = s.id)
             FROM ess_systems s
             WHERE s.workgroup = ?1 AND s.name = ?2
             ORDER BY (s.version = 'main') DESC, s.created_at, s.id",
        )?;
        let rows = stmt.query_map(params![workgroup, system], |row| {
            let version: String = row.get(0)?;
            let count: i64 = row.get(4)?;
            Ok(VersionInfo {
                is_main: version == MAIN_VERSION,
                version,
                description: row.get(1)?,
                updated_at: row.get(2)?,
                updated_by: row.get(3)?,
                script_count: count as usize,
            })
        })?;
        let mut versions = Vec::new();
        for r in rows {
            versions.push(r?);
        }
        Ok(versions)
    })?;

    if versions.is_empty() {
        return Err(RegistryError::NotFound(format!(
            "system {}/{}",
            workgroup, system
        )));
    }
    Ok(versions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sys(workgroup: &str, name: &str, version: &str, forked_from: Option<Provenance>) -> System {
        System {
            id: 1,
            workgroup: workgroup.into(),
            name: name.into(),
            version: version.into(),
            description: String::new(),
            author: String::new(),
            forked_from,
            forked_at: None,
            created_at: 0,
            updated_at: 0,
            updated_by: String::new(),
            protocols: Vec::new(),
            script_count: 0,
        }
    }

    #[test]
    fn base_version_follows_own_provenance_only() {
        let own = sys("lab", "mts", "dev2", Some(Provenance::versioned("lab", "mts", "dev")));
        assert_eq!(base_version_of(&own), "dev");

        let foreign = sys("lab", "mts", "dev", Some(Provenance::versioned("_templates", "mts", "v1")));
        assert_eq!(base_version_of(&foreign), "main");

        assert_eq!(base_version_of(&sys("lab", "mts", "dev", None)), "main");
        assert_eq!(
            base_version_of(&sys("lab", "mts", "dev", Some(Provenance::Skeleton))),
            "main"
        );
    }

    #[test]
    fn main_is_not_a_sandbox() {
        assert!(require_non_main("main", "sync").is_err());
        assert!(require_non_main("dave-dev", "sync").is_ok());
    }

    #[test]
    fn latest_aliases_are_not_sandbox_labels() {
        for alias in ["", "latest"] {
            assert!(matches!(
                require_non_main(alias, "promote"),
                Err(RegistryError::InvalidInput(_))
            ));
        }
    }
}
