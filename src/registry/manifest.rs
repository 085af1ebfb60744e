//! Checksum manifests and incremental sync. Everything here is read-only.

use crate::core::error::Result;
use crate::core::store::Store;
use crate::registry::libs;
use crate::registry::model::{Script, ScriptType, System};
use crate::registry::scripts;
use crate::registry::systems;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Content-free descriptor of one script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub key: String,
    pub protocol: String,
    #[serde(rename = "type")]
    pub script_type: ScriptType,
    pub filename: String,
    pub checksum: String,
    pub updated_at: i64,
}

impl ManifestEntry {
    fn from_script(script: &Script) -> Self {
        Self {
            key: script.key().to_string(),
            protocol: script.protocol.clone(),
            script_type: script.script_type,
            filename: script.filename.clone(),
            checksum: script.checksum.clone(),
            updated_at: script.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub system: System,
    pub scripts: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibManifestEntry {
    pub name: String,
    pub version: String,
    pub filename: String,
    pub checksum: String,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkgroupManifest {
    pub workgroup: String,
    pub version: String,
    pub systems: Vec<Manifest>,
    pub libs: Vec<LibManifestEntry>,
}

/// Answer to a client's checksum set: what to download, what the server
/// no longer has, and how much already matched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    pub stale: Vec<Script>,
    pub extra: Vec<String>,
    pub unchanged: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffStatus {
    Added,
    Modified,
    Same,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyDiff {
    pub key: String,
    pub status: DiffStatus,
    pub checksum: Option<String>,
    pub base_checksum: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub added: usize,
    pub modified: usize,
    pub same: usize,
    pub deleted: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionComparison {
    pub version: String,
    pub base: String,
    pub diffs: Vec<KeyDiff>,
    pub summary: DiffSummary,
}

/// Diff a client's `key -> checksum` map against server scripts.
///
/// Checksum mismatches are data, not errors: a missing or different
/// checksum puts the script in `stale`, an equal one counts as unchanged,
/// and client keys the server does not produce are reported as `extra`.
pub fn diff_against_client(
    server: Vec<Script>,
    client: &HashMap<String, String>,
) -> SyncResponse {
    let mut response = SyncResponse::default();
    let mut seen: HashSet<String> = HashSet::with_capacity(server.len());

    for script in server {
        let key = script.key().to_string();
        if client.get(&key) == Some(&script.checksum) {
            response.unchanged += 1;
        } else {
            response.stale.push(script);
        }
        seen.insert(key);
    }

    let mut extra: Vec<String> = client
        .keys()
        .filter(|k| !seen.contains(*k))
        .cloned()
        .collect();
    extra.sort();
    response.extra = extra;
    response
}

/// Manifest of one system version, ordered by `(protocol, type)`.
pub fn manifest(store: &Store, workgroup: &str, system: &str, version: &str) -> Result<Manifest> {
    store.broker().with_conn(|conn| {
        let sys = systems::require_system(conn, workgroup, system, version)?;
        let scripts = scripts::scripts_for_system(conn, sys.id)?
            .iter()
            .map(ManifestEntry::from_script)
            .collect();
        Ok(Manifest {
            system: sys,
            scripts,
        })
    })
}

/// One-round incremental sync of a system version against the client's
/// checksums.
pub fn sync_scripts(
    store: &Store,
    workgroup: &str,
    system: &str,
    version: &str,
    client_checksums: &HashMap<String, String>,
) -> Result<SyncResponse> {
    let server = store.broker().with_conn(|conn| {
        let sys = systems::require_system(conn, workgroup, system, version)?;
        scripts::scripts_for_system(conn, sys.id)
    })?;
    let response = diff_against_client(server, client_checksums);

    tracing::debug!(
        workgroup,
        system,
        version,
        stale = response.stale.len(),
        extra = response.extra.len(),
        unchanged = response.unchanged,
        "sync computed"
    );
    Ok(response)
}

pub fn libs_manifest(store: &Store, workgroup: &str) -> Result<Vec<LibManifestEntry>> {
    store.broker().with_conn(|conn| {
        Ok(libs::libs_in_workgroup(conn, workgroup)?
            .into_iter()
            .map(|lib| LibManifestEntry {
                name: lib.name,
                version: lib.version,
                filename: lib.filename,
                checksum: lib.checksum,
                updated_at: lib.updated_at,
            })
            .collect())
    })
}

/// Manifests of every system in a workgroup that has `version`, plus the
/// workgroup's libraries. Systems without that version are skipped.
pub fn workgroup_manifest(store: &Store, workgroup: &str, version: &str) -> Result<WorkgroupManifest> {
    let version = if version.is_empty() { "main" } else { version };
    let systems = store.broker().with_conn(|conn| {
        let mut manifests = Vec::new();
        for sys in systems::list_in_workgroup(conn, workgroup)? {
            if sys.version != version {
                continue;
            }
            let scripts = scripts::scripts_for_system(conn, sys.id)?
                .iter()
                .map(ManifestEntry::from_script)
                .collect();
            manifests.push(Manifest {
                system: sys,
                scripts,
            });
        }
        Ok(manifests)
    })?;

    Ok(WorkgroupManifest {
        workgroup: workgroup.to_string(),
        version: version.to_string(),
        systems,
        libs: libs_manifest(store, workgroup)?,
    })
}

/// Per-key status of `version` relative to `base`, by checksum only.
pub fn compare_versions(
    store: &Store,
    workgroup: &str,
    system: &str,
    version: &str,
    base: &str,
) -> Result<VersionComparison> {
    let (ours, theirs) = store.broker().with_conn(|conn| {
        let ours = systems::require_system(conn, workgroup, system, version)?;
        let theirs = systems::require_system(conn, workgroup, system, base)?;
        Ok((
            scripts::scripts_for_system(conn, ours.id)?,
            scripts::scripts_for_system(conn, theirs.id)?,
        ))
    })?;

    let checksums = |scripts: Vec<Script>| -> BTreeMap<String, String> {
        scripts
            .into_iter()
            .map(|s| (s.key().to_string(), s.checksum))
            .collect()
    };
    let ours = checksums(ours);
    let theirs = checksums(theirs);

    let mut keys: Vec<&String> = ours.keys().chain(theirs.keys()).collect();
    keys.sort();
    keys.dedup();

    let mut summary = DiffSummary::default();
    let diffs = keys
        .into_iter()
        .map(|key| {
            let checksum = ours.get(key).cloned();
            let base_checksum = theirs.get(key).cloned();
            let status = match (&checksum, &base_checksum) {
                (Some(a), Some(b)) if a == b => DiffStatus::Same,
                (Some(_), Some(_)) => DiffStatus::Modified,
                (Some(_), None) => DiffStatus::Added,
                _ => DiffStatus::Deleted,
            };
            match status {
                DiffStatus::Added => summary.added += 1,
                DiffStatus::Modified => summary.modified += 1,
                DiffStatus::Same => summary.same += 1,
                DiffStatus::Deleted => summary.deleted += 1,
            }
            KeyDiff {
                key: key.clone(),
                status,
                checksum,
                base_checksum,
            }
        })
        .collect();

    Ok(VersionComparison {
        version: version.to_string(),
        base: base.to_string(),
        diffs,
        summary,
    })
}
