//! Scaffolding: new protocols and systems from clones, templates or
//! skeletons, and copying template systems into a workgroup.
//!
//! Every copy records where it came from in `forked_from`.

use crate::core::error::{Conflict, RegistryError, Result};
use crate::core::names;
use crate::core::store::Store;
use crate::core::time;
use crate::registry::libs;
use crate::registry::model::{LATEST_VERSION, MAIN_VERSION, Provenance, Script, ScriptType, System};
use crate::registry::scripts::{self, StoredWrite};
use crate::registry::skeleton;
use crate::registry::systems::{self, NewSystem};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

const SCRIPT_FILE_SUFFIXES: [&str; 5] = ["_stim", "_loaders", "_variants", "_extract", "_analyze"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScaffoldProtocolRequest {
    pub workgroup: String,
    pub system: String,
    /// Target version; defaults to `main`.
    pub version: String,
    pub protocol: String,
    pub from_protocol: Option<String>,
    /// Source system in the same workgroup; defaults to the target system.
    pub from_system: Option<String>,
    pub description: String,
    pub created_by: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScaffoldSystemRequest {
    pub workgroup: String,
    pub system: String,
    pub from_system: Option<String>,
    pub from_workgroup: Option<String>,
    pub from_version: Option<String>,
    pub template: Option<String>,
    /// Protocol for a skeleton system (`default` when absent), or the new
    /// name of the single protocol of a cloned one.
    pub protocol: Option<String>,
    pub description: String,
    pub created_by: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaffoldResult {
    pub system: System,
    pub scripts_created: usize,
    pub forked_from: Provenance,
}

/// Rewrite references to `old` as `new` in Tcl content: script filenames,
/// namespace paths, `namespace eval` heads and comment lines. `system`
/// qualifies protocol namespaces (`system::old`) when non-empty.
///
/// Comment lines get a plain substring replacement; code lines only have
/// the structured references rewritten, so unrelated identifiers that
/// merely contain `old` survive.
pub fn rename_in_content(content: &str, old: &str, new: &str, system: &str) -> String {
    if old == new || old.is_empty() {
        return content.to_string();
    }
    content
        .split('\n')
        .map(|line| {
            if line.trim_start().starts_with('#') {
                line.replace(old, new)
            } else {
                rename_references(line, old, new, system)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn rename_references(line: &str, old: &str, new: &str, system: &str) -> String {
    let mut out = line.to_string();

    if !system.is_empty() {
        out = out.replace(&format!("{}::{}", system, old), &format!("{}::{}", system, new));
    }

    for suffix in SCRIPT_FILE_SUFFIXES {
        out = out.replace(
            &format!("{}{}.tcl", old, suffix),
            &format!("{}{}.tcl", new, suffix),
        );
    }
    out = out.replace(&format!("{}.tcl", old), &format!("{}.tcl", new));

    for tail in ["::", " ", "}"] {
        out = out.replace(&format!("::{}{}", old, tail), &format!("::{}{}", new, tail));
    }
    if let Some(stem) = out.strip_suffix(&format!("::{}", old)) {
        out = format!("{}::{}", stem, new);
    }

    for tail in [" ", "::"] {
        out = out.replace(
            &format!("namespace eval {}{}", old, tail),
            &format!("namespace eval {}{}", new, tail),
        );
    }
    out
}

/// Replace the first occurrence of `old` in a filename.
pub fn rename_filename(filename: &str, old: &str, new: &str) -> String {
    if old.is_empty() {
        return filename.to_string();
    }
    filename.replacen(old, new, 1)
}

fn conflict_exists(what: String) -> RegistryError {
    RegistryError::Conflict(Conflict::AlreadyExists(what))
}

/// Add a protocol to an existing system, cloned from `from_protocol` or
/// seeded from the skeleton.
pub fn scaffold_protocol(store: &Store, req: &ScaffoldProtocolRequest) -> Result<ScaffoldResult> {
    let version = if req.version.is_empty() {
        MAIN_VERSION
    } else {
        req.version.as_str()
    };
    names::validate_name("workgroup", &req.workgroup)?;
    names::validate_name("system", &req.system)?;
    names::validate_name("protocol", &req.protocol)?;
    names::require("createdBy", &req.created_by)?;
    if let Some(from) = &req.from_protocol {
        names::validate_name("fromProtocol", from)?;
    }
    if let Some(from) = &req.from_system {
        names::validate_name("fromSystem", from)?;
        if req.from_protocol.is_none() {
            return Err(RegistryError::InvalidInput(
                "fromSystem requires fromProtocol".to_string(),
            ));
        }
    }

    let result = store
        .broker()
        .with_tx(&req.created_by, "scaffold.protocol", |conn| {
            let target = systems::require_system(conn, &req.workgroup, &req.system, version)?;
            if target.protocols.iter().any(|p| *p == req.protocol) {
                return Err(conflict_exists(format!(
                    "protocol {} in {}",
                    req.protocol,
                    target.lock_key()
                )));
            }
            let now = time::now_epoch();

            let (forked_from, count) = match &req.from_protocol {
                Some(from) => {
                    let source = match &req.from_system {
                        Some(name) => systems::require_system(conn, &req.workgroup, name, MAIN_VERSION)?,
                        None => target.clone(),
                    };
                    let sources: Vec<Script> = scripts::scripts_for_system(conn, source.id)?
                        .into_iter()
                        .filter(|s| s.protocol == *from)
                        .collect();
                    if sources.is_empty() {
                        return Err(RegistryError::NotFound(format!(
                            "protocol {} has no scripts in {}",
                            from,
                            source.lock_key()
                        )));
                    }

                    let provenance = Provenance::protocol(&req.workgroup, &source.name, from);
                    for src in &sources {
                        let content = rename_in_content(&src.content, from, &req.protocol, &source.name);
                        let content = if source.name != target.name {
                            rename_in_content(&content, &source.name, &target.name, "")
                        } else {
                            content
                        };
                        scripts::write_script(
                            conn,
                            &target,
                            &StoredWrite {
                                protocol: &req.protocol,
                                script_type: src.script_type,
                                filename: &rename_filename(&src.filename, from, &req.protocol),
                                content: &content,
                                updated_by: &req.created_by,
                                forked_from: Some(&provenance),
                                comment: &format!("scaffolded from {}", provenance),
                            },
                            now,
                        )?;
                    }
                    (provenance, sources.len())
                }
                None => {
                    let seeded = skeleton::protocol_scripts(&req.system, &req.protocol, &req.description);
                    write_seeded(conn, &target, &req.protocol, &seeded, &req.created_by, now)?;
                    (Provenance::Skeleton, seeded.len())
                }
            };

            Ok(ScaffoldResult {
                system: systems::require_system(conn, &req.workgroup, &req.system, version)?,
                scripts_created: count,
                forked_from,
            })
        })?;

    tracing::info!(
        workgroup = %req.workgroup,
        system = %req.system,
        protocol = %req.protocol,
        from = %result.forked_from,
        scripts = result.scripts_created,
        "protocol scaffolded"
    );
    Ok(result)
}

fn write_seeded(
    conn: &Connection,
    target: &System,
    protocol: &str,
    seeded: &[(ScriptType, String, String)],
    by: &str,
    now: i64,
) -> Result<()> {
    for (script_type, filename, content) in seeded {
        scripts::write_script(
            conn,
            target,
            &StoredWrite {
                protocol,
                script_type: *script_type,
                filename,
                content,
                updated_by: by,
                forked_from: Some(&Provenance::Skeleton),
                comment: "scaffolded from skeleton",
            },
            now,
        )?;
    }
    Ok(())
}

/// Where a new system's scripts come from.
enum SystemSource<'a> {
    Clone {
        workgroup: &'a str,
        system: &'a str,
        version: &'a str,
    },
    Template(&'a str),
    Skeleton(&'a str),
}

/// Protocol seeded into a skeleton system when the request names none.
const DEFAULT_SKELETON_PROTOCOL: &str = "default";

fn system_source<'a>(req: &'a ScaffoldSystemRequest) -> Result<SystemSource<'a>> {
    match (&req.from_system, &req.template) {
        (Some(_), Some(_)) => Err(RegistryError::InvalidInput(
            "give either fromSystem or template, not both".to_string(),
        )),
        (Some(from), None) => {
            let workgroup = req.from_workgroup.as_deref().unwrap_or(&req.workgroup);
            names::validate_name("fromWorkgroup", workgroup)?;
            names::validate_name("fromSystem", from)?;
            Ok(SystemSource::Clone {
                workgroup,
                system: from,
                version: req.from_version.as_deref().unwrap_or(MAIN_VERSION),
            })
        }
        (None, Some(template)) => {
            names::validate_name("template", template)?;
            Ok(SystemSource::Template(template))
        }
        (None, None) => {
            let protocol = req.protocol.as_deref().unwrap_or(DEFAULT_SKELETON_PROTOCOL);
            names::validate_name("protocol", protocol)?;
            Ok(SystemSource::Skeleton(protocol))
        }
    }
}

/// Create a new `main` system by cloning, instantiating a template, or
/// from a skeleton with one protocol.
pub fn scaffold_system(store: &Store, req: &ScaffoldSystemRequest) -> Result<ScaffoldResult> {
    names::validate_name("workgroup", &req.workgroup)?;
    names::validate_name("system", &req.system)?;
    names::require("createdBy", &req.created_by)?;
    let source = system_source(req)?;
    let templates = store.templates_workgroup().to_string();

    let result = store
        .broker()
        .with_tx(&req.created_by, "scaffold.system", |conn| {
            if let Some(existing) = systems::find_system(conn, &req.workgroup, &req.system, "")? {
                return Err(conflict_exists(format!(
                    "system {}/{}",
                    existing.workgroup, existing.name
                )));
            }
            let now = time::now_epoch();

            let (workgroup, name, version) = match source {
                SystemSource::Skeleton(protocol) => {
                    let target = systems::insert_system(
                        conn,
                        &NewSystem {
                            workgroup: &req.workgroup,
                            name: &req.system,
                            version: MAIN_VERSION,
                            description: &req.description,
                            author: &req.created_by,
                            forked_from: Some(&Provenance::Skeleton),
                        },
                        now,
                    )?;
                    let system_level = skeleton::system_scripts(&req.system, &req.description);
                    write_seeded(conn, &target, "", &system_level, &req.created_by, now)?;
                    let protocol_level = skeleton::protocol_scripts(&req.system, protocol, "");
                    write_seeded(conn, &target, protocol, &protocol_level, &req.created_by, now)?;

                    return Ok(ScaffoldResult {
                        system: systems::require_system(conn, &req.workgroup, &req.system, MAIN_VERSION)?,
                        scripts_created: system_level.len() + protocol_level.len(),
                        forked_from: Provenance::Skeleton,
                    });
                }
                SystemSource::Clone {
                    workgroup,
                    system,
                    version,
                } => (workgroup, system, version),
                SystemSource::Template(template) => (templates.as_str(), template, LATEST_VERSION),
            };

            let source_sys = systems::require_system(conn, workgroup, name, version)?;
            let sources = scripts::scripts_for_system(conn, source_sys.id)?;
            let rename_protocol = match req.protocol.as_deref() {
                Some(new_protocol) if req.from_system.is_some() => {
                    match source_sys.protocols.as_slice() {
                        [only] => Some((only.clone(), new_protocol)),
                        _ => {
                            return Err(RegistryError::InvalidInput(format!(
                                "protocol rename needs a source with exactly one protocol, {} has {}",
                                source_sys.lock_key(),
                                source_sys.protocols.len()
                            )));
                        }
                    }
                }
                _ => None,
            };
            if let Some((_, new_protocol)) = &rename_protocol {
                names::validate_name("protocol", new_protocol)?;
            }

            let provenance = Provenance::versioned(workgroup, name, &source_sys.version);
            let description = if req.description.is_empty() {
                source_sys.description.as_str()
            } else {
                req.description.as_str()
            };
            let target = systems::insert_system(
                conn,
                &NewSystem {
                    workgroup: &req.workgroup,
                    name: &req.system,
                    version: MAIN_VERSION,
                    description,
                    author: &req.created_by,
                    forked_from: Some(&provenance),
                },
                now,
            )?;

            let comment = format!("scaffolded from {}", provenance);
            for src in &sources {
                let mut content = rename_in_content(&src.content, name, &req.system, "");
                // Protocol-level filenames are named after the protocol.
                let mut filename = if src.protocol.is_empty() {
                    rename_filename(&src.filename, name, &req.system)
                } else {
                    src.filename.clone()
                };
                let mut protocol = src.protocol.clone();
                if let Some((old, new)) = &rename_protocol {
                    if src.protocol == *old {
                        content = rename_in_content(&content, old, new, &req.system);
                        filename = rename_filename(&filename, old, new);
                        protocol = new.to_string();
                    }
                }
                scripts::write_script(
                    conn,
                    &target,
                    &StoredWrite {
                        protocol: &protocol,
                        script_type: src.script_type,
                        filename: &filename,
                        content: &content,
                        updated_by: &req.created_by,
                        forked_from: Some(&provenance),
                        comment: &comment,
                    },
                    now,
                )?;
            }

            Ok(ScaffoldResult {
                system: systems::require_system(conn, &req.workgroup, &req.system, MAIN_VERSION)?,
                scripts_created: sources.len(),
                forked_from: provenance,
            })
        })?;

    tracing::info!(
        workgroup = %req.workgroup,
        system = %req.system,
        from = %result.forked_from,
        scripts = result.scripts_created,
        "system scaffolded"
    );
    Ok(result)
}

/// Copy a template-library system into `target_workgroup` as its `main`,
/// unchanged, along with any template libraries the workgroup lacks.
pub fn add_to_workgroup(
    store: &Store,
    template: &str,
    template_version: &str,
    target_workgroup: &str,
    added_by: &str,
) -> Result<System> {
    let template_version = if template_version.is_empty() {
        MAIN_VERSION
    } else {
        template_version
    };
    names::validate_name("template", template)?;
    names::validate_name("workgroup", target_workgroup)?;
    names::require("addedBy", added_by)?;
    let templates = store.templates_workgroup();
    if target_workgroup == templates {
        return Err(RegistryError::InvalidInput(format!(
            "cannot add into the template workgroup '{}'",
            templates
        )));
    }

    let (system, libs_copied) = store
        .broker()
        .with_tx(added_by, "scaffold.add_to_workgroup", |conn| {
            let source = systems::require_system(conn, templates, template, template_version)?;
            if let Some(existing) = systems::find_system(conn, target_workgroup, template, "")? {
                return Err(conflict_exists(format!(
                    "system {}/{}",
                    existing.workgroup, existing.name
                )));
            }
            let now = time::now_epoch();
            let provenance = Provenance::versioned(templates, template, &source.version);

            let target = systems::insert_system(
                conn,
                &NewSystem {
                    workgroup: target_workgroup,
                    name: template,
                    version: MAIN_VERSION,
                    description: &source.description,
                    author: added_by,
                    forked_from: Some(&provenance),
                },
                now,
            )?;
            let comment = format!("added from {}", provenance);
            for src in scripts::scripts_for_system(conn, source.id)? {
                scripts::write_script(
                    conn,
                    &target,
                    &StoredWrite {
                        protocol: &src.protocol,
                        script_type: src.script_type,
                        filename: &src.filename,
                        content: &src.content,
                        updated_by: added_by,
                        forked_from: Some(&provenance),
                        comment: &comment,
                    },
                    now,
                )?;
            }

            let mut libs_copied = 0;
            for lib in libs::libs_in_workgroup(conn, templates)? {
                if libs::copy_lib_into(conn, &lib, target_workgroup, now)? {
                    libs_copied += 1;
                }
            }

            let system = systems::require_system(conn, target_workgroup, template, MAIN_VERSION)?;
            Ok((system, libs_copied))
        })?;

    tracing::info!(
        template,
        workgroup = target_workgroup,
        scripts = system.script_count,
        libs = libs_copied,
        "template added to workgroup"
    );
    Ok(system)
}
