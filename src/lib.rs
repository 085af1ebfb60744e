//! ESS Registry: the central store for experiment control scripts.
//!
//! Lab rigs pull scripts from the registry, edit them locally or remotely,
//! and push changes back. The registry gives git-like safety without a
//! version-control system: every save is checksum-guarded, every accepted
//! write lands in an append-only history, and rigs sync incrementally by
//! exchanging checksums.
//!
//! # Architecture
//!
//! ## The Thin Waist
//!
//! All state lives in one SQLite file and every access goes through
//! `DbBroker`: reads on their own connection, mutations inside one
//! `BEGIN IMMEDIATE` transaction each, optionally audited to
//! `broker.events.jsonl`.
//!
//! ## Components
//!
//! - Content store: systems, scripts, history, locks, libraries
//! - Sandboxes: fork, promote, sync, delete, list versions
//! - Scaffolding: clone protocols and systems, instantiate templates
//! - Manifests: checksum-only descriptors and one-round sync
//!
//! # Examples
//!
//! ```bash
//! ess-registry scaffold system lab match_to_sample --protocol colormatch --by dave
//! ess-registry sandbox create lab match_to_sample dave-dev --by dave
//! ess-registry sync lab match_to_sample --version dave-dev --checksums local.json
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: storage, configuration, errors and shared helpers
//! - [`registry`]: the registry operations
//! - [`cli`]: command-line definitions

pub mod cli;
pub mod core;
pub mod registry;

use crate::cli::{
    Cli, Command, LibCommand, LockCommand, ManifestCommand, OutputFormat, SandboxCommand,
    ScaffoldCommand, ScriptCommand, SystemCommand,
};
use crate::core::config::RegistryConfig;
use crate::core::error::{RegistryError, Result, short_checksum};
use crate::core::store::Store;
use crate::registry::model::{LibWrite, Lock, ScriptWrite, System};
use crate::registry::scaffold::{ScaffoldProtocolRequest, ScaffoldResult, ScaffoldSystemRequest};
use crate::registry::sandbox::CopyReport;
use crate::registry::{libs, locks, manifest, sandbox, scaffold, scripts, systems};
use colored::Colorize;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::Path;

/// Resolve configuration for a CLI invocation: config file, then
/// environment, then `--db`.
pub fn resolve_config(cli: &Cli) -> Result<RegistryConfig> {
    let mut config = RegistryConfig::load(cli.config.as_deref())?;
    if let Some(db) = &cli.db {
        config.db_path = db.clone();
    }
    Ok(config)
}

fn read_input(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        Ok(fs::read_to_string(path)?)
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_system(system: &System) {
    println!(
        "{} {}/{}@{}",
        format!("#{}", system.id).bright_black(),
        system.workgroup,
        system.name.bold(),
        system.version.bright_cyan()
    );
    if !system.description.is_empty() {
        println!("  {}", system.description);
    }
    if let Some(from) = &system.forked_from {
        println!("  forked from {}", from.to_string().bright_yellow());
    }
    println!(
        "  {} scripts, protocols: {}",
        system.script_count,
        if system.protocols.is_empty() {
            "-".to_string()
        } else {
            system.protocols.join(", ")
        }
    );
}

fn print_lock(lock: &Lock) {
    println!(
        "{} held by {} (expires {})",
        lock.key.bold(),
        lock.locked_by.bright_cyan(),
        lock.expires_at
    );
}

fn print_report(verb: &str, report: &CopyReport) {
    println!(
        "{} {} {} -> {}: {} created, {} updated, {} unchanged",
        "✓".bright_green(),
        verb,
        report.from_version,
        report.to_version,
        report.created,
        report.updated,
        report.unchanged
    );
}

fn print_scaffold(result: &ScaffoldResult) {
    println!(
        "{} {}/{} ({} scripts from {})",
        "✓".bright_green(),
        result.system.workgroup,
        result.system.name.bold(),
        result.scripts_created,
        result.forked_from.to_string().bright_yellow()
    );
}

/// Execute one parsed command against an open store.
pub fn dispatch(store: &Store, cli: Cli) -> Result<()> {
    let format = cli.format;
    match cli.command {
        Command::System { command } => run_system_cli(store, format, command),
        Command::Script { command } => run_script_cli(store, format, command),
        Command::Lock { command } => run_lock_cli(store, format, command),
        Command::Lib { command } => run_lib_cli(store, format, command),
        Command::Sandbox { command } => run_sandbox_cli(store, format, command),
        Command::Scaffold { command } => run_scaffold_cli(store, format, command),
        Command::Manifest { command } => run_manifest_cli(store, format, command),
        Command::Sync {
            workgroup,
            system,
            version,
            checksums,
        } => {
            let client: HashMap<String, String> = serde_json::from_str(&read_input(&checksums)?)?;
            let response = manifest::sync_scripts(store, &workgroup, &system, &version, &client)?;
            match format {
                OutputFormat::Json => print_json(&response)?,
                OutputFormat::Text => {
                    for script in &response.stale {
                        println!(
                            "{} {} {}",
                            "stale".bright_yellow(),
                            script.key(),
                            short_checksum(&script.checksum)
                        );
                    }
                    for key in &response.extra {
                        println!("{} {}", "extra".bright_red(), key);
                    }
                    println!("{} unchanged", response.unchanged);
                }
            }
            Ok(())
        }
    }
}

fn run_system_cli(store: &Store, format: OutputFormat, command: SystemCommand) -> Result<()> {
    match command {
        SystemCommand::Get {
            workgroup,
            name,
            version,
        } => {
            let system = systems::get_system(store, &workgroup, &name, &version)?
                .ok_or_else(|| RegistryError::NotFound(format!("system {}/{}@{}", workgroup, name, version)))?;
            match format {
                OutputFormat::Json => print_json(&system)?,
                OutputFormat::Text => print_system(&system),
            }
        }
        SystemCommand::List { workgroup } => {
            let list = systems::list_systems(store, &workgroup)?;
            match format {
                OutputFormat::Json => print_json(&list)?,
                OutputFormat::Text => list.iter().for_each(print_system),
            }
        }
        SystemCommand::Create {
            workgroup,
            name,
            version,
            description,
            by,
        } => {
            let system = systems::create_system(store, &workgroup, &name, &version, &description, &by)?;
            match format {
                OutputFormat::Json => print_json(&system)?,
                OutputFormat::Text => print_system(&system),
            }
        }
    }
    Ok(())
}

fn run_script_cli(store: &Store, format: OutputFormat, command: ScriptCommand) -> Result<()> {
    match command {
        ScriptCommand::Get {
            system_id,
            script_type,
            protocol,
        } => {
            let script = scripts::get_script(store, system_id, &protocol, script_type.parse()?)?
                .ok_or_else(|| {
                    RegistryError::NotFound(format!(
                        "script {}/{} in system #{}",
                        protocol, script_type, system_id
                    ))
                })?;
            match format {
                OutputFormat::Json => print_json(&script)?,
                OutputFormat::Text => print!("{}", script.content),
            }
        }
        ScriptCommand::Show { script_id } => {
            let script = scripts::get_script_by_id(store, script_id)?
                .ok_or_else(|| RegistryError::NotFound(format!("script #{}", script_id)))?;
            match format {
                OutputFormat::Json => print_json(&script)?,
                OutputFormat::Text => print!("{}", script.content),
            }
        }
        ScriptCommand::List { system_id } => {
            let list = scripts::get_scripts(store, system_id)?;
            match format {
                OutputFormat::Json => print_json(&list)?,
                OutputFormat::Text => {
                    for s in &list {
                        println!(
                            "{} {:<24} {} {}",
                            format!("#{}", s.id).bright_black(),
                            s.key().to_string(),
                            short_checksum(&s.checksum),
                            s.filename
                        );
                    }
                }
            }
        }
        ScriptCommand::Save {
            system_id,
            script_type,
            protocol,
            filename,
            file,
            expected,
            comment,
            by,
        } => {
            let write = ScriptWrite {
                system_id,
                protocol,
                script_type: script_type.parse()?,
                filename,
                content: read_input(&file)?,
                updated_by: by,
            };
            let script = scripts::save_script(store, &write, &expected, &comment)?;
            match format {
                OutputFormat::Json => print_json(&script)?,
                OutputFormat::Text => println!(
                    "{} saved {} checksum {}",
                    "✓".bright_green(),
                    script.key(),
                    script.checksum
                ),
            }
        }
        ScriptCommand::History { script_id, limit } => {
            let history = scripts::get_script_history(store, script_id, limit)?;
            match format {
                OutputFormat::Json => print_json(&history)?,
                OutputFormat::Text => {
                    for h in &history {
                        println!(
                            "{} {} {} {} {}",
                            format!("#{}", h.id).bright_black(),
                            h.saved_at,
                            short_checksum(&h.checksum),
                            h.saved_by.bright_cyan(),
                            h.comment
                        );
                    }
                }
            }
        }
        ScriptCommand::Rollback {
            script_id,
            history_id,
            expected,
            by,
        } => {
            let script = scripts::rollback_script(store, script_id, history_id, &expected, &by)?;
            match format {
                OutputFormat::Json => print_json(&script)?,
                OutputFormat::Text => println!(
                    "{} rolled back {} to #{} checksum {}",
                    "✓".bright_green(),
                    script.key(),
                    history_id,
                    script.checksum
                ),
            }
        }
    }
    Ok(())
}

fn run_lock_cli(store: &Store, format: OutputFormat, command: LockCommand) -> Result<()> {
    match command {
        LockCommand::Acquire { key, by } => {
            let lock = locks::acquire_lock(store, &key, &by)?;
            match format {
                OutputFormat::Json => print_json(&lock)?,
                OutputFormat::Text => print_lock(&lock),
            }
        }
        LockCommand::Release { key, by } => {
            locks::release_lock(store, &key, &by)?;
            match format {
                OutputFormat::Json => print_json(&serde_json::json!({ "released": key }))?,
                OutputFormat::Text => println!("{} released {}", "✓".bright_green(), key),
            }
        }
        LockCommand::Get { key } => {
            let lock = locks::get_lock(store, &key)?;
            match format {
                OutputFormat::Json => print_json(&lock)?,
                OutputFormat::Text => match &lock {
                    Some(lock) => print_lock(lock),
                    None => println!("{} is not locked", key),
                },
            }
        }
        LockCommand::List => {
            let list = locks::list_locks(store)?;
            match format {
                OutputFormat::Json => print_json(&list)?,
                OutputFormat::Text => list.iter().for_each(print_lock),
            }
        }
        LockCommand::Purge => {
            let purged = locks::purge_expired_locks(store)?;
            match format {
                OutputFormat::Json => print_json(&serde_json::json!({ "purged": purged }))?,
                OutputFormat::Text => println!("{} expired locks purged", purged),
            }
        }
    }
    Ok(())
}

fn run_lib_cli(store: &Store, format: OutputFormat, command: LibCommand) -> Result<()> {
    match command {
        LibCommand::List { workgroup } => {
            let list = libs::list_libs(store, &workgroup)?;
            match format {
                OutputFormat::Json => print_json(&list)?,
                OutputFormat::Text => {
                    for lib in &list {
                        println!(
                            "{}@{} {} {}",
                            lib.name.bold(),
                            lib.version,
                            short_checksum(&lib.checksum),
                            lib.filename
                        );
                    }
                }
            }
        }
        LibCommand::Get {
            workgroup,
            name,
            version,
        } => {
            let lib = libs::get_lib(store, &workgroup, &name, &version)?
                .ok_or_else(|| RegistryError::NotFound(format!("library {}/{}@{}", workgroup, name, version)))?;
            match format {
                OutputFormat::Json => print_json(&lib)?,
                OutputFormat::Text => print!("{}", lib.content),
            }
        }
        LibCommand::Save {
            workgroup,
            name,
            version,
            filename,
            file,
            expected,
        } => {
            let write = LibWrite {
                workgroup,
                name,
                version,
                filename,
                content: read_input(&file)?,
            };
            let lib = libs::save_lib(store, &write, &expected)?;
            match format {
                OutputFormat::Json => print_json(&lib)?,
                OutputFormat::Text => println!(
                    "{} saved {}@{} checksum {}",
                    "✓".bright_green(),
                    lib.name,
                    lib.version,
                    lib.checksum
                ),
            }
        }
    }
    Ok(())
}

fn run_sandbox_cli(store: &Store, format: OutputFormat, command: SandboxCommand) -> Result<()> {
    match command {
        SandboxCommand::Create {
            workgroup,
            system,
            label,
            base,
            comment,
            by,
        } => {
            let created = sandbox::create_sandbox(
                store,
                &workgroup,
                &system,
                &base,
                &label,
                &by,
                comment.as_deref(),
            )?;
            match format {
                OutputFormat::Json => print_json(&created)?,
                OutputFormat::Text => print_system(&created),
            }
        }
        SandboxCommand::Promote {
            workgroup,
            system,
            label,
            target,
            by,
        } => {
            let report =
                sandbox::promote_sandbox(store, &workgroup, &system, &label, target.as_deref(), &by)?;
            match format {
                OutputFormat::Json => print_json(&report)?,
                OutputFormat::Text => print_report("promoted", &report),
            }
        }
        SandboxCommand::Sync {
            workgroup,
            system,
            label,
            by,
        } => {
            let report = sandbox::sync_sandbox(store, &workgroup, &system, &label, &by)?;
            match format {
                OutputFormat::Json => print_json(&report)?,
                OutputFormat::Text => print_report("synced", &report),
            }
        }
        SandboxCommand::Delete {
            workgroup,
            system,
            label,
            by,
        } => {
            sandbox::delete_sandbox(store, &workgroup, &system, &label, &by)?;
            match format {
                OutputFormat::Json => print_json(&serde_json::json!({ "deleted": label }))?,
                OutputFormat::Text => println!("{} deleted {}", "✓".bright_green(), label),
            }
        }
        SandboxCommand::Versions { workgroup, system } => {
            let versions = sandbox::list_versions(store, &workgroup, &system)?;
            match format {
                OutputFormat::Json => print_json(&versions)?,
                OutputFormat::Text => {
                    for v in &versions {
                        let label = if v.is_main {
                            v.version.bright_green().bold()
                        } else {
                            v.version.bright_cyan()
                        };
                        println!(
                            "{:<20} {} scripts, updated {} by {}  {}",
                            label, v.script_count, v.updated_at, v.updated_by, v.description
                        );
                    }
                }
            }
        }
    }
    Ok(())
}

fn run_scaffold_cli(store: &Store, format: OutputFormat, command: ScaffoldCommand) -> Result<()> {
    let result = match command {
        ScaffoldCommand::Protocol {
            workgroup,
            system,
            protocol,
            from_protocol,
            from_system,
            version,
            description,
            by,
        } => scaffold::scaffold_protocol(
            store,
            &ScaffoldProtocolRequest {
                workgroup,
                system,
                version,
                protocol,
                from_protocol,
                from_system,
                description,
                created_by: by,
            },
        )?,
        ScaffoldCommand::System {
            workgroup,
            system,
            from_system,
            from_workgroup,
            from_version,
            template,
            protocol,
            description,
            by,
        } => scaffold::scaffold_system(
            store,
            &ScaffoldSystemRequest {
                workgroup,
                system,
                from_system,
                from_workgroup,
                from_version,
                template,
                protocol,
                description,
                created_by: by,
            },
        )?,
        ScaffoldCommand::Add {
            template,
            workgroup,
            version,
            by,
        } => {
            let system = scaffold::add_to_workgroup(store, &template, &version, &workgroup, &by)?;
            match format {
                OutputFormat::Json => print_json(&system)?,
                OutputFormat::Text => print_system(&system),
            }
            return Ok(());
        }
    };

    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Text => print_scaffold(&result),
    }
    Ok(())
}

fn run_manifest_cli(store: &Store, format: OutputFormat, command: ManifestCommand) -> Result<()> {
    match command {
        ManifestCommand::System {
            workgroup,
            system,
            version,
        } => {
            let m = manifest::manifest(store, &workgroup, &system, &version)?;
            match format {
                OutputFormat::Json => print_json(&m)?,
                OutputFormat::Text => {
                    print_system(&m.system);
                    for e in &m.scripts {
                        println!("  {:<24} {} {}", e.key, short_checksum(&e.checksum), e.filename);
                    }
                }
            }
        }
        ManifestCommand::Workgroup { workgroup, version } => {
            let m = manifest::workgroup_manifest(store, &workgroup, &version)?;
            match format {
                OutputFormat::Json => print_json(&m)?,
                OutputFormat::Text => {
                    for s in &m.systems {
                        println!("{} ({} scripts)", s.system.name.bold(), s.scripts.len());
                    }
                    println!("{} libraries", m.libs.len());
                }
            }
        }
        ManifestCommand::Libs { workgroup } => {
            let entries = manifest::libs_manifest(store, &workgroup)?;
            match format {
                OutputFormat::Json => print_json(&entries)?,
                OutputFormat::Text => {
                    for e in &entries {
                        println!("{}@{} {}", e.name, e.version, short_checksum(&e.checksum));
                    }
                }
            }
        }
        ManifestCommand::Compare {
            workgroup,
            system,
            version,
            base,
        } => {
            let cmp = manifest::compare_versions(store, &workgroup, &system, &version, &base)?;
            match format {
                OutputFormat::Json => print_json(&cmp)?,
                OutputFormat::Text => {
                    use crate::registry::manifest::DiffStatus;
                    for d in &cmp.diffs {
                        let status = match d.status {
                            DiffStatus::Added => "added".bright_green(),
                            DiffStatus::Modified => "modified".bright_yellow(),
                            DiffStatus::Same => "same".normal(),
                            DiffStatus::Deleted => "deleted".bright_red(),
                        };
                        println!("{:<10} {}", status, d.key);
                    }
                    println!(
                        "{} added, {} modified, {} same, {} deleted",
                        cmp.summary.added, cmp.summary.modified, cmp.summary.same, cmp.summary.deleted
                    );
                }
            }
        }
    }
    Ok(())
}
