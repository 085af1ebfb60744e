//! CLI struct definitions for the `ess-registry` command-line interface.
//!
//! All clap-derived types live here. Dispatch logic lives in `lib.rs`.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[clap(
    name = "ess-registry",
    version = env!("CARGO_PKG_VERSION"),
    about = "Central registry for ESS experiment control scripts."
)]
pub struct Cli {
    /// Config file (else $ESS_REGISTRY_CONFIG, else ./ess-registry.toml).
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,
    /// Database path; overrides config and $ESS_REGISTRY_DB.
    #[clap(long, global = true)]
    pub db: Option<PathBuf>,
    #[clap(long, global = true, value_enum, default_value = "text")]
    pub format: OutputFormat,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Systems: lookup, listing, creation.
    System {
        #[clap(subcommand)]
        command: SystemCommand,
    },
    /// Scripts: read, checksum-guarded save, history, rollback.
    Script {
        #[clap(subcommand)]
        command: ScriptCommand,
    },
    /// Advisory edit locks.
    Lock {
        #[clap(subcommand)]
        command: LockCommand,
    },
    /// Shared libraries.
    Lib {
        #[clap(subcommand)]
        command: LibCommand,
    },
    /// Sandbox lifecycle.
    Sandbox {
        #[clap(subcommand)]
        command: SandboxCommand,
    },
    /// Create protocols and systems from clones, templates or skeletons.
    Scaffold {
        #[clap(subcommand)]
        command: ScaffoldCommand,
    },
    /// Checksum manifests and version comparison.
    Manifest {
        #[clap(subcommand)]
        command: ManifestCommand,
    },
    /// Diff a client checksum map (JSON object, key -> checksum) against a system.
    Sync {
        workgroup: String,
        system: String,
        #[clap(long, default_value = "main")]
        version: String,
        /// JSON file with the client's checksums; `-` reads stdin.
        #[clap(long)]
        checksums: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
pub enum SystemCommand {
    Get {
        workgroup: String,
        name: String,
        /// Version label; empty or `latest` means most recently updated.
        #[clap(long, default_value = "latest")]
        version: String,
    },
    List {
        workgroup: String,
    },
    Create {
        workgroup: String,
        name: String,
        #[clap(long, default_value = "main")]
        version: String,
        #[clap(long, default_value = "")]
        description: String,
        #[clap(long)]
        by: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum ScriptCommand {
    Get {
        system_id: i64,
        #[clap(long = "type")]
        script_type: String,
        #[clap(long, default_value = "")]
        protocol: String,
    },
    /// Fetch one script by its row id.
    Show {
        script_id: i64,
    },
    List {
        system_id: i64,
    },
    Save {
        system_id: i64,
        #[clap(long = "type")]
        script_type: String,
        #[clap(long, default_value = "")]
        protocol: String,
        #[clap(long)]
        filename: Option<String>,
        /// File holding the new content; `-` reads stdin.
        #[clap(long)]
        file: PathBuf,
        /// Checksum the caller last read; empty for a blind write.
        #[clap(long, default_value = "")]
        expected: String,
        #[clap(long, default_value = "")]
        comment: String,
        #[clap(long)]
        by: String,
    },
    History {
        script_id: i64,
        /// 0 returns the full history.
        #[clap(long, default_value = "20")]
        limit: u32,
    },
    Rollback {
        script_id: i64,
        history_id: i64,
        #[clap(long, default_value = "")]
        expected: String,
        #[clap(long)]
        by: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum LockCommand {
    Acquire {
        key: String,
        #[clap(long)]
        by: String,
    },
    Release {
        key: String,
        #[clap(long)]
        by: String,
    },
    Get {
        key: String,
    },
    List,
    /// Delete expired locks.
    Purge,
}

#[derive(Subcommand, Debug)]
pub enum LibCommand {
    List {
        workgroup: String,
    },
    Get {
        workgroup: String,
        name: String,
        #[clap(long, default_value = "latest")]
        version: String,
    },
    Save {
        workgroup: String,
        name: String,
        #[clap(long, default_value = "main")]
        version: String,
        #[clap(long)]
        filename: Option<String>,
        #[clap(long)]
        file: PathBuf,
        #[clap(long, default_value = "")]
        expected: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum SandboxCommand {
    Create {
        workgroup: String,
        system: String,
        label: String,
        #[clap(long, default_value = "main")]
        base: String,
        #[clap(long)]
        comment: Option<String>,
        #[clap(long)]
        by: String,
    },
    Promote {
        workgroup: String,
        system: String,
        label: String,
        /// Target version; defaults to the version the sandbox was forked from.
        #[clap(long)]
        target: Option<String>,
        #[clap(long)]
        by: String,
    },
    Sync {
        workgroup: String,
        system: String,
        label: String,
        #[clap(long)]
        by: String,
    },
    Delete {
        workgroup: String,
        system: String,
        label: String,
        #[clap(long)]
        by: String,
    },
    Versions {
        workgroup: String,
        system: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum ScaffoldCommand {
    Protocol {
        workgroup: String,
        system: String,
        protocol: String,
        #[clap(long)]
        from_protocol: Option<String>,
        #[clap(long)]
        from_system: Option<String>,
        #[clap(long, default_value = "main")]
        version: String,
        #[clap(long, default_value = "")]
        description: String,
        #[clap(long)]
        by: String,
    },
    System {
        workgroup: String,
        system: String,
        #[clap(long)]
        from_system: Option<String>,
        #[clap(long)]
        from_workgroup: Option<String>,
        #[clap(long)]
        from_version: Option<String>,
        #[clap(long)]
        template: Option<String>,
        #[clap(long)]
        protocol: Option<String>,
        #[clap(long, default_value = "")]
        description: String,
        #[clap(long)]
        by: String,
    },
    /// Copy a template system into a workgroup.
    Add {
        template: String,
        workgroup: String,
        #[clap(long, default_value = "main")]
        version: String,
        #[clap(long)]
        by: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum ManifestCommand {
    System {
        workgroup: String,
        system: String,
        #[clap(long, default_value = "main")]
        version: String,
    },
    Workgroup {
        workgroup: String,
        #[clap(long, default_value = "main")]
        version: String,
    },
    Libs {
        workgroup: String,
    },
    /// Per-key status of a version relative to a base.
    Compare {
        workgroup: String,
        system: String,
        version: String,
        #[clap(long, default_value = "main")]
        base: String,
    },
}
