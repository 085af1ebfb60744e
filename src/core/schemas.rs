//! Centralized schema definitions for the registry database.
//!
//! The registry keeps all state in one SQLite file:
//! 1. `ess_systems`: one row per (workgroup, system, version label).
//! 2. `ess_scripts`: script files owned by a system, keyed by (protocol, type).
//! 3. `ess_script_history`: append-only snapshot of every accepted script write.
//! 4. `ess_locks`: advisory edit locks keyed by an arbitrary resource string.
//! 5. `ess_libs`: shared support files versioned per workgroup.
//!
//! `update_seq` on systems and libs is a registry-wide counter bumped on
//! every write to the row; "latest" lookups order by it, since
//! `updated_at` only has second resolution.

/// Next `update_seq` value, evaluated inside the writing transaction.
pub const SYSTEMS_NEXT_SEQ: &str = "(SELECT COALESCE(MAX(update_seq), 0) + 1 FROM ess_systems)";
pub const LIBS_NEXT_SEQ: &str = "(SELECT COALESCE(MAX(update_seq), 0) + 1 FROM ess_libs)";

pub const REGISTRY_DB_NAME: &str = "ess-registry.db";
pub const REGISTRY_EVENTS_NAME: &str = "broker.events.jsonl";
pub const REGISTRY_SCHEMA_VERSION: u32 = 1;

pub const SYSTEMS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS ess_systems (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        workgroup TEXT NOT NULL,
        name TEXT NOT NULL,
        version TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        author TEXT NOT NULL DEFAULT '',
        forked_from TEXT,
        forked_at INTEGER,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        updated_by TEXT NOT NULL,
        update_seq INTEGER NOT NULL DEFAULT 0,
        UNIQUE(workgroup, name, version)
    )
";

pub const SCRIPTS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS ess_scripts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        system_id INTEGER NOT NULL REFERENCES ess_systems(id) ON DELETE CASCADE,
        protocol TEXT NOT NULL DEFAULT '',
        type TEXT NOT NULL,
        filename TEXT NOT NULL,
        content TEXT NOT NULL,
        checksum TEXT NOT NULL,
        forked_from TEXT,
        updated_at INTEGER NOT NULL,
        updated_by TEXT NOT NULL,
        UNIQUE(system_id, protocol, type)
    )
";

// No foreign key on script_id: history outlives sandbox deletion.
pub const SCRIPT_HISTORY_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS ess_script_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        script_id INTEGER NOT NULL,
        content TEXT NOT NULL,
        checksum TEXT NOT NULL,
        saved_at INTEGER NOT NULL,
        saved_by TEXT NOT NULL,
        comment TEXT NOT NULL DEFAULT ''
    )
";

pub const LOCKS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS ess_locks (
        key TEXT PRIMARY KEY,
        locked_by TEXT NOT NULL,
        locked_at INTEGER NOT NULL,
        expires_at INTEGER NOT NULL
    )
";

pub const LIBS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS ess_libs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        workgroup TEXT NOT NULL,
        name TEXT NOT NULL,
        version TEXT NOT NULL,
        filename TEXT NOT NULL,
        content TEXT NOT NULL,
        checksum TEXT NOT NULL,
        forked_from TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        update_seq INTEGER NOT NULL DEFAULT 0,
        UNIQUE(workgroup, name, version)
    )
";

pub const INDEX_SYSTEMS_WORKGROUP: &str =
    "CREATE INDEX IF NOT EXISTS idx_ess_systems_workgroup ON ess_systems(workgroup)";
pub const INDEX_SYSTEMS_NAME: &str =
    "CREATE INDEX IF NOT EXISTS idx_ess_systems_name ON ess_systems(workgroup, name)";
pub const INDEX_SCRIPTS_SYSTEM: &str =
    "CREATE INDEX IF NOT EXISTS idx_ess_scripts_system ON ess_scripts(system_id)";
pub const INDEX_SCRIPTS_PROTOCOL: &str =
    "CREATE INDEX IF NOT EXISTS idx_ess_scripts_protocol ON ess_scripts(system_id, protocol)";
pub const INDEX_LIBS_WORKGROUP: &str =
    "CREATE INDEX IF NOT EXISTS idx_ess_libs_workgroup ON ess_libs(workgroup)";
pub const INDEX_HISTORY_SCRIPT: &str =
    "CREATE INDEX IF NOT EXISTS idx_ess_history_script ON ess_script_history(script_id, saved_at DESC)";

/// Every statement of schema v1, in creation order.
pub const SCHEMA_V1: &[&str] = &[
    SYSTEMS_SCHEMA,
    SCRIPTS_SCHEMA,
    SCRIPT_HISTORY_SCHEMA,
    LOCKS_SCHEMA,
    LIBS_SCHEMA,
    INDEX_SYSTEMS_WORKGROUP,
    INDEX_SYSTEMS_NAME,
    INDEX_SCRIPTS_SYSTEM,
    INDEX_SCRIPTS_PROTOCOL,
    INDEX_LIBS_WORKGROUP,
    INDEX_HISTORY_SCRIPT,
];

pub const REGISTRY_TABLES: &[&str] = &[
    "ess_systems",
    "ess_scripts",
    "ess_script_history",
    "ess_locks",
    "ess_libs",
];
