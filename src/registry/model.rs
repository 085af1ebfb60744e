//! Registry data model: systems, scripts, history, locks and libraries.
//!
//! Values handed to callers are copies; the only way to change registry
//! state is through the write operations in the sibling modules.

use crate::core::error::{RegistryError, Result};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// The canonical, published version label.
pub const MAIN_VERSION: &str = "main";
/// Version argument meaning "most recently updated, any label".
pub const LATEST_VERSION: &str = "latest";
/// Key prefix used by manifests and sync for system-level scripts.
pub const SYSTEM_KEY_PREFIX: &str = "_system";
/// Provenance marker for content generated from built-in skeletons.
pub const SKELETON_PROVENANCE: &str = "_skeleton";

pub fn is_latest(version: &str) -> bool {
    version.is_empty() || version == LATEST_VERSION
}

// --- Script types ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptType {
    System,
    Extract,
    Analyze,
    Protocol,
    Loaders,
    Variants,
    Stim,
}

impl ScriptType {
    pub const ALL: [ScriptType; 7] = [
        ScriptType::System,
        ScriptType::Extract,
        ScriptType::Analyze,
        ScriptType::Protocol,
        ScriptType::Loaders,
        ScriptType::Variants,
        ScriptType::Stim,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptType::System => "system",
            ScriptType::Extract => "extract",
            ScriptType::Analyze => "analyze",
            ScriptType::Protocol => "protocol",
            ScriptType::Loaders => "loaders",
            ScriptType::Variants => "variants",
            ScriptType::Stim => "stim",
        }
    }

    /// Conventional filename for a script of this type.
    pub fn default_filename(&self, system: &str, protocol: &str) -> String {
        if protocol.is_empty() {
            match self {
                ScriptType::Extract => format!("{}_extract.tcl", system),
                ScriptType::Analyze => format!("{}_analyze.tcl", system),
                _ => format!("{}.tcl", system),
            }
        } else {
            match self {
                ScriptType::Protocol => format!("{}.tcl", protocol),
                other => format!("{}_{}.tcl", protocol, other.as_str()),
            }
        }
    }
}

impl std::fmt::Display for ScriptType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScriptType {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        ScriptType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| {
                RegistryError::InvalidInput(format!(
                    "invalid script type '{}'. Must be one of: {}",
                    s,
                    ScriptType::ALL
                        .iter()
                        .map(|t| t.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            })
    }
}

impl ToSql for ScriptType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ScriptType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        s.parse().map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

// --- Script keys ---

/// `(protocol, type)` identity of a script inside one system. Rendered as
/// `protocol/type`, or `_system/type` when the protocol is empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScriptKey {
    pub protocol: String,
    pub script_type: ScriptType,
}

impl ScriptKey {
    pub fn new(protocol: &str, script_type: ScriptType) -> Self {
        Self {
            protocol: protocol.to_string(),
            script_type,
        }
    }
}

impl std::fmt::Display for ScriptKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.protocol.is_empty() {
            write!(f, "{}/{}", SYSTEM_KEY_PREFIX, self.script_type)
        } else {
            write!(f, "{}/{}", self.protocol, self.script_type)
        }
    }
}

impl FromStr for ScriptKey {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        let (protocol, script_type) = s.split_once('/').ok_or_else(|| {
            RegistryError::InvalidInput(format!(
                "invalid script key '{}': expected protocol/type",
                s
            ))
        })?;
        let protocol = if protocol == SYSTEM_KEY_PREFIX {
            ""
        } else {
            protocol
        };
        Ok(ScriptKey::new(protocol, script_type.parse()?))
    }
}

// --- Provenance ---

/// Where copied content came from. Stored as text:
/// `wg/name@version`, `wg/system/protocol`, or `_skeleton`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Provenance {
    Versioned {
        workgroup: String,
        name: String,
        version: String,
    },
    Protocol {
        workgroup: String,
        system: String,
        protocol: String,
    },
    Skeleton,
}

impl Provenance {
    pub fn versioned(workgroup: &str, name: &str, version: &str) -> Self {
        Provenance::Versioned {
            workgroup: workgroup.to_string(),
            name: name.to_string(),
            version: version.to_string(),
        }
    }

    pub fn protocol(workgroup: &str, system: &str, protocol: &str) -> Self {
        Provenance::Protocol {
            workgroup: workgroup.to_string(),
            system: system.to_string(),
            protocol: protocol.to_string(),
        }
    }
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provenance::Versioned {
                workgroup,
                name,
                version,
            } => write!(f, "{}/{}@{}", workgroup, name, version),
            Provenance::Protocol {
                workgroup,
                system,
                protocol,
            } => write!(f, "{}/{}/{}", workgroup, system, protocol),
            Provenance::Skeleton => f.write_str(SKELETON_PROVENANCE),
        }
    }
}

impl FromStr for Provenance {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        if s == SKELETON_PROVENANCE {
            return Ok(Provenance::Skeleton);
        }
        let invalid =
            || RegistryError::InvalidInput(format!("unrecognized provenance '{}'", s));
        let (workgroup, rest) = s.split_once('/').ok_or_else(invalid)?;
        if let Some((name, version)) = rest.split_once('@') {
            return Ok(Provenance::versioned(workgroup, name, version));
        }
        let (system, protocol) = rest.split_once('/').ok_or_else(invalid)?;
        Ok(Provenance::protocol(workgroup, system, protocol))
    }
}

impl From<Provenance> for String {
    fn from(p: Provenance) -> String {
        p.to_string()
    }
}

impl TryFrom<String> for Provenance {
    type Error = RegistryError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl ToSql for Provenance {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_string()))
    }
}

impl FromSql for Provenance {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: RegistryError| FromSqlError::Other(Box::new(e)))
    }
}

// --- Rows ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct System {
    pub id: i64,
    pub workgroup: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
    pub forked_from: Option<Provenance>,
    pub forked_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    pub updated_by: String,
    /// Distinct non-empty protocols, populated on fetch.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub protocols: Vec<String>,
    #[serde(default)]
    pub script_count: usize,
}

impl System {
    pub fn is_main(&self) -> bool {
        self.version == MAIN_VERSION
    }

    /// Resource key clients conventionally lock while editing this system.
    pub fn lock_key(&self) -> String {
        format!("{}/{}/{}", self.workgroup, self.name, self.version)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Script {
    pub id: i64,
    pub system_id: i64,
    /// Empty for system-level scripts.
    pub protocol: String,
    #[serde(rename = "type")]
    pub script_type: ScriptType,
    pub filename: String,
    pub content: String,
    pub checksum: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forked_from: Option<Provenance>,
    pub updated_at: i64,
    pub updated_by: String,
}

impl Script {
    pub fn key(&self) -> ScriptKey {
        ScriptKey::new(&self.protocol, self.script_type)
    }
}

/// Input to `save_script`: what the caller wants stored. The checksum is
/// always derived from `content`, never supplied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptWrite {
    pub system_id: i64,
    pub protocol: String,
    #[serde(rename = "type")]
    pub script_type: ScriptType,
    /// Defaults from naming convention when absent.
    pub filename: Option<String>,
    pub content: String,
    pub updated_by: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptHistory {
    pub id: i64,
    pub script_id: i64,
    pub checksum: String,
    pub content: String,
    pub comment: String,
    pub saved_by: String,
    pub saved_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lock {
    pub key: String,
    pub locked_by: String,
    pub locked_at: i64,
    pub expires_at: i64,
}

impl Lock {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Library {
    pub id: i64,
    pub workgroup: String,
    pub name: String,
    pub version: String,
    pub filename: String,
    /// Empty in listings; present when fetched individually.
    pub content: String,
    pub checksum: String,
    pub forked_from: Option<Provenance>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibWrite {
    pub workgroup: String,
    pub name: String,
    pub version: String,
    /// Defaults to `<name>.tcl`.
    pub filename: Option<String>,
    pub content: String,
}
