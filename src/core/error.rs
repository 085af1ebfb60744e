use crate::registry::model::Lock;
use serde::Serialize;
use std::io;
use thiserror::Error;

/// Coarse classification callers map onto transport status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidInput,
    Internal,
}

/// Structured payload for every conflict outcome. Carries enough state
/// (current checksum, current holder) for the caller to retry correctly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "conflict", content = "payload", rename_all = "snake_case")]
pub enum Conflict {
    /// Stored checksum differs from the caller's expectation. `current` is
    /// `None` when the caller expected a row that does not exist.
    ChecksumMismatch {
        key: String,
        expected: String,
        current: Option<String>,
    },
    AlreadyExists(String),
    AlreadyLocked(Lock),
    NotOwner(Lock),
    ProtectedVersion(String),
}

impl std::fmt::Display for Conflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Conflict::ChecksumMismatch {
                key,
                expected,
                current,
            } => write!(
                f,
                "script {} was modified (expected {}, found {})",
                key,
                short_checksum(expected),
                current.as_deref().map(short_checksum).unwrap_or("nothing")
            ),
            Conflict::AlreadyExists(what) => write!(f, "{} already exists", what),
            Conflict::AlreadyLocked(lock) => write!(
                f,
                "{} is locked by {} until {}",
                lock.key, lock.locked_by, lock.expires_at
            ),
            Conflict::NotOwner(lock) => {
                write!(f, "{} is held by {}, not the caller", lock.key, lock.locked_by)
            }
            Conflict::ProtectedVersion(v) => write!(f, "version '{}' is protected", v),
        }
    }
}

/// First eight hex characters, enough to identify a checksum in messages.
pub fn short_checksum(checksum: &str) -> &str {
    checksum.get(..8).unwrap_or(checksum)
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(Conflict),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Migration error: {0}")]
    Migration(String),
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::NotFound(_) => ErrorKind::NotFound,
            RegistryError::Conflict(_) => ErrorKind::Conflict,
            RegistryError::InvalidInput(_) | RegistryError::Config(_) => ErrorKind::InvalidInput,
            RegistryError::Sqlite(_)
            | RegistryError::Io(_)
            | RegistryError::Serialization(_)
            | RegistryError::Migration(_) => ErrorKind::Internal,
        }
    }

    pub fn http_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::InvalidInput => 400,
            ErrorKind::Internal => 500,
        }
    }

    pub fn conflict(&self) -> Option<&Conflict> {
        match self {
            RegistryError::Conflict(c) => Some(c),
            _ => None,
        }
    }

    /// JSON body for a failed call: message, kind and any conflict payload.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": self.to_string(),
            "kind": self.kind(),
            "status": self.http_status(),
            "detail": self.conflict(),
        })
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;
