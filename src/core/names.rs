//! Identifier validation shared by every write path.

use crate::core::error::{RegistryError, Result};
use regex::Regex;
use std::sync::LazyLock;

pub const MAX_NAME_LEN: usize = 128;

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*$").expect("static name pattern"));

/// Workgroup, system, protocol and version labels share one grammar:
/// 1..=128 chars of `[A-Za-z0-9_-]`, starting with a letter or `_`.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name.len() <= MAX_NAME_LEN && NAME_RE.is_match(name)
}

pub fn validate_name(field: &str, value: &str) -> Result<()> {
    if is_valid_name(value) {
        Ok(())
    } else {
        Err(RegistryError::InvalidInput(format!(
            "invalid {} '{}': use 1-{} chars of letters, digits, '_' or '-', starting with a letter or '_'",
            field, value, MAX_NAME_LEN
        )))
    }
}

pub fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(RegistryError::InvalidInput(format!("{} is required", field)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_registry_style_names() {
        for name in ["match_to_sample", "colormatch", "dave-dev", "_templates", "v2"] {
            assert!(is_valid_name(name), "{} should be valid", name);
        }
    }

    #[test]
    fn rejects_bad_names() {
        let too_long = "a".repeat(MAX_NAME_LEN + 1);
        for name in ["", "2fast", "-dash", "has space", "a/b", "dots.tcl", too_long.as_str()] {
            assert!(!is_valid_name(name), "{:?} should be invalid", name);
        }
    }

    #[test]
    fn validate_name_reports_field() {
        let err = validate_name("protocol", "a b").unwrap_err();
        assert!(err.to_string().contains("protocol"));
        assert!(matches!(err, RegistryError::InvalidInput(_)));
    }

    #[test]
    fn require_rejects_blank() {
        assert!(require("updatedBy", "  ").is_err());
        assert!(require("updatedBy", "dave").is_ok());
    }
}
