//! Environment-variable helpers for configuration loading.
//!
//! Empty or whitespace-only variables are treated as unset so that
//! deployment templates can leave optional settings blank.

use crate::error::{Error, Result};

/// Reads a trimmed, non-empty environment variable.
#[must_use]
pub fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// Reads an environment variable as a `u64`.
///
/// # Errors
///
/// Returns an error if the variable is set but is not a valid `u64`.
pub fn env_u64(name: &str) -> Result<Option<u64>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u64>()
        .map(Some)
        .map_err(|e| Error::invalid_config(format!("{name} must be a u64: {e}")))
}

/// Reads an environment variable as a `usize`.
///
/// # Errors
///
/// Returns an error if the variable is set but is not a valid `usize`.
pub fn env_usize(name: &str) -> Result<Option<usize>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<usize>()
        .map(Some)
        .map_err(|e| Error::invalid_config(format!("{name} must be a usize: {e}")))
}

/// Reads an environment variable as a boolean.
///
/// # Errors
///
/// Returns an error if the variable is set but is not a recognised boolean.
pub fn env_bool(name: &str) -> Result<Option<bool>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    parse_bool(name, &v).map(Some)
}

/// Parses common boolean spellings.
///
/// # Errors
///
/// Returns an error naming `name` when `value` is not a boolean.
pub fn parse_bool(name: &str, value: &str) -> Result<bool> {
    let value = value.trim().to_ascii_lowercase();
    match value.as_str() {
        "true" | "1" | "yes" | "y" | "on" => Ok(true),
        "false" | "0" | "no" | "n" | "off" => Ok(false),
        _ => Err(Error::invalid_config(format!(
            "{name} must be a boolean (true/false/1/0)"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert!(parse_bool("X", "Yes").unwrap());
        assert!(parse_bool("X", "1").unwrap());
        assert!(!parse_bool("X", "off").unwrap());
        assert!(parse_bool("X", "maybe").is_err());
    }

    #[test]
    fn unset_variables_are_none() {
        assert!(env_string("NETPORTAL_TEST_DEFINITELY_UNSET").is_none());
        assert!(env_u64("NETPORTAL_TEST_DEFINITELY_UNSET").unwrap().is_none());
        assert!(env_usize("NETPORTAL_TEST_DEFINITELY_UNSET")
            .unwrap()
            .is_none());
        assert!(env_bool("NETPORTAL_TEST_DEFINITELY_UNSET")
            .unwrap()
            .is_none());
    }
}
