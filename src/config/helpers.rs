//! Shared helpers for environment-variable overrides.

use std::env;

use crate::error::ConfigError;

/// Read an optional environment variable.
///
/// Unset and empty values both resolve to `None` so that `FOO=` in a unit
/// file behaves like an absent override.
pub fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match env::var(key) {
        Ok(value) => {
            if value.trim().is_empty() {
                Ok(None)
            } else {
                Ok(Some(value))
            }
        }
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::NotUnicode {
            key: key.to_string(),
        }),
    }
}

/// Parse a comma-separated list value, trimming whitespace and dropping
/// empty segments.
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
