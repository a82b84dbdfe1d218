//! Typed environment variable helpers
//!
//! Two flavours: the lenient `*_or` readers fall back to the default on a
//! missing or unparseable value, `parse_env` reports unparseable values.

use std::str::FromStr;

use crate::error::{CommonError, Result};

/// Read a string variable, falling back to `default` when unset
pub fn string_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Read a variable and parse it, falling back to `default` when unset or invalid
pub fn parse_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Read an optional string variable; empty values count as unset
pub fn optional(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Read and parse a variable, returning `Ok(None)` when unset
pub fn parse_env<T: FromStr>(name: &str) -> Result<Option<T>> {
    match optional(name) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| CommonError::invalid_env(name, raw)),
    }
}

/// Split a comma separated variable into trimmed, non-empty items
pub fn list(name: &str) -> Vec<String> {
    optional(name)
        .map(|raw| {
            raw.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}
