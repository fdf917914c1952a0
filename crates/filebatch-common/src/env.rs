//! Environment variable helpers
//!
//! Unset variables fall back to the supplied default. A variable that is set but
//! cannot be parsed is reported instead of being silently replaced.

use std::str::FromStr;

use crate::error::{FilebatchError, Result};

/// Read `key` and parse it, falling back to `default` when the variable is unset.
pub fn var_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => parse(key, &raw),
        Err(_) => Ok(default),
    }
}

/// Read `key` as a string, falling back to `default` when unset or empty.
pub fn string_or(key: &str, default: impl Into<String>) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.into())
}

/// Read an optional variable and parse it when present.
pub fn optional<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => parse(key, &raw).map(Some),
        Err(_) => Ok(None),
    }
}

/// Parse the value as given, then with surrounding whitespace removed.
///
/// Whitespace values such as a tab delimiter only parse untrimmed.
fn parse<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Ok(value) = raw.parse() {
        return Ok(value);
    }
    raw.trim().parse().map_err(|e: T::Err| FilebatchError::InvalidEnv {
        key: key.to_string(),
        value: raw.to_string(),
        reason: e.to_string(),
    })
}
