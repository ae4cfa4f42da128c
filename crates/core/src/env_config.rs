//! Typed environment-variable parsing shared by every `*Config::from_env`.

use std::str::FromStr;

use crate::error::CoreError;

/// Parse `name` from the environment, falling back to `default` when unset.
///
/// A set but unparseable value is an error rather than a silent default.
pub fn var_or<T: FromStr>(name: &str, default: T) -> Result<T, CoreError>
where
    T::Err: std::fmt::Display,
{
    parse_or(name, std::env::var(name).ok(), default)
}

/// Comma-separated list from the environment, trimmed, empty entries dropped.
pub fn list_or(name: &str, default: &[&str]) -> Vec<String> {
    split_list(std::env::var(name).ok().as_deref(), default)
}

/// Optional string variable; blank counts as unset.
pub fn optional(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or<T: FromStr>(name: &str, raw: Option<String>, default: T) -> Result<T, CoreError>
where
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| CoreError::Validation(format!("{name}={raw:?} is invalid: {e}"))),
    }
}

fn split_list(raw: Option<&str>, default: &[&str]) -> Vec<String> {
    match raw {
        Some(raw) => raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        None => default.iter().map(|s| s.to_string()).collect(),
    }
}
