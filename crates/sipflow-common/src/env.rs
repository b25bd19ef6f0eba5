//! Typed environment variable readers
//!
//! Missing variables fall back to the caller's default. Present but
//! unparsable variables are reported instead of silently ignored, so a typo in
//! `SIPFLOW_PORT` fails startup rather than binding the default port.

use std::str::FromStr;
use thiserror::Error;

/// Error raised when an environment variable holds an unusable value
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvError {
    #[error("invalid value for {name}: {value:?} ({reason})")]
    Invalid {
        name: String,
        value: String,
        reason: String,
    },
}

/// Read a string variable, returning `None` when unset or empty
pub fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Read a string variable or fall back to `default`
pub fn var_or(name: &str, default: &str) -> String {
    var(name).unwrap_or_else(|| default.to_string())
}

/// Parse a variable into `T`, returning `None` when unset
pub fn parse<T>(name: &str) -> Result<Option<T>, EnvError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        None => Ok(None),
        Some(value) => value.trim().parse::<T>().map(Some).map_err(|e| EnvError::Invalid {
            name: name.to_string(),
            reason: e.to_string(),
            value,
        }),
    }
}

/// Parse a variable into `T` or fall back to `default`
pub fn parse_or<T>(name: &str, default: T) -> Result<T, EnvError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    Ok(parse(name)?.unwrap_or(default))
}

/// Read a comma separated list, trimming entries and dropping empty ones
pub fn list(name: &str) -> Vec<String> {
    var(name)
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}
