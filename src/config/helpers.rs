use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;

use crate::error::ConfigError;

/// Source of raw configuration values.
///
/// Production reads the process environment; tests feed a map so they never
/// have to mutate global state.
pub trait ConfigSource {
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads values from the process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSource;

impl ConfigSource for EnvSource {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl ConfigSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

/// Read a value, treating empty or whitespace-only strings as unset.
pub(crate) fn optional_env(source: &dyn ConfigSource, key: &str) -> Option<String> {
    source
        .get(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn required_env(
    source: &dyn ConfigSource,
    key: &str,
    hint: &str,
) -> Result<String, ConfigError> {
    optional_env(source, key).ok_or_else(|| ConfigError::MissingRequired {
        key: key.to_string(),
        hint: hint.to_string(),
    })
}

/// Parse an optional value, falling back to `default` when unset.
pub(crate) fn parse_env<T>(
    source: &dyn ConfigSource,
    key: &str,
    default: T,
    expectation: &str,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    optional_env(source, key)
        .map(|s| s.parse::<T>())
        .transpose()
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{expectation}: {e}"),
        })
        .map(|v| v.unwrap_or(default))
}

/// Split a comma-separated list, dropping blanks.
pub(crate) fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
