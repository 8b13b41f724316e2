//! Environment-style configuration input and the parsers applied to it.

use std::collections::BTreeMap;

use crate::types::ProviderId;

/// Snapshot of string key/value pairs the configuration is built from.
///
/// Captured from the process environment in production, supplied directly
/// by tests and embedding applications.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Env {
    vars: BTreeMap<String, String>,
}

impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture the current process environment.
    pub fn from_process() -> Self {
        Env {
            vars: std::env::vars().collect(),
        }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Env {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Raw value, as stored.
    pub fn raw(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Trimmed value; empty or whitespace-only counts as absent.
    pub fn get(&self, key: &str) -> Option<String> {
        self.raw(key)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    pub fn bool_or(&self, key: &str, fallback: bool) -> bool {
        parse_bool(self.raw(key), fallback)
    }

    pub fn u64_or(&self, key: &str, fallback: u64) -> u64 {
        parse_number(self.raw(key), fallback)
    }

    pub fn u32_or(&self, key: &str, fallback: u32) -> u32 {
        parse_number(self.raw(key), fallback)
    }

    pub fn f64_or(&self, key: &str, fallback: f64) -> f64 {
        parse_number(self.raw(key), fallback)
    }

    /// Comma list, trimmed, empty items dropped.
    pub fn list(&self, key: &str) -> Vec<String> {
        self.raw(key)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// `true`, `1` and `yes` (any case) are true; any other present value is
/// false; absence yields `fallback`.
pub fn parse_bool(value: Option<&str>, fallback: bool) -> bool {
    match value {
        None => fallback,
        Some(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"),
    }
}

/// Unparsable or absent values yield `fallback`.
pub fn parse_number<T: std::str::FromStr>(value: Option<&str>, fallback: T) -> T {
    value
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(fallback)
}

/// Comma-separated provider ids. Unknown ids are dropped.
pub fn parse_provider_list(value: Option<&str>) -> Vec<ProviderId> {
    value
        .map(|v| {
            v.split(',')
                .filter_map(|item| item.parse::<ProviderId>().ok())
                .collect()
        })
        .unwrap_or_default()
}
