//! Environment variable parsing with type safety.
//!
//! Every getter returns `None` when the variable is unset, so the caller can
//! layer environment values over file values. Invalid values are collected
//! instead of aborting, so all problems are reported at once.

use super::source::Sourced;
use std::env;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during environment variable parsing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnvError {
    #[error("Invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: String,
        value: String,
    },

    #[error("Value out of range for {var}: {value} (valid: {min}..={max})")]
    OutOfRange {
        var: String,
        value: String,
        min: String,
        max: String,
    },

    #[error("Invalid log level for {var}: {value}")]
    InvalidLogLevel { var: String, value: String },
}

pub struct EnvParser {
    prefix: &'static str,
    errors: Vec<EnvError>,
}

impl EnvParser {
    /// Parser for `CVR_*` variables.
    pub fn new() -> Self {
        Self {
            prefix: "CVR_",
            errors: Vec::new(),
        }
    }

    pub fn errors(&self) -> &[EnvError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    pub fn var_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn raw(&self, name: &str) -> Option<(String, String)> {
        let var = self.var_name(name);
        env::var(&var).ok().map(|value| (var, value))
    }

    pub fn string(&mut self, name: &str) -> Option<Sourced<String>> {
        let (var, value) = self.raw(name)?;
        Some(Sourced::from_env(value, var))
    }

    /// An empty value explicitly clears the setting.
    pub fn optional_string(&mut self, name: &str) -> Option<Sourced<Option<String>>> {
        let (var, value) = self.raw(name)?;
        let value = Some(value.trim().to_string()).filter(|v| !v.is_empty());
        Some(Sourced::from_env(value, var))
    }

    /// Accepts 1/true/yes/on and 0/false/no/off/"" (case-insensitive).
    pub fn bool(&mut self, name: &str) -> Option<Sourced<bool>> {
        let (var, value) = self.raw(name)?;
        match parse_bool(&value) {
            Some(parsed) => Some(Sourced::from_env(parsed, var)),
            None => {
                self.errors.push(EnvError::InvalidValue {
                    var,
                    expected: "boolean (true/false/1/0/yes/no)".to_string(),
                    value,
                });
                None
            }
        }
    }

    pub fn u32_range(&mut self, name: &str, min: u32, max: u32) -> Option<Sourced<u32>> {
        let parsed = self.u64_range(name, u64::from(min), u64::from(max))?;
        let value = u32::try_from(parsed.value).ok()?;
        Some(Sourced {
            value,
            source: parsed.source,
            env_var: parsed.env_var,
        })
    }

    pub fn u64_range(&mut self, name: &str, min: u64, max: u64) -> Option<Sourced<u64>> {
        let (var, value) = self.raw(name)?;
        match value.trim().parse::<u64>() {
            Ok(n) if (min..=max).contains(&n) => Some(Sourced::from_env(n, var)),
            Ok(n) => {
                self.errors.push(EnvError::OutOfRange {
                    var,
                    value: n.to_string(),
                    min: min.to_string(),
                    max: max.to_string(),
                });
                None
            }
            Err(_) => {
                self.errors.push(EnvError::InvalidValue {
                    var,
                    expected: "unsigned integer".to_string(),
                    value,
                });
                None
            }
        }
    }

    /// Path with `~` and `$VAR` expansion.
    pub fn path(&mut self, name: &str) -> Option<Sourced<PathBuf>> {
        let (var, value) = self.raw(name)?;
        Some(Sourced::from_env(expand_path(&value), var))
    }

    /// Whitespace-separated argv; an empty value yields an empty list.
    pub fn command(&mut self, name: &str) -> Option<Sourced<Vec<String>>> {
        let (var, value) = self.raw(name)?;
        let argv = value.split_whitespace().map(str::to_string).collect();
        Some(Sourced::from_env(argv, var))
    }

    pub fn log_level(&mut self, name: &str) -> Option<Sourced<String>> {
        let (var, value) = self.raw(name)?;
        match parse_log_level(&value) {
            Some(level) => Some(Sourced::from_env(level, var)),
            None => {
                self.errors.push(EnvError::InvalidLogLevel { var, value });
                None
            }
        }
    }
}

impl Default for EnvParser {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

pub(crate) fn parse_log_level(value: &str) -> Option<String> {
    let lower = value.trim().to_lowercase();
    match lower.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" | "off" => Some(lower),
        _ => None,
    }
}

/// Expand `~` and environment references; unresolvable references are left
/// as written.
pub fn expand_path(raw: &str) -> PathBuf {
    match shellexpand::full(raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(raw).as_ref()),
    }
}
