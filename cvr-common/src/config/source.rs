//! Source tracking for configuration values.

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Where a configuration value came from. Later layers win.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum ConfigSource {
    Default,
    ConfigFile(PathBuf),
    Environment,
    CommandLine,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::ConfigFile(path) => write!(f, "file:{}", path.display()),
            Self::Environment => write!(f, "env"),
            Self::CommandLine => write!(f, "cli"),
        }
    }
}

/// A value together with its origin.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sourced<T> {
    pub value: T,
    pub source: ConfigSource,
    /// Environment variable that supplied the value, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_var: Option<String>,
}

impl<T> Sourced<T> {
    pub fn default_value(value: T) -> Self {
        Self {
            value,
            source: ConfigSource::Default,
            env_var: None,
        }
    }

    pub fn from_file(value: T, path: &Path) -> Self {
        Self {
            value,
            source: ConfigSource::ConfigFile(path.to_path_buf()),
            env_var: None,
        }
    }

    pub fn from_env(value: T, var: impl Into<String>) -> Self {
        Self {
            value,
            source: ConfigSource::Environment,
            env_var: Some(var.into()),
        }
    }

    pub fn from_cli(value: T) -> Self {
        Self {
            value,
            source: ConfigSource::CommandLine,
            env_var: None,
        }
    }

    pub fn is_default(&self) -> bool {
        self.source == ConfigSource::Default
    }

    /// Origin description for display, naming the variable for env values.
    pub fn origin(&self) -> String {
        match (&self.source, &self.env_var) {
            (ConfigSource::Environment, Some(var)) => format!("env:{var}"),
            (source, _) => source.to_string(),
        }
    }
}

/// One row of the effective-configuration report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigValueSource {
    pub key: &'static str,
    pub value: String,
    pub source: String,
}

impl ConfigValueSource {
    pub fn new<T>(key: &'static str, value: impl Into<String>, sourced: &Sourced<T>) -> Self {
        Self {
            key,
            value: value.into(),
            source: sourced.origin(),
        }
    }
}
