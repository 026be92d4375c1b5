//! Configuration system for CVR.
//!
//! Values are layered as defaults, then the TOML file, then `CVR_*`
//! environment variables, then command-line flags. Every value remembers
//! which layer supplied it so `cvr config` can explain the effective setup.

pub mod env;
pub mod source;

pub use env::{EnvError, EnvParser, expand_path};
pub use source::{ConfigSource, ConfigValueSource, Sourced};

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::errors::ErrorCode;
use crate::executor::{CommandSpec, DEFAULT_TEARDOWN_COMMAND, DEFAULT_VERIFY_COMMAND};
use crate::hosting::github::DEFAULT_API_BASE_URL;

pub const DEFAULT_CONTEXT: &str = "cvr/verify";
pub const DEFAULT_PAGE_SIZE: u32 = 30;
pub const MAX_PAGE_SIZE: u32 = 100;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid environment configuration: {}", join_errors(.0))]
    Env(Vec<EnvError>),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn join_errors(errors: &[EnvError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ConfigError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Read { .. } => ErrorCode::ConfigReadError,
            Self::Parse { .. } => ErrorCode::ConfigParseError,
            Self::Env(_) => ErrorCode::ConfigEnvError,
            Self::Invalid(_) => ErrorCode::ConfigValidationError,
        }
    }
}

/// On-disk representation; every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub api_base_url: Option<String>,
    pub context: Option<String>,
    pub target_url: Option<String>,
    pub page_size: Option<u32>,
    pub work_root: Option<String>,
    pub keep_workdirs: Option<bool>,
    pub verify_command: Option<Vec<String>>,
    /// An empty list disables teardown.
    pub teardown_command: Option<Vec<String>>,
    pub verify_timeout_secs: Option<u64>,
    pub http_timeout_secs: Option<u64>,
    pub publish_pending: Option<bool>,
}

/// `$XDG_CONFIG_HOME/cvr/config.toml` (or the platform equivalent).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("cvr").join("config.toml"))
}

/// Effective runner configuration.
#[derive(Debug, Clone, Serialize)]
pub struct RunnerConfig {
    pub api_base_url: Sourced<String>,
    pub context: Sourced<String>,
    pub target_url: Sourced<Option<String>>,
    pub page_size: Sourced<u32>,
    pub work_root: Sourced<PathBuf>,
    pub keep_workdirs: Sourced<bool>,
    pub verify_command: Sourced<Vec<String>>,
    pub teardown_command: Sourced<Vec<String>>,
    /// Zero disables the deadline.
    pub verify_timeout_secs: Sourced<u64>,
    pub http_timeout_secs: Sourced<u64>,
    pub publish_pending: Sourced<bool>,
    /// File that supplied the file layer, if any.
    pub config_file: Option<PathBuf>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        let argv = |cmd: &[&str]| cmd.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            api_base_url: Sourced::default_value(DEFAULT_API_BASE_URL.to_string()),
            context: Sourced::default_value(DEFAULT_CONTEXT.to_string()),
            target_url: Sourced::default_value(None),
            page_size: Sourced::default_value(DEFAULT_PAGE_SIZE),
            work_root: Sourced::default_value(std::env::temp_dir().join("cvr")),
            keep_workdirs: Sourced::default_value(false),
            verify_command: Sourced::default_value(argv(DEFAULT_VERIFY_COMMAND)),
            teardown_command: Sourced::default_value(argv(DEFAULT_TEARDOWN_COMMAND)),
            verify_timeout_secs: Sourced::default_value(0),
            http_timeout_secs: Sourced::default_value(DEFAULT_HTTP_TIMEOUT_SECS),
            publish_pending: Sourced::default_value(false),
            config_file: None,
        }
    }
}

impl RunnerConfig {
    /// Defaults, then the config file (`explicit` or the default location
    /// when present), then the environment.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => default_config_path().filter(|p| p.is_file()),
        };
        if let Some(path) = path {
            let file = read_file_config(&path)?;
            config.apply_file(&file, &path);
            config.config_file = Some(path);
        }

        let mut parser = EnvParser::new();
        config.apply_env(&mut parser);
        if parser.has_errors() {
            return Err(ConfigError::Env(parser.take_errors()));
        }
        Ok(config)
    }

    pub fn apply_file(&mut self, file: &FileConfig, path: &Path) {
        debug!(path = %path.display(), "applying config file");
        if let Some(v) = &file.api_base_url {
            self.api_base_url = Sourced::from_file(v.clone(), path);
        }
        if let Some(v) = &file.context {
            self.context = Sourced::from_file(v.clone(), path);
        }
        if let Some(v) = &file.target_url {
            let url = Some(v.trim().to_string()).filter(|u| !u.is_empty());
            self.target_url = Sourced::from_file(url, path);
        }
        if let Some(v) = file.page_size {
            self.page_size = Sourced::from_file(v, path);
        }
        if let Some(v) = &file.work_root {
            self.work_root = Sourced::from_file(expand_path(v), path);
        }
        if let Some(v) = file.keep_workdirs {
            self.keep_workdirs = Sourced::from_file(v, path);
        }
        if let Some(v) = &file.verify_command {
            self.verify_command = Sourced::from_file(v.clone(), path);
        }
        if let Some(v) = &file.teardown_command {
            self.teardown_command = Sourced::from_file(v.clone(), path);
        }
        if let Some(v) = file.verify_timeout_secs {
            self.verify_timeout_secs = Sourced::from_file(v, path);
        }
        if let Some(v) = file.http_timeout_secs {
            self.http_timeout_secs = Sourced::from_file(v, path);
        }
        if let Some(v) = file.publish_pending {
            self.publish_pending = Sourced::from_file(v, path);
        }
    }

    pub fn apply_env(&mut self, parser: &mut EnvParser) {
        if let Some(v) = parser.string("API_BASE_URL") {
            self.api_base_url = v;
        }
        if let Some(v) = parser.string("CONTEXT") {
            self.context = v;
        }
        if let Some(v) = parser.optional_string("TARGET_URL") {
            self.target_url = v;
        }
        if let Some(v) = parser.u32_range("PAGE_SIZE", 1, MAX_PAGE_SIZE) {
            self.page_size = v;
        }
        if let Some(v) = parser.path("WORK_ROOT") {
            self.work_root = v;
        }
        if let Some(v) = parser.bool("KEEP_WORKDIRS") {
            self.keep_workdirs = v;
        }
        if let Some(v) = parser.command("VERIFY_COMMAND") {
            self.verify_command = v;
        }
        if let Some(v) = parser.command("TEARDOWN_COMMAND") {
            self.teardown_command = v;
        }
        if let Some(v) = parser.u64_range("VERIFY_TIMEOUT_SECS", 0, u64::from(u32::MAX)) {
            self.verify_timeout_secs = v;
        }
        if let Some(v) = parser.u64_range("HTTP_TIMEOUT_SECS", 1, 3600) {
            self.http_timeout_secs = v;
        }
        if let Some(v) = parser.bool("PUBLISH_PENDING") {
            self.publish_pending = v;
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs.value.max(1))
    }

    pub fn verify_timeout(&self) -> Option<Duration> {
        Some(self.verify_timeout_secs.value)
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn verify_command_spec(&self) -> Option<CommandSpec> {
        CommandSpec::from_argv(&self.verify_command.value)
    }

    /// Teardown to run after verification. The default compose teardown only
    /// applies while the verify command is the default compose invocation.
    pub fn teardown_command_spec(&self) -> Option<CommandSpec> {
        if self.teardown_command.is_default() && !self.verify_command.is_default() {
            return None;
        }
        CommandSpec::from_argv(&self.teardown_command.value)
    }

    /// Check the effective values; warnings never block a run, errors do.
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.context.value.trim().is_empty() {
            warnings.push(ConfigWarning::error("context", "status context must not be empty"));
        }
        if self.verify_command_spec().is_none() {
            warnings.push(ConfigWarning::error("verify_command", "verify command must not be empty"));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&self.page_size.value) {
            warnings.push(ConfigWarning::error(
                "page_size",
                format!("page size {} outside 1..={MAX_PAGE_SIZE}", self.page_size.value),
            ));
        }
        if self.http_timeout_secs.value == 0 {
            warnings.push(ConfigWarning::error("http_timeout_secs", "HTTP timeout must be positive"));
        }
        let base = &self.api_base_url.value;
        if !(base.starts_with("https://") || base.starts_with("http://")) {
            warnings.push(ConfigWarning::error(
                "api_base_url",
                format!("'{base}' is not an http(s) URL"),
            ));
        }
        if let Some(url) = &self.target_url.value
            && !(url.starts_with("https://") || url.starts_with("http://"))
        {
            warnings.push(ConfigWarning::warning(
                "target_url",
                format!("'{url}' is not an http(s) URL"),
            ));
        }
        if !self.work_root.value.exists() {
            warnings.push(ConfigWarning::warning(
                "work_root",
                format!(
                    "{} does not exist yet and will be created",
                    self.work_root.value.display()
                ),
            ));
        } else if !self.work_root.value.is_dir() {
            warnings.push(ConfigWarning::error(
                "work_root",
                format!("{} is not a directory", self.work_root.value.display()),
            ));
        }
        if self.publish_pending.value {
            warnings.push(ConfigWarning::warning(
                "publish_pending",
                "pending records mark commits as handled; an interrupted run is not retried",
            ));
        }
        warnings
    }

    /// Fails with the first error-severity finding.
    pub fn ensure_valid(&self) -> Result<(), ConfigError> {
        match self
            .validate()
            .into_iter()
            .find(|w| w.severity == Severity::Error)
        {
            Some(w) => Err(ConfigError::Invalid(format!("{}: {}", w.field, w.message))),
            None => Ok(()),
        }
    }

    /// Effective values with their sources, in display order.
    pub fn describe(&self) -> Vec<ConfigValueSource> {
        let or_none = |v: &Option<String>| v.clone().unwrap_or_else(|| "(none)".to_string());
        let argv = |v: &[String]| {
            if v.is_empty() {
                "(none)".to_string()
            } else {
                crate::util::mask_sensitive_command(&v.join(" "))
            }
        };
        vec![
            ConfigValueSource::new("api_base_url", self.api_base_url.value.clone(), &self.api_base_url),
            ConfigValueSource::new("context", self.context.value.clone(), &self.context),
            ConfigValueSource::new("target_url", or_none(&self.target_url.value), &self.target_url),
            ConfigValueSource::new("page_size", self.page_size.value.to_string(), &self.page_size),
            ConfigValueSource::new(
                "work_root",
                self.work_root.value.display().to_string(),
                &self.work_root,
            ),
            ConfigValueSource::new(
                "keep_workdirs",
                self.keep_workdirs.value.to_string(),
                &self.keep_workdirs,
            ),
            ConfigValueSource::new(
                "verify_command",
                argv(&self.verify_command.value),
                &self.verify_command,
            ),
            ConfigValueSource::new(
                "teardown_command",
                self.teardown_command_spec()
                    .map(|spec| spec.display_masked())
                    .unwrap_or_else(|| "(none)".to_string()),
                &self.teardown_command,
            ),
            ConfigValueSource::new(
                "verify_timeout_secs",
                self.verify_timeout_secs.value.to_string(),
                &self.verify_timeout_secs,
            ),
            ConfigValueSource::new(
                "http_timeout_secs",
                self.http_timeout_secs.value.to_string(),
                &self.http_timeout_secs,
            ),
            ConfigValueSource::new(
                "publish_pending",
                self.publish_pending.value.to_string(),
                &self.publish_pending,
            ),
        ]
    }
}

pub fn read_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigWarning {
    pub severity: Severity,
    pub field: &'static str,
    pub message: String,
}

impl ConfigWarning {
    pub fn warning(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            field,
            message: message.into(),
        }
    }

    pub fn error(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            field,
            message: message.into(),
        }
    }
}

#[cfg(test)]
pub(crate) fn env_test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const ALL_VARS: &[&str] = &[
        "CVR_API_BASE_URL",
        "CVR_CONTEXT",
        "CVR_TARGET_URL",
        "CVR_PAGE_SIZE",
        "CVR_WORK_ROOT",
        "CVR_KEEP_WORKDIRS",
        "CVR_VERIFY_COMMAND",
        "CVR_TEARDOWN_COMMAND",
        "CVR_VERIFY_TIMEOUT_SECS",
        "CVR_HTTP_TIMEOUT_SECS",
        "CVR_PUBLISH_PENDING",
    ];

    fn clear_env() {
        for var in ALL_VARS {
            // SAFETY: env access is serialized by env_test_lock
            unsafe { std::env::remove_var(var) };
        }
    }

    fn set_env(key: &str, value: &str) {
        // SAFETY: env access is serialized by env_test_lock
        unsafe { std::env::set_var(key, value) };
    }

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("config.toml");
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_defaults() {
        let config = RunnerConfig::default();
        assert_eq!(config.context.value, "cvr/verify");
        assert_eq!(config.page_size.value, 30);
        assert_eq!(config.verify_timeout(), None);
        assert_eq!(config.http_timeout(), Duration::from_secs(60));
        assert!(!config.publish_pending.value);
        assert_eq!(
            config.verify_command_spec().unwrap().argv().join(" "),
            "docker compose -f docker-compose-ci.yml run --rm ci"
        );
        assert!(config.teardown_command_spec().is_some());
    }

    #[test]
    fn test_file_then_env_layering() {
        let _guard = env_test_lock();
        clear_env();
        let dir = tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"
context = "ci/compose"
page_size = 10
verify_command = ["make", "ci"]
verify_timeout_secs = 900
"#,
        );
        set_env("CVR_PAGE_SIZE", "5");

        let config = RunnerConfig::load(Some(&path)).unwrap();
        clear_env();

        assert_eq!(config.context.value, "ci/compose");
        assert_eq!(config.context.source, ConfigSource::ConfigFile(path.clone()));
        assert_eq!(config.page_size.value, 5);
        assert_eq!(config.page_size.source, ConfigSource::Environment);
        assert_eq!(config.verify_timeout(), Some(Duration::from_secs(900)));
        assert_eq!(config.config_file.as_deref(), Some(path.as_path()));
        // Custom verify command drops the default compose teardown.
        assert!(config.teardown_command_spec().is_none());
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let dir = tempdir().unwrap();
        let path = write_config(dir.path(), "contxt = \"typo\"\n");
        let err = read_file_config(&path).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConfigParseError);
    }

    #[test]
    fn test_missing_explicit_file_is_read_error() {
        let _guard = env_test_lock();
        clear_env();
        let err = RunnerConfig::load(Some(Path::new("/nonexistent/cvr.toml"))).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConfigReadError);
    }

    #[test]
    fn test_invalid_env_reports_all_errors() {
        let _guard = env_test_lock();
        clear_env();
        set_env("CVR_PAGE_SIZE", "0");
        set_env("CVR_KEEP_WORKDIRS", "sometimes");
        let err = RunnerConfig::load(None).unwrap_err();
        clear_env();

        let ConfigError::Env(errors) = &err else {
            panic!("expected env error, got {err:?}");
        };
        assert_eq!(errors.len(), 2);
        assert_eq!(err.code(), ErrorCode::ConfigEnvError);
    }

    #[test]
    fn test_empty_teardown_disables_it() {
        let mut config = RunnerConfig::default();
        let path = Path::new("/etc/cvr.toml");
        config.apply_file(
            &FileConfig {
                teardown_command: Some(Vec::new()),
                ..FileConfig::default()
            },
            path,
        );
        assert!(config.teardown_command_spec().is_none());
    }

    #[test]
    fn test_validate_flags_errors_and_warnings() {
        let dir = tempdir().unwrap();
        let mut config = RunnerConfig::default();
        config.context = Sourced::from_cli("  ".to_string());
        config.verify_command = Sourced::from_cli(Vec::new());
        config.page_size = Sourced::from_cli(0);
        config.work_root = Sourced::from_cli(dir.path().join("later"));

        let findings = config.validate();
        let errors: Vec<_> = findings
            .iter()
            .filter(|w| w.severity == Severity::Error)
            .map(|w| w.field)
            .collect();
        assert_eq!(errors, vec!["context", "verify_command", "page_size"]);
        assert!(
            findings
                .iter()
                .any(|w| w.field == "work_root" && w.severity == Severity::Warning)
        );
        assert_eq!(
            config.ensure_valid().unwrap_err().code(),
            ErrorCode::ConfigValidationError
        );
    }

    #[test]
    fn test_describe_reports_sources() {
        let mut config = RunnerConfig::default();
        config.page_size = Sourced::from_env(7, "CVR_PAGE_SIZE");
        let rows = config.describe();
        let page = rows.iter().find(|r| r.key == "page_size").unwrap();
        assert_eq!(page.value, "7");
        assert_eq!(page.source, "env:CVR_PAGE_SIZE");
        let target = rows.iter().find(|r| r.key == "target_url").unwrap();
        assert_eq!(target.value, "(none)");
    }
}
