//! Logging setup shared by the CVR binaries.
//!
//! ```ignore
//! let mut log_config = LogConfig::from_env("info").with_stderr();
//! if verbose {
//!     log_config = log_config.with_level("debug");
//! }
//! let _logging_guards = init_logging(&log_config)?;
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::env::parse_log_level;
use crate::errors::ErrorCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "pretty" | "text" | "human" => Some(Self::Pretty),
            "json" | "jsonl" => Some(Self::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
    pub stderr: bool,
    /// JSON log file written through a non-blocking appender.
    pub file: Option<PathBuf>,
}

impl LogConfig {
    /// Read `CVR_LOG_LEVEL`, `CVR_LOG_FORMAT` and `CVR_LOG_FILE`; invalid
    /// values fall back to the defaults.
    pub fn from_env(default_level: &str) -> Self {
        let level = std::env::var("CVR_LOG_LEVEL")
            .ok()
            .and_then(|v| parse_log_level(&v))
            .unwrap_or_else(|| default_level.to_string());
        let format = std::env::var("CVR_LOG_FORMAT")
            .ok()
            .and_then(|v| LogFormat::parse(&v))
            .unwrap_or(LogFormat::Pretty);
        let file = std::env::var("CVR_LOG_FILE")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(|v| crate::config::expand_path(&v));
        Self {
            level,
            format,
            stderr: false,
            file,
        }
    }

    #[must_use]
    pub fn with_stderr(mut self) -> Self {
        self.stderr = true;
        self
    }

    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Our crates at the configured level; dependencies only at `warn`.
    pub fn filter_directive(&self) -> String {
        format!(
            "warn,cvr={level},cvr_common={level}",
            level = self.level
        )
    }
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter '{directive}': {message}")]
    Filter { directive: String, message: String },

    #[error("cannot open log file {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("logging already initialized: {0}")]
    Init(String),
}

impl LoggingError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::InternalLoggingError
    }
}

/// Keeps the non-blocking file writer flushing; hold it until exit.
#[must_use]
pub struct LoggingGuards {
    _file: Option<WorkerGuard>,
}

type FilteredRegistry = Layered<EnvFilter, Registry>;
type BoxedLayer = Box<dyn Layer<FilteredRegistry> + Send + Sync>;

fn build_filter(config: &LogConfig) -> Result<EnvFilter, LoggingError> {
    // RUST_LOG wins when set, for ad-hoc debugging of dependencies.
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let directive = config.filter_directive();
    EnvFilter::try_new(&directive).map_err(|e| LoggingError::Filter {
        directive,
        message: e.to_string(),
    })
}

fn file_layer(path: &Path) -> Result<(BoxedLayer, WorkerGuard), LoggingError> {
    let file_err = |source| LoggingError::File {
        path: path.to_path_buf(),
        source,
    };
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    fs::create_dir_all(dir).map_err(file_err)?;
    let file_name = path.file_name().ok_or_else(|| {
        file_err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "log file path has no file name",
        ))
    })?;
    let appender = tracing_appender::rolling::never(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(writer)
        .with_ansi(false)
        .with_current_span(true)
        .boxed();
    Ok((layer, guard))
}

pub fn init_logging(config: &LogConfig) -> Result<LoggingGuards, LoggingError> {
    let filter = build_filter(config)?;
    let mut layers: Vec<BoxedLayer> = Vec::new();

    if config.stderr {
        let layer = match config.format {
            LogFormat::Pretty => tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .boxed(),
            LogFormat::Json => tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .boxed(),
        };
        layers.push(layer);
    }

    let mut file_guard = None;
    if let Some(path) = &config.file {
        let (layer, guard) = file_layer(path)?;
        layers.push(layer);
        file_guard = Some(guard);
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(layers)
        .try_init()
        .map_err(|e| LoggingError::Init(e.to_string()))?;

    Ok(LoggingGuards { _file: file_guard })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parsing() {
        assert_eq!(LogFormat::parse("JSON"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse("pretty"), Some(LogFormat::Pretty));
        assert_eq!(LogFormat::parse("xml"), None);
    }

    #[test]
    fn test_builder_and_directive() {
        let config = LogConfig {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            stderr: false,
            file: None,
        }
        .with_stderr()
        .with_level("debug")
        .with_format(LogFormat::Json)
        .with_file("/tmp/cvr.log");

        assert!(config.stderr);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.file.as_deref(), Some(Path::new("/tmp/cvr.log")));
        assert_eq!(
            config.filter_directive(),
            "warn,cvr=debug,cvr_common=debug"
        );
        assert!(EnvFilter::try_new(config.filter_directive()).is_ok());
    }
}
