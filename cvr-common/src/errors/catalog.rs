//! Error Catalog for the Commit Verification Runner
//!
//! Every failure a pipeline run can report maps to a stable code in the
//! CVR-Exxx format, a message, and remediation steps. Codes are what the
//! CLI prints and what run reports serialize, so they must never be
//! renumbered.
//!
//! # Error Code Ranges
//!
//! | Range      | Category      | Description                              |
//! |------------|---------------|------------------------------------------|
//! | E001-E099  | Config        | Configuration and environment errors     |
//! | E100-E199  | Hosting       | Hosting API, transport and status errors |
//! | E200-E299  | Snapshot      | Archive extraction and scratch storage   |
//! | E300-E399  | Verification  | Verification command lifecycle           |
//! | E500-E599  | Internal      | Internal/unexpected errors               |

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error code enumeration covering all CVR error scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorCode {
    // =========================================================================
    // Config Errors (E001-E099)
    // =========================================================================
    /// Configuration file could not be read
    ConfigReadError,
    /// Configuration file contains invalid TOML syntax
    ConfigParseError,
    /// Configuration contains invalid values
    ConfigValidationError,
    /// Environment variable has invalid value
    ConfigEnvError,
    /// No authentication token supplied
    ConfigMissingToken,

    // =========================================================================
    // Hosting Errors (E100-E199)
    // =========================================================================
    /// Reference could not be resolved to a commit
    ReferenceNotFound,
    /// Archive download failed
    TransportFailed,
    /// Archive body is not gzip framed
    TransportNotGzip,
    /// Status record could not be created
    PublishFailed,

    // =========================================================================
    // Snapshot Errors (E200-E299)
    // =========================================================================
    /// Archive entry would escape the destination root
    UnsafeArchivePath,
    /// Archive entry kind is not a directory or regular file
    UnsupportedArchiveEntry,
    /// Reading the archive or writing the tree failed
    ExtractionFailed,
    /// Archive contained no directory entry
    ExtractionEmptyArchive,
    /// Scratch directory could not be allocated
    ScratchDirFailed,

    // =========================================================================
    // Verification Errors (E300-E399)
    // =========================================================================
    /// Verification command could not be started
    VerificationLaunchFailed,
    /// Verification command exited non-zero
    VerificationFailed,
    /// Verification command exceeded its deadline
    VerificationTimeout,

    // =========================================================================
    // Internal Errors (E500-E599)
    // =========================================================================
    /// Background task panicked or was cancelled
    InternalTaskFailed,
    /// Logging could not be initialized
    InternalLoggingError,
}

impl ErrorCode {
    /// Returns the numeric error code (without prefix).
    #[must_use]
    pub const fn code_number(&self) -> u16 {
        match self {
            Self::ConfigReadError => 1,
            Self::ConfigParseError => 2,
            Self::ConfigValidationError => 3,
            Self::ConfigEnvError => 4,
            Self::ConfigMissingToken => 5,

            Self::ReferenceNotFound => 100,
            Self::TransportFailed => 102,
            Self::TransportNotGzip => 103,
            Self::PublishFailed => 104,

            Self::UnsafeArchivePath => 200,
            Self::UnsupportedArchiveEntry => 201,
            Self::ExtractionFailed => 202,
            Self::ExtractionEmptyArchive => 203,
            Self::ScratchDirFailed => 204,

            Self::VerificationLaunchFailed => 300,
            Self::VerificationFailed => 301,
            Self::VerificationTimeout => 302,

            Self::InternalTaskFailed => 500,
            Self::InternalLoggingError => 501,
        }
    }

    /// Returns the formatted error code string (e.g., "CVR-E001").
    #[must_use]
    pub fn code_string(&self) -> String {
        format!("CVR-E{:03}", self.code_number())
    }

    /// Looks up a code by its string form (`CVR-E200`, case-insensitive).
    #[must_use]
    pub fn from_code_string(code: &str) -> Option<Self> {
        let code = code.trim();
        Self::all()
            .iter()
            .copied()
            .find(|c| c.code_string().eq_ignore_ascii_case(code))
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self.code_number() {
            1..=99 => ErrorCategory::Config,
            100..=199 => ErrorCategory::Hosting,
            200..=299 => ErrorCategory::Snapshot,
            300..=399 => ErrorCategory::Verification,
            _ => ErrorCategory::Internal,
        }
    }

    /// Returns the full error entry with all metadata.
    #[must_use]
    pub fn entry(&self) -> ErrorEntry {
        ErrorEntry {
            code: self.code_string(),
            category: self.category(),
            message: self.message().to_string(),
            remediation: self
                .remediation()
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }

    /// Returns the error message template.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::ConfigReadError => "Failed to read configuration file",
            Self::ConfigParseError => "Configuration file contains invalid TOML syntax",
            Self::ConfigValidationError => "Configuration contains invalid values",
            Self::ConfigEnvError => "Environment variable has invalid value",
            Self::ConfigMissingToken => "No hosting API token was supplied",

            Self::ReferenceNotFound => "Reference could not be resolved to a commit",
            Self::TransportFailed => "Snapshot archive download failed",
            Self::TransportNotGzip => "Snapshot archive is not gzip compressed",
            Self::PublishFailed => "Commit status could not be published",

            Self::UnsafeArchivePath => "Archive entry path escapes the destination directory",
            Self::UnsupportedArchiveEntry => "Archive entry is not a directory or regular file",
            Self::ExtractionFailed => "Snapshot extraction failed",
            Self::ExtractionEmptyArchive => "Snapshot archive contains no top-level directory",
            Self::ScratchDirFailed => "Scratch directory could not be created",

            Self::VerificationLaunchFailed => "Verification command could not be started",
            Self::VerificationFailed => "Verification command exited with a failure status",
            Self::VerificationTimeout => "Verification command exceeded its deadline",

            Self::InternalTaskFailed => "Background task failed unexpectedly",
            Self::InternalLoggingError => "Logging could not be initialized",
        }
    }

    /// Returns remediation steps for this error.
    #[must_use]
    pub fn remediation(&self) -> &'static [&'static str] {
        match self {
            Self::ConfigReadError => &[
                "Check that the file passed with --config exists and is readable",
                "Remove the file to fall back to defaults and CVR_* variables",
            ],
            Self::ConfigParseError => &[
                "Validate the TOML syntax of the configuration file",
                "Run `cvr config` to see which file is loaded",
            ],
            Self::ConfigValidationError => &[
                "Run `cvr config` to print the effective configuration and its sources",
                "Fix the values reported as errors",
            ],
            Self::ConfigEnvError => &[
                "Check the CVR_* environment variables for typos or out-of-range values",
            ],
            Self::ConfigMissingToken => &[
                "Set CVR_TOKEN or pass --token",
                "The token needs read access to contents and write access to commit statuses",
            ],
            Self::ReferenceNotFound => &[
                "Check the branch, tag or SHA spelling",
                "Make sure the token can read the repository",
            ],
            Self::TransportFailed => &[
                "Retry the run; archive download links are short-lived",
                "Raise http_timeout_secs for large repositories",
            ],
            Self::TransportNotGzip => &[
                "Check that api_base_url points at a GitHub-compatible API",
            ],
            Self::PublishFailed => &[
                "Make sure the token can write commit statuses",
                "The commit stays eligible and will be verified again on the next poll",
            ],
            Self::UnsafeArchivePath => &[
                "Inspect the repository for entries with absolute or '..' paths",
                "The archive was rejected without writing the offending entry",
            ],
            Self::UnsupportedArchiveEntry => &[
                "Remove symlinks, hard links or special files from the repository tree",
            ],
            Self::ExtractionFailed => &[
                "Check free disk space under work_root",
                "Retry the run if the archive on disk was truncated",
            ],
            Self::ExtractionEmptyArchive => &[
                "Check that the reference points at a commit with a non-empty tree",
            ],
            Self::ScratchDirFailed => &[
                "Check that work_root exists and is writable",
            ],
            Self::VerificationLaunchFailed => &[
                "Check that the verification command is installed and on PATH",
                "Check execute permissions on the command",
            ],
            Self::VerificationFailed => &[
                "Inspect the forwarded command output for the failing step",
            ],
            Self::VerificationTimeout => &[
                "Raise verify_timeout_secs or set it to 0 to disable the deadline",
            ],
            Self::InternalTaskFailed => &["Re-run with --verbose and report the log"],
            Self::InternalLoggingError => &[
                "Check CVR_LOG_LEVEL and CVR_LOG_FILE",
            ],
        }
    }

    /// All error codes, in numeric order.
    #[must_use]
    pub fn all() -> &'static [ErrorCode] {
        &[
            Self::ConfigReadError,
            Self::ConfigParseError,
            Self::ConfigValidationError,
            Self::ConfigEnvError,
            Self::ConfigMissingToken,
            Self::ReferenceNotFound,
            Self::TransportFailed,
            Self::TransportNotGzip,
            Self::PublishFailed,
            Self::UnsafeArchivePath,
            Self::UnsupportedArchiveEntry,
            Self::ExtractionFailed,
            Self::ExtractionEmptyArchive,
            Self::ScratchDirFailed,
            Self::VerificationLaunchFailed,
            Self::VerificationFailed,
            Self::VerificationTimeout,
            Self::InternalTaskFailed,
            Self::InternalLoggingError,
        ]
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code_string(), self.message())
    }
}

/// Error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Configuration and environment errors (E001-E099)
    Config,
    /// Hosting API, archive transport and status errors (E100-E199)
    Hosting,
    /// Archive extraction and scratch storage errors (E200-E299)
    Snapshot,
    /// Verification command errors (E300-E399)
    Verification,
    /// Internal/unexpected errors (E500-E599)
    Internal,
}

impl ErrorCategory {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Config => "Configuration",
            Self::Hosting => "Hosting",
            Self::Snapshot => "Snapshot",
            Self::Verification => "Verification",
            Self::Internal => "Internal",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Complete error entry with all metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    /// Error code string (e.g., "CVR-E001")
    pub code: String,
    pub category: ErrorCategory,
    pub message: String,
    pub remediation: Vec<String>,
}

impl ErrorEntry {
    /// Formats the error for display with full remediation steps.
    #[must_use]
    pub fn format_full(&self) -> String {
        let mut output = format!("[{}] {}\n\n", self.code, self.message);

        if !self.remediation.is_empty() {
            output.push_str("Remediation steps:\n");
            for (i, step) in self.remediation.iter().enumerate() {
                output.push_str(&format!("  {}. {}\n", i + 1, step));
            }
        }

        output
    }

    /// Formats the error as a single line.
    #[must_use]
    pub fn format_brief(&self) -> String {
        format!("[{}] {}", self.code, self.message)
    }
}

impl fmt::Display for ErrorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_brief())
    }
}
