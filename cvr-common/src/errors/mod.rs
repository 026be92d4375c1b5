//! Error types and the error catalog for the Commit Verification Runner.
//!
//! `PipelineError` is what every stage of a run returns; each variant maps to
//! a stable [`ErrorCode`] so reports and CLI output stay greppable.
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

pub mod catalog;

pub use catalog::{ErrorCategory, ErrorCode, ErrorEntry};

use std::io;
use thiserror::Error;

/// Errors reported by a [`HostingApi`](crate::hosting::HostingApi)
/// implementation.
#[derive(Debug, Error)]
pub enum HostingError {
    /// The addressed object (reference, commit, repository) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The service answered with an unexpected HTTP status.
    #[error("unexpected HTTP status {code}: {message}")]
    Status { code: u16, message: String },

    /// The request never produced a response.
    #[error("request failed: {0}")]
    Network(String),

    /// The response body could not be decoded.
    #[error("invalid response body: {0}")]
    Decode(String),
}

/// Errors that abort a pipeline stage.
///
/// A non-zero exit of the verification command is not an error; it is the
/// `Verdict::Failure` outcome.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("reference '{reference}' not found in {repo}")]
    ReferenceNotFound { repo: String, reference: String },

    #[error("transport error: {message}")]
    Transport {
        message: String,
        /// Set when the body was received but is not gzip framed.
        not_gzip: bool,
    },

    #[error("unsafe archive entry '{path}': {reason}")]
    UnsafePath {
        path: String,
        reason: String,
        /// Set for symlinks, hard links and special files.
        unsupported_kind: bool,
    },

    #[error("extraction failed: {message}")]
    Extraction {
        message: String,
        #[source]
        source: Option<io::Error>,
    },

    #[error("archive contains no top-level directory")]
    EmptyArchive,

    #[error("failed to create scratch directory under {root}: {source}")]
    Scratch {
        root: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to launch verification command '{command}': {source}")]
    Launch {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to publish status for {sha}: {message}")]
    Publish { sha: String, message: String },

    #[error("background task failed: {0}")]
    Task(String),
}

impl PipelineError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            not_gzip: false,
        }
    }

    pub fn unsafe_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnsafePath {
            path: path.into(),
            reason: reason.into(),
            unsupported_kind: false,
        }
    }

    pub fn unsupported_entry(path: impl Into<String>, kind: impl std::fmt::Display) -> Self {
        Self::UnsafePath {
            path: path.into(),
            reason: format!("entry kind {kind} is not materialized"),
            unsupported_kind: true,
        }
    }

    pub fn extraction(message: impl Into<String>, source: io::Error) -> Self {
        Self::Extraction {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Stable catalog code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ReferenceNotFound { .. } => ErrorCode::ReferenceNotFound,
            Self::Transport { not_gzip: true, .. } => ErrorCode::TransportNotGzip,
            Self::Transport { .. } => ErrorCode::TransportFailed,
            Self::UnsafePath {
                unsupported_kind: true,
                ..
            } => ErrorCode::UnsupportedArchiveEntry,
            Self::UnsafePath { .. } => ErrorCode::UnsafeArchivePath,
            Self::Extraction { .. } => ErrorCode::ExtractionFailed,
            Self::EmptyArchive => ErrorCode::ExtractionEmptyArchive,
            Self::Scratch { .. } => ErrorCode::ScratchDirFailed,
            Self::Launch { .. } => ErrorCode::VerificationLaunchFailed,
            Self::Publish { .. } => ErrorCode::PublishFailed,
            Self::Task(_) => ErrorCode::InternalTaskFailed,
        }
    }

    /// Short label used in published status descriptions.
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::ReferenceNotFound { .. } => "reference not found",
            Self::Transport { .. } => "archive download failed",
            Self::UnsafePath { .. } => "unsafe archive entry",
            Self::Extraction { .. } | Self::EmptyArchive => "extraction failed",
            Self::Scratch { .. } => "scratch directory unavailable",
            Self::Launch { .. } => "command could not start",
            Self::Publish { .. } => "status publish failed",
            Self::Task(_) => "internal error",
        }
    }
}
