//! Commit Verification Runner - shared library
//!
//! Resolves commits on a hosting service, extracts their snapshots into
//! private scratch directories, runs the verification command, and records
//! the verdict as a commit status.

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod executor;
pub mod extract;
pub mod hosting;
pub mod logging;
pub mod pipeline;
pub mod publisher;
pub mod resolver;
pub mod scheduler;
pub mod scratch;
pub mod testing;
pub mod transport;
pub mod types;
pub mod util;

pub use config::{ConfigError, ConfigSource, RunnerConfig, Sourced};
pub use errors::{ErrorCategory, ErrorCode, ErrorEntry, HostingError, PipelineError};
pub use executor::{CommandSpec, ProcessVerifier, ScriptStep, ScriptedVerifier, Verifier};
pub use extract::{Snapshot, extract_snapshot};
pub use hosting::{GitHubClient, HostingApi, HostingCall, MockHosting};
pub use logging::{LogConfig, LogFormat, init_logging};
pub use pipeline::{CommitRun, Pipeline, PipelineSettings, RunFailure};
pub use publisher::StatusPublisher;
pub use resolver::ReferenceResolver;
pub use scheduler::{CommitSelection, PollReport, PollScheduler};
pub use scratch::ScratchDir;
pub use transport::{ArchiveTransport, HttpArchiveTransport, MemoryTransport};
pub use types::{
    CommitSha, CommitSummary, ExitOutcome, Reference, RepoSlug, StatusRecord, StatusState,
    Verdict, VerificationOutcome,
};
pub use util::mask_sensitive_command;
