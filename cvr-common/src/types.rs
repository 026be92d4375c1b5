//! Common types used across CVR components.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Repository identity on the hosting service (`owner/name`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoSlug {
    pub owner: String,
    pub name: String,
}

impl RepoSlug {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for RepoSlug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Symbolic pointer into repository history: a branch, tag or explicit SHA.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference(pub String);

impl Reference {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&CommitSha> for Reference {
    fn from(sha: &CommitSha) -> Self {
        Self(sha.0.clone())
    }
}

/// Content identifier naming an exact tree state.
///
/// Once resolved it never changes, which makes it the idempotency key for
/// published statuses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitSha(pub String);

impl CommitSha {
    pub fn new(sha: impl Into<String>) -> Self {
        Self(sha.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form used in logs and scratch directory names.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(7)
            .map(|(idx, _)| idx)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }

    /// True when the value is a plausible hex object id.
    pub fn is_well_formed(&self) -> bool {
        !self.0.is_empty() && self.0.len() <= 64 && self.0.chars().all(|c| c.is_ascii_hexdigit())
    }
}

impl std::fmt::Display for CommitSha {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One row of the commit listing on the default branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSummary {
    pub sha: CommitSha,
    /// First line of the commit message.
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
}

impl CommitSummary {
    pub fn new(sha: impl Into<String>) -> Self {
        Self {
            sha: CommitSha::new(sha),
            message: String::new(),
            author: None,
            date: None,
        }
    }
}

/// State of a commit status record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusState {
    Pending,
    Success,
    Failure,
    Error,
}

impl StatusState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for StatusState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status record as stored by the hosting service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub context: String,
    pub state: StatusState,
    #[serde(default)]
    pub target_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Body of a status creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStatus {
    pub state: StatusState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub context: String,
}

/// Idempotency key for verification: a commit plus the fixed context.
///
/// The mere presence of a record for the key marks the commit as handled,
/// whatever state that record carries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatusKey<'a> {
    pub sha: &'a CommitSha,
    pub context: &'a str,
}

impl<'a> StatusKey<'a> {
    pub fn new(sha: &'a CommitSha, context: &'a str) -> Self {
        Self { sha, context }
    }

    /// Whether `records` (all belonging to `self.sha`) already contain a
    /// record for this key.
    pub fn is_recorded(&self, records: &[StatusRecord]) -> bool {
        records.iter().any(|record| record.context == self.context)
    }
}

/// How the verification command finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ExitOutcome {
    /// Exited with status zero.
    Passed,
    /// Exited non-zero, or was terminated by a signal (`exit_code: None`).
    Failed { exit_code: Option<i32> },
    /// Killed after exceeding the configured deadline.
    TimedOut { after_secs: u64 },
}

impl ExitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Passed)
    }

    pub fn timed_out(after: Duration) -> Self {
        Self::TimedOut {
            after_secs: after.as_secs(),
        }
    }
}

/// Final pass/fail of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Success,
    Failure,
}

impl Verdict {
    pub fn status_state(&self) -> StatusState {
        match self {
            Self::Success => StatusState::Success,
            Self::Failure => StatusState::Failure,
        }
    }
}

impl From<&ExitOutcome> for Verdict {
    fn from(outcome: &ExitOutcome) -> Self {
        if outcome.is_success() {
            Self::Success
        } else {
            Self::Failure
        }
    }
}

/// What gets published for a commit once its run finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub sha: CommitSha,
    pub verdict: Verdict,
    pub description: String,
    #[serde(default)]
    pub target_url: Option<String>,
}

impl VerificationOutcome {
    pub fn from_exit(sha: CommitSha, exit: &ExitOutcome) -> Self {
        let description = match exit {
            ExitOutcome::Passed => "Verification passed".to_string(),
            ExitOutcome::Failed {
                exit_code: Some(code),
            } => format!("Verification failed (exit code {code})"),
            ExitOutcome::Failed { exit_code: None } => {
                "Verification failed (terminated by signal)".to_string()
            }
            ExitOutcome::TimedOut { after_secs } => {
                format!("Verification timed out after {after_secs}s")
            }
        };
        Self {
            sha,
            verdict: Verdict::from(exit),
            description,
            target_url: None,
        }
    }

    /// Outcome for a run that could not complete (fetch, extraction or
    /// launch failure).
    pub fn incomplete(sha: CommitSha, reason: impl std::fmt::Display) -> Self {
        Self {
            sha,
            verdict: Verdict::Failure,
            description: format!("Verification could not complete: {reason}"),
            target_url: None,
        }
    }
}
