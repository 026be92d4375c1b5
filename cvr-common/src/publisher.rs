//! Status publishing.
//!
//! Records are only ever appended. Publishing never alters the outcome it
//! reports; a failure here is surfaced as [`PipelineError::Publish`].

use std::sync::Arc;

use tracing::{error, info};

use crate::errors::PipelineError;
use crate::hosting::HostingApi;
use crate::types::{CommitSha, NewStatus, RepoSlug, StatusRecord, StatusState, VerificationOutcome};
use crate::util::truncate_chars;

/// Longest description the hosting service accepts.
pub const MAX_DESCRIPTION_CHARS: usize = 140;

pub struct StatusPublisher {
    hosting: Arc<dyn HostingApi>,
    context: String,
    target_url: Option<String>,
}

impl StatusPublisher {
    pub fn new(hosting: Arc<dyn HostingApi>, context: impl Into<String>) -> Self {
        Self {
            hosting,
            context: context.into(),
            target_url: None,
        }
    }

    #[must_use]
    pub fn with_target_url(mut self, target_url: Option<String>) -> Self {
        self.target_url = target_url.filter(|url| !url.trim().is_empty());
        self
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    /// Append the final record for `outcome.sha`.
    pub fn publish(
        &self,
        repo: &RepoSlug,
        outcome: &VerificationOutcome,
    ) -> Result<StatusRecord, PipelineError> {
        let target_url = outcome.target_url.clone().or_else(|| self.target_url.clone());
        self.create(
            repo,
            &outcome.sha,
            outcome.verdict.status_state(),
            &outcome.description,
            target_url,
        )
    }

    /// Append a `pending` record before verification starts.
    pub fn mark_pending(&self, repo: &RepoSlug, sha: &CommitSha) -> Result<StatusRecord, PipelineError> {
        self.create(
            repo,
            sha,
            StatusState::Pending,
            "Verification in progress",
            self.target_url.clone(),
        )
    }

    fn create(
        &self,
        repo: &RepoSlug,
        sha: &CommitSha,
        state: StatusState,
        description: &str,
        target_url: Option<String>,
    ) -> Result<StatusRecord, PipelineError> {
        let status = NewStatus {
            state,
            target_url,
            description: Some(truncate_chars(description, MAX_DESCRIPTION_CHARS)),
            context: self.context.clone(),
        };
        match self.hosting.create_status(repo, sha, &status) {
            Ok(record) => {
                info!(%repo, sha = %sha.short(), state = %state, context = %self.context, "status published");
                Ok(record)
            }
            Err(e) => {
                error!(%repo, sha = %sha.short(), state = %state, error = %e, "status publish failed");
                Err(PipelineError::Publish {
                    sha: sha.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }
}
