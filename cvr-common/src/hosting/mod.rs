//! Hosting-service adapter.
//!
//! The pipeline only ever talks to the hosting service through
//! [`HostingApi`], so the GitHub client and the in-memory mock are
//! interchangeable.

pub mod github;
pub mod mock;

pub use github::GitHubClient;
pub use mock::{HostingCall, MockHosting};

use crate::errors::HostingError;
use crate::types::{CommitSha, CommitSummary, NewStatus, Reference, RepoSlug, StatusRecord};

/// Operations consumed from the hosting service.
pub trait HostingApi: Send + Sync {
    /// Resolve a branch, tag or SHA to the commit it names.
    fn resolve_ref(&self, repo: &RepoSlug, reference: &Reference)
    -> Result<CommitSha, HostingError>;

    /// Short-lived download location of the tarball for `sha`.
    fn archive_url(&self, repo: &RepoSlug, sha: &CommitSha) -> Result<String, HostingError>;

    /// Most recent commits on the default branch, newest first.
    fn list_commits(
        &self,
        repo: &RepoSlug,
        per_page: u32,
    ) -> Result<Vec<CommitSummary>, HostingError>;

    /// Status records attached to `sha`.
    fn list_statuses(
        &self,
        repo: &RepoSlug,
        sha: &CommitSha,
    ) -> Result<Vec<StatusRecord>, HostingError>;

    /// Append a status record to `sha`.
    fn create_status(
        &self,
        repo: &RepoSlug,
        sha: &CommitSha,
        status: &NewStatus,
    ) -> Result<StatusRecord, HostingError>;
}
