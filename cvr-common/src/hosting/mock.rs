//! Deterministic in-memory hosting service for tests.
//!
//! Holds commits, references and status records in memory, appends created
//! statuses the way the real service does, and records every call so tests
//! can assert on the exact sequence the pipeline issued.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use super::HostingApi;
use crate::errors::HostingError;
use crate::types::{CommitSha, CommitSummary, NewStatus, Reference, RepoSlug, StatusRecord};

/// One call received by [`MockHosting`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostingCall {
    ResolveRef(String),
    ArchiveUrl(CommitSha),
    ListCommits(u32),
    ListStatuses(CommitSha),
    CreateStatus(CommitSha, NewStatus),
}

#[derive(Debug, Default)]
struct MockState {
    commits: Vec<CommitSummary>,
    refs: HashMap<String, CommitSha>,
    statuses: HashMap<CommitSha, Vec<StatusRecord>>,
    fail_list_commits: bool,
    fail_statuses_for: HashSet<CommitSha>,
    fail_archive_for: HashSet<CommitSha>,
    fail_publish: bool,
    archive_base: Option<String>,
    calls: Vec<HostingCall>,
}

/// Cloneable handle; clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockHosting {
    state: Arc<Mutex<MockState>>,
}

impl MockHosting {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().expect("mock hosting mutex poisoned")
    }

    /// Append a commit to the default-branch listing (listing order is
    /// insertion order). The SHA also resolves to itself.
    pub fn with_commit(self, sha: &str) -> Self {
        {
            let mut state = self.lock();
            state.commits.push(CommitSummary::new(sha));
            state.refs.insert(sha.to_string(), CommitSha::new(sha));
        }
        self
    }

    /// Make `reference` resolve to `sha`.
    pub fn with_ref(self, reference: &str, sha: &str) -> Self {
        self.lock()
            .refs
            .insert(reference.to_string(), CommitSha::new(sha));
        self
    }

    /// Stop resolving `reference`, e.g. a listed commit that was since
    /// force-pushed away.
    pub fn forget_ref(&self, reference: &str) {
        self.lock().refs.remove(reference);
    }

    /// Pre-seed a status record on `sha`.
    pub fn with_status(self, sha: &str, record: StatusRecord) -> Self {
        self.lock()
            .statuses
            .entry(CommitSha::new(sha))
            .or_default()
            .push(record);
        self
    }

    /// Hand out archive links under `base` (e.g. a local test server)
    /// instead of the unreachable `mock://` scheme.
    pub fn with_archive_base(self, base: &str) -> Self {
        self.lock().archive_base = Some(base.trim_end_matches('/').to_string());
        self
    }

    pub fn fail_list_commits(&self, fail: bool) {
        self.lock().fail_list_commits = fail;
    }

    pub fn fail_statuses_for(&self, sha: &str) {
        self.lock().fail_statuses_for.insert(CommitSha::new(sha));
    }

    pub fn fail_archive_for(&self, sha: &str) {
        self.lock().fail_archive_for.insert(CommitSha::new(sha));
    }

    pub fn fail_publish(&self, fail: bool) {
        self.lock().fail_publish = fail;
    }

    /// Snapshot of all calls received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<HostingCall> {
        self.lock().calls.clone()
    }

    /// Status records currently stored for `sha`, oldest first.
    #[must_use]
    pub fn statuses_for(&self, sha: &str) -> Vec<StatusRecord> {
        self.lock()
            .statuses
            .get(&CommitSha::new(sha))
            .cloned()
            .unwrap_or_default()
    }

    /// SHAs that received a `create_status` call, in call order.
    #[must_use]
    pub fn published_shas(&self) -> Vec<CommitSha> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                HostingCall::CreateStatus(sha, _) => Some(sha.clone()),
                _ => None,
            })
            .collect()
    }
}

impl HostingApi for MockHosting {
    fn resolve_ref(
        &self,
        _repo: &RepoSlug,
        reference: &Reference,
    ) -> Result<CommitSha, HostingError> {
        let mut state = self.lock();
        state
            .calls
            .push(HostingCall::ResolveRef(reference.as_str().to_string()));
        state
            .refs
            .get(reference.as_str())
            .cloned()
            .ok_or_else(|| HostingError::NotFound(format!("reference {reference}")))
    }

    fn archive_url(&self, repo: &RepoSlug, sha: &CommitSha) -> Result<String, HostingError> {
        let mut state = self.lock();
        state.calls.push(HostingCall::ArchiveUrl(sha.clone()));
        if state.fail_archive_for.contains(sha) {
            return Err(HostingError::Status {
                code: 502,
                message: "archive service unavailable".to_string(),
            });
        }
        Ok(match &state.archive_base {
            Some(base) => format!("{base}/tarball/{sha}"),
            None => format!("mock://{repo}/tarball/{sha}"),
        })
    }

    fn list_commits(
        &self,
        _repo: &RepoSlug,
        per_page: u32,
    ) -> Result<Vec<CommitSummary>, HostingError> {
        let mut state = self.lock();
        state.calls.push(HostingCall::ListCommits(per_page));
        if state.fail_list_commits {
            return Err(HostingError::Network("connection reset".to_string()));
        }
        Ok(state
            .commits
            .iter()
            .take(per_page as usize)
            .cloned()
            .collect())
    }

    fn list_statuses(
        &self,
        _repo: &RepoSlug,
        sha: &CommitSha,
    ) -> Result<Vec<StatusRecord>, HostingError> {
        let mut state = self.lock();
        state.calls.push(HostingCall::ListStatuses(sha.clone()));
        if state.fail_statuses_for.contains(sha) {
            return Err(HostingError::Status {
                code: 500,
                message: "statuses unavailable".to_string(),
            });
        }
        Ok(state.statuses.get(sha).cloned().unwrap_or_default())
    }

    fn create_status(
        &self,
        _repo: &RepoSlug,
        sha: &CommitSha,
        status: &NewStatus,
    ) -> Result<StatusRecord, HostingError> {
        let mut state = self.lock();
        state
            .calls
            .push(HostingCall::CreateStatus(sha.clone(), status.clone()));
        if state.fail_publish {
            return Err(HostingError::Status {
                code: 403,
                message: "Resource not accessible by integration".to_string(),
            });
        }
        let record = StatusRecord {
            context: status.context.clone(),
            state: status.state,
            target_url: status.target_url.clone(),
            description: status.description.clone(),
            created_at: Some(chrono::Utc::now()),
        };
        state
            .statuses
            .entry(sha.clone())
            .or_default()
            .push(record.clone());
        Ok(record)
    }
}
