//! Poll scheduler: find commits without a status under our context and run
//! them through the pipeline, one at a time.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::errors::PipelineError;
use crate::hosting::HostingApi;
use crate::pipeline::{CommitRun, Pipeline};
use crate::types::{CommitSha, RepoSlug, StatusKey};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedCommit {
    pub sha: CommitSha,
    pub reason: String,
}

/// Partition of one commit listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommitSelection {
    pub listed: usize,
    /// In listing order, newest first.
    pub eligible: Vec<CommitSha>,
    pub already_recorded: Vec<CommitSha>,
    /// Commits whose statuses could not be read; retried next cycle.
    pub skipped: Vec<SkippedCommit>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollReport {
    pub listed: usize,
    pub already_recorded: usize,
    pub skipped: Vec<SkippedCommit>,
    pub runs: Vec<CommitRun>,
}

impl PollReport {
    pub fn passed(&self) -> usize {
        self.runs.iter().filter(|r| r.passed()).count()
    }

    pub fn failed(&self) -> usize {
        self.runs.len() - self.passed()
    }

    pub fn unpublished(&self) -> usize {
        self.runs.iter().filter(|r| !r.published()).count()
    }
}

pub struct PollScheduler {
    hosting: Arc<dyn HostingApi>,
    pipeline: Pipeline,
    page_size: u32,
}

impl PollScheduler {
    pub fn new(hosting: Arc<dyn HostingApi>, pipeline: Pipeline, page_size: u32) -> Self {
        Self {
            hosting,
            pipeline,
            page_size: page_size.clamp(1, crate::config::MAX_PAGE_SIZE),
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// List recent commits and keep those with no record under the context.
    pub fn select_commits(&self, repo: &RepoSlug) -> Result<CommitSelection, PipelineError> {
        let commits = self
            .hosting
            .list_commits(repo, self.page_size)
            .map_err(|e| PipelineError::transport(format!("listing commits of {repo}: {e}")))?;

        let context = self.pipeline.context();
        let mut selection = CommitSelection {
            listed: commits.len(),
            ..CommitSelection::default()
        };
        for commit in commits {
            let sha = commit.sha;
            match self.hosting.list_statuses(repo, &sha) {
                Ok(records) if StatusKey::new(&sha, context).is_recorded(&records) => {
                    debug!(sha = %sha.short(), "already recorded");
                    selection.already_recorded.push(sha);
                }
                Ok(_) => selection.eligible.push(sha),
                Err(e) => {
                    warn!(sha = %sha.short(), error = %e, "could not list statuses, skipping this cycle");
                    selection.skipped.push(SkippedCommit {
                        sha,
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(selection)
    }

    /// One cycle. Only the commit listing itself can fail the cycle; every
    /// per-commit problem ends up in the report.
    pub fn poll_once(&self, repo: &RepoSlug) -> Result<PollReport, PipelineError> {
        let selection = self.select_commits(repo)?;
        info!(
            %repo,
            listed = selection.listed,
            eligible = selection.eligible.len(),
            already_recorded = selection.already_recorded.len(),
            skipped = selection.skipped.len(),
            "poll cycle started"
        );

        let runs: Vec<CommitRun> = selection
            .eligible
            .iter()
            .map(|sha| self.pipeline.run_listed(repo, sha))
            .collect();

        let report = PollReport {
            listed: selection.listed,
            already_recorded: selection.already_recorded.len(),
            skipped: selection.skipped,
            runs,
        };
        info!(
            %repo,
            verified = report.runs.len(),
            passed = report.passed(),
            failed = report.failed(),
            unpublished = report.unpublished(),
            "poll cycle finished"
        );
        Ok(report)
    }
}
