//! One commit through resolve, fetch, extract, verify and publish.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{error, info, info_span, warn};

use crate::config::RunnerConfig;
use crate::errors::{ErrorCode, PipelineError};
use crate::executor::Verifier;
use crate::extract::extract_snapshot;
use crate::hosting::HostingApi;
use crate::publisher::StatusPublisher;
use crate::resolver::ReferenceResolver;
use crate::scratch::ScratchDir;
use crate::transport::ArchiveTransport;
use crate::types::{CommitSha, ExitOutcome, Reference, RepoSlug, Verdict, VerificationOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub context: String,
    pub target_url: Option<String>,
    pub work_root: PathBuf,
    pub keep_workdirs: bool,
    pub publish_pending: bool,
}

impl PipelineSettings {
    pub fn from_config(config: &RunnerConfig) -> Self {
        Self {
            context: config.context.value.clone(),
            target_url: config.target_url.value.clone(),
            work_root: config.work_root.value.clone(),
            keep_workdirs: config.keep_workdirs.value,
            publish_pending: config.publish_pending.value,
        }
    }
}

/// A failure recorded in a run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunFailure {
    pub code: ErrorCode,
    pub message: String,
}

impl From<&PipelineError> for RunFailure {
    fn from(err: &PipelineError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

/// Report of one commit's run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitRun {
    pub sha: CommitSha,
    pub verdict: Verdict,
    pub description: String,
    /// `None` when the command never ran to completion.
    pub exit: Option<ExitOutcome>,
    /// Why the run could not complete, if it did not.
    pub failure: Option<RunFailure>,
    /// Code of a failed run: the stage error, or the verification outcome
    /// when the command ran. `None` for a passing run.
    pub code: Option<ErrorCode>,
    /// Set when the final status could not be recorded. The commit then stays
    /// eligible and is verified again on the next poll.
    pub publish_error: Option<RunFailure>,
    pub elapsed_ms: u64,
}

impl CommitRun {
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Success
    }

    pub fn published(&self) -> bool {
        self.publish_error.is_none()
    }
}

fn exit_code(exit: &ExitOutcome) -> Option<ErrorCode> {
    match exit {
        ExitOutcome::Passed => None,
        ExitOutcome::Failed { .. } => Some(ErrorCode::VerificationFailed),
        ExitOutcome::TimedOut { .. } => Some(ErrorCode::VerificationTimeout),
    }
}

pub struct Pipeline {
    resolver: ReferenceResolver,
    transport: Arc<dyn ArchiveTransport>,
    verifier: Arc<dyn Verifier>,
    publisher: StatusPublisher,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        hosting: Arc<dyn HostingApi>,
        transport: Arc<dyn ArchiveTransport>,
        verifier: Arc<dyn Verifier>,
        settings: PipelineSettings,
    ) -> Self {
        let publisher = StatusPublisher::new(Arc::clone(&hosting), settings.context.clone())
            .with_target_url(settings.target_url.clone());
        Self {
            resolver: ReferenceResolver::new(hosting),
            transport,
            verifier,
            publisher,
            settings,
        }
    }

    pub fn context(&self) -> &str {
        self.publisher.context()
    }

    /// Resolve `reference` and run the resulting commit. A resolution failure
    /// is returned as-is; nothing is published because no commit is known.
    pub fn check_reference(
        &self,
        repo: &RepoSlug,
        reference: &Reference,
    ) -> Result<CommitRun, PipelineError> {
        let sha = self.resolver.resolve(repo, reference)?;
        info!(%repo, %reference, sha = %sha, "checking reference");
        Ok(self.run_commit(repo, &sha))
    }

    /// Run `sha` end to end and publish the result. Never fails: every error
    /// is folded into the report and, where possible, a `failure` status.
    pub fn run_commit(&self, repo: &RepoSlug, sha: &CommitSha) -> CommitRun {
        self.run(repo, sha, false)
    }

    /// Like [`Pipeline::run_commit`], for a SHA taken from a commit listing:
    /// the SHA is resolved first, so a commit that disappeared from the
    /// repository since the listing gets a `failure` status instead of a
    /// download attempt.
    pub fn run_listed(&self, repo: &RepoSlug, sha: &CommitSha) -> CommitRun {
        self.run(repo, sha, true)
    }

    fn run(&self, repo: &RepoSlug, sha: &CommitSha, resolve: bool) -> CommitRun {
        let span = info_span!("commit", %repo, sha = %sha.short());
        let _entered = span.enter();
        let started = Instant::now();

        if self.settings.publish_pending
            && let Err(e) = self.publisher.mark_pending(repo, sha)
        {
            warn!(error = %e, "could not mark commit pending");
        }

        let (outcome, exit, failure) = match self.verify(repo, sha, resolve) {
            Ok(exit) => (
                VerificationOutcome::from_exit(sha.clone(), &exit),
                Some(exit),
                None,
            ),
            Err(e) => {
                error!(code = %e.code().code_string(), error = %e, "run could not complete");
                (
                    VerificationOutcome::incomplete(sha.clone(), e.kind_label()),
                    None,
                    Some(RunFailure::from(&e)),
                )
            }
        };

        let publish_error = self
            .publisher
            .publish(repo, &outcome)
            .err()
            .map(|e| RunFailure::from(&e));

        let code = match (&failure, &exit) {
            (Some(failure), _) => Some(failure.code),
            (None, Some(exit)) => exit_code(exit),
            (None, None) => None,
        };
        let run = CommitRun {
            sha: sha.clone(),
            verdict: outcome.verdict,
            description: outcome.description,
            exit,
            failure,
            code,
            publish_error,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            verdict = ?run.verdict,
            published = run.published(),
            elapsed_ms = run.elapsed_ms,
            "commit run finished"
        );
        run
    }

    /// (Resolve,) scratch, fetch, extract, verify. The scratch directory is
    /// released when this returns, on every path.
    fn verify(
        &self,
        repo: &RepoSlug,
        sha: &CommitSha,
        resolve: bool,
    ) -> Result<ExitOutcome, PipelineError> {
        let sha = if resolve {
            let resolved = self.resolver.resolve(repo, &Reference::from(sha))?;
            if &resolved != sha {
                warn!(listed = %sha, resolved = %resolved, "listed commit resolved to another SHA");
            }
            resolved
        } else {
            sha.clone()
        };
        let scratch = ScratchDir::create(&self.settings.work_root, &sha, self.settings.keep_workdirs)?;
        let stream = self.transport.fetch(repo, &sha)?;
        let snapshot = extract_snapshot(stream, scratch.path())?;
        info!(root = %snapshot.root.display(), files = snapshot.files, "verifying snapshot");
        self.verifier.run(&snapshot.root)
    }
}
