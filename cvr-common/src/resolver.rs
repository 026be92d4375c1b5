//! Reference resolution: branch, tag or SHA to an immutable commit id.

use std::sync::Arc;

use tracing::debug;

use crate::errors::{HostingError, PipelineError};
use crate::hosting::HostingApi;
use crate::types::{CommitSha, Reference, RepoSlug};

pub struct ReferenceResolver {
    hosting: Arc<dyn HostingApi>,
}

impl ReferenceResolver {
    pub fn new(hosting: Arc<dyn HostingApi>) -> Self {
        Self { hosting }
    }

    pub fn resolve(
        &self,
        repo: &RepoSlug,
        reference: &Reference,
    ) -> Result<CommitSha, PipelineError> {
        let not_found = || PipelineError::ReferenceNotFound {
            repo: repo.to_string(),
            reference: reference.to_string(),
        };
        if reference.is_empty() {
            return Err(not_found());
        }

        match self.hosting.resolve_ref(repo, reference) {
            Ok(sha) => {
                debug!(%repo, %reference, sha = %sha, "reference resolved");
                Ok(sha)
            }
            Err(HostingError::NotFound(_)) => Err(not_found()),
            Err(e) => Err(PipelineError::transport(format!(
                "resolving '{reference}' in {repo}: {e}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;
    use crate::hosting::{HostingCall, MockHosting};

    fn repo() -> RepoSlug {
        RepoSlug::new("acme", "widgets")
    }

    #[test]
    fn test_resolves_branch() {
        let mock = MockHosting::new().with_ref("main", "feedface");
        let resolver = ReferenceResolver::new(Arc::new(mock));
        assert_eq!(
            resolver.resolve(&repo(), &Reference::new("main")).unwrap(),
            CommitSha::new("feedface")
        );
    }

    #[test]
    fn test_empty_reference_never_reaches_hosting() {
        let mock = MockHosting::new();
        let resolver = ReferenceResolver::new(Arc::new(mock.clone()));
        let err = resolver.resolve(&repo(), &Reference::new("  ")).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ReferenceNotFound);
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn test_unknown_reference_is_not_found() {
        let mock = MockHosting::new();
        let resolver = ReferenceResolver::new(Arc::new(mock.clone()));
        let err = resolver
            .resolve(&repo(), &Reference::new("no-such-branch"))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ReferenceNotFound);
        assert_eq!(
            mock.calls(),
            vec![HostingCall::ResolveRef("no-such-branch".to_string())]
        );
    }

    struct Unreachable;

    impl HostingApi for Unreachable {
        fn resolve_ref(&self, _: &RepoSlug, _: &Reference) -> Result<CommitSha, HostingError> {
            Err(HostingError::Network("connection refused".to_string()))
        }
        fn archive_url(&self, _: &RepoSlug, _: &CommitSha) -> Result<String, HostingError> {
            unreachable!()
        }
        fn list_commits(
            &self,
            _: &RepoSlug,
            _: u32,
        ) -> Result<Vec<crate::types::CommitSummary>, HostingError> {
            unreachable!()
        }
        fn list_statuses(
            &self,
            _: &RepoSlug,
            _: &CommitSha,
        ) -> Result<Vec<crate::types::StatusRecord>, HostingError> {
            unreachable!()
        }
        fn create_status(
            &self,
            _: &RepoSlug,
            _: &CommitSha,
            _: &crate::types::NewStatus,
        ) -> Result<crate::types::StatusRecord, HostingError> {
            unreachable!()
        }
    }

    #[test]
    fn test_network_failure_is_transport_error() {
        let resolver = ReferenceResolver::new(Arc::new(Unreachable));
        let err = resolver.resolve(&repo(), &Reference::new("main")).unwrap_err();
        assert_eq!(err.code(), ErrorCode::TransportFailed);
        assert!(err.to_string().contains("connection refused"));
    }
}
