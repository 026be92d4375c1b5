//! GitHub REST v3 implementation of [`HostingApi`].
//!
//! All calls are blocking (`ureq`). Redirects are not followed so the tarball
//! endpoint's `Location` header can be handed to the archive transport.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;
use ureq::http::Response;
use ureq::{Agent, Body};

use super::HostingApi;
use crate::errors::HostingError;
use crate::types::{CommitSha, CommitSummary, NewStatus, Reference, RepoSlug, StatusRecord};

/// Public GitHub API endpoint.
pub const DEFAULT_API_BASE_URL: &str = "https://api.github.com";

const API_VERSION: &str = "2022-11-28";
const ACCEPT_JSON: &str = "application/vnd.github+json";
const ACCEPT_SHA: &str = "application/vnd.github.sha";
const STATUS_PAGE_SIZE: usize = 100;
/// An incomplete view could hide our own context, so running past this is an
/// error rather than a short read.
const MAX_STATUS_PAGES: u32 = 20;
pub(crate) const USER_AGENT: &str = concat!("cvr/", env!("CARGO_PKG_VERSION"));

/// Blocking GitHub API client.
pub struct GitHubClient {
    agent: Agent,
    base_url: String,
    token: Option<String>,
}

impl GitHubClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>, timeout: Duration) -> Self {
        let config = Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .max_redirects(0)
            .max_redirects_will_error(false)
            .build();
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            agent: Agent::new_with_config(config),
            base_url,
            token: token.filter(|t| !t.trim().is_empty()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn repo_url(&self, repo: &RepoSlug, tail: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.base_url,
            urlencoding::encode(&repo.owner),
            urlencoding::encode(&repo.name),
            tail
        )
    }

    fn authorization(&self) -> Option<String> {
        self.token.as_ref().map(|token| format!("Bearer {token}"))
    }

    fn get(
        &self,
        url: &str,
        accept: &str,
        query: &[(&str, String)],
    ) -> Result<Response<Body>, HostingError> {
        debug!(%url, "GET");
        let mut request = self
            .agent
            .get(url)
            .header("Accept", accept)
            .header("User-Agent", USER_AGENT)
            .header("X-GitHub-Api-Version", API_VERSION);
        for (key, value) in query {
            request = request.query(key, value);
        }
        if let Some(auth) = self.authorization() {
            request = request.header("Authorization", auth);
        }
        request
            .call()
            .map_err(|e| HostingError::Network(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ApiCommit {
    sha: String,
    commit: ApiCommitDetail,
}

#[derive(Debug, Deserialize)]
struct ApiCommitDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    author: Option<ApiSignature>,
}

#[derive(Debug, Deserialize)]
struct ApiSignature {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    date: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Deserialize)]
struct ApiCombinedStatus {
    #[serde(default)]
    statuses: Vec<StatusRecord>,
    #[serde(default)]
    total_count: Option<usize>,
}

impl From<ApiCommit> for CommitSummary {
    fn from(api: ApiCommit) -> Self {
        let (author, date) = match api.commit.author {
            Some(sig) => (sig.name, sig.date),
            None => (None, None),
        };
        Self {
            sha: CommitSha::new(api.sha),
            message: api.commit.message.lines().next().unwrap_or("").to_string(),
            author,
            date,
        }
    }
}

/// Turn a non-success response into a [`HostingError`], keeping the API's
/// own message when the body carries one.
fn error_from_response(mut response: Response<Body>, what: &str) -> HostingError {
    let status = response.status();
    let message = response
        .body_mut()
        .read_to_string()
        .ok()
        .and_then(|text| serde_json::from_str::<ApiMessage>(&text).ok())
        .map(|m| m.message)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_string());

    match status.as_u16() {
        404 => HostingError::NotFound(format!("{what}: {message}")),
        code => HostingError::Status { code, message },
    }
}

impl HostingApi for GitHubClient {
    fn resolve_ref(
        &self,
        repo: &RepoSlug,
        reference: &Reference,
    ) -> Result<CommitSha, HostingError> {
        let url = self.repo_url(
            repo,
            &format!("commits/{}", urlencoding::encode(reference.as_str())),
        );
        let mut response = self.get(&url, ACCEPT_SHA, &[])?;
        let status = response.status();
        if status.as_u16() == 422 {
            // "No commit found for SHA" comes back as 422 rather than 404.
            return Err(HostingError::NotFound(format!("reference {reference}")));
        }
        if !status.is_success() {
            return Err(error_from_response(response, &format!("reference {reference}")));
        }

        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| HostingError::Decode(e.to_string()))?;
        let sha = CommitSha::new(body.trim());
        if !sha.is_well_formed() {
            return Err(HostingError::Decode(format!(
                "expected a commit SHA, got '{}'",
                body.trim()
            )));
        }
        Ok(sha)
    }

    fn archive_url(&self, repo: &RepoSlug, sha: &CommitSha) -> Result<String, HostingError> {
        let url = self.repo_url(repo, &format!("tarball/{}", sha.as_str()));
        let response = self.get(&url, ACCEPT_JSON, &[])?;
        let status = response.status();

        if status.is_redirection() {
            return response
                .headers()
                .get("location")
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
                .ok_or_else(|| {
                    HostingError::Decode("tarball redirect without a Location header".to_string())
                });
        }
        if status.is_success() {
            // Some GitHub-compatible servers stream the tarball directly.
            return Ok(url);
        }
        Err(error_from_response(response, &format!("tarball for {sha}")))
    }

    fn list_commits(
        &self,
        repo: &RepoSlug,
        per_page: u32,
    ) -> Result<Vec<CommitSummary>, HostingError> {
        let url = self.repo_url(repo, "commits");
        let mut response = self.get(&url, ACCEPT_JSON, &[("per_page", per_page.to_string())])?;
        if !response.status().is_success() {
            return Err(error_from_response(response, &format!("commits of {repo}")));
        }
        let commits: Vec<ApiCommit> = response
            .body_mut()
            .read_json()
            .map_err(|e| HostingError::Decode(e.to_string()))?;
        Ok(commits.into_iter().map(CommitSummary::from).collect())
    }

    fn list_statuses(
        &self,
        repo: &RepoSlug,
        sha: &CommitSha,
    ) -> Result<Vec<StatusRecord>, HostingError> {
        // The combined view keeps the latest record per context, which is all
        // the eligibility check needs. It is paginated once a commit carries
        // more contexts than fit on one page.
        let url = self.repo_url(repo, &format!("commits/{}/status", sha.as_str()));
        let mut statuses = Vec::new();
        for page in 1..=MAX_STATUS_PAGES {
            let query = [
                ("per_page", STATUS_PAGE_SIZE.to_string()),
                ("page", page.to_string()),
            ];
            let mut response = self.get(&url, ACCEPT_JSON, &query)?;
            if !response.status().is_success() {
                return Err(error_from_response(response, &format!("statuses of {sha}")));
            }
            let combined: ApiCombinedStatus = response
                .body_mut()
                .read_json()
                .map_err(|e| HostingError::Decode(e.to_string()))?;
            let received = combined.statuses.len();
            statuses.extend(combined.statuses);
            let total = combined.total_count.unwrap_or(statuses.len());
            if received < STATUS_PAGE_SIZE || statuses.len() >= total {
                return Ok(statuses);
            }
        }
        Err(HostingError::Decode(format!(
            "statuses of {sha} span more than {MAX_STATUS_PAGES} pages"
        )))
    }

    fn create_status(
        &self,
        repo: &RepoSlug,
        sha: &CommitSha,
        status: &NewStatus,
    ) -> Result<StatusRecord, HostingError> {
        let url = self.repo_url(repo, &format!("statuses/{}", sha.as_str()));
        debug!(%url, state = %status.state, context = %status.context, "POST");
        let mut request = self
            .agent
            .post(&url)
            .header("Accept", ACCEPT_JSON)
            .header("User-Agent", USER_AGENT)
            .header("X-GitHub-Api-Version", API_VERSION);
        if let Some(auth) = self.authorization() {
            request = request.header("Authorization", auth);
        }
        let mut response = request
            .send_json(status)
            .map_err(|e| HostingError::Network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(error_from_response(response, &format!("status for {sha}")));
        }
        response
            .body_mut()
            .read_json()
            .map_err(|e| HostingError::Decode(e.to_string()))
    }
}
