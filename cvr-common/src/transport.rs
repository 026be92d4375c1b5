//! Archive transport: from a commit to a decompressed tar byte stream.

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Cursor, Read};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use flate2::read::GzDecoder;
use tracing::{debug, info};
use ureq::Agent;

use crate::errors::PipelineError;
use crate::hosting::HostingApi;
use crate::hosting::github::USER_AGENT;
use crate::types::{CommitSha, RepoSlug};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Decompressed tar bytes. Dropping the stream releases the connection.
pub type SnapshotStream = Box<dyn Read>;

/// Produces the raw tar stream of the tree at a commit.
pub trait ArchiveTransport: Send + Sync {
    fn fetch(&self, repo: &RepoSlug, sha: &CommitSha) -> Result<SnapshotStream, PipelineError>;
}

/// A read failure of the compressed body itself: corrupt deflate data, a bad
/// trailer, or the connection dropping mid-download.
#[derive(Debug)]
pub struct BodyReadError {
    source: io::Error,
}

impl fmt::Display for BodyReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reading archive body: {}", self.source)
    }
}

impl std::error::Error for BodyReadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

impl BodyReadError {
    /// Finds a body read failure anywhere in the chain of `err`, which may
    /// have been wrapped by the tar reader on the way up.
    pub fn find(err: &io::Error) -> Option<&BodyReadError> {
        let mut current: Option<&(dyn std::error::Error + 'static)> =
            err.get_ref().map(|inner| inner as &(dyn std::error::Error + 'static));
        while let Some(error) = current {
            if let Some(found) = error.downcast_ref::<BodyReadError>() {
                return Some(found);
            }
            // `io::Error::source` skips its own payload, so descend into it.
            current = match error.downcast_ref::<io::Error>() {
                Some(io_err) => io_err
                    .get_ref()
                    .map(|inner| inner as &(dyn std::error::Error + 'static)),
                None => error.source(),
            };
        }
        None
    }
}

/// Tags every error of the decoded stream as a [`BodyReadError`].
struct TaggedBody<R> {
    inner: R,
}

impl<R: Read> Read for TaggedBody<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner
            .read(buf)
            .map_err(|source| io::Error::other(BodyReadError { source }))
    }
}

/// Wrap a gzip-compressed body in a decoder after checking its magic bytes.
///
/// Framing errors past the header surface later, during extraction, as
/// [`BodyReadError`]s.
pub fn gzip_stream<R: Read + 'static>(mut body: R) -> Result<SnapshotStream, PipelineError> {
    let mut magic = [0u8; 2];
    body.read_exact(&mut magic).map_err(|e| PipelineError::Transport {
        message: format!("archive body too short: {e}"),
        not_gzip: true,
    })?;
    if magic != GZIP_MAGIC {
        return Err(PipelineError::Transport {
            message: format!(
                "archive body is not gzip framed (starts with {:02x}{:02x})",
                magic[0], magic[1]
            ),
            not_gzip: true,
        });
    }
    Ok(Box::new(TaggedBody {
        inner: GzDecoder::new(Cursor::new(magic).chain(body)),
    }))
}

/// Downloads tarballs over HTTPS using the location handed out by the
/// hosting service.
pub struct HttpArchiveTransport {
    hosting: Arc<dyn HostingApi>,
    agent: Agent,
    token: Option<String>,
}

impl HttpArchiveTransport {
    pub fn new(hosting: Arc<dyn HostingApi>, token: Option<String>, timeout: Duration) -> Self {
        let config = Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();
        Self {
            hosting,
            agent: Agent::new_with_config(config),
            token: token.filter(|t| !t.trim().is_empty()),
        }
    }
}

impl ArchiveTransport for HttpArchiveTransport {
    fn fetch(&self, repo: &RepoSlug, sha: &CommitSha) -> Result<SnapshotStream, PipelineError> {
        let url = self
            .hosting
            .archive_url(repo, sha)
            .map_err(|e| PipelineError::transport(format!("archive link for {sha}: {e}")))?;
        debug!(sha = %sha.short(), "downloading snapshot archive");

        let mut request = self.agent.get(&url).header("User-Agent", USER_AGENT);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }
        let response = request
            .call()
            .map_err(|e| PipelineError::transport(format!("archive download for {sha}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::transport(format!(
                "archive download for {sha} returned HTTP {}",
                status.as_u16()
            )));
        }
        info!(sha = %sha.short(), "snapshot archive download started");
        gzip_stream(response.into_body().into_reader())
    }
}

/// Serves pre-built `.tar.gz` archives from memory, keyed by commit.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    archives: Arc<Mutex<HashMap<CommitSha, Vec<u8>>>>,
    fetched: Arc<Mutex<Vec<CommitSha>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, sha: &str, gzipped_tar: Vec<u8>) {
        self.archives
            .lock()
            .expect("archives mutex poisoned")
            .insert(CommitSha::new(sha), gzipped_tar);
    }

    /// Commits fetched so far, in order.
    #[must_use]
    pub fn fetched(&self) -> Vec<CommitSha> {
        self.fetched
            .lock()
            .expect("fetched mutex poisoned")
            .clone()
    }
}

impl ArchiveTransport for MemoryTransport {
    fn fetch(&self, _repo: &RepoSlug, sha: &CommitSha) -> Result<SnapshotStream, PipelineError> {
        self.fetched
            .lock()
            .expect("fetched mutex poisoned")
            .push(sha.clone());
        let bytes = self
            .archives
            .lock()
            .expect("archives mutex poisoned")
            .get(sha)
            .cloned()
            .ok_or_else(|| PipelineError::transport(format!("no archive for {sha}")))?;
        gzip_stream(Cursor::new(bytes))
    }
}
