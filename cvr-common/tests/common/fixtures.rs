use std::sync::Arc;

use cvr_common::testing::TarballBuilder;
use cvr_common::{
    CommandSpec, MemoryTransport, MockHosting, Pipeline, PipelineSettings, PollScheduler,
    ProcessVerifier, RepoSlug,
};
use tempfile::TempDir;

pub fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .expect("build tokio runtime")
}

/// `git archive`-shaped tarball whose `run.sh` holds `script`.
pub fn project_archive(sha: &str, script: &str) -> Vec<u8> {
    let top = format!("proj-{sha}");
    TarballBuilder::new()
        .pax_global_header(sha)
        .dir(&format!("{top}/"), 0o755)
        .file(&format!("{top}/run.sh"), 0o755, script.as_bytes())
        .into_gzip()
}

/// Mock hosting service, in-memory archives and a real process verifier
/// running `sh run.sh` in each snapshot.
pub struct Harness {
    pub hosting: MockHosting,
    pub transport: MemoryTransport,
    pub work_root: TempDir,
    pub runtime: tokio::runtime::Runtime,
}

impl Harness {
    pub fn new(hosting: MockHosting) -> Self {
        Self {
            hosting,
            transport: MemoryTransport::new(),
            work_root: TempDir::new().expect("create work root"),
            runtime: runtime(),
        }
    }

    pub fn repo(&self) -> RepoSlug {
        RepoSlug::new("acme", "widgets")
    }

    pub fn with_archive(self, sha: &str, script: &str) -> Self {
        self.transport.insert(sha, project_archive(sha, script));
        self
    }

    pub fn pipeline(&self) -> Pipeline {
        let command = CommandSpec::from_argv(&["sh", "run.sh"]).expect("command");
        let verifier = ProcessVerifier::new(self.runtime.handle().clone(), command);
        Pipeline::new(
            Arc::new(self.hosting.clone()),
            Arc::new(self.transport.clone()),
            Arc::new(verifier),
            PipelineSettings {
                context: "cvr/verify".to_string(),
                target_url: Some("https://ci.example.com/acme/widgets".to_string()),
                work_root: self.work_root.path().to_path_buf(),
                keep_workdirs: false,
                publish_pending: false,
            },
        )
    }

    pub fn scheduler(&self) -> PollScheduler {
        PollScheduler::new(Arc::new(self.hosting.clone()), self.pipeline(), 30)
    }

    pub fn work_root_is_empty(&self) -> bool {
        std::fs::read_dir(self.work_root.path())
            .expect("read work root")
            .next()
            .is_none()
    }
}
