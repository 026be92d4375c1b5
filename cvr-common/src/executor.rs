//! Verification executor.
//!
//! Runs the verification command against an extracted snapshot and reduces
//! the process lifecycle to an [`ExitOutcome`]. The pipeline depends on the
//! [`Verifier`] capability only, so tests can substitute [`ScriptedVerifier`].

use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::errors::PipelineError;
use crate::types::ExitOutcome;
use crate::util::mask_sensitive_command;

/// Compose-based CI invocation run inside the snapshot root.
pub const DEFAULT_VERIFY_COMMAND: &[&str] = &[
    "docker",
    "compose",
    "-f",
    "docker-compose-ci.yml",
    "run",
    "--rm",
    "ci",
];

/// Releases containers, networks and volumes left by the verify command.
pub const DEFAULT_TEARDOWN_COMMAND: &[&str] = &[
    "docker",
    "compose",
    "-f",
    "docker-compose-ci.yml",
    "down",
    "--volumes",
    "--remove-orphans",
];

/// A program plus arguments. No shell is involved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Build from an argv vector; `None` when it is empty.
    pub fn from_argv<S: AsRef<str>>(argv: &[S]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        let program = program.as_ref().trim();
        if program.is_empty() {
            return None;
        }
        Some(Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.as_ref().to_string()).collect(),
        })
    }

    /// Split a command line on whitespace (no quoting).
    pub fn parse(line: &str) -> Option<Self> {
        let argv: Vec<&str> = line.split_whitespace().collect();
        Self::from_argv(&argv)
    }

    pub fn default_verify() -> Self {
        Self::from_argv(DEFAULT_VERIFY_COMMAND).unwrap_or_else(|| Self {
            program: "docker".to_string(),
            args: Vec::new(),
        })
    }

    pub fn default_teardown() -> Self {
        Self::from_argv(DEFAULT_TEARDOWN_COMMAND).unwrap_or_else(|| Self {
            program: "docker".to_string(),
            args: Vec::new(),
        })
    }

    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }

    /// Command line for logs and error messages, with credentials masked.
    pub fn display_masked(&self) -> String {
        mask_sensitive_command(&self.argv().join(" "))
    }

    fn to_command(&self, dir: &Path, project: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(dir)
            .env("COMPOSE_PROJECT_NAME", project)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        cmd
    }
}

/// Runs verification inside a snapshot directory.
pub trait Verifier: Send + Sync {
    /// `Ok` for any completed run, passing or not; `Err` only when the
    /// command could not be run at all.
    fn run(&self, dir: &Path) -> Result<ExitOutcome, PipelineError>;
}

/// Lifecycle notifications sent by the monitor task owning the child.
#[derive(Debug)]
pub enum RunEvent {
    Running { pid: Option<u32> },
    Exited(io::Result<ExitStatus>),
}

/// Compose project name derived from the snapshot directory name: lowercase
/// alphanumerics, `-` and `_`, starting with an alphanumeric.
pub fn compose_project_name(dir: &Path) -> String {
    let raw = dir
        .file_name()
        .map(|name| name.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = cleaned.trim_start_matches(['-', '_']);
    if trimmed.is_empty() {
        "cvr".to_string()
    } else {
        trimmed.to_string()
    }
}

fn outcome_from_status(status: ExitStatus) -> ExitOutcome {
    if status.success() {
        ExitOutcome::Passed
    } else {
        ExitOutcome::Failed {
            exit_code: status.code(),
        }
    }
}

async fn monitor_child(mut child: Child, events: mpsc::Sender<RunEvent>) {
    let _ = events.send(RunEvent::Running { pid: child.id() }).await;
    let status = child.wait().await;
    let _ = events.send(RunEvent::Exited(status)).await;
}

/// Runs a real process on the tokio runtime behind `handle`.
///
/// `run` blocks the calling thread; call it from a blocking context such as
/// `spawn_blocking`, never from inside an async task.
#[derive(Debug, Clone)]
pub struct ProcessVerifier {
    handle: Handle,
    command: CommandSpec,
    teardown: Option<CommandSpec>,
    timeout: Option<Duration>,
}

impl ProcessVerifier {
    pub fn new(handle: Handle, command: CommandSpec) -> Self {
        Self {
            handle,
            command,
            teardown: None,
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_teardown(mut self, teardown: Option<CommandSpec>) -> Self {
        self.teardown = teardown;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    pub fn command(&self) -> &CommandSpec {
        &self.command
    }

    async fn run_main(&self, dir: &Path, project: &str) -> Result<ExitOutcome, PipelineError> {
        let command_line = self.command.display_masked();
        let child = self
            .command
            .to_command(dir, project)
            .spawn()
            .map_err(|source| PipelineError::Launch {
                command: command_line.clone(),
                source,
            })?;

        let (tx, mut rx) = mpsc::channel(2);
        let monitor = tokio::spawn(monitor_child(child, tx));

        let wait_for_exit = async {
            while let Some(event) = rx.recv().await {
                match event {
                    RunEvent::Running { pid } => {
                        info!(pid = ?pid, command = %command_line, project, "verification running");
                    }
                    RunEvent::Exited(status) => return Some(status),
                }
            }
            None
        };

        let exit = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, wait_for_exit).await {
                Ok(exit) => exit,
                Err(_) => {
                    // Dropping the monitor drops the child, which kills it.
                    monitor.abort();
                    let _ = monitor.await;
                    warn!(command = %command_line, after_secs = limit.as_secs(), "verification timed out, command killed");
                    return Ok(ExitOutcome::timed_out(limit));
                }
            },
            None => wait_for_exit.await,
        };

        monitor
            .await
            .map_err(|e| PipelineError::Task(format!("verification monitor: {e}")))?;

        match exit {
            Some(Ok(status)) => {
                let outcome = outcome_from_status(status);
                info!(command = %command_line, ?outcome, "verification finished");
                Ok(outcome)
            }
            Some(Err(e)) => Err(PipelineError::Task(format!(
                "waiting for verification command: {e}"
            ))),
            None => Err(PipelineError::Task(
                "verification monitor stopped without reporting an exit".to_string(),
            )),
        }
    }

    async fn run_teardown(&self, teardown: &CommandSpec, dir: &Path, project: &str) {
        let command_line = teardown.display_masked();
        debug!(command = %command_line, project, "running teardown");
        let mut cmd = teardown.to_command(dir, project);
        let status = cmd.status();
        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, status).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(command = %command_line, "teardown timed out");
                    return;
                }
            },
            None => status.await,
        };
        match result {
            Ok(status) if status.success() => debug!(command = %command_line, "teardown finished"),
            Ok(status) => warn!(command = %command_line, code = ?status.code(), "teardown exited non-zero"),
            Err(e) => warn!(command = %command_line, error = %e, "teardown could not start"),
        }
    }
}

impl Verifier for ProcessVerifier {
    fn run(&self, dir: &Path) -> Result<ExitOutcome, PipelineError> {
        let project = compose_project_name(dir);
        self.handle.block_on(async {
            let outcome = self.run_main(dir, &project).await;
            if let Some(teardown) = &self.teardown {
                self.run_teardown(teardown, dir, &project).await;
            }
            outcome
        })
    }
}

/// One scripted answer of [`ScriptedVerifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    Exit(ExitOutcome),
    LaunchFailure(String),
}

/// What [`ScriptedVerifier`] saw for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedRun {
    pub dir: PathBuf,
    /// Sorted names of the entries present in `dir` at run time.
    pub entries: Vec<String>,
}

/// Verifier answering from a script; passes once the script is exhausted.
#[derive(Debug, Clone, Default)]
pub struct ScriptedVerifier {
    script: Arc<Mutex<VecDeque<ScriptStep>>>,
    runs: Arc<Mutex<Vec<ObservedRun>>>,
}

impl ScriptedVerifier {
    pub fn new(steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        Self {
            script: Arc::new(Mutex::new(steps.into_iter().collect())),
            runs: Arc::default(),
        }
    }

    pub fn passing() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn runs(&self) -> Vec<ObservedRun> {
        self.runs.lock().expect("runs mutex poisoned").clone()
    }
}

impl Verifier for ScriptedVerifier {
    fn run(&self, dir: &Path) -> Result<ExitOutcome, PipelineError> {
        let mut entries: Vec<String> = fs::read_dir(dir)
            .map(|rd| {
                rd.filter_map(Result::ok)
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        entries.sort();
        self.runs
            .lock()
            .expect("runs mutex poisoned")
            .push(ObservedRun {
                dir: dir.to_path_buf(),
                entries,
            });

        let step = self
            .script
            .lock()
            .expect("script mutex poisoned")
            .pop_front()
            .unwrap_or(ScriptStep::Exit(ExitOutcome::Passed));
        match step {
            ScriptStep::Exit(outcome) => Ok(outcome),
            ScriptStep::LaunchFailure(command) => Err(PipelineError::Launch {
                command,
                source: io::Error::new(io::ErrorKind::NotFound, "scripted launch failure"),
            }),
        }
    }
}
