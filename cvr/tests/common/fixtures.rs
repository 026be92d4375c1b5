use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

/// Variables the binary reads that must not leak in from the developer's
/// shell.
const SCRUBBED_VARS: &[&str] = &[
    "CVR_TOKEN",
    "CVR_CONFIG",
    "CVR_OWNER",
    "CVR_REPO",
    "CVR_REF",
    "CVR_CONTEXT",
    "CVR_TARGET_URL",
    "CVR_PAGE_SIZE",
    "CVR_WORK_ROOT",
    "CVR_KEEP_WORKDIRS",
    "CVR_VERIFY_COMMAND",
    "CVR_TEARDOWN_COMMAND",
    "CVR_VERIFY_TIMEOUT_SECS",
    "CVR_HTTP_TIMEOUT_SECS",
    "CVR_PUBLISH_PENDING",
    "CVR_API_BASE_URL",
    "CVR_LOG_FILE",
    "CVR_LOG_FORMAT",
    "RUST_LOG",
];

/// Isolated home and config directory for running the `cvr` binary.
pub struct CliEnv {
    home: TempDir,
}

impl CliEnv {
    pub fn new() -> Self {
        Self {
            home: TempDir::new().expect("Failed to create temp home"),
        }
    }

    pub fn path(&self) -> &Path {
        self.home.path()
    }

    pub fn config_dir(&self) -> PathBuf {
        self.home.path().join("config")
    }

    /// Write `$XDG_CONFIG_HOME/cvr/config.toml`.
    pub fn write_config(&self, contents: &str) -> PathBuf {
        let dir = self.config_dir().join("cvr");
        std::fs::create_dir_all(&dir).expect("Failed to create config dir");
        let path = dir.join("config.toml");
        std::fs::write(&path, contents).expect("Failed to write config");
        path
    }

    pub fn command(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_cvr"));
        for var in SCRUBBED_VARS {
            cmd.env_remove(var);
        }
        cmd.env("HOME", self.home.path())
            .env("XDG_CONFIG_HOME", self.config_dir())
            .env("CVR_LOG_LEVEL", "warn");
        cmd
    }

    pub fn run(&self, args: &[&str]) -> Output {
        self.command()
            .args(args)
            .output()
            .expect("Failed to run cvr")
    }
}
