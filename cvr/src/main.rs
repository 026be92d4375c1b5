//! Commit Verification Runner - CLI
//!
//! Verifies a single reference (`check`), or keeps a repository's recent
//! commits verified (`poll`), publishing the verdicts as commit statuses.

#![forbid(unsafe_code)]

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use cvr_common::{LogConfig, init_logging};

#[derive(Parser)]
#[command(name = "cvr")]
#[command(author, version, about = "Commit Verification Runner - verify commits and publish commit statuses")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (default: $XDG_CONFIG_HOME/cvr/config.toml when present)
    #[arg(long, global = true, env = "CVR_CONFIG")]
    config: Option<PathBuf>,

    /// Print machine-readable JSON on stdout
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Args, Clone)]
pub struct RepoArgs {
    /// Repository owner
    #[arg(long, env = "CVR_OWNER")]
    pub owner: String,

    /// Repository name
    #[arg(long, env = "CVR_REPO")]
    pub repo: String,
}

#[derive(Args, Clone, Default)]
pub struct RunnerArgs {
    /// Hosting API token used to read the repository and publish statuses
    #[arg(long, env = "CVR_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Status context to publish under
    #[arg(long)]
    pub context: Option<String>,

    /// Link attached to published statuses
    #[arg(long)]
    pub target_url: Option<String>,

    /// Directory holding per-run scratch directories
    #[arg(long)]
    pub work_root: Option<PathBuf>,

    /// Keep scratch directories after each run
    #[arg(long)]
    pub keep_workdirs: bool,

    /// Kill the verification command after this many seconds (0 = never)
    #[arg(long)]
    pub verify_timeout: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify one branch, tag or commit and publish its status
    Check {
        #[command(flatten)]
        repo: RepoArgs,

        /// Branch, tag or commit SHA to verify
        #[arg(long = "ref", env = "CVR_REF")]
        reference: String,

        #[command(flatten)]
        runner: RunnerArgs,
    },

    /// Verify recent default-branch commits that have no status yet
    Poll {
        #[command(flatten)]
        repo: RepoArgs,

        /// Keep polling until interrupted
        #[arg(long)]
        watch: bool,

        /// Seconds between cycles in watch mode
        #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..))]
        interval: u64,

        /// Number of recent commits to inspect (1-100)
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..=100))]
        page_size: Option<u32>,

        #[command(flatten)]
        runner: RunnerArgs,
    },

    /// Safely extract a snapshot archive (.tar.gz or .tar) into a directory
    Extract {
        /// Archive file
        #[arg(long)]
        archive: PathBuf,

        /// Destination root
        #[arg(long)]
        dest: PathBuf,
    },

    /// Show the effective configuration and where each value came from
    Config,

    /// Explain an error code (e.g. CVR-E200), or list all codes
    Explain {
        code: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env("info").with_stderr();
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    let _logging_guards = init_logging(&log_config)?;

    let output = commands::Output { json: cli.json };
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Check {
            repo,
            reference,
            runner,
        } => commands::check(config_path, &repo, &reference, &runner, output).await,
        Commands::Poll {
            repo,
            watch,
            interval,
            page_size,
            runner,
        } => {
            let poll = commands::PollArgs {
                watch,
                interval_secs: interval,
                page_size,
            };
            commands::poll(config_path, &repo, &runner, poll, output).await
        }
        Commands::Extract { archive, dest } => commands::extract(&archive, &dest, output).await,
        Commands::Config => commands::show_config(config_path, output),
        Commands::Explain { code } => commands::explain(code.as_deref(), output),
    }
}
