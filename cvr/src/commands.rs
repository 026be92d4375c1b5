//! Subcommand handlers.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use cvr_common::config::Severity;
use cvr_common::transport::gzip_stream;
use cvr_common::{
    CommitRun, ErrorCode, GitHubClient, HostingApi, HttpArchiveTransport, Pipeline,
    PipelineSettings, PollReport, PollScheduler, ProcessVerifier, Reference, RepoSlug,
    RunnerConfig, Sourced, extract_snapshot,
};
use tokio::runtime::Handle;
use tracing::{error, info, warn};

use crate::{RepoArgs, RunnerArgs};

#[derive(Debug, Clone, Copy)]
pub struct Output {
    pub json: bool,
}

impl Output {
    fn emit<T: serde::Serialize>(&self, value: &T, human: impl FnOnce()) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            human();
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PollArgs {
    pub watch: bool,
    pub interval_secs: u64,
    pub page_size: Option<u32>,
}

fn load_config(path: Option<&Path>, runner: &RunnerArgs) -> Result<RunnerConfig> {
    let mut config = RunnerConfig::load(path)
        .map_err(|e| anyhow::anyhow!("{} {e}", e.code().entry().format_brief()))?;

    if let Some(context) = &runner.context {
        config.context = Sourced::from_cli(context.clone());
    }
    if let Some(url) = &runner.target_url {
        config.target_url = Sourced::from_cli(Some(url.clone()));
    }
    if let Some(root) = &runner.work_root {
        config.work_root = Sourced::from_cli(root.clone());
    }
    if runner.keep_workdirs {
        config.keep_workdirs = Sourced::from_cli(true);
    }
    if let Some(secs) = runner.verify_timeout {
        config.verify_timeout_secs = Sourced::from_cli(secs);
    }

    for finding in config.validate() {
        if finding.severity == Severity::Warning {
            warn!(field = finding.field, "{}", finding.message);
        }
    }
    config
        .ensure_valid()
        .map_err(|e| anyhow::anyhow!("{} {e}", e.code().entry().format_brief()))?;
    Ok(config)
}

fn require_token(runner: &RunnerArgs) -> Result<String> {
    match runner.token.as_deref().map(str::trim) {
        Some(token) if !token.is_empty() => Ok(token.to_string()),
        _ => {
            let entry = ErrorCode::ConfigMissingToken.entry();
            bail!("{}", entry.format_full().trim_end())
        }
    }
}

fn build_pipeline(
    config: &RunnerConfig,
    token: String,
    handle: Handle,
) -> Result<(Arc<dyn HostingApi>, Pipeline)> {
    let hosting: Arc<dyn HostingApi> = Arc::new(GitHubClient::new(
        config.api_base_url.value.clone(),
        Some(token.clone()),
        config.http_timeout(),
    ));
    let transport = Arc::new(HttpArchiveTransport::new(
        Arc::clone(&hosting),
        Some(token),
        config.http_timeout(),
    ));
    let command = config
        .verify_command_spec()
        .context("verify command is empty")?;
    info!(command = %command.display_masked(), "verification command");
    let verifier = ProcessVerifier::new(handle, command)
        .with_teardown(config.teardown_command_spec())
        .with_timeout(config.verify_timeout());

    let pipeline = Pipeline::new(
        Arc::clone(&hosting),
        transport,
        Arc::new(verifier),
        PipelineSettings::from_config(config),
    );
    Ok((hosting, pipeline))
}

fn print_run(run: &CommitRun) {
    let mark = if run.passed() { "PASS" } else { "FAIL" };
    println!("{mark} {} {}", run.sha, run.description);
    match (&run.failure, run.code) {
        (Some(failure), _) => {
            println!("  [{}] {}", failure.code.code_string(), failure.message)
        }
        (None, Some(code)) => println!("  [{}] {}", code.code_string(), code.message()),
        (None, None) => {}
    }
    if let Some(publish) = &run.publish_error {
        println!(
            "  status NOT published [{}] {}",
            publish.code.code_string(),
            publish.message
        );
    }
}

fn print_report(report: &PollReport) {
    println!(
        "listed {}, already recorded {}, skipped {}, verified {} ({} passed, {} failed)",
        report.listed,
        report.already_recorded,
        report.skipped.len(),
        report.runs.len(),
        report.passed(),
        report.failed()
    );
    for skipped in &report.skipped {
        println!("SKIP {} {}", skipped.sha, skipped.reason);
    }
    for run in &report.runs {
        print_run(run);
    }
}

pub async fn check(
    config_path: Option<&Path>,
    repo: &RepoArgs,
    reference: &str,
    runner: &RunnerArgs,
    output: Output,
) -> Result<ExitCode> {
    let config = load_config(config_path, runner)?;
    let token = require_token(runner)?;
    let (_, pipeline) = build_pipeline(&config, token, Handle::current())?;

    let slug = RepoSlug::new(&repo.owner, &repo.repo);
    let reference = Reference::new(reference);
    let run = tokio::task::spawn_blocking(move || pipeline.check_reference(&slug, &reference))
        .await
        .context("check task failed")?
        .map_err(|e| anyhow::anyhow!("[{}] {e}", e.code().code_string()))?;

    output.emit(&run, || print_run(&run))?;
    if run.passed() && run.published() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

pub async fn poll(
    config_path: Option<&Path>,
    repo: &RepoArgs,
    runner: &RunnerArgs,
    args: PollArgs,
    output: Output,
) -> Result<ExitCode> {
    let mut config = load_config(config_path, runner)?;
    if let Some(page_size) = args.page_size {
        config.page_size = Sourced::from_cli(page_size);
    }
    let token = require_token(runner)?;
    let (hosting, pipeline) = build_pipeline(&config, token, Handle::current())?;
    let scheduler = Arc::new(PollScheduler::new(
        hosting,
        pipeline,
        config.page_size.value,
    ));
    let slug = RepoSlug::new(&repo.owner, &repo.repo);
    let interval = Duration::from_secs(args.interval_secs);

    loop {
        let cycle = {
            let scheduler = Arc::clone(&scheduler);
            let slug = slug.clone();
            tokio::task::spawn_blocking(move || scheduler.poll_once(&slug))
                .await
                .context("poll task failed")?
        };

        match cycle {
            Ok(report) => output.emit(&report, || print_report(&report))?,
            Err(e) if args.watch => {
                error!(code = %e.code().code_string(), error = %e, "poll cycle failed");
            }
            Err(e) => bail!("[{}] {e}", e.code().code_string()),
        }

        if !args.watch {
            return Ok(ExitCode::SUCCESS);
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, stopping");
                return Ok(ExitCode::SUCCESS);
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

pub async fn extract(archive: &Path, dest: &Path, output: Output) -> Result<ExitCode> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();
    let snapshot = tokio::task::spawn_blocking(move || -> Result<_> {
        std::fs::create_dir_all(&dest)
            .with_context(|| format!("creating {}", dest.display()))?;
        let file = File::open(&archive)
            .with_context(|| format!("opening {}", archive.display()))?;
        let reader = BufReader::new(file);
        let is_plain_tar = archive.extension().is_some_and(|ext| ext == "tar");
        let stream: Box<dyn Read> = if is_plain_tar {
            Box::new(reader)
        } else {
            gzip_stream(reader).map_err(|e| anyhow::anyhow!("[{}] {e}", e.code().code_string()))?
        };
        extract_snapshot(stream, &dest)
            .map_err(|e| anyhow::anyhow!("[{}] {e}", e.code().code_string()))
    })
    .await
    .context("extract task failed")??;

    output.emit(&snapshot, || {
        println!(
            "extracted {} ({} directories, {} files, {} bytes)",
            snapshot.root.display(),
            snapshot.directories,
            snapshot.files,
            snapshot.bytes_written
        );
    })?;
    Ok(ExitCode::SUCCESS)
}

pub fn show_config(config_path: Option<&Path>, output: Output) -> Result<ExitCode> {
    let config = RunnerConfig::load(config_path)
        .map_err(|e| anyhow::anyhow!("{} {e}", e.code().entry().format_brief()))?;
    let rows = config.describe();
    let findings = config.validate();

    output.emit(
        &serde_json::json!({ "values": rows, "findings": findings }),
        || {
            if let Some(file) = &config.config_file {
                println!("config file: {}", file.display());
            }
            let width = rows.iter().map(|r| r.key.len()).max().unwrap_or(0);
            for row in &rows {
                println!("{:width$}  {}  ({})", row.key, row.value, row.source);
            }
            for finding in &findings {
                let label = match finding.severity {
                    Severity::Warning => "warning",
                    Severity::Error => "error",
                };
                println!("{label}: {}: {}", finding.field, finding.message);
            }
        },
    )?;

    if findings.iter().any(|f| f.severity == Severity::Error) {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

pub fn explain(code: Option<&str>, output: Output) -> Result<ExitCode> {
    match code {
        Some(code) => {
            let Some(code) = ErrorCode::from_code_string(code) else {
                bail!("unknown error code '{code}'");
            };
            let entry = code.entry();
            output.emit(&entry, || print!("{}", entry.format_full()))?;
        }
        None => {
            let entries: Vec<_> = ErrorCode::all().iter().map(|c| c.entry()).collect();
            output.emit(&entries, || {
                for entry in &entries {
                    println!("{}", entry.format_brief());
                }
            })?;
        }
    }
    Ok(ExitCode::SUCCESS)
}
