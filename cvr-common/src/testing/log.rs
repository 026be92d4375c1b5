//! Run-wide JSONL capture of pipeline events for integration tests.
//!
//! Call [`init_global_test_logging`] once per test binary (for example from a
//! `#[ctor::ctor]` function). Every span close and event emitted by the
//! `cvr` crates lands in `target/test-logs/all_tests.jsonl`, so a failing
//! end-to-end run can be traced stage by stage per commit.

use std::path::PathBuf;
use std::sync::{Mutex, Once};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;

static GLOBAL_LOGGING_INIT: Once = Once::new();

/// Initialize global JSONL logging for all tests of the current binary.
///
/// Events go to `target/test-logs/all_tests.jsonl` and to the libtest
/// capture writer. Safe to call multiple times.
///
/// # Environment Variables
///
/// - `CVR_TEST_LOG_FILE`: override the log file path
/// - `CVR_TEST_LOG_LEVEL`: level filter (default: `info`)
pub fn init_global_test_logging() {
    GLOBAL_LOGGING_INIT.call_once(|| {
        let file_layer = create_global_log_file().map(|file| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(Mutex::new(file))
                .with_span_events(FmtSpan::CLOSE)
                .with_current_span(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
        });

        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_test_writer()
            .with_target(true)
            .with_level(true)
            .compact();

        let level = std::env::var("CVR_TEST_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let filter =
            tracing_subscriber::EnvFilter::try_new(format!("cvr={level},cvr_common={level}"))
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .with(stderr_layer);

        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

fn create_global_log_file() -> Option<std::fs::File> {
    if let Ok(custom_path) = std::env::var("CVR_TEST_LOG_FILE") {
        if let Some(parent) = PathBuf::from(&custom_path).parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        return std::fs::File::create(&custom_path).ok();
    }

    let log_dir = test_log_dir();
    let _ = std::fs::create_dir_all(&log_dir);
    std::fs::File::create(log_dir.join("all_tests.jsonl")).ok()
}

/// `<target>/test-logs`, searching upwards from the current directory when
/// `CARGO_TARGET_DIR` is unset.
fn test_log_dir() -> PathBuf {
    if let Ok(target_dir) = std::env::var("CARGO_TARGET_DIR") {
        return PathBuf::from(target_dir).join("test-logs");
    }

    let mut cwd = std::env::current_dir().unwrap_or_default();
    loop {
        let target = cwd.join("target");
        if target.is_dir() {
            return target.join("test-logs");
        }
        if !cwd.pop() {
            return PathBuf::from("target/test-logs");
        }
    }
}
