//! Tracing setup for Clipfeed
//!
//! Console logs follow the user's chosen level for Clipfeed's own crates and
//! stay at warn for the HTTP stack. A per-run log file captures Clipfeed at
//! trace level, so cache and fetch decisions can be reconstructed after the
//! fact.

use std::fs::{File, create_dir_all};
use std::path::{Path, PathBuf};

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

const DEFAULT_LOGS_DIR: &str = "logs";
const RUN_LOG_FILE: &str = "clipfeed-last-run.log";

/// Targets that carry Clipfeed's own events: the library and the binary.
const CLIPFEED_TARGETS: [&str; 2] = ["clipfeed_core", "clipfeed"];

/// Installs the global subscriber: stderr at `console_level`, plus a run log
/// in `logs_dir` (default `./logs`) that is overwritten on every start.
///
/// `RUST_LOG`, when set, replaces the console filter.
///
/// # Errors
///
/// - `Box<dyn std::error::Error>` - Logs directory or run log cannot be
///   created, or a global subscriber is already installed
pub fn init_tracing(
    console_level: Level,
    logs_dir: Option<&Path>,
) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let logs_path = logs_dir.unwrap_or_else(|| Path::new(DEFAULT_LOGS_DIR));
    create_dir_all(logs_path)?;

    let log_file_path = logs_path.join(RUN_LOG_FILE);
    let log_file = File::create(&log_file_path)?;

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .with_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| clipfeed_filter(Level::WARN, console_level)),
        );

    let file_layer = fmt::layer()
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(log_file)
        .with_filter(clipfeed_filter(Level::DEBUG, Level::TRACE));

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::info!(
        "Tracing initialized: console={}, run_log={}",
        console_level,
        log_file_path.display()
    );

    Ok(log_file_path)
}

/// Filter with `own` for Clipfeed targets and `others` for every dependency.
pub fn clipfeed_filter(others: Level, own: Level) -> EnvFilter {
    EnvFilter::new(filter_directives(others, own))
}

fn filter_directives(others: Level, own: Level) -> String {
    let mut directives = vec![others.to_string().to_lowercase()];
    directives.extend(
        CLIPFEED_TARGETS
            .iter()
            .map(|target| format!("{target}={}", own.to_string().to_lowercase())),
    );
    directives.join(",")
}

/// Log levels selectable with `--log-level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    /// Includes per-chunk download and cache lock events
    Trace,
}

impl CliLogLevel {
    /// # Examples
    /// ```
    /// use clipfeed_core::tracing_setup::CliLogLevel;
    ///
    /// assert_eq!(CliLogLevel::Info.as_tracing_level(), tracing::Level::INFO);
    /// ```
    pub fn as_tracing_level(self) -> Level {
        match self {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::ValueEnum;

    use super::*;

    #[test]
    fn test_filter_scopes_level_to_clipfeed_crates() {
        assert_eq!(
            filter_directives(Level::WARN, Level::DEBUG),
            "warn,clipfeed_core=debug,clipfeed=debug"
        );
        assert_eq!(
            filter_directives(Level::DEBUG, Level::TRACE),
            "debug,clipfeed_core=trace,clipfeed=trace"
        );
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(CliLogLevel::from_str("warn", true), Ok(CliLogLevel::Warn));
        assert_eq!(CliLogLevel::from_str("TRACE", true), Ok(CliLogLevel::Trace));
        assert!(CliLogLevel::from_str("verbose", true).is_err());
        assert_eq!(CliLogLevel::Error.as_tracing_level(), Level::ERROR);
    }

    #[test]
    fn test_run_log_lands_in_logs_dir() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("nested").join("logs");

        // Another test may already own the global subscriber; the run log is
        // created before installation either way.
        let _ = init_tracing(Level::INFO, Some(&logs));

        assert!(logs.join(RUN_LOG_FILE).exists());
    }
}
