//! Logging for besouro
//!
//! Diagnostics go to a daily rolling file in the state directory
//! (`$XDG_STATE_HOME/besouro/`). The appender names each day's file
//! `besouro.log.YYYY-MM-DD` (UTC); [`current_log_file`] returns the one
//! being written today.
//!
//! `RUST_LOG` overrides the configured level when it is set.

use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Config, LoggingConfig};
use crate::error::{Error, Result};

/// Prefix of every log file; the appender adds the date.
pub const LOG_FILE_PREFIX: &str = "besouro.log";

/// Install the global subscriber, logging under [`Config::state_dir`].
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard> {
    init_in(&Config::state_dir(), config)
}

/// Install the global subscriber, logging under `dir`.
pub fn init_in(dir: &Path, config: &LoggingConfig) -> Result<LoggingGuard> {
    let filter = build_filter(std::env::var("RUST_LOG").ok(), &config.level)?;
    let (writer, guard) = tracing_appender::non_blocking(file_appender(dir, config.max_files)?);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true),
        )
        .try_init()
        .map_err(|e| Error::Config(format!("logging already initialized: {e}")))?;

    tracing::info!(
        log_file = %today_in(dir).display(),
        level = %config.level,
        "Logging initialized"
    );

    Ok(LoggingGuard { _worker: guard })
}

/// Flushes buffered log lines when dropped.
pub struct LoggingGuard {
    _worker: WorkerGuard,
}

/// Today's log file in the default state directory.
pub fn current_log_file() -> PathBuf {
    today_in(&Config::state_dir())
}

/// Name the appender gives the file for `date` in `dir`.
pub fn log_file_for(dir: &Path, date: NaiveDate) -> PathBuf {
    dir.join(format!("{LOG_FILE_PREFIX}.{}", date.format("%Y-%m-%d")))
}

fn today_in(dir: &Path) -> PathBuf {
    log_file_for(dir, Utc::now().date_naive())
}

fn file_appender(dir: &Path, max_files: usize) -> Result<RollingFileAppender> {
    std::fs::create_dir_all(dir)?;
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .max_log_files(max_files.max(1))
        .build(dir)
        .map_err(|e| Error::Config(format!("cannot open log file in {}: {e}", dir.display())))
}

/// `env` (the value of `RUST_LOG`) is used when it parses; otherwise the
/// configured level must.
fn build_filter(env: Option<String>, level: &str) -> Result<EnvFilter> {
    if let Some(directives) = env.filter(|d| !d.trim().is_empty()) {
        if let Ok(filter) = EnvFilter::try_new(&directives) {
            return Ok(filter);
        }
    }
    EnvFilter::try_new(level)
        .map_err(|e| Error::Config(format!("invalid logging.level {level:?}: {e}")))
}
