//! Logging setup
//!
//! Console output always goes through `tracing-subscriber`. Debug mode adds a
//! daily-rolling JSON file under `<home>/logs` written by a non-blocking
//! `tracing-appender` worker; the returned guard must live as long as `main`.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::config::dispatcher_home;

const LOG_FILE_PREFIX: &str = "wa-dispatcher.log";

/// Logging options, built up from CLI flags and config.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub debug_mode: bool,
    pub log_dir: PathBuf,
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self {
            debug_mode: false,
            log_dir: default_log_dir(),
            level: "info".to_string(),
        }
    }

    pub fn with_debug_mode(mut self, debug: bool) -> Self {
        self.debug_mode = debug;
        self
    }

    pub fn with_log_dir(mut self, dir: PathBuf) -> Self {
        self.log_dir = dir;
        self
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    fn filter(&self) -> EnvFilter {
        let level = if self.debug_mode { "debug" } else { self.level.as_str() };
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(format!("wa_dispatcher={level},tower_http={level},warn")))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// `<home>/logs`
pub fn default_log_dir() -> PathBuf {
    dispatcher_home().join("logs")
}

/// Install the global subscriber.
///
/// Returns the file writer guard in debug mode, `None` otherwise.
pub fn init_logging(config: LogConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let console = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(config.filter());

    if !config.debug_mode {
        tracing_subscriber::registry().with(console).try_init()?;
        return Ok(None);
    }

    std::fs::create_dir_all(&config.log_dir)?;
    let appender = tracing_appender::rolling::daily(&config.log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file = fmt::layer()
        .json()
        .with_writer(writer)
        .with_ansi(false)
        .with_filter(config.filter());

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()?;

    tracing::debug!("Debug logging to {}", config.log_dir.display());
    Ok(Some(guard))
}

fn log_files(dir: &Path) -> std::io::Result<Vec<(PathBuf, std::fs::Metadata)>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(LOG_FILE_PREFIX) {
            continue;
        }
        let metadata = entry.metadata()?;
        if metadata.is_file() {
            files.push((entry.path(), metadata));
        }
    }
    Ok(files)
}

/// Most recently written log file in `dir`.
pub fn latest_log_file(dir: &Path) -> Option<PathBuf> {
    log_files(dir)
        .ok()?
        .into_iter()
        .filter_map(|(path, meta)| meta.modified().ok().map(|m| (m, path)))
        .max_by_key(|(modified, _)| *modified)
        .map(|(_, path)| path)
}

/// Delete log files in `dir` not modified for `days` days.
pub fn cleanup_logs_in(dir: &Path, days: u64) -> anyhow::Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }
    let cutoff = SystemTime::now()
        .checked_sub(Duration::from_secs(days * 24 * 60 * 60))
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let mut removed = 0;
    for (path, metadata) in log_files(dir)? {
        let modified = metadata.modified().unwrap_or(SystemTime::now());
        if modified < cutoff {
            std::fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}
