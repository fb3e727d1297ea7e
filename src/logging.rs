//! Logging setup for the command line tools.
//!
//! Log lines go to stderr so stdout stays free for results, plus an optional
//! per-launch file under the logs directory. `RUST_LOG` replaces the level and
//! directives from the `[logging]` settings when it is set.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::OnceLock,
    time::SystemTime,
};

use time::{OffsetDateTime, UtcOffset, format_description::FormatItem, macros::format_description};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{InitError, RollingFileAppender, Rotation},
};
use tracing_subscriber::{
    EnvFilter, Registry,
    filter::{Directive, LevelFilter, ParseError},
    fmt,
    prelude::*,
};

use crate::{app_dirs, config::LoggingSettings};

/// Target of the per-file extraction timings emitted during index builds.
///
/// Enabled at `debug` by `file_timings = true` without raising anything else.
pub const FILE_TIMING_TARGET: &str = "samplefind::build::timing";

const LOG_FILE_PREFIX: &str = "samplefind";

static LOG_GUARD: OnceLock<Option<WorkerGuard>> = OnceLock::new();

/// Errors that may occur while initializing logging.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Invalid log level {value:?}")]
    InvalidLevel { value: String },
    #[error("Invalid log directive {directive:?}: {source}")]
    InvalidDirective {
        directive: String,
        source: ParseError,
    },
    #[error("Log directory unavailable: {0}")]
    Dir(#[from] app_dirs::AppDirError),
    #[error("Failed to prune old logs in {path}: {source}")]
    Prune {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to format log filename time: {0}")]
    FormatTime(time::error::Format),
    #[error("Failed to open log file: {0}")]
    OpenFile(InitError),
    #[error("Failed to install global tracing subscriber: {0}")]
    SetGlobal(tracing::subscriber::SetGlobalDefaultError),
}

/// Install the global subscriber described by `settings`.
///
/// Subsequent calls are no-ops. Failures are returned so the tools can keep
/// running without logs.
pub fn init(settings: &LoggingSettings) -> Result<(), LoggingError> {
    if LOG_GUARD.get().is_some() {
        return Ok(());
    }
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = build_filter(&filter_directives(settings, env.as_deref())?)?;
    let timer = build_timer();

    let mut log_path = None;
    let mut guard = None;
    let file_layer = if settings.to_file {
        let log_dir = app_dirs::logs_dir()?;
        let (appender, path) = open_log_file(&log_dir, now_local_or_utc())?;
        prune_old_logs(&log_dir, settings.max_files)?;
        let (writer, worker_guard) = tracing_appender::non_blocking(appender);
        log_path = Some(path);
        guard = Some(worker_guard);
        Some(
            fmt::layer()
                .with_ansi(false)
                .with_timer(timer.clone())
                .with_writer(writer),
        )
    } else {
        None
    };
    let stderr_layer = fmt::layer().with_timer(timer).with_writer(std::io::stderr);

    let subscriber = Registry::default()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer);
    tracing::subscriber::set_global_default(subscriber).map_err(LoggingError::SetGlobal)?;
    let _ = LOG_GUARD.set(guard);

    match log_path {
        Some(path) => tracing::debug!("Logging initialized; log file at {}", path.display()),
        None => tracing::debug!("Logging initialized without a log file"),
    }
    Ok(())
}

/// Directive list for the filter: `RUST_LOG` if set, otherwise the configured
/// level followed by the configured directives. The timing target is appended
/// last so it applies either way.
fn filter_directives(
    settings: &LoggingSettings,
    env: Option<&str>,
) -> Result<Vec<String>, LoggingError> {
    let mut directives = Vec::new();
    match env.map(str::trim).filter(|value| !value.is_empty()) {
        Some(env) => directives.extend(
            env.split(',')
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string),
        ),
        None => {
            // A bare word would parse as a target name, so the level is checked on its own.
            let level = settings.level.trim().to_ascii_lowercase();
            level
                .parse::<LevelFilter>()
                .map_err(|_| LoggingError::InvalidLevel {
                    value: settings.level.clone(),
                })?;
            directives.push(level);
            directives.extend(
                settings
                    .directives
                    .iter()
                    .map(|d| d.trim())
                    .filter(|d| !d.is_empty())
                    .map(str::to_string),
            );
        }
    }
    if settings.file_timings {
        directives.push(format!("{FILE_TIMING_TARGET}=debug"));
    }
    Ok(directives)
}

fn build_filter(directives: &[String]) -> Result<EnvFilter, LoggingError> {
    directives
        .iter()
        .try_fold(EnvFilter::default(), |filter, directive| {
            let parsed = directive.parse::<Directive>().map_err(|source| {
                LoggingError::InvalidDirective {
                    directive: directive.clone(),
                    source,
                }
            })?;
            Ok(filter.add_directive(parsed))
        })
}

/// Create this launch's log file, named after the launch time.
fn open_log_file(
    dir: &Path,
    now: OffsetDateTime,
) -> Result<(RollingFileAppender, PathBuf), LoggingError> {
    const NAME_FORMAT: &[FormatItem<'_>] =
        format_description!("[year]-[month]-[day]_[hour]-[minute]-[second]");
    let stamp = now.format(NAME_FORMAT).map_err(LoggingError::FormatTime)?;
    let stem = format!("{LOG_FILE_PREFIX}_{stamp}");
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(stem.as_str())
        .filename_suffix("log")
        .build(dir)
        .map_err(LoggingError::OpenFile)?;
    Ok((appender, dir.join(format!("{stem}.log"))))
}

fn prune_old_logs(dir: &Path, max_files: usize) -> Result<(), LoggingError> {
    let prune_err = |source| LoggingError::Prune {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = fs::read_dir(dir)
        .map_err(prune_err)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_ok_and(|ft| ft.is_file()))
        .filter(|entry| entry.path().extension().and_then(|ext| ext.to_str()) == Some("log"))
        .map(|entry| {
            let modified = entry
                .metadata()
                .and_then(|meta| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, entry.path())
        })
        .collect::<Vec<_>>();

    entries.sort_by_key(|(modified, _)| *modified);
    let excess = entries.len().saturating_sub(max_files.max(1));
    for (_, path) in entries.into_iter().take(excess) {
        fs::remove_file(&path).map_err(prune_err)?;
    }
    Ok(())
}

fn build_timer() -> fmt::time::OffsetTime<time::format_description::BorrowedFormatItem<'static>> {
    const DISPLAY_FORMAT: &[FormatItem<'static>] =
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    fmt::time::OffsetTime::new(offset, DISPLAY_FORMAT.into())
}

fn now_local_or_utc() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}
