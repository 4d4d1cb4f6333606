//! Logging for one-shot cache commands.
//!
//! Events go to stderr so stdout stays reserved for command output. A JSON
//! log file, rotated daily, records every pass for later inspection.

use std::path::PathBuf;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Crates whose events pass the default filters.
const OWN_CRATES: [&str; 2] = ["tunecache", "tunecache_core"];

/// File name prefix of the log files.
const LOG_FILE_PREFIX: &str = "tunecache";

/// Where and how much to log.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Directory holding the log files; `None` disables file logging.
    pub log_directory: Option<PathBuf>,
    /// Maximum stderr level for our crates, unless `RUST_LOG` is set.
    pub console_level: Level,
    /// Maximum file level for our crates.
    pub file_level: Level,
    /// How often the log file rolls over.
    pub rotation: Rotation,
}

impl LoggingConfig {
    /// Settings for a command run with or without `--verbose`.
    ///
    /// Debug builds record trace events in the file.
    #[must_use]
    pub fn for_command(verbose: bool) -> Self {
        Self {
            log_directory: Some(default_log_directory()),
            console_level: if verbose { Level::DEBUG } else { Level::INFO },
            file_level: if cfg!(debug_assertions) {
                Level::TRACE
            } else {
                Level::DEBUG
            },
            rotation: Rotation::DAILY,
        }
    }

    /// Log to stderr only.
    #[must_use]
    pub fn without_file(mut self) -> Self {
        self.log_directory = None;
        self
    }
}

/// Dropping the guard flushes the log file.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Install the global subscriber.
///
/// # Errors
///
/// Returns an error if the log directory cannot be created. Nothing is
/// installed in that case.
///
/// # Panics
///
/// Panics if a global subscriber is already installed.
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard, LoggingError> {
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(config.console_level)));
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(console_filter);

    let (file_layer, file_guard) = match &config.log_directory {
        Some(directory) => {
            std::fs::create_dir_all(directory).map_err(|e| {
                LoggingError::DirectoryCreationFailed {
                    path: directory.clone(),
                    reason: e.to_string(),
                }
            })?;
            let appender =
                RollingFileAppender::new(config.rotation.clone(), directory, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_file(true)
                .with_line_number(true)
                .json()
                .with_filter(EnvFilter::new(filter_directives(config.file_level)));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

/// Platform data directory for log files.
#[must_use]
pub fn default_log_directory() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tunecache")
        .join("logs")
}

/// `warn` for dependencies, `level` for our own crates.
fn filter_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    std::iter::once("warn".to_string())
        .chain(OWN_CRATES.iter().map(|target| format!("{target}={level}")))
        .collect::<Vec<_>>()
        .join(",")
}

/// Errors raised while installing logging.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// The log directory could not be created.
    #[error("Failed to create log directory {path}: {reason}")]
    DirectoryCreationFailed {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying error.
        reason: String,
    },
}
