//! Errors surfaced by the command line.

use tunecache_core::PassKind;

use crate::logging::LoggingError;

/// Result alias for command handlers.
pub type CliResult<T> = std::result::Result<T, CliError>;

/// Errors that end a command.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// The cache engine reported an error.
    #[error(transparent)]
    Core(#[from] tunecache_core::Error),

    /// Logging could not be set up.
    #[error(transparent)]
    Logging(#[from] LoggingError),

    /// A background pass panicked or was cancelled.
    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// A cleanup pass aborted; details are in the log.
    #[error("Cache {0} did not complete, see the log for details")]
    PassFailed(PassKind),

    /// Output could not be encoded.
    #[error("Failed to encode output: {0}")]
    Output(#[from] serde_json::Error),
}
