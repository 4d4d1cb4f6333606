//! Error types for Tunecache core operations.
//!
//! Storage failures are grouped under [`StorageError`] and every error can be
//! classified with [`Error::kind`], which is what callers branch on:
//! `RootUnavailable` is absorbed by the storage root, `IoFailure` is handled
//! per file by the cleaner, and `PathResolutionFailure` is handed back to the
//! download subsystem.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an error, used to decide how it propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The selected custom storage root no longer resolves.
    RootUnavailable,
    /// An open/read/write/delete failed at the OS or tree level.
    IoFailure,
    /// A logical path could not be walked and creation was not requested.
    PathResolutionFailure,
    /// Settings could not be loaded, saved or validated.
    Configuration,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RootUnavailable => write!(f, "root unavailable"),
            Self::IoFailure => write!(f, "I/O failure"),
            Self::PathResolutionFailure => write!(f, "path resolution failure"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}

/// Errors raised by the storage layer (backends and storage root).
#[derive(Debug, Error)]
pub enum StorageError {
    /// The custom storage tree was revoked, deleted or never resolved.
    #[error("Storage root unavailable: {location}")]
    RootUnavailable {
        /// Identifier of the tree that could not be reached.
        location: String,
    },

    /// A filesystem or document-tree operation failed.
    #[error("{operation} failed at {path}: {reason}")]
    Io {
        /// Operation name (open, delete, rename, ...).
        operation: &'static str,
        /// Logical path the operation targeted.
        path: String,
        /// Underlying failure.
        reason: String,
    },

    /// A segment of a logical path is missing.
    #[error("Cannot resolve {path}: {reason}")]
    PathResolution {
        /// The logical path being resolved.
        path: String,
        /// Which segment failed and why.
        reason: String,
    },

    /// A handle obtained from a previous storage root was used after a reset.
    #[error("Handle for {path} belongs to a storage root that is no longer active")]
    StaleHandle {
        /// Logical path of the stale handle.
        path: String,
    },

    /// Filesystem statistics could not be determined for a location.
    #[error("No filesystem statistics for {path}")]
    StatsUnavailable {
        /// Native or logical path that was probed.
        path: PathBuf,
    },
}

/// Errors that can occur in Tunecache core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Storage-layer error.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Storage(StorageError::RootUnavailable { .. }) => ErrorKind::RootUnavailable,
            Self::Storage(StorageError::PathResolution { .. }) => ErrorKind::PathResolutionFailure,
            Self::Storage(_) | Self::Io(_) => ErrorKind::IoFailure,
            Self::Configuration(_) | Self::Serialization(_) => ErrorKind::Configuration,
        }
    }

    /// Build an I/O failure for `operation` on `path`.
    pub fn io(operation: &'static str, path: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Storage(StorageError::Io {
            operation,
            path: path.into(),
            reason: reason.to_string(),
        })
    }

    /// Build a path resolution failure.
    pub fn unresolved(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Storage(StorageError::PathResolution {
            path: path.into(),
            reason: reason.into(),
        })
    }

    /// Build a root-unavailable error for the given location.
    pub fn root_unavailable(location: impl Into<String>) -> Self {
        Self::Storage(StorageError::RootUnavailable {
            location: location.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_display() {
        let err = Error::io("delete", "/music/a.mp3", "permission denied");
        let msg = err.to_string();
        assert!(msg.contains("delete"));
        assert!(msg.contains("/music/a.mp3"));
        assert!(msg.contains("permission denied"));
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            Error::root_unavailable("primary:Music").kind(),
            ErrorKind::RootUnavailable
        );
        assert_eq!(
            Error::unresolved("/a/b", "missing segment b").kind(),
            ErrorKind::PathResolutionFailure
        );
        assert_eq!(
            Error::io("open", "/a", "gone").kind(),
            ErrorKind::IoFailure
        );
        assert_eq!(
            Error::Configuration("bad".to_string()).kind(),
            ErrorKind::Configuration
        );
    }

    #[test]
    fn test_stale_handle_is_io_failure() {
        let err: Error = StorageError::StaleHandle {
            path: "/a".to_string(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::IoFailure);
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.kind(), ErrorKind::IoFailure);
    }

    #[test]
    fn test_root_unavailable_display() {
        let err = Error::root_unavailable("primary:Music");
        assert_eq!(err.to_string(), "Storage root unavailable: primary:Music");
    }
}
