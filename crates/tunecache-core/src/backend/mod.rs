//! Storage backends.
//!
//! - [`raw`]: direct access to native paths.
//! - [`tree`]: access through a permission-scoped [`document`] tree.

pub mod document;
pub mod raw;
pub mod tree;

use std::fmt;

use serde::Serialize;

use crate::error::{Error, Result, StorageError};
use crate::handle::FileHandle;

pub use document::{DocumentTree, LocalDocumentTree, LocalTreeResolver, TreeResolver};
pub use raw::RawBackend;
pub use tree::TreeBackend;

/// Which backend serves the cache root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BackendKind {
    /// Native directory.
    Raw,
    /// Granted document tree.
    Tree,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw => write!(f, "raw"),
            Self::Tree => write!(f, "tree"),
        }
    }
}

/// The active backend.
#[derive(Debug, Clone)]
pub enum Backend {
    /// Native directory.
    Raw(RawBackend),
    /// Granted document tree.
    Tree(TreeBackend),
}

impl Backend {
    /// Which variant this is.
    #[must_use]
    pub const fn kind(&self) -> BackendKind {
        match self {
            Self::Raw(_) => BackendKind::Raw,
            Self::Tree(_) => BackendKind::Tree,
        }
    }

    /// Root handle.
    #[must_use]
    pub fn root(&self) -> FileHandle {
        match self {
            Self::Raw(backend) => FileHandle::Raw(backend.root().clone()),
            Self::Tree(backend) => FileHandle::Tree(backend.root().clone()),
        }
    }

    /// Logical path of the root.
    #[must_use]
    pub fn root_path(&self) -> &str {
        match self {
            Self::Raw(backend) => backend.root().path(),
            Self::Tree(backend) => backend.root().path(),
        }
    }

    /// Granted tree location, for tree backends.
    #[must_use]
    pub fn location(&self) -> Option<String> {
        match self {
            Self::Raw(_) => None,
            Self::Tree(backend) => Some(backend.location()),
        }
    }

    /// Fail with a root-unavailable error if the root has gone away.
    pub fn ensure_available(&self) -> Result<()> {
        match self {
            Self::Raw(_) => Ok(()),
            Self::Tree(backend) => backend.ensure_available(),
        }
    }

    /// Move `from` to `to_parent/to_name`.
    ///
    /// Both handles must come from this backend.
    pub fn rename(
        &self,
        from: &FileHandle,
        to_parent: &FileHandle,
        to_name: &str,
    ) -> Result<FileHandle> {
        let inside = format!("{}/", from.path());
        if to_parent.path() == from.path() || to_parent.path().starts_with(&inside) {
            return Err(Error::unresolved(
                to_parent.path(),
                format!("cannot move {} into itself", from.path()),
            ));
        }
        match (self, from, to_parent) {
            (Self::Raw(backend), FileHandle::Raw(from), FileHandle::Raw(to_parent)) => backend
                .rename(from, to_parent, to_name)
                .map(FileHandle::Raw),
            (Self::Tree(backend), FileHandle::Tree(from), FileHandle::Tree(to_parent)) => backend
                .rename(from, to_parent, to_name)
                .map(FileHandle::Tree),
            _ => Err(StorageError::StaleHandle {
                path: from.path().to_string(),
            }
            .into()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tempfile::TempDir;

    #[test]
    fn test_rename_rejects_mixed_handles() {
        let raw_dir = TempDir::new().expect("Should create temp dir");
        let tree_dir = TempDir::new().expect("Should create temp dir");
        let raw = Backend::Raw(RawBackend::new(raw_dir.path()).unwrap());
        let tree = Backend::Tree(
            TreeBackend::open(Arc::new(LocalDocumentTree::new("vol", tree_dir.path(), "")))
                .unwrap(),
        );

        let tree_file = tree.root().create_child("a.mp3", false).unwrap();
        let err = raw.rename(&tree_file, &raw.root(), "a.mp3").unwrap_err();
        assert!(err.to_string().contains("no longer active"));
        assert!(tree_file.exists());
    }

    #[test]
    fn test_rename_into_own_subtree_is_rejected() {
        let raw_dir = TempDir::new().expect("Should create temp dir");
        let raw = Backend::Raw(RawBackend::new(raw_dir.path()).unwrap());
        let album = raw.root().create_child("Album", true).unwrap();
        let disc = album.create_child("Disc", true).unwrap();

        assert!(raw.rename(&album, &album, "Album").is_err());
        assert!(raw.rename(&album, &disc, "Album").is_err());
        assert!(raw_dir.path().join("Album/Disc").is_dir());
        assert!(!raw_dir.path().join("Album/Disc/Album").exists());
    }

    #[test]
    fn test_kind_and_location() {
        let raw_dir = TempDir::new().expect("Should create temp dir");
        let raw = Backend::Raw(RawBackend::new(raw_dir.path()).unwrap());
        assert_eq!(raw.kind(), BackendKind::Raw);
        assert!(raw.location().is_none());
        assert!(raw.ensure_available().is_ok());
        assert_eq!(raw.root().path(), raw.root_path());
        assert_eq!(BackendKind::Tree.to_string(), "tree");
    }
}
