//! Backend-independent file handles.
//!
//! A [`FileHandle`] is one entry (file or directory) under the cache root,
//! materialized by whichever backend is active. Callers outside
//! [`crate::storage`] never branch on the variant.
//!
//! The handle's [`path`](FileHandle::path) is the chain of names from the
//! root joined with `/`, whatever the backend. Parents are held through weak
//! links only: a handle never keeps its ancestors alive.

use std::io::{Read, Write};

use crate::backend::raw::RawFile;
use crate::backend::tree::TreeFile;
use crate::error::Result;
use crate::stats::FilesystemStats;

/// Byte stream opened for reading.
pub type ReadStream = Box<dyn Read + Send>;

/// Byte stream opened for writing.
pub type WriteStream = Box<dyn Write + Send>;

/// One filesystem entry in either backend.
#[derive(Debug, Clone)]
pub enum FileHandle {
    /// Entry addressed by a native path.
    Raw(RawFile),
    /// Entry addressed through a document tree.
    Tree(TreeFile),
}

impl FileHandle {
    /// Leaf segment.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Raw(file) => file.name(),
            Self::Tree(file) => file.name(),
        }
    }

    /// Canonical logical path.
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::Raw(file) => file.path(),
            Self::Tree(file) => file.path(),
        }
    }

    /// Whether the entry is a directory.
    #[must_use]
    pub fn is_directory(&self) -> bool {
        match self {
            Self::Raw(file) => file.is_directory(),
            Self::Tree(file) => file.is_directory(),
        }
    }

    /// Whether the entry is a regular file.
    #[must_use]
    pub fn is_file(&self) -> bool {
        match self {
            Self::Raw(file) => file.is_file(),
            Self::Tree(file) => file.is_file(),
        }
    }

    /// Whether the entry is still present.
    #[must_use]
    pub fn exists(&self) -> bool {
        match self {
            Self::Raw(file) => file.exists(),
            Self::Tree(file) => file.exists(),
        }
    }

    /// Size in bytes; `0` for directories and vanished entries.
    #[must_use]
    pub fn length(&self) -> u64 {
        match self {
            Self::Raw(file) => file.length(),
            Self::Tree(file) => file.length(),
        }
    }

    /// Last modification time in milliseconds since the Unix epoch.
    #[must_use]
    pub fn last_modified(&self) -> i64 {
        match self {
            Self::Raw(file) => file.last_modified(),
            Self::Tree(file) => file.last_modified(),
        }
    }

    /// Parent directory, if it is still referenced elsewhere.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        match self {
            Self::Raw(file) => file.parent().map(Self::Raw),
            Self::Tree(file) => file.parent().map(Self::Tree),
        }
    }

    /// Look up a direct child by name.
    pub fn child(&self, name: &str) -> Result<Option<Self>> {
        match self {
            Self::Raw(file) => Ok(file.child(name).map(Self::Raw)),
            Self::Tree(file) => Ok(file.child(name)?.map(Self::Tree)),
        }
    }

    /// Return the child called `name`, creating it if missing.
    pub fn create_child(&self, name: &str, directory: bool) -> Result<Self> {
        match self {
            Self::Raw(file) => file.create_child(name, directory).map(Self::Raw),
            Self::Tree(file) => file.create_child(name, directory).map(Self::Tree),
        }
    }

    /// Delete the entry. Directories must be empty.
    ///
    /// Returns `false` on failure; logging is left to the caller.
    #[must_use]
    pub fn delete(&self) -> bool {
        match self {
            Self::Raw(file) => file.delete(),
            Self::Tree(file) => file.delete(),
        }
    }

    /// Direct children. Empty for files.
    pub fn list_files(&self) -> Result<Vec<Self>> {
        match self {
            Self::Raw(file) => Ok(file.list_files()?.into_iter().map(Self::Raw).collect()),
            Self::Tree(file) => Ok(file.list_files()?.into_iter().map(Self::Tree).collect()),
        }
    }

    /// Open the file for sequential reading.
    pub fn open_read(&self) -> Result<ReadStream> {
        match self {
            Self::Raw(file) => file.open_read(),
            Self::Tree(file) => file.open_read(),
        }
    }

    /// Open the file for writing, truncating unless `append` is set.
    pub fn open_write(&self, append: bool) -> Result<WriteStream> {
        match self {
            Self::Raw(file) => file.open_write(append),
            Self::Tree(file) => file.open_write(append),
        }
    }

    /// Statistics of the filesystem holding this entry.
    pub fn filesystem_stats(&self) -> Result<FilesystemStats> {
        match self {
            Self::Raw(file) => file.filesystem_stats(),
            Self::Tree(file) => file.filesystem_stats(),
        }
    }

    /// Whether the handle was materialized by the tree backend.
    #[must_use]
    pub const fn is_tree_backed(&self) -> bool {
        matches!(self, Self::Tree(_))
    }
}

/// Append `name` to a logical path.
pub(crate) fn join_path(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{parent}{name}")
    } else {
        format!("{parent}/{name}")
    }
}
