//! Backend over native filesystem paths.
//!
//! The logical path of a raw handle is its native path, normalized with
//! [`normalize_path`].

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::UNIX_EPOCH;

use filetime::FileTime;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::handle::{ReadStream, WriteStream, join_path};
use crate::stats::{self, FilesystemStats};
use crate::storage::normalize_path;

#[derive(Debug)]
struct RawNode {
    native: PathBuf,
    name: String,
    path: String,
    parent: Weak<RawNode>,
}

/// A file or directory addressed by its native path.
#[derive(Debug, Clone)]
pub struct RawFile {
    node: Arc<RawNode>,
}

impl RawFile {
    fn root(native: PathBuf) -> Self {
        let path = normalize_path(&native.to_string_lossy());
        let name = native
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            node: Arc::new(RawNode {
                native,
                name,
                path,
                parent: Weak::new(),
            }),
        }
    }

    fn child_unchecked(&self, name: &str) -> Self {
        Self {
            node: Arc::new(RawNode {
                native: self.node.native.join(name),
                name: name.to_string(),
                path: join_path(&self.node.path, name),
                parent: Arc::downgrade(&self.node),
            }),
        }
    }

    /// Leaf segment.
    pub fn name(&self) -> &str {
        &self.node.name
    }

    /// Logical path.
    pub fn path(&self) -> &str {
        &self.node.path
    }

    /// Native path on disk.
    pub fn native_path(&self) -> &Path {
        &self.node.native
    }

    /// Whether the entry is a directory.
    pub fn is_directory(&self) -> bool {
        self.node.native.is_dir()
    }

    /// Whether the entry is a regular file.
    pub fn is_file(&self) -> bool {
        self.node.native.is_file()
    }

    /// Whether the entry exists.
    pub fn exists(&self) -> bool {
        self.node.native.exists()
    }

    /// File size, or `0` for directories.
    pub fn length(&self) -> u64 {
        fs::metadata(&self.node.native)
            .ok()
            .filter(fs::Metadata::is_file)
            .map_or(0, |m| m.len())
    }

    /// Modification time in epoch milliseconds.
    pub fn last_modified(&self) -> i64 {
        fs::metadata(&self.node.native)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
    }

    /// Parent handle, if still alive.
    pub fn parent(&self) -> Option<Self> {
        self.node.parent.upgrade().map(|node| Self { node })
    }

    /// Existing child called `name`.
    pub fn child(&self, name: &str) -> Option<Self> {
        let child = self.child_unchecked(name);
        child.exists().then_some(child)
    }

    /// Child called `name`, created if missing.
    pub fn create_child(&self, name: &str, directory: bool) -> Result<Self> {
        let child = self.child_unchecked(name);
        if directory {
            fs::create_dir_all(child.native_path())
                .map_err(|e| Error::io("create directory", child.path(), e))?;
        } else if !child.exists() {
            File::create(child.native_path())
                .map_err(|e| Error::io("create file", child.path(), e))?;
        }
        Ok(child)
    }

    /// Remove the file, or the directory if empty.
    pub fn delete(&self) -> bool {
        let native = self.native_path();
        let removed = if native.is_dir() {
            fs::remove_dir(native)
        } else {
            fs::remove_file(native)
        };
        removed.is_ok()
    }

    /// Direct children.
    pub fn list_files(&self) -> Result<Vec<Self>> {
        if !self.is_directory() {
            return Ok(Vec::new());
        }
        let entries =
            fs::read_dir(self.native_path()).map_err(|e| Error::io("list", self.path(), e))?;
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::io("list", self.path(), e))?;
            files.push(self.child_unchecked(&entry.file_name().to_string_lossy()));
        }
        Ok(files)
    }

    /// Open for reading.
    pub fn open_read(&self) -> Result<ReadStream> {
        let file = File::open(self.native_path()).map_err(|e| Error::io("open", self.path(), e))?;
        Ok(Box::new(file))
    }

    /// Open for writing.
    pub fn open_write(&self, append: bool) -> Result<WriteStream> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(self.native_path())
            .map_err(|e| Error::io("open for write", self.path(), e))?;
        Ok(Box::new(file))
    }

    /// Statistics of the disk holding this entry.
    pub fn filesystem_stats(&self) -> Result<FilesystemStats> {
        stats::disk_stats_for(self.native_path())
    }
}

/// Backend rooted at an on-device directory.
#[derive(Debug, Clone)]
pub struct RawBackend {
    root: RawFile,
}

impl RawBackend {
    /// Open (creating if needed) the directory used as cache root.
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory)
            .map_err(|e| Error::io("create root", directory.display().to_string(), e))?;
        debug!("Using raw storage root {}", directory.display());
        Ok(Self {
            root: RawFile::root(directory),
        })
    }

    /// Root handle.
    pub const fn root(&self) -> &RawFile {
        &self.root
    }

    /// Move `from` to `to_parent/to_name`.
    ///
    /// Tries an atomic rename first. Files on another device are copied with
    /// their modification time and the source is deleted afterwards. Any
    /// other rename error is returned as is.
    pub fn rename(&self, from: &RawFile, to_parent: &RawFile, to_name: &str) -> Result<RawFile> {
        let target = to_parent.child_unchecked(to_name);
        match fs::rename(from.native_path(), target.native_path()) {
            Ok(()) => Ok(target),
            Err(e) if e.kind() == io::ErrorKind::CrossesDevices && from.is_file() => {
                debug!(
                    "Rename of {} failed ({}), copying to {}",
                    from.path(),
                    e,
                    target.path()
                );
                copy_preserving_mtime(from.native_path(), target.native_path())
                    .map_err(|e| Error::io("copy", from.path(), e))?;
                if let Err(e) = fs::remove_file(from.native_path()) {
                    warn!("Failed to delete {} after copying it: {}", from.path(), e);
                }
                Ok(target)
            }
            Err(e) => Err(Error::io("rename", from.path(), e)),
        }
    }
}

/// Copy `from` to `to`, carrying over the modification time.
pub(crate) fn copy_preserving_mtime(from: &Path, to: &Path) -> std::io::Result<()> {
    let metadata = fs::metadata(from)?;
    fs::copy(from, to)?;
    filetime::set_file_mtime(to, FileTime::from_last_modification_time(&metadata))
}
