//! Permission-scoped document trees.
//!
//! A document tree is a storage location the user granted access to without
//! exposing raw paths: entries are addressed by opaque [`DocumentId`]s and
//! can only be reached by walking from the tree root. [`DocumentTree`] is the
//! provider interface; [`LocalDocumentTree`] serves a granted directory.

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::stats::{self, FilesystemStats};

/// Opaque document identifier, `volume:relative/path`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId(String);

impl DocumentId {
    /// Wrap an identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Metadata of one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentInfo {
    /// Identifier.
    pub id: DocumentId,
    /// Display name (leaf segment).
    pub name: String,
    /// Whether the document is a directory.
    pub is_directory: bool,
    /// Size in bytes.
    pub length: u64,
    /// Modification time in epoch milliseconds.
    pub last_modified: i64,
}

/// Provider of a granted document tree.
#[cfg_attr(test, mockall::automock)]
pub trait DocumentTree: Send + Sync {
    /// Identifier of the grant, as stored in the settings.
    fn location(&self) -> String;

    /// Logical path under which the tree is mounted.
    fn mount_point(&self) -> String;

    /// Whether the granted root is still reachable.
    fn root_exists(&self) -> bool;

    /// The tree root.
    fn root(&self) -> Result<DocumentInfo>;

    /// Current metadata of `id`, or `None` if it is gone.
    fn stat(&self, id: &DocumentId) -> Option<DocumentInfo>;

    /// Direct children of a directory.
    fn list_children(&self, parent: &DocumentId) -> Result<Vec<DocumentInfo>>;

    /// Child of `parent` called `name`.
    fn find_child(&self, parent: &DocumentId, name: &str) -> Result<Option<DocumentInfo>> {
        Ok(self
            .list_children(parent)?
            .into_iter()
            .find(|child| child.name == name))
    }

    /// Create a file or directory under `parent`.
    fn create_document(
        &self,
        parent: &DocumentId,
        name: &str,
        directory: bool,
    ) -> Result<DocumentInfo>;

    /// Delete a file or an empty directory.
    fn delete(&self, id: &DocumentId) -> Result<()>;

    /// Open a document for reading.
    fn open_read(&self, id: &DocumentId) -> Result<Box<dyn Read + Send>>;

    /// Open a document for writing.
    fn open_write(&self, id: &DocumentId, append: bool) -> Result<Box<dyn Write + Send>>;

    /// Statistics of the filesystem backing the tree.
    fn filesystem_stats(&self) -> Result<FilesystemStats>;
}

/// Document tree served from a directory on a local volume.
#[derive(Debug, Clone)]
pub struct LocalDocumentTree {
    volume: String,
    volume_root: PathBuf,
    root_relative: String,
}

impl LocalDocumentTree {
    /// Grant the subtree `root_relative` of `volume`, mounted at `volume_root`.
    pub fn new(
        volume: impl Into<String>,
        volume_root: impl Into<PathBuf>,
        root_relative: impl Into<String>,
    ) -> Self {
        let root_relative: String = root_relative.into();
        Self {
            volume: volume.into(),
            volume_root: volume_root.into(),
            root_relative: root_relative.trim_matches('/').to_string(),
        }
    }

    fn root_id(&self) -> DocumentId {
        DocumentId(format!("{}:{}", self.volume, self.root_relative))
    }

    fn relative<'a>(&self, id: &'a DocumentId) -> Result<&'a str> {
        let relative = id
            .as_str()
            .strip_prefix(self.volume.as_str())
            .and_then(|rest| rest.strip_prefix(':'))
            .ok_or_else(|| Error::unresolved(id.as_str(), "document belongs to another volume"))?;
        if relative.split('/').any(|segment| segment == "..") {
            return Err(Error::unresolved(id.as_str(), "document escapes its volume"));
        }
        Ok(relative)
    }

    fn native(&self, id: &DocumentId) -> Result<PathBuf> {
        let relative = self.relative(id)?;
        Ok(if relative.is_empty() {
            self.volume_root.clone()
        } else {
            self.volume_root.join(relative)
        })
    }

    fn child_id(parent: &DocumentId, name: &str) -> DocumentId {
        if parent.as_str().ends_with(':') {
            DocumentId(format!("{parent}{name}"))
        } else {
            DocumentId(format!("{parent}/{name}"))
        }
    }

    fn info(&self, id: DocumentId) -> Option<DocumentInfo> {
        let native = self.native(&id).ok()?;
        let metadata = fs::metadata(&native).ok()?;
        let relative = self.relative(&id).ok()?;
        let name = match relative.rsplit('/').next() {
            Some(leaf) if !leaf.is_empty() => leaf.to_string(),
            _ => self.volume.clone(),
        };
        let last_modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX));
        Some(DocumentInfo {
            id,
            name,
            is_directory: metadata.is_dir(),
            length: if metadata.is_file() { metadata.len() } else { 0 },
            last_modified,
        })
    }

    fn existing(&self, id: &DocumentId) -> Result<PathBuf> {
        let native = self.native(id)?;
        if native.exists() {
            Ok(native)
        } else {
            Err(Error::io("resolve", id.as_str(), "document does not exist"))
        }
    }
}

impl DocumentTree for LocalDocumentTree {
    fn location(&self) -> String {
        format!("{}:{}", self.volume, self.root_relative)
    }

    fn mount_point(&self) -> String {
        format!("tree://{}/{}", self.volume, self.root_relative)
            .trim_end_matches('/')
            .to_string()
    }

    fn root_exists(&self) -> bool {
        self.native(&self.root_id()).is_ok_and(|p| p.is_dir())
    }

    fn root(&self) -> Result<DocumentInfo> {
        self.info(self.root_id())
            .filter(|info| info.is_directory)
            .ok_or_else(|| Error::root_unavailable(self.location()))
    }

    fn stat(&self, id: &DocumentId) -> Option<DocumentInfo> {
        self.info(id.clone())
    }

    fn list_children(&self, parent: &DocumentId) -> Result<Vec<DocumentInfo>> {
        let native = self.existing(parent)?;
        let entries = fs::read_dir(&native).map_err(|e| Error::io("list", parent.as_str(), e))?;
        let mut children = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::io("list", parent.as_str(), e))?;
            let id = Self::child_id(parent, &entry.file_name().to_string_lossy());
            if let Some(info) = self.info(id) {
                children.push(info);
            }
        }
        Ok(children)
    }

    fn find_child(&self, parent: &DocumentId, name: &str) -> Result<Option<DocumentInfo>> {
        self.existing(parent)?;
        Ok(self.info(Self::child_id(parent, name)))
    }

    fn create_document(
        &self,
        parent: &DocumentId,
        name: &str,
        directory: bool,
    ) -> Result<DocumentInfo> {
        let parent_native = self.existing(parent)?;
        let id = Self::child_id(parent, name);
        let native = parent_native.join(name);
        if directory {
            fs::create_dir_all(&native).map_err(|e| Error::io("create directory", id.as_str(), e))?;
        } else if !native.exists() {
            File::create(&native).map_err(|e| Error::io("create document", id.as_str(), e))?;
        }
        self.info(id.clone())
            .ok_or_else(|| Error::io("create document", id.as_str(), "document vanished"))
    }

    fn delete(&self, id: &DocumentId) -> Result<()> {
        let native = self.existing(id)?;
        let removed = if native.is_dir() {
            fs::remove_dir(&native)
        } else {
            fs::remove_file(&native)
        };
        removed.map_err(|e| Error::io("delete", id.as_str(), e))
    }

    fn open_read(&self, id: &DocumentId) -> Result<Box<dyn Read + Send>> {
        let native = self.existing(id)?;
        let file = File::open(native).map_err(|e| Error::io("open", id.as_str(), e))?;
        Ok(Box::new(file))
    }

    fn open_write(&self, id: &DocumentId, append: bool) -> Result<Box<dyn Write + Send>> {
        let native = self.existing(id)?;
        let file = OpenOptions::new()
            .write(true)
            .append(append)
            .truncate(!append)
            .open(native)
            .map_err(|e| Error::io("open for write", id.as_str(), e))?;
        Ok(Box::new(file))
    }

    fn filesystem_stats(&self) -> Result<FilesystemStats> {
        stats::disk_stats_for(&self.volume_root)
    }
}

/// Turns a stored storage-location identifier into a document tree.
#[cfg_attr(test, mockall::automock)]
pub trait TreeResolver: Send + Sync {
    /// Open the tree behind `location`, or `None` if it no longer resolves.
    fn resolve(&self, location: &str) -> Option<Arc<dyn DocumentTree>>;
}

/// Resolves `volume:relative` locations against known local volumes.
#[derive(Debug, Clone, Default)]
pub struct LocalTreeResolver {
    volumes: HashMap<String, PathBuf>,
}

impl LocalTreeResolver {
    /// Resolver without any volume.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver knowing the user's home (`primary`) and music (`music`) directories.
    #[must_use]
    pub fn with_standard_volumes() -> Self {
        let mut resolver = Self::new();
        if let Some(home) = dirs::home_dir() {
            resolver = resolver.with_volume("primary", home);
        }
        if let Some(music) = dirs::audio_dir() {
            resolver = resolver.with_volume("music", music);
        }
        resolver
    }

    /// Register a volume.
    #[must_use]
    pub fn with_volume(mut self, name: impl Into<String>, root: impl AsRef<Path>) -> Self {
        self.volumes.insert(name.into(), root.as_ref().to_path_buf());
        self
    }
}

impl TreeResolver for LocalTreeResolver {
    fn resolve(&self, location: &str) -> Option<Arc<dyn DocumentTree>> {
        let (volume, relative) = location.split_once(':')?;
        let root = self.volumes.get(volume)?;
        Some(Arc::new(LocalDocumentTree::new(volume, root.clone(), relative)))
    }
}
