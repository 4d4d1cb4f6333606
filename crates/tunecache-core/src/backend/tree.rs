//! Backend over a granted [`DocumentTree`].
//!
//! Handles carry the document id they were resolved to and a synthesized
//! logical path rooted at the tree's mount point. Every operation that walks
//! or opens the tree first probes the granted root, so a revoked grant
//! surfaces as a root-unavailable error instead of a confusing I/O failure.

use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Weak};

use tracing::{debug, warn};

use super::document::{DocumentId, DocumentInfo, DocumentTree};
use crate::error::{Error, Result};
use crate::handle::{ReadStream, WriteStream, join_path};
use crate::stats::FilesystemStats;
use crate::storage::normalize_path;

struct TreeNode {
    tree: Arc<dyn DocumentTree>,
    id: DocumentId,
    name: String,
    path: String,
    is_directory: bool,
    parent: Weak<TreeNode>,
}

/// A file or directory inside a document tree.
#[derive(Clone)]
pub struct TreeFile {
    node: Arc<TreeNode>,
}

impl fmt::Debug for TreeFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeFile")
            .field("id", &self.node.id)
            .field("path", &self.node.path)
            .field("is_directory", &self.node.is_directory)
            .finish_non_exhaustive()
    }
}

impl TreeFile {
    fn new(
        tree: Arc<dyn DocumentTree>,
        info: DocumentInfo,
        path: String,
        parent: Weak<TreeNode>,
    ) -> Self {
        Self {
            node: Arc::new(TreeNode {
                tree,
                id: info.id,
                name: info.name,
                path,
                is_directory: info.is_directory,
                parent,
            }),
        }
    }

    fn child_from(&self, info: DocumentInfo) -> Self {
        let path = join_path(&self.node.path, &info.name);
        Self::new(
            Arc::clone(&self.node.tree),
            info,
            path,
            Arc::downgrade(&self.node),
        )
    }

    fn ensure_root(&self) -> Result<()> {
        if self.node.tree.root_exists() {
            Ok(())
        } else {
            Err(Error::root_unavailable(self.node.tree.location()))
        }
    }

    /// Document id.
    pub fn id(&self) -> &DocumentId {
        &self.node.id
    }

    /// Leaf segment.
    pub fn name(&self) -> &str {
        &self.node.name
    }

    /// Logical path.
    pub fn path(&self) -> &str {
        &self.node.path
    }

    /// Whether the document is a directory.
    pub fn is_directory(&self) -> bool {
        self.node.is_directory
    }

    /// Whether the document is a file.
    pub fn is_file(&self) -> bool {
        !self.node.is_directory && self.exists()
    }

    /// Whether the document is still present.
    pub fn exists(&self) -> bool {
        self.node.tree.stat(&self.node.id).is_some()
    }

    /// Size in bytes.
    pub fn length(&self) -> u64 {
        if self.node.is_directory {
            return 0;
        }
        self.node.tree.stat(&self.node.id).map_or(0, |info| info.length)
    }

    /// Modification time in epoch milliseconds.
    pub fn last_modified(&self) -> i64 {
        self.node
            .tree
            .stat(&self.node.id)
            .map_or(0, |info| info.last_modified)
    }

    /// Parent handle, if still alive.
    pub fn parent(&self) -> Option<Self> {
        self.node.parent.upgrade().map(|node| Self { node })
    }

    /// Child called `name`, if present.
    pub fn child(&self, name: &str) -> Result<Option<Self>> {
        self.ensure_root()?;
        Ok(self
            .node
            .tree
            .find_child(&self.node.id, name)?
            .map(|info| self.child_from(info)))
    }

    /// Child called `name`, created if missing.
    pub fn create_child(&self, name: &str, directory: bool) -> Result<Self> {
        if let Some(existing) = self.child(name)? {
            return Ok(existing);
        }
        let info = self
            .node
            .tree
            .create_document(&self.node.id, name, directory)?;
        debug!("Created document {} under {}", info.id, self.node.path);
        Ok(self.child_from(info))
    }

    /// Delete the document (directories must be empty).
    pub fn delete(&self) -> bool {
        self.node.tree.delete(&self.node.id).is_ok()
    }

    /// Direct children.
    pub fn list_files(&self) -> Result<Vec<Self>> {
        self.ensure_root()?;
        if !self.node.is_directory {
            return Ok(Vec::new());
        }
        Ok(self
            .node
            .tree
            .list_children(&self.node.id)?
            .into_iter()
            .map(|info| self.child_from(info))
            .collect())
    }

    /// Open for reading.
    pub fn open_read(&self) -> Result<ReadStream> {
        self.ensure_root()?;
        self.node.tree.open_read(&self.node.id)
    }

    /// Open for writing.
    pub fn open_write(&self, append: bool) -> Result<WriteStream> {
        self.ensure_root()?;
        self.node.tree.open_write(&self.node.id, append)
    }

    /// Statistics of the filesystem backing the tree.
    pub fn filesystem_stats(&self) -> Result<FilesystemStats> {
        self.node.tree.filesystem_stats()
    }
}

/// Backend rooted at a granted document tree.
#[derive(Clone)]
pub struct TreeBackend {
    tree: Arc<dyn DocumentTree>,
    root: TreeFile,
}

impl fmt::Debug for TreeBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeBackend")
            .field("location", &self.tree.location())
            .field("root", &self.root)
            .finish()
    }
}

impl TreeBackend {
    /// Open the backend, failing with a root-unavailable error if the grant
    /// no longer resolves.
    pub fn open(tree: Arc<dyn DocumentTree>) -> Result<Self> {
        if !tree.root_exists() {
            return Err(Error::root_unavailable(tree.location()));
        }
        let info = tree.root()?;
        let path = normalize_path(&tree.mount_point());
        debug!("Using tree storage root {} at {}", tree.location(), path);
        let root = TreeFile::new(Arc::clone(&tree), info, path, Weak::new());
        Ok(Self { tree, root })
    }

    /// Identifier of the granted tree.
    pub fn location(&self) -> String {
        self.tree.location()
    }

    /// Root handle.
    pub const fn root(&self) -> &TreeFile {
        &self.root
    }

    /// Fail if the granted root has gone away.
    pub fn ensure_available(&self) -> Result<()> {
        self.root.ensure_root()
    }

    /// Copy `from` to `to_parent/to_name`, then delete the source.
    ///
    /// Directories are moved child by child. Both paths exist until the
    /// source deletion completes.
    pub fn rename(
        &self,
        from: &TreeFile,
        to_parent: &TreeFile,
        to_name: &str,
    ) -> Result<TreeFile> {
        let children = if from.is_directory() {
            from.list_files()?
        } else {
            Vec::new()
        };
        let target = to_parent.create_child(to_name, from.is_directory())?;
        if target.id() == from.id() {
            return Ok(target);
        }

        if from.is_directory() {
            for child in children {
                self.rename(&child, &target, child.name())?;
            }
        } else {
            let mut reader = from.open_read()?;
            let mut writer = target.open_write(false)?;
            io::copy(&mut reader, &mut writer)
                .and_then(|_| writer.flush())
                .map_err(|e| Error::io("copy", from.path(), e))?;
        }

        if !from.delete() {
            warn!(
                "Failed to delete {} after copying it to {}",
                from.path(),
                target.path()
            );
        }
        Ok(target)
    }
}
