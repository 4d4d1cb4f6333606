//! Filesystem statistics.

use std::path::Path;

use serde::Serialize;
use sysinfo::Disks;
use tracing::debug;

use crate::error::{Result, StorageError};
use crate::handle::FileHandle;

/// Capacity of the filesystem holding a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FilesystemStats {
    /// Total capacity in bytes.
    pub total_bytes: u64,
    /// Available space in bytes.
    pub available_bytes: u64,
}

impl FilesystemStats {
    /// Create statistics from raw numbers.
    #[must_use]
    pub const fn new(total_bytes: u64, available_bytes: u64) -> Self {
        Self {
            total_bytes,
            available_bytes,
        }
    }

    /// Returns the used space in bytes.
    #[must_use]
    pub const fn used_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.available_bytes)
    }
}

/// Statistics for the disk whose mount point is the longest prefix of `path`.
pub fn disk_stats_for(path: &Path) -> Result<FilesystemStats> {
    let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|disk| path.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| FilesystemStats::new(disk.total_space(), disk.available_space()))
        .ok_or_else(|| StorageError::StatsUnavailable { path }.into())
}

/// Source of filesystem statistics for the cleaner.
#[cfg_attr(test, mockall::automock)]
pub trait SpaceProbe: Send + Sync {
    /// Statistics of the filesystem holding `file`, if known.
    fn stats_for(&self, file: &FileHandle) -> Option<FilesystemStats>;
}

/// Probe asking the backend of each file.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskSpaceProbe;

impl SpaceProbe for DiskSpaceProbe {
    fn stats_for(&self, file: &FileHandle) -> Option<FilesystemStats> {
        match file.filesystem_stats() {
            Ok(stats) => Some(stats),
            Err(e) => {
                debug!("No filesystem statistics for {}: {}", file.path(), e);
                None
            }
        }
    }
}
