//! Cache eviction.
//!
//! Three passes, each triggered independently:
//!
//! - [`CacheCleaner::clean`] after every completed download: sweeps stale
//!   `.partial` files, evicts the oldest cached files until both the cache
//!   budget and the free-space floor are satisfied, then removes directories
//!   left empty.
//! - [`CacheCleaner::clean_space`] before a write: evicts oldest-first only
//!   as much as the shortfall requires.
//! - [`CacheCleaner::clean_playlists`] after a playlist refresh: deletes the
//!   playlist files the server no longer knows about.
//!
//! Each pass kind has its own in-flight flag. Calling a pass while the same
//! kind is running returns `Ok(None)` immediately; different kinds may run
//! concurrently. Files owned by active downloads are never deleted.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::SettingsStore;
use crate::downloads::{ActiveDownload, ActiveDownloads};
use crate::error::Result;
use crate::handle::FileHandle;
use crate::naming::{self, ALBUM_ART_FILE};
use crate::playlist::{self, Playlist};
use crate::stats::{DiskSpaceProbe, FilesystemStats, SpaceProbe};
use crate::storage::{StorageRoot, normalize_path};

/// Kind of cleanup pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PassKind {
    /// Age-based and orphan sweep.
    Clean,
    /// Shortfall-driven eviction before a write.
    CleanSpace,
    /// Orphan playlist removal.
    CleanPlaylists,
}

impl fmt::Display for PassKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clean => write!(f, "clean"),
            Self::CleanSpace => write!(f, "clean-space"),
            Self::CleanPlaylists => write!(f, "clean-playlists"),
        }
    }
}

/// Outcome of one cleanup pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    /// Files deleted.
    pub files_deleted: usize,
    /// Directories deleted.
    pub directories_deleted: usize,
    /// Bytes freed by deleted files.
    pub bytes_freed: u64,
    /// Bytes the pass set out to free.
    pub bytes_to_delete: u64,
    /// Eligible files kept because an active download owns them.
    pub files_protected: usize,
    /// Deletions that failed.
    pub files_failed: usize,
    /// Logical paths of deleted files, in deletion order.
    pub deleted_paths: Vec<String>,
    /// Logical paths of deleted directories.
    pub deleted_directories: Vec<String>,
    /// Duration of the pass in milliseconds.
    pub duration_ms: u64,
}

impl CleanupReport {
    /// Human-readable one-line summary.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "Deleted {} files and {} directories, freed {} of {} bytes ({} protected, {} failed)",
            self.files_deleted,
            self.directories_deleted,
            self.bytes_freed,
            self.bytes_to_delete,
            self.files_protected,
            self.files_failed
        )
    }
}

/// Snapshot of the cache's footprint.
#[derive(Debug, Clone, Serialize)]
pub struct CacheUsage {
    /// Logical path of the cache root.
    pub root_path: String,
    /// Number of `.partial` and `.complete` files.
    pub files: usize,
    /// How many of those are `.partial`.
    pub partial_files: usize,
    /// Bytes used by those files.
    pub used_bytes: u64,
    /// Configured budget, `None` when unlimited.
    pub limit_bytes: Option<u64>,
    /// Statistics of the hosting filesystem, when known.
    pub filesystem: Option<FilesystemStats>,
    /// What a cleanup would currently need to free.
    pub bytes_to_delete: u64,
}

/// Bytes to free so the cache fits its budget and the filesystem keeps
/// `min_free_space` available.
///
/// The larger of the two shortfalls wins. A missing limit or missing
/// statistics contribute nothing.
#[must_use]
pub fn minimum_delete(
    used_bytes: u64,
    cache_limit: Option<u64>,
    stats: Option<FilesystemStats>,
    min_free_space: u64,
) -> u64 {
    let for_cache_limit = cache_limit.map_or(0, |limit| used_bytes.saturating_sub(limit));
    let for_fs_floor = stats.map_or(0, |stats| {
        let allowed = i128::from(stats.total_bytes) - i128::from(min_free_space);
        let excess = i128::from(stats.used_bytes()) - allowed;
        u64::try_from(excess.max(0)).unwrap_or(u64::MAX)
    });
    for_cache_limit.max(for_fs_floor)
}

struct CacheFile {
    handle: FileHandle,
    length: u64,
    modified: i64,
}

/// Depth-first walk collecting cache files; directories are pushed after
/// their children, i.e. in bottom-up order.
fn collect(
    directory: &FileHandle,
    files: &mut Vec<CacheFile>,
    directories: &mut Vec<FileHandle>,
) -> Result<()> {
    for child in directory.list_files()? {
        if child.is_directory() {
            collect(&child, files, directories)?;
        } else if naming::is_partial(child.name()) || naming::is_complete(child.name()) {
            files.push(CacheFile {
                length: child.length(),
                modified: child.last_modified(),
                handle: child,
            });
        }
    }
    directories.push(directory.clone());
    Ok(())
}

/// Paths that no pass may delete.
struct Protected {
    files: HashSet<String>,
    directories: HashSet<String>,
}

impl Protected {
    fn new(root: &FileHandle, downloads: &[ActiveDownload]) -> Self {
        let mut files = HashSet::new();
        files.insert(root.path().to_string());
        for download in downloads {
            files.insert(normalize_path(&download.partial_path));
            files.insert(normalize_path(&download.complete_or_save_path));
        }

        // Directories holding a protected file stay, even if they look empty.
        let mut directories: HashSet<String> = files.clone();
        for path in &files {
            let mut current = path.as_str();
            while let Some(parent) = naming::parent_path(current) {
                if !directories.insert(parent.to_string()) {
                    break;
                }
                current = parent;
            }
        }
        Self { files, directories }
    }

    fn covers_file(&self, file: &FileHandle) -> bool {
        self.files.contains(file.path())
    }

    fn covers_directory(&self, directory: &FileHandle) -> bool {
        self.directories.contains(directory.path())
    }
}

#[derive(Debug, Default)]
struct InFlight {
    clean: bool,
    clean_space: bool,
    clean_playlists: bool,
}

impl InFlight {
    fn flag(&mut self, kind: PassKind) -> &mut bool {
        match kind {
            PassKind::Clean => &mut self.clean,
            PassKind::CleanSpace => &mut self.clean_space,
            PassKind::CleanPlaylists => &mut self.clean_playlists,
        }
    }
}

/// Clears the in-flight flag of a pass when it ends, however it ends.
struct PassGuard<'a> {
    in_flight: &'a Mutex<InFlight>,
    kind: PassKind,
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        *self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flag(self.kind) = false;
    }
}

/// The eviction engine.
pub struct CacheCleaner {
    storage: Arc<StorageRoot>,
    downloads: Arc<dyn ActiveDownloads>,
    settings: Arc<dyn SettingsStore>,
    probe: Arc<dyn SpaceProbe>,
    in_flight: Mutex<InFlight>,
}

impl CacheCleaner {
    /// Create a cleaner measuring free space on the real disks.
    pub fn new(
        storage: Arc<StorageRoot>,
        downloads: Arc<dyn ActiveDownloads>,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        Self {
            storage,
            downloads,
            settings,
            probe: Arc::new(DiskSpaceProbe),
            in_flight: Mutex::new(InFlight::default()),
        }
    }

    /// Replace the source of filesystem statistics.
    #[must_use]
    pub fn with_space_probe(mut self, probe: Arc<dyn SpaceProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Run the age-based sweep. `Ok(None)` if one is already running.
    pub fn clean(&self) -> Result<Option<CleanupReport>> {
        self.run(PassKind::Clean, || self.clean_pass())
    }

    /// Free just enough space for the budget and the floor. `Ok(None)` if
    /// one is already running.
    pub fn clean_space(&self) -> Result<Option<CleanupReport>> {
        self.run(PassKind::CleanSpace, || self.clean_space_pass())
    }

    /// Delete playlist files of the active server that are not in `live`.
    /// `Ok(None)` if one is already running.
    pub fn clean_playlists(&self, live: &[Playlist]) -> Result<Option<CleanupReport>> {
        self.run(PassKind::CleanPlaylists, || self.clean_playlists_pass(live))
    }

    /// Run [`clean`](Self::clean) on the blocking pool.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn_clean(self: &Arc<Self>) -> JoinHandle<Option<CleanupReport>> {
        let cleaner = Arc::clone(self);
        tokio::task::spawn_blocking(move || cleaner.clean().ok().flatten())
    }

    /// Run [`clean_space`](Self::clean_space) on the blocking pool.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn_clean_space(self: &Arc<Self>) -> JoinHandle<Option<CleanupReport>> {
        let cleaner = Arc::clone(self);
        tokio::task::spawn_blocking(move || cleaner.clean_space().ok().flatten())
    }

    /// Run [`clean_playlists`](Self::clean_playlists) on the blocking pool.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn_clean_playlists(
        self: &Arc<Self>,
        live: Vec<Playlist>,
    ) -> JoinHandle<Option<CleanupReport>> {
        let cleaner = Arc::clone(self);
        tokio::task::spawn_blocking(move || cleaner.clean_playlists(&live).ok().flatten())
    }

    /// Current footprint of the cache.
    pub fn cache_usage(&self) -> Result<CacheUsage> {
        let root = self.storage.root()?;
        let mut files = Vec::new();
        collect(&root, &mut files, &mut Vec::new())?;
        let config = self.settings.snapshot();
        Ok(CacheUsage {
            root_path: root.path().to_string(),
            files: files.len(),
            partial_files: files
                .iter()
                .filter(|f| naming::is_partial(f.handle.name()))
                .count(),
            used_bytes: files.iter().map(|f| f.length).sum(),
            limit_bytes: config.cache_limit_bytes(),
            filesystem: self.probe.stats_for(&root),
            bytes_to_delete: self.bytes_to_delete(&files),
        })
    }

    fn begin(&self, kind: PassKind) -> Option<PassGuard<'_>> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let flag = in_flight.flag(kind);
        if *flag {
            return None;
        }
        *flag = true;
        Some(PassGuard {
            in_flight: &self.in_flight,
            kind,
        })
    }

    fn run(
        &self,
        kind: PassKind,
        pass: impl FnOnce() -> Result<CleanupReport>,
    ) -> Result<Option<CleanupReport>> {
        let Some(_guard) = self.begin(kind) else {
            debug!("Cache {} already running, skipping", kind);
            return Ok(None);
        };

        let started = Instant::now();
        match pass() {
            Ok(mut report) => {
                for path in report.deleted_paths.iter().chain(&report.deleted_directories) {
                    self.storage.forget(path);
                }
                report.duration_ms =
                    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                info!("Cache {} finished: {}", kind, report.summary());
                Ok(Some(report))
            }
            Err(e) => {
                error!("Cache {} aborted: {}", kind, e);
                self.storage.notice_failure(&e);
                Err(e)
            }
        }
    }

    fn bytes_to_delete(&self, files: &[CacheFile]) -> u64 {
        let Some(first) = files.first() else {
            return 0;
        };
        let config = self.settings.snapshot();
        let used_bytes = files.iter().map(|f| f.length).sum();
        minimum_delete(
            used_bytes,
            config.cache_limit_bytes(),
            self.probe.stats_for(&first.handle),
            config.min_free_space_bytes(),
        )
    }

    fn walk(&self) -> Result<(FileHandle, Vec<CacheFile>, Vec<FileHandle>)> {
        let root = self.storage.root()?;
        let mut files = Vec::new();
        let mut directories = Vec::new();
        collect(&root, &mut files, &mut directories)?;
        files.sort_by_key(|f| f.modified);
        Ok((root, files, directories))
    }

    fn clean_pass(&self) -> Result<CleanupReport> {
        let (root, files, directories) = self.walk()?;
        let protected = Protected::new(&root, &self.downloads.all_active_downloads());
        let mut report = CleanupReport {
            bytes_to_delete: self.bytes_to_delete(&files),
            ..CleanupReport::default()
        };
        debug!(
            "Cleaning {} cache files under {}, {} bytes to delete",
            files.len(),
            root.path(),
            report.bytes_to_delete
        );

        for file in &files {
            let stale_partial = naming::is_partial(file.handle.name());
            if report.bytes_freed >= report.bytes_to_delete && !stale_partial {
                continue;
            }
            if file.handle.name() == ALBUM_ART_FILE {
                continue;
            }
            if protected.covers_file(&file.handle) {
                report.files_protected += 1;
                continue;
            }
            delete_file(&file.handle, file.length, &mut report);
        }

        for directory in &directories {
            if !protected.covers_directory(directory) {
                remove_if_empty(directory, &mut report);
            }
        }
        Ok(report)
    }

    fn clean_space_pass(&self) -> Result<CleanupReport> {
        let (root, files, _) = self.walk()?;
        let mut report = CleanupReport {
            bytes_to_delete: self.bytes_to_delete(&files),
            ..CleanupReport::default()
        };
        if report.bytes_to_delete == 0 {
            debug!("Enough space under {}, nothing to delete", root.path());
            return Ok(report);
        }

        let protected = Protected::new(&root, &self.downloads.all_active_downloads());
        for file in &files {
            if report.bytes_freed >= report.bytes_to_delete {
                break;
            }
            if file.handle.name() == ALBUM_ART_FILE {
                continue;
            }
            if protected.covers_file(&file.handle) {
                report.files_protected += 1;
                continue;
            }
            delete_file(&file.handle, file.length, &mut report);
        }
        Ok(report)
    }

    fn clean_playlists_pass(&self, live: &[Playlist]) -> Result<CleanupReport> {
        let server = self.settings.snapshot().active_server;
        let live: HashSet<String> = live.iter().map(Playlist::file_name).collect();
        let mut report = CleanupReport::default();

        for file in playlist::list_playlist_files(&self.storage, &server)? {
            if live.contains(file.name()) {
                continue;
            }
            let length = file.length();
            report.bytes_to_delete += length;
            delete_file(&file, length, &mut report);
        }
        Ok(report)
    }
}

/// Delete one file; a file that is already gone is not a failure.
fn delete_file(file: &FileHandle, length: u64, report: &mut CleanupReport) {
    if file.delete() {
        debug!("Deleted {} ({} bytes)", file.path(), length);
        report.files_deleted += 1;
        report.bytes_freed += length;
        report.deleted_paths.push(file.path().to_string());
    } else if file.exists() {
        warn!("Failed to delete {}", file.path());
        report.files_failed += 1;
    } else {
        debug!("{} was already deleted", file.path());
    }
}

/// Delete `directory` if it is empty, or holds nothing but the album art.
fn remove_if_empty(directory: &FileHandle, report: &mut CleanupReport) {
    let mut children = match directory.list_files() {
        Ok(children) => children,
        Err(e) => {
            warn!("Failed to list {}: {}", directory.path(), e);
            return;
        }
    };

    let only_art = matches!(
        children.as_slice(),
        [only] if only.name() == ALBUM_ART_FILE && only.is_file()
    );
    if only_art && let Some(art) = children.pop() {
        let length = art.length();
        delete_file(&art, length, report);
        children = match directory.list_files() {
            Ok(children) => children,
            Err(e) => {
                warn!("Failed to list {}: {}", directory.path(), e);
                return;
            }
        };
    }

    if !children.is_empty() {
        return;
    }
    if directory.delete() {
        debug!("Deleted empty directory {}", directory.path());
        report.directories_deleted += 1;
        report
            .deleted_directories
            .push(directory.path().to_string());
    } else if directory.exists() {
        warn!("Failed to delete directory {}", directory.path());
        report.files_failed += 1;
    }
}
