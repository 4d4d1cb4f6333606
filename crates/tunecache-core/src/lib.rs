//! Tunecache Core Library
//!
//! This crate provides the storage engine of an offline media cache:
//! - A uniform file handle over raw filesystem paths and document trees
//! - The storage root, selected from settings, with fallback to the default
//! - Deterministic naming of cached songs, album art and playlists
//! - Eviction of cached files under a size budget and a free-space floor

pub mod backend;
pub mod cleaner;
pub mod config;
pub mod downloads;
pub mod error;
pub mod handle;
pub mod naming;
pub mod playlist;
pub mod stats;
pub mod storage;

pub use backend::BackendKind;
pub use cleaner::{CacheCleaner, CacheUsage, CleanupReport, PassKind};
pub use config::{AppConfig, ConfigManager, SettingsStore};
pub use downloads::{ActiveDownload, ActiveDownloads, DownloadRegistry};
pub use error::{Error, ErrorKind, Result, StorageError};
pub use handle::FileHandle;
pub use naming::MediaEntry;
pub use playlist::Playlist;
pub use stats::{FilesystemStats, SpaceProbe};
pub use storage::{StorageEvent, StorageRoot, normalize_path};
