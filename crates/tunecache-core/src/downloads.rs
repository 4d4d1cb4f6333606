//! The download subsystem as seen by the cache engine.
//!
//! The cleaner only needs to know which files belong to downloads that are
//! still in flight. [`ActiveDownloads`] is that seam; [`DownloadRegistry`]
//! is a simple thread-safe implementation the download manager can feed.

use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::naming;

/// Paths owned by one active download.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActiveDownload {
    /// File being written (`<base>.partial.<ext>`).
    pub partial_path: String,
    /// Where the finished file goes: the `.complete` path, or the bare path
    /// when the song is saved permanently.
    pub complete_or_save_path: String,
}

impl ActiveDownload {
    /// Download of the song whose bare path is `song_path`.
    ///
    /// `save` selects the permanent (bare) destination instead of the
    /// evictable `.complete` one.
    #[must_use]
    pub fn for_song(song_path: &str, save: bool) -> Self {
        Self {
            partial_path: naming::partial_file(song_path),
            complete_or_save_path: if save {
                song_path.to_string()
            } else {
                naming::complete_file(song_path)
            },
        }
    }
}

/// Source of the protected-file set.
#[cfg_attr(test, mockall::automock)]
pub trait ActiveDownloads: Send + Sync {
    /// Every download currently tracked as active.
    fn all_active_downloads(&self) -> Vec<ActiveDownload>;
}

/// In-memory registry of active downloads.
#[derive(Debug, Default)]
pub struct DownloadRegistry {
    downloads: RwLock<Vec<ActiveDownload>>,
}

impl DownloadRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a download. Tracking the same download twice is a no-op.
    pub fn track(&self, download: ActiveDownload) {
        let mut downloads = self.downloads.write().unwrap_or_else(PoisonError::into_inner);
        if !downloads.contains(&download) {
            debug!("Tracking download {}", download.partial_path);
            downloads.push(download);
        }
    }

    /// Stop tracking the download writing `partial_path`.
    ///
    /// Returns whether a download was removed.
    pub fn finish(&self, partial_path: &str) -> bool {
        let mut downloads = self.downloads.write().unwrap_or_else(PoisonError::into_inner);
        let before = downloads.len();
        downloads.retain(|d| d.partial_path != partial_path);
        before != downloads.len()
    }

    /// Number of tracked downloads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.downloads
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no download is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ActiveDownloads for DownloadRegistry {
    fn all_active_downloads(&self) -> Vec<ActiveDownload> {
        self.downloads
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
