//! Integration tests for Tunecache cache workflows.
//!
//! These tests drive the public API end to end:
//! - Eviction under a cache budget, with and without active downloads
//! - Oldest-first ordering and empty directory removal
//! - Playlist cleanup for the active server
//! - Cleaning a tree-backed root, and falling back when it disappears
//!
//! All tests build their cache trees in temporary directories.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use filetime::FileTime;
use rstest::rstest;
use tempfile::TempDir;
use tunecache_core::backend::LocalTreeResolver;
use tunecache_core::{
    ActiveDownload, AppConfig, BackendKind, CacheCleaner, ConfigManager, DownloadRegistry,
    FileHandle, FilesystemStats, MediaEntry, PassKind, Playlist, SpaceProbe, StorageEvent,
    StorageRoot, naming, normalize_path, playlist,
};

// =============================================================================
// Test Fixtures and Utilities
// =============================================================================

const MB: u64 = 1024 * 1024;

/// Filesystem with plenty of room, so only the cache budget matters.
struct AmpleSpace;

impl SpaceProbe for AmpleSpace {
    fn stats_for(&self, _file: &FileHandle) -> Option<FilesystemStats> {
        Some(FilesystemStats::new(1_000_000 * MB, 500_000 * MB))
    }
}

/// A cache rooted in a temporary directory.
struct TestCache {
    dir: TempDir,
    settings: Arc<ConfigManager>,
    storage: Arc<StorageRoot>,
    downloads: Arc<DownloadRegistry>,
    cleaner: CacheCleaner,
}

impl TestCache {
    fn new(limit_mb: i64) -> Self {
        Self::with_resolver(limit_mb, LocalTreeResolver::new(), |_| {})
    }

    fn with_resolver(
        limit_mb: i64,
        resolver: LocalTreeResolver,
        configure: impl FnOnce(&mut AppConfig),
    ) -> Self {
        let dir = TempDir::new().expect("Should create temp dir");
        let mut config = AppConfig {
            cache_size_limit_mb: limit_mb,
            default_storage_directory: dir.path().join("cache"),
            ..Default::default()
        };
        configure(&mut config);

        let settings = Arc::new(ConfigManager::in_memory(config));
        let storage = Arc::new(StorageRoot::new(settings.clone(), Arc::new(resolver)));
        let downloads = Arc::new(DownloadRegistry::new());
        let cleaner = CacheCleaner::new(storage.clone(), downloads.clone(), settings.clone())
            .with_space_probe(Arc::new(AmpleSpace));
        Self {
            dir,
            settings,
            storage,
            downloads,
            cleaner,
        }
    }

    fn native(&self, relative: &str) -> std::path::PathBuf {
        self.dir.path().join("cache").join(relative)
    }

    /// Logical path of `relative` under the active root.
    fn logical(&self, relative: &str) -> String {
        format!(
            "{}/{}",
            self.storage.root_path().expect("Should resolve root"),
            relative
        )
    }

    /// Create a file of `size` bytes modified `age_secs` seconds ago.
    fn file(&self, relative: &str, size: u64, age_secs: i64) {
        write_aged(&self.native(relative), size, age_secs);
    }

    fn exists(&self, relative: &str) -> bool {
        self.native(relative).exists()
    }

    fn protect(&self, relative: &str) {
        let path = self.logical(relative);
        self.downloads.track(ActiveDownload {
            partial_path: path.clone(),
            complete_or_save_path: path,
        });
    }
}

fn write_aged(path: &Path, size: u64, age_secs: i64) {
    fs::create_dir_all(path.parent().expect("Should have parent")).expect("Should create dirs");
    fs::write(path, vec![0u8; size as usize]).expect("Should write file");
    filetime::set_file_mtime(path, FileTime::from_unix_time(1_700_000_000 - age_secs, 0))
        .expect("Should set mtime");
}

/// Small deterministic generator for random cache trees.
struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }
}

// =============================================================================
// Eviction Scenarios
// =============================================================================

#[test]
fn test_clean_over_budget_removes_everything_evictable() {
    let cache = TestCache::new(1);
    cache.file("A/Album1/01-Song.complete.mp3", 2 * MB, 1000);
    cache.file("B/Album2/Song2.partial.mp3", MB, 10);

    let report = cache
        .cleaner
        .clean()
        .expect("Should clean")
        .expect("Should not be running");

    assert_eq!(report.bytes_to_delete, 2 * MB);
    assert_eq!(report.files_deleted, 2);
    assert!(!cache.exists("A/Album1/01-Song.complete.mp3"));
    assert!(!cache.exists("B/Album2/Song2.partial.mp3"));
    assert!(!cache.exists("A"));
    assert!(!cache.exists("B"));
    assert_eq!(report.directories_deleted, 4);
    assert!(cache.native("").is_dir());
}

#[test]
fn test_clean_keeps_protected_file_regardless_of_budget() {
    let cache = TestCache::new(1);
    cache.file("A/Album1/01-Song.complete.mp3", 2 * MB, 1000);
    cache.file("B/Album2/Song2.partial.mp3", MB, 10);
    cache.protect("A/Album1/01-Song.complete.mp3");

    let report = cache.cleaner.clean().expect("Should clean").expect("Should run");

    assert!(cache.exists("A/Album1/01-Song.complete.mp3"));
    assert!(!cache.exists("B/Album2/Song2.partial.mp3"));
    assert!(!cache.exists("B"));
    assert_eq!(report.files_protected, 1);
    assert_eq!(report.bytes_freed, MB);
}

#[test]
fn test_clean_space_leaves_partials_when_budget_is_met() {
    let cache = TestCache::new(2);
    cache.file("A/Album/old.complete.mp3", 2 * MB, 1000);
    cache.file("A/Album/stale.partial.mp3", MB, 10);

    let report = cache
        .cleaner
        .clean_space()
        .expect("Should clean")
        .expect("Should run");

    assert_eq!(report.bytes_to_delete, MB);
    assert!(!cache.exists("A/Album/old.complete.mp3"));
    assert!(cache.exists("A/Album/stale.partial.mp3"));
}

#[test]
fn test_clean_deletes_oldest_first() {
    let cache = TestCache::new(1);
    // Ages deliberately not in name order.
    let ages: [i64; 6] = [40, 90, 10, 70, 20, 60];
    for (i, age) in ages.iter().enumerate() {
        cache.file(&format!("Artist/Album/{i:02}-t.complete.mp3"), MB / 2, *age);
    }

    cache.cleaner.clean().expect("Should clean").expect("Should run");

    let (deleted, kept): (Vec<_>, Vec<_>) = ages
        .iter()
        .enumerate()
        .partition(|(i, _)| !cache.exists(&format!("Artist/Album/{i:02}-t.complete.mp3")));
    assert_eq!(deleted.len(), 4);
    let youngest_deleted = deleted.iter().map(|(_, age)| **age).min().expect("deleted");
    let oldest_kept = kept.iter().map(|(_, age)| **age).max().expect("kept");
    assert!(youngest_deleted > oldest_kept);
}

#[rstest]
fn test_protected_files_survive_random_trees(
    #[values(1, 7, 42, 1234, 98_765)] seed: u64,
    #[values(PassKind::Clean, PassKind::CleanSpace)] pass: PassKind,
) {
    let cache = TestCache::new(0);
    let mut rng = XorShift(seed);
    let mut protected = Vec::new();
    let mut evictable = Vec::new();

    for i in 0..40 {
        let suffix = match rng.below(3) {
            0 => "partial.mp3",
            1 => "complete.mp3",
            _ => "mp3",
        };
        let relative = format!(
            "Artist{}/Album{}/{i:02}-t.{suffix}",
            rng.below(3),
            rng.below(3)
        );
        cache.file(&relative, 1 + rng.below(4096), rng.below(10_000) as i64);
        if rng.below(3) == 0 {
            cache.protect(&relative);
            protected.push(relative);
        } else if suffix != "mp3" {
            evictable.push(relative);
        }
    }

    let report = match pass {
        PassKind::Clean => cache.cleaner.clean(),
        _ => cache.cleaner.clean_space(),
    }
    .expect("Should clean")
    .expect("Should run");

    for relative in &protected {
        assert!(cache.exists(relative), "{relative} was protected");
    }
    // A zero budget can never be met while protected bytes remain.
    for relative in &evictable {
        assert!(!cache.exists(relative), "{relative} should be evicted");
    }
    assert_eq!(report.files_failed, 0);
}

#[test]
fn test_album_directory_with_only_art_is_removed() {
    let cache = TestCache::new(0);
    let root = cache.storage.root_path().expect("Should resolve root");
    let song = MediaEntry::new("s1")
        .with_artist("The Band")
        .with_album("First Album")
        .with_title("Opening")
        .with_track(1)
        .with_suffix("mp3");

    let complete = naming::complete_file(&normalize_path(&naming::song_file_for(&root, &song)));
    let handle = cache
        .storage
        .get_or_create_file_from_path(&complete)
        .expect("Should create song");
    handle
        .open_write(false)
        .expect("Should open song")
        .write_all(b"not really audio")
        .expect("Should write song");
    let album_dir = normalize_path(&naming::album_directory_for(&root, &song));
    cache
        .storage
        .get_or_create_file_from_path(&format!("{album_dir}/{}", naming::ALBUM_ART_FILE))
        .expect("Should create art");

    let report = cache.cleaner.clean().expect("Should clean").expect("Should run");

    assert!(!cache.storage.is_path_exists(&album_dir));
    assert!(!cache.exists("The_Band"));
    assert_eq!(report.directories_deleted, 2);
}

// =============================================================================
// Playlists
// =============================================================================

#[test]
fn test_clean_playlists_keeps_live_playlists_only() {
    let cache = TestCache::new(100);
    let server = cache.settings.config().active_server;
    playlist::write_playlist(&cache.storage, &server, "Road Trip", &[]).expect("Should write");
    playlist::write_playlist(&cache.storage, &server, "Old Mix", &[]).expect("Should write");

    let report = cache
        .cleaner
        .clean_playlists(&[Playlist::named("Road Trip")])
        .expect("Should clean")
        .expect("Should run");

    assert_eq!(report.files_deleted, 1);
    let remaining: Vec<String> = playlist::list_playlist_files(&cache.storage, &server)
        .expect("Should list")
        .iter()
        .map(|f| f.name().to_string())
        .collect();
    assert_eq!(remaining, vec!["Road_Trip.m3u".to_string()]);
}

// =============================================================================
// Tree-backed Roots
// =============================================================================

#[test]
fn test_clean_tree_backed_root() {
    let volume = TempDir::new().expect("Should create temp dir");
    fs::create_dir_all(volume.path().join("Music Cache")).expect("Should create dir");
    let resolver = LocalTreeResolver::new().with_volume("usb", volume.path());
    let cache = TestCache::with_resolver(0, resolver, |config| {
        config.set_custom_location("usb:Music Cache");
    });

    assert_eq!(
        cache.storage.select_backend().expect("Should select"),
        BackendKind::Tree
    );
    let root = cache.storage.root_path().expect("Should resolve root");
    assert!(root.starts_with("tree://usb/"));

    let tree_file = |relative: &str| volume.path().join("Music Cache").join(relative);
    write_aged(&tree_file("A/B/old.complete.mp3"), 100, 500);
    write_aged(&tree_file("A/B/active.partial.mp3"), 100, 10);
    cache.downloads.track(ActiveDownload::for_song(&format!("{root}/A/B/active.mp3"), false));

    let report = cache.cleaner.clean().expect("Should clean").expect("Should run");

    assert_eq!(report.files_deleted, 1);
    assert_eq!(report.files_protected, 1);
    assert!(!tree_file("A/B/old.complete.mp3").exists());
    assert!(tree_file("A/B/active.partial.mp3").exists());
}

#[test]
fn test_revoked_tree_falls_back_to_default() {
    let volume = TempDir::new().expect("Should create temp dir");
    let resolver = LocalTreeResolver::new().with_volume("usb", volume.path());
    let cache = TestCache::with_resolver(0, resolver, |config| {
        config.set_custom_location("usb:gone");
    });

    cache.file("A/B/old.complete.mp3", 100, 500);
    let report = cache.cleaner.clean().expect("Should clean").expect("Should run");

    assert_eq!(report.files_deleted, 1);
    assert!(!cache.settings.config().custom_storage_location);
    assert_eq!(
        cache.storage.try_recv_event(),
        Some(StorageEvent::RootUnavailable {
            location: "usb:gone".to_string()
        })
    );
    assert_eq!(cache.storage.try_recv_event(), None);
}

// =============================================================================
// Background Dispatch
// =============================================================================

#[tokio::test]
async fn test_background_passes() {
    let cache = TestCache::new(0);
    cache.file("A/B/one.complete.mp3", 10, 100);
    cache.file("playlists/default/Gone.m3u", 10, 0);

    let TestCache { dir, cleaner, .. } = cache;
    let cleaner = Arc::new(cleaner);
    let space = cleaner.spawn_clean_space();
    let lists = cleaner.spawn_clean_playlists(Vec::new());

    let space = space.await.expect("Should join").expect("Should run");
    let lists = lists.await.expect("Should join").expect("Should run");
    assert_eq!(space.files_deleted, 1);
    assert_eq!(lists.files_deleted, 1);
    assert!(!dir.path().join("cache/playlists/default/Gone.m3u").exists());
}
