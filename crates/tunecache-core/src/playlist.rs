//! Playlist files.
//!
//! Each playlist of a server is cached as an `#EXTM3U` file under
//! `<root>/playlists/<server>/<name>.m3u`, listing one resolved song path per
//! line.

use std::io::{BufRead, BufReader, BufWriter, Write};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, ErrorKind, Result};
use crate::handle::FileHandle;
use crate::naming::{self, MediaEntry, PLAYLIST_EXTENSION};
use crate::storage::{StorageRoot, normalize_path};

/// Header line of every playlist file.
pub const M3U_HEADER: &str = "#EXTM3U";

/// A playlist known to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playlist {
    /// Server identifier.
    pub id: Option<String>,
    /// Display name.
    pub name: String,
}

impl Playlist {
    /// Playlist identified by name only.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
        }
    }

    /// File name the playlist is stored under.
    #[must_use]
    pub fn file_name(&self) -> String {
        naming::playlist_file_name(&self.name)
    }
}

/// Path a song should be listed under: the bare file if it exists, otherwise
/// its `.complete` form if that exists, otherwise the bare path.
fn resolved_song_path(storage: &StorageRoot, root: &str, song: &MediaEntry) -> String {
    let bare = normalize_path(&naming::song_file_for(root, song));
    if storage.is_path_exists(&bare) {
        return bare;
    }
    let complete = naming::complete_file(&bare);
    if storage.is_path_exists(&complete) {
        complete
    } else {
        bare
    }
}

/// Write the playlist `name` of `server`, replacing any previous file.
pub fn write_playlist(
    storage: &StorageRoot,
    server: &str,
    name: &str,
    songs: &[MediaEntry],
) -> Result<FileHandle> {
    let root = storage.root_path()?;
    let path = naming::playlist_file_for(&root, server, name);
    let handle = storage.get_or_create_file_from_path(&path)?;

    let mut out = BufWriter::new(handle.open_write(false)?);
    let mut write = || -> std::io::Result<()> {
        writeln!(out, "{M3U_HEADER}")?;
        for song in songs {
            writeln!(out, "{}", resolved_song_path(storage, &root, song))?;
        }
        out.flush()
    };
    write().map_err(|e| Error::io("write playlist", handle.path(), e))?;

    info!("Wrote playlist {} ({} songs)", handle.path(), songs.len());
    Ok(handle)
}

/// Song paths listed in the playlist `name` of `server`.
pub fn read_playlist(storage: &StorageRoot, server: &str, name: &str) -> Result<Vec<String>> {
    let root = storage.root_path()?;
    let handle = storage.get_from_path(&naming::playlist_file_for(&root, server, name))?;
    let reader = BufReader::new(handle.open_read()?);

    let mut songs = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|e| Error::io("read playlist", handle.path(), e))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        songs.push(line.to_string());
    }
    debug!("Read {} songs from {}", songs.len(), handle.path());
    Ok(songs)
}

/// Playlist files currently stored for `server`.
///
/// A server without a playlist directory has no playlists.
pub fn list_playlist_files(storage: &StorageRoot, server: &str) -> Result<Vec<FileHandle>> {
    let root = storage.root_path()?;
    let directory = match storage.get_from_path(&naming::playlist_directory(&root, server)) {
        Ok(directory) => directory,
        Err(e) if e.kind() == ErrorKind::PathResolutionFailure => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let suffix = format!(".{PLAYLIST_EXTENSION}");
    Ok(directory
        .list_files()?
        .into_iter()
        .filter(|file| file.name().ends_with(&suffix) && file.is_file())
        .collect())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tempfile::TempDir;

    use crate::backend::LocalTreeResolver;
    use crate::config::{AppConfig, ConfigManager};

    fn storage(dir: &TempDir) -> StorageRoot {
        let config = AppConfig {
            default_storage_directory: dir.path().to_path_buf(),
            ..Default::default()
        };
        StorageRoot::new(
            Arc::new(ConfigManager::in_memory(config)),
            Arc::new(LocalTreeResolver::new()),
        )
    }

    fn song(title: &str, track: u32) -> MediaEntry {
        MediaEntry::new(title)
            .with_artist("Artist")
            .with_album("Album")
            .with_title(title)
            .with_track(track)
            .with_suffix("mp3")
    }

    #[test]
    fn test_write_and_read_playlist() {
        let temp_dir = TempDir::new().expect("Should create temp dir");
        let storage = storage(&temp_dir);
        let root = storage.root_path().unwrap();

        // "One" is only cached as .complete, "Two" is pinned, "Three" is absent.
        let one = normalize_path(&naming::song_file_for(&root, &song("One", 1)));
        storage
            .get_or_create_file_from_path(&naming::complete_file(&one))
            .unwrap();
        let two = normalize_path(&naming::song_file_for(&root, &song("Two", 2)));
        storage.get_or_create_file_from_path(&two).unwrap();
        let three = normalize_path(&naming::song_file_for(&root, &song("Three", 3)));

        let handle = write_playlist(
            &storage,
            "home",
            "Road Trip",
            &[song("One", 1), song("Two", 2), song("Three", 3)],
        )
        .unwrap();
        assert_eq!(handle.name(), "Road_Trip.m3u");

        let content = std::fs::read_to_string(temp_dir.path().join("playlists/home/Road_Trip.m3u"))
            .unwrap();
        assert!(content.starts_with("#EXTM3U\n"));

        let songs = read_playlist(&storage, "home", "Road Trip").unwrap();
        assert_eq!(songs, vec![naming::complete_file(&one), two, three]);
    }

    #[test]
    fn test_rewrite_truncates() {
        let temp_dir = TempDir::new().expect("Should create temp dir");
        let storage = storage(&temp_dir);
        write_playlist(&storage, "home", "Mix", &[song("A", 1), song("B", 2)]).unwrap();
        write_playlist(&storage, "home", "Mix", &[song("C", 3)]).unwrap();
        assert_eq!(read_playlist(&storage, "home", "Mix").unwrap().len(), 1);
    }

    #[test]
    fn test_read_missing_playlist() {
        let temp_dir = TempDir::new().expect("Should create temp dir");
        let storage = storage(&temp_dir);
        let err = read_playlist(&storage, "home", "Nope").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PathResolutionFailure);
    }

    #[test]
    fn test_list_playlist_files() {
        let temp_dir = TempDir::new().expect("Should create temp dir");
        let storage = storage(&temp_dir);
        assert!(list_playlist_files(&storage, "home").unwrap().is_empty());

        write_playlist(&storage, "home", "Mix", &[]).unwrap();
        write_playlist(&storage, "other", "Elsewhere", &[]).unwrap();
        let root = storage.root_path().unwrap();
        storage
            .get_or_create_file_from_path(&format!("{root}/playlists/home/notes.txt"))
            .unwrap();

        let names: Vec<String> = list_playlist_files(&storage, "home")
            .unwrap()
            .iter()
            .map(|f| f.name().to_string())
            .collect();
        assert_eq!(names, vec!["Mix.m3u".to_string()]);
    }

    #[test]
    fn test_playlist_file_name() {
        assert_eq!(Playlist::named("Road Trip").file_name(), "Road_Trip.m3u");
    }
}
