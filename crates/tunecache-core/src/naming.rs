//! Canonical cache paths derived from media metadata.
//!
//! Everything in here is pure string manipulation: no function touches the
//! filesystem. Paths are logical paths (see [`crate::storage`]), built with
//! `/` as the separator and rooted at the storage root's path.
//!
//! Layout produced under the cache root:
//!
//! ```text
//! <root>/<artist>/<album>/[NN-]<title>.<ext>        finished / pinned
//! <root>/<artist>/<album>/[NN-]<title>.partial.<ext> being written
//! <root>/<artist>/<album>/[NN-]<title>.complete.<ext> evictable
//! <root>/artwork/<md5(albumDir)>.jpeg[-small]
//! <root>/playlists/<server>/<name>.m3u
//! ```

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::storage::normalize_path;

/// Placeholder used for blank names.
pub const UNNAMED: &str = "unnamed";

/// Legacy per-album cover file name. Never evicted on its own.
pub const ALBUM_ART_FILE: &str = "folder.jpeg";

/// Directory (under the root) holding album art keyed by [`album_art_key`].
pub const ARTWORK_DIRECTORY: &str = "artwork";

/// Directory (under the root) holding per-server playlist files.
pub const PLAYLISTS_DIRECTORY: &str = "playlists";

/// Extension of playlist files.
pub const PLAYLIST_EXTENSION: &str = "m3u";

const PARTIAL: &str = "partial";
const COMPLETE: &str = "complete";

/// Characters (and sequences) that cannot appear in a path segment.
const FILE_SYSTEM_UNSAFE: &[&str] = &["/", "\\", "..", ":", "\"", "?", "*", "<", ">", "|"];

#[allow(clippy::expect_used)]
static TITLE_WITH_TRACK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d\d-").expect("valid track prefix pattern"));

/// Metadata of a media entry as returned by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaEntry {
    /// Server identifier, or a local path for offline-imported files.
    pub id: String,
    /// Structural path reported by the server (e.g. `Artist/Album/01 Song.mp3`).
    pub path: Option<String>,
    /// Whether the entry is a directory (album) rather than a track.
    #[serde(default)]
    pub is_directory: bool,
    /// Artist name.
    pub artist: Option<String>,
    /// Album name.
    pub album: Option<String>,
    /// Track title.
    pub title: Option<String>,
    /// Track number within the album.
    pub track: Option<u32>,
    /// Original file extension.
    pub suffix: Option<String>,
    /// Extension after server-side transcoding, if any.
    pub transcoded_suffix: Option<String>,
}

impl MediaEntry {
    /// Create an entry with only its identifier set.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Set the structural path.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Set the artist.
    #[must_use]
    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self
    }

    /// Set the album.
    #[must_use]
    pub fn with_album(mut self, album: impl Into<String>) -> Self {
        self.album = Some(album.into());
        self
    }

    /// Set the title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the track number.
    #[must_use]
    pub const fn with_track(mut self, track: u32) -> Self {
        self.track = Some(track);
        self
    }

    /// Set the original extension.
    #[must_use]
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }

    /// Set the transcoded extension.
    #[must_use]
    pub fn with_transcoded_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.transcoded_suffix = Some(suffix.into());
        self
    }

    /// Mark the entry as a directory.
    #[must_use]
    pub const fn as_directory(mut self) -> Self {
        self.is_directory = true;
        self
    }

    /// Extension the cached file will carry: transcoded first, then original.
    #[must_use]
    pub fn cached_extension(&self) -> Option<&str> {
        [&self.transcoded_suffix, &self.suffix]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|s| !s.trim().is_empty())
    }
}

/// Replace every unsafe character of a single path segment with `-`.
///
/// Blank or missing input maps to [`UNNAMED`].
///
/// ```
/// use tunecache_core::naming::file_system_safe;
/// assert_eq!(file_system_safe(Some("AC/DC")), "AC-DC");
/// assert_eq!(file_system_safe(Some("  ")), "unnamed");
/// assert_eq!(file_system_safe(None), "unnamed");
/// ```
#[must_use]
pub fn file_system_safe(name: Option<&str>) -> String {
    let Some(name) = name.filter(|n| !n.trim().is_empty()) else {
        return UNNAMED.to_string();
    };
    FILE_SYSTEM_UNSAFE
        .iter()
        .fold(name.to_string(), |acc, unsafe_str| acc.replace(unsafe_str, "-"))
}

/// Sanitize every segment of a `/`-separated relative path.
#[must_use]
pub fn file_system_safe_dir(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| file_system_safe(Some(segment)))
        .collect::<Vec<_>>()
        .join("/")
}

/// Everything before the last `/`, or `None` if the path has no parent.
#[must_use]
pub fn parent_path(path: &str) -> Option<&str> {
    path.rfind('/').map(|index| &path[..index])
}

/// Directory that holds the tracks of `entry`.
///
/// Reuses the server's structural layout when the entry carries a path with
/// a parent; otherwise falls back to `<root>/<artist>/<album>`, substituting
/// the title when the album sanitizes to [`UNNAMED`].
#[must_use]
pub fn album_directory_for(root: &str, entry: &MediaEntry) -> String {
    if let Some(path) = entry.path.as_deref()
        && let Some(structural_parent) = parent_path(path)
    {
        let safe = file_system_safe_dir(if entry.is_directory {
            path
        } else {
            structural_parent
        });
        if !safe.is_empty() {
            return format!("{root}/{safe}");
        }
    }

    let artist = file_system_safe(entry.artist.as_deref());
    let mut album = file_system_safe(entry.album.as_deref());
    if album == UNNAMED {
        album = file_system_safe(entry.title.as_deref());
    }
    format!("{root}/{artist}/{album}")
}

/// Final (bare) path of a track's cached file.
///
/// Offline-imported entries, whose identifier already lives under the album
/// directory, are returned verbatim.
#[must_use]
pub fn song_file_for(root: &str, entry: &MediaEntry) -> String {
    let dir = album_directory_for(root, entry);
    if entry.id.starts_with(&format!("{dir}/")) {
        return entry.id.clone();
    }

    let mut file_name = String::with_capacity(64);
    let title_has_track = entry
        .title
        .as_deref()
        .is_some_and(|title| TITLE_WITH_TRACK.is_match(title));
    if !title_has_track
        && let Some(track) = entry.track.filter(|t| *t > 0)
    {
        file_name.push_str(&format!("{track:02}-"));
    }
    file_name.push_str(&file_system_safe(entry.title.as_deref()));
    if let Some(ext) = entry.cached_extension() {
        file_name.push('.');
        file_name.push_str(ext);
    }
    format!("{dir}/{file_name}")
}

/// Cache key for an album's art: md5 of the album directory plus a size suffix.
#[must_use]
pub fn album_art_key(album_dir: &str, large: bool) -> String {
    let digest = md5::compute(album_dir.as_bytes());
    let suffix = if large { ".jpeg" } else { ".jpeg-small" };
    format!("{digest:x}{suffix}")
}

/// Path of the art file shared by every track of `entry`'s album.
#[must_use]
pub fn album_art_file(root: &str, entry: &MediaEntry, large: bool) -> String {
    let key = album_art_key(&album_directory_for(root, entry), large);
    format!("{root}/{ARTWORK_DIRECTORY}/{key}")
}

/// Directory holding the playlists of `server`.
#[must_use]
pub fn playlist_directory(root: &str, server: &str) -> String {
    format!(
        "{root}/{PLAYLISTS_DIRECTORY}/{}",
        file_system_safe(Some(server))
    )
}

/// File name a playlist called `name` is stored under.
///
/// Spaces are already normalized here so that names compare equal to what
/// a directory listing returns.
#[must_use]
pub fn playlist_file_name(name: &str) -> String {
    let safe = normalize_path(&file_system_safe(Some(name)));
    format!("{safe}.{PLAYLIST_EXTENSION}")
}

/// Full path of the playlist file for `name` on `server`.
#[must_use]
pub fn playlist_file_for(root: &str, server: &str, name: &str) -> String {
    format!(
        "{}/{}",
        playlist_directory(root, server),
        playlist_file_name(name)
    )
}

/// Split `path` at the last `.` of its final segment.
fn split_extension(path: &str) -> (&str, Option<&str>) {
    let segment_start = path.rfind('/').map_or(0, |i| i + 1);
    match path[segment_start..].rfind('.') {
        Some(dot) => {
            let dot = segment_start + dot;
            (&path[..dot], Some(&path[dot + 1..]))
        }
        None => (path, None),
    }
}

/// Path without its extension.
#[must_use]
pub fn base_name(path: &str) -> &str {
    split_extension(path).0
}

/// Extension of the final segment, or `""` if there is none.
#[must_use]
pub fn extension(path: &str) -> &str {
    split_extension(path).1.unwrap_or("")
}

fn with_lifecycle(path: &str, marker: &str) -> String {
    match split_extension(path) {
        (base, Some(ext)) => format!("{base}.{marker}.{ext}"),
        (base, None) => format!("{base}.{marker}"),
    }
}

/// `<base>.partial.<ext>`: the name a file carries while being written.
#[must_use]
pub fn partial_file(path: &str) -> String {
    with_lifecycle(path, PARTIAL)
}

/// `<base>.complete.<ext>`: the name of a finished, evictable file.
#[must_use]
pub fn complete_file(path: &str) -> String {
    with_lifecycle(path, COMPLETE)
}

/// The lifecycle marker carried by `path`, if any.
fn lifecycle_marker(path: &str) -> Option<(&'static str, &str, Option<&str>)> {
    let (base, ext) = split_extension(path);
    for marker in [PARTIAL, COMPLETE] {
        // `<base>.<marker>.<ext>`
        if let Some(stripped) = base.strip_suffix(marker)
            && let Some(stripped) = stripped.strip_suffix('.')
        {
            return Some((marker, stripped, ext));
        }
        // `<base>.<marker>` (no extension)
        if ext == Some(marker) {
            return Some((marker, base, None));
        }
    }
    None
}

/// Whether `path` names an in-progress download.
#[must_use]
pub fn is_partial(path: &str) -> bool {
    matches!(lifecycle_marker(path), Some((PARTIAL, _, _)))
}

/// Whether `path` names a finished, evictable download.
#[must_use]
pub fn is_complete(path: &str) -> bool {
    matches!(lifecycle_marker(path), Some((COMPLETE, _, _)))
}

/// Remove a `.partial` / `.complete` marker, returning the bare path.
///
/// Paths without a marker are returned unchanged.
#[must_use]
pub fn strip_lifecycle_suffix(path: &str) -> String {
    match lifecycle_marker(path) {
        Some((_, base, Some(ext))) => format!("{base}.{ext}"),
        Some((_, base, None)) => base.to_string(),
        None => path.to_string(),
    }
}
