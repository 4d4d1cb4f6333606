//! The storage root: where the cache lives right now.
//!
//! [`StorageRoot`] picks the backend from the settings (a granted document
//! tree when one is configured and still reachable, the default on-device
//! directory otherwise), keeps it for the lifetime of the process and
//! resolves logical paths against it one segment at a time.
//!
//! Resolved handles are cached per root. [`StorageRoot::reset`] swaps the
//! whole root (backend and cache) in one step, so a concurrent cleanup pass
//! sees either the old root or the new one, never a mix.
//!
//! A revoked tree is absorbed here: the setting is reverted to the default
//! location, a [`StorageEvent::RootUnavailable`] is queued for the UI and the
//! operation is retried against the default directory.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, PoisonError, RwLock};

use regex::Regex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::backend::{Backend, BackendKind, RawBackend, TreeBackend, TreeResolver};
use crate::config::SettingsStore;
use crate::error::{Error, Result, StorageError};
use crate::handle::{FileHandle, join_path};
use crate::naming;

#[allow(clippy::expect_used)]
static DUPLICATE_SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|[^:])/{2,}").expect("valid separator pattern"));

/// Normalize a logical path.
///
/// Spaces become `_` and runs of `/` collapse to one, except right after a
/// scheme separator (`tree://`).
///
/// ```
/// use tunecache_core::storage::normalize_path;
/// assert_eq!(normalize_path("/music//Some Artist"), "/music/Some_Artist");
/// assert_eq!(normalize_path("tree://vol//a"), "tree://vol/a");
/// ```
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let path = path.replace(' ', "_");
    DUPLICATE_SEPARATORS.replace_all(&path, "${1}/").into_owned()
}

/// Notices for the user interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageEvent {
    /// The custom location stopped resolving; the default directory is used.
    RootUnavailable {
        /// Location that could not be reached.
        location: String,
    },
    /// The root was re-selected after a settings change.
    RootChanged {
        /// Logical path of the new root.
        root_path: String,
    },
}

#[derive(Debug, Clone, Copy)]
enum Resolve {
    Lookup,
    Create { directory: bool },
}

/// One selected backend together with the handles resolved through it.
#[derive(Debug)]
struct ActiveRoot {
    backend: Backend,
    handles: Mutex<HashMap<String, FileHandle>>,
}

impl ActiveRoot {
    fn new(backend: Backend) -> Self {
        Self {
            backend,
            handles: Mutex::new(HashMap::new()),
        }
    }

    fn root_path(&self) -> &str {
        self.backend.root_path()
    }

    fn segments<'a>(&self, path: &'a str) -> Result<Vec<&'a str>> {
        let root = self.root_path();
        let rest = path
            .strip_prefix(root)
            .filter(|rest| rest.is_empty() || rest.starts_with('/') || root.ends_with('/'))
            .ok_or_else(|| Error::unresolved(path, format!("outside the storage root {root}")))?;
        let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
        if segments.iter().any(|s| *s == "." || *s == "..") {
            return Err(Error::unresolved(path, "relative segments are not allowed"));
        }
        Ok(segments)
    }

    fn cached(&self, path: &str) -> Option<FileHandle> {
        let hit = self
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned();
        match hit {
            Some(handle) if handle.exists() => Some(handle),
            Some(_) => {
                self.forget(path);
                None
            }
            None => None,
        }
    }

    fn remember(&self, handle: &FileHandle) {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle.path().to_string(), handle.clone());
    }

    /// Drop `path` and everything below it from the cache.
    fn forget(&self, path: &str) {
        let below = format!("{path}/");
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|key, _| key != path && !key.starts_with(&below));
    }

    fn resolve(&self, path: &str, mode: Resolve) -> Result<FileHandle> {
        let segments = self.segments(path)?;
        if let Some(hit) = self.cached(path) {
            return Ok(hit);
        }
        let last = segments.len();
        let mut current = self.backend.root();
        let mut walked = self.root_path().to_string();

        for (index, segment) in segments.into_iter().enumerate() {
            walked = join_path(&walked, segment);
            if let Some(cached) = self.cached(&walked) {
                current = cached;
                continue;
            }
            let next = match current.child(segment)? {
                Some(child) => child,
                None => match mode {
                    Resolve::Lookup => {
                        return Err(Error::unresolved(
                            path,
                            format!("missing segment {segment}"),
                        ));
                    }
                    Resolve::Create { directory } => {
                        current.create_child(segment, directory || index + 1 < last)?
                    }
                },
            };
            self.remember(&next);
            current = next;
        }
        Ok(current)
    }
}

/// Single source of truth for the location of the cache.
pub struct StorageRoot {
    settings: Arc<dyn SettingsStore>,
    resolver: Arc<dyn TreeResolver>,
    active: RwLock<Option<Arc<ActiveRoot>>>,
    events: mpsc::UnboundedSender<StorageEvent>,
    receiver: Mutex<mpsc::UnboundedReceiver<StorageEvent>>,
}

impl StorageRoot {
    /// Create a storage root. The backend is selected on first use.
    pub fn new(settings: Arc<dyn SettingsStore>, resolver: Arc<dyn TreeResolver>) -> Self {
        let (events, receiver) = mpsc::unbounded_channel();
        Self {
            settings,
            resolver,
            active: RwLock::new(None),
            events,
            receiver: Mutex::new(receiver),
        }
    }

    /// Select the backend (once) and report which one is active.
    pub fn select_backend(&self) -> Result<BackendKind> {
        Ok(self.active()?.backend.kind())
    }

    /// Drop the current root and its handle cache, then re-select.
    ///
    /// Call after the storage-location setting changed.
    pub fn reset(&self) -> Result<BackendKind> {
        let active = match self.open_backend() {
            Ok(backend) => Arc::new(ActiveRoot::new(backend)),
            Err(e) => {
                *self.active.write().unwrap_or_else(PoisonError::into_inner) = None;
                return Err(e);
            }
        };
        let kind = active.backend.kind();
        let root_path = active.root_path().to_string();
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = Some(active);
        info!("Storage root reset to {} ({})", root_path, kind);
        self.notify(StorageEvent::RootChanged { root_path });
        Ok(kind)
    }

    /// Root handle of the active backend.
    pub fn root(&self) -> Result<FileHandle> {
        self.with_active(|active| {
            active.backend.ensure_available()?;
            Ok(active.backend.root())
        })
    }

    /// Logical path of the active root.
    pub fn root_path(&self) -> Result<String> {
        self.with_active(|active| {
            active.backend.ensure_available()?;
            Ok(active.root_path().to_string())
        })
    }

    /// Resolve `path`, creating missing directories and the file itself.
    pub fn get_or_create_file_from_path(&self, path: &str) -> Result<FileHandle> {
        let path = normalize_path(path);
        self.with_active(|active| active.resolve(&path, Resolve::Create { directory: false }))
    }

    /// Whether every segment of `path` exists.
    pub fn is_path_exists(&self, path: &str) -> bool {
        self.get_from_path(path).is_ok()
    }

    /// Resolve an existing `path`.
    ///
    /// Fails with a path resolution error naming the first missing segment.
    pub fn get_from_path(&self, path: &str) -> Result<FileHandle> {
        let path = normalize_path(path);
        self.with_active(|active| active.resolve(&path, Resolve::Lookup))
    }

    /// Create every missing directory of `path`.
    pub fn create_dirs_on_path(&self, path: &str) -> Result<FileHandle> {
        let path = normalize_path(path);
        self.with_active(|active| active.resolve(&path, Resolve::Create { directory: true }))
    }

    /// Move the entry at `from` to `to`, creating the target directories.
    pub fn rename(&self, from: &str, to: &str) -> Result<FileHandle> {
        let from = normalize_path(from);
        let to = normalize_path(to);
        let (to_dir, to_name) = naming::parent_path(&to)
            .map(|dir| (dir, &to[dir.len() + 1..]))
            .filter(|(_, name)| !name.is_empty())
            .ok_or_else(|| Error::unresolved(to.as_str(), "target has no file name"))?;
        if to.starts_with(&format!("{from}/")) {
            return Err(Error::unresolved(
                to.as_str(),
                format!("cannot move {from} into itself"),
            ));
        }

        self.with_active(|active| {
            let source = active.resolve(&from, Resolve::Lookup)?;
            let target_dir = active.resolve(to_dir, Resolve::Create { directory: true })?;
            let moved = active.backend.rename(&source, &target_dir, to_name)?;
            active.forget(&from);
            active.forget(&to);
            debug!("Renamed {} to {}", from, to);
            Ok(moved)
        })
    }

    /// Delete the entry at `path`. Missing entries and failures return `false`.
    pub fn delete(&self, path: &str) -> bool {
        let path = normalize_path(path);
        let outcome = self.with_active(|active| {
            let handle = active.resolve(&path, Resolve::Lookup)?;
            let deleted = handle.delete();
            if deleted {
                active.forget(&path);
            }
            Ok(deleted)
        });
        match outcome {
            Ok(true) => {
                debug!("Deleted {}", path);
                true
            }
            Ok(false) => {
                warn!("Failed to delete {}", path);
                false
            }
            Err(e) => {
                debug!("Nothing deleted at {}: {}", path, e);
                false
            }
        }
    }

    /// Drop cached handles at and below `path`.
    ///
    /// Call after deleting through a handle rather than through [`Self::delete`].
    pub fn forget(&self, path: &str) {
        let current = self
            .active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(active) = current {
            active.forget(&normalize_path(path));
        }
    }

    #[cfg(test)]
    pub(crate) fn is_cached(&self, path: &str) -> bool {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|active| {
                active
                    .handles
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .contains_key(&normalize_path(path))
            })
    }

    /// Handle a failure raised while working under this root.
    ///
    /// A root-unavailable error triggers the fallback to the default
    /// location. Returns whether the error was absorbed that way.
    pub fn notice_failure(&self, error: &Error) -> bool {
        match error {
            Error::Storage(StorageError::RootUnavailable { location }) => {
                self.fall_back(location);
                true
            }
            _ => false,
        }
    }

    /// Next pending notice for the user interface, if any.
    pub fn try_recv_event(&self) -> Option<StorageEvent> {
        self.receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_recv()
            .ok()
    }

    fn active(&self) -> Result<Arc<ActiveRoot>> {
        let current = self
            .active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(active) = current {
            return Ok(active);
        }

        let mut guard = self.active.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(active) = guard.as_ref() {
            return Ok(Arc::clone(active));
        }
        let active = Arc::new(ActiveRoot::new(self.open_backend()?));
        info!(
            "Selected {} storage root at {}",
            active.backend.kind(),
            active.root_path()
        );
        *guard = Some(Arc::clone(&active));
        Ok(active)
    }

    fn open_backend(&self) -> Result<Backend> {
        let config = self.settings.snapshot();
        if config.custom_storage_location {
            let location = config.storage_location.clone().unwrap_or_default();
            match self.open_tree(&location) {
                Ok(backend) => return Ok(backend),
                Err(e) => {
                    warn!(
                        "Storage location {} is unavailable ({}), using {}",
                        location,
                        e,
                        config.default_storage_directory.display()
                    );
                    self.settings.revert_to_default_location();
                    self.notify(StorageEvent::RootUnavailable { location });
                }
            }
        }
        Ok(Backend::Raw(RawBackend::new(
            config.default_storage_directory,
        )?))
    }

    fn open_tree(&self, location: &str) -> Result<Backend> {
        let tree = self
            .resolver
            .resolve(location)
            .ok_or_else(|| Error::root_unavailable(location))?;
        Ok(Backend::Tree(TreeBackend::open(tree)?))
    }

    fn fall_back(&self, location: &str) {
        {
            let mut guard = self.active.write().unwrap_or_else(PoisonError::into_inner);
            let stale = guard
                .as_ref()
                .is_some_and(|active| active.backend.location().as_deref() == Some(location));
            if !stale {
                return;
            }
            *guard = None;
        }
        warn!(
            "Storage location {} became unavailable, reverting to the default location",
            location
        );
        self.settings.revert_to_default_location();
        self.notify(StorageEvent::RootUnavailable {
            location: location.to_string(),
        });
    }

    fn with_active<T>(&self, operation: impl Fn(&ActiveRoot) -> Result<T>) -> Result<T> {
        let active = self.active()?;
        match operation(active.as_ref()) {
            Err(e) if self.notice_failure(&e) => operation(self.active()?.as_ref()),
            outcome => outcome,
        }
    }

    fn notify(&self, event: StorageEvent) {
        if self.events.send(event).is_err() {
            debug!("Storage event dropped, receiver closed");
        }
    }
}
