//! Composition root: owns the settings, the storage root and the cleaner,
//! and runs one command against them.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};
use tunecache_core::backend::LocalTreeResolver;
use tunecache_core::{
    AppConfig, CacheCleaner, CacheUsage, CleanupReport, ConfigManager, DownloadRegistry, PassKind,
    Playlist, StorageEvent, StorageRoot,
};

use crate::error::{CliError, CliResult};

/// One unit of work requested on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Run one of the cleanup passes.
    Pass(PassKind, Vec<String>),
    /// Report the cache footprint.
    Status,
    /// Move the cache to a granted document tree.
    SetLocation(String),
    /// Move the cache back to the default directory.
    ResetLocation,
    /// Change the default directory.
    SetDirectory(PathBuf),
}

/// The wired-up cache engine.
pub struct App {
    settings: Arc<ConfigManager>,
    storage: Arc<StorageRoot>,
    cleaner: Arc<CacheCleaner>,
}

impl App {
    /// Load settings from `config_path` and resolve trees on the standard volumes.
    pub fn open(config_path: PathBuf) -> CliResult<Self> {
        info!("Using configuration {}", config_path.display());
        let settings = Arc::new(ConfigManager::open(config_path)?);
        Ok(Self::new(settings, LocalTreeResolver::with_standard_volumes()))
    }

    /// Wire the engine around existing settings.
    pub fn new(settings: Arc<ConfigManager>, resolver: LocalTreeResolver) -> Self {
        let storage = Arc::new(StorageRoot::new(settings.clone(), Arc::new(resolver)));
        // Nothing downloads from this process, so nothing is protected.
        let downloads = Arc::new(DownloadRegistry::new());
        let cleaner = Arc::new(CacheCleaner::new(
            storage.clone(),
            downloads,
            settings.clone(),
        ));
        Self {
            settings,
            storage,
            cleaner,
        }
    }

    /// Run `action` and render its outcome.
    pub async fn execute(&self, action: Action, json: bool) -> CliResult<String> {
        match action {
            Action::Pass(kind, names) => {
                let report = self.run_pass(kind, names).await?;
                if json {
                    Ok(serde_json::to_string_pretty(&report)?)
                } else {
                    Ok(report.summary())
                }
            }
            Action::Status => {
                let usage = self.cleaner.cache_usage()?;
                if json {
                    Ok(serde_json::to_string_pretty(&usage)?)
                } else {
                    Ok(render_usage(&usage))
                }
            }
            Action::SetLocation(location) => {
                self.settings
                    .update(|config| config.set_custom_location(location))?;
                self.reselect()
            }
            Action::ResetLocation => {
                self.settings.update(AppConfig::use_default_location)?;
                self.reselect()
            }
            Action::SetDirectory(path) => {
                let mut outcome = Ok(());
                self.settings.update(|config| {
                    outcome = config.set_default_storage_directory(path);
                })?;
                outcome?;
                self.reselect()
            }
        }
    }

    /// User-facing notices queued by the storage root.
    pub fn notices(&self) -> Vec<String> {
        let mut notices = Vec::new();
        while let Some(event) = self.storage.try_recv_event() {
            match event {
                StorageEvent::RootUnavailable { location } => {
                    warn!("Storage location {} is unavailable", location);
                    notices.push(format!(
                        "Storage location {location} is unavailable, the default directory is used instead"
                    ));
                }
                StorageEvent::RootChanged { root_path } => {
                    info!("Cache root is now {}", root_path);
                }
            }
        }
        notices
    }

    async fn run_pass(&self, kind: PassKind, names: Vec<String>) -> CliResult<CleanupReport> {
        let handle = match kind {
            PassKind::Clean => self.cleaner.spawn_clean(),
            PassKind::CleanSpace => self.cleaner.spawn_clean_space(),
            PassKind::CleanPlaylists => self
                .cleaner
                .spawn_clean_playlists(names.into_iter().map(Playlist::named).collect()),
        };
        handle.await?.ok_or(CliError::PassFailed(kind))
    }

    fn reselect(&self) -> CliResult<String> {
        let kind = self.storage.reset()?;
        Ok(format!("Cache root: {} ({kind})", self.storage.root_path()?))
    }
}

fn render_usage(usage: &CacheUsage) -> String {
    let limit = usage
        .limit_bytes
        .map_or_else(|| "unlimited".to_string(), |limit| format!("{limit} bytes"));
    let mut lines = vec![
        format!("Root:       {}", usage.root_path),
        format!(
            "Files:      {} ({} partial)",
            usage.files, usage.partial_files
        ),
        format!("Used:       {} bytes", usage.used_bytes),
        format!("Limit:      {limit}"),
    ];
    if let Some(fs) = &usage.filesystem {
        lines.push(format!(
            "Filesystem: {} of {} bytes available",
            fs.available_bytes, fs.total_bytes
        ));
    }
    lines.push(format!("To delete:  {} bytes", usage.bytes_to_delete));
    lines.join("\n")
}
