//! Application configuration management.
//!
//! Handles loading, saving, and managing the settings the cache engine
//! consumes: the cache size budget, the free-space floor, and where the
//! cache lives (default directory or a user-granted storage tree).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Default cache size budget in megabytes.
pub const DEFAULT_CACHE_SIZE_MB: i64 = 2000;

/// Canonical value of the "no limit" cache size sentinel. Any negative value
/// is treated the same way.
pub const UNLIMITED_CACHE_SIZE: i64 = -1;

/// Default free-space floor in megabytes.
pub const DEFAULT_MIN_FREE_SPACE_MB: u64 = 500;

/// Default name of the active server.
pub const DEFAULT_SERVER: &str = "default";

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    /// Cache size budget in megabytes; negative means unlimited.
    #[serde(default = "default_cache_size")]
    pub cache_size_limit_mb: i64,
    /// Space that must stay free on the hosting filesystem, in megabytes.
    #[serde(default = "default_min_free_space")]
    pub min_free_space_mb: u64,
    /// Whether the cache lives in a user-chosen storage tree.
    #[serde(default)]
    pub custom_storage_location: bool,
    /// Opaque identifier of the chosen storage tree.
    #[serde(default)]
    pub storage_location: Option<String>,
    /// On-device directory used when no custom tree is active.
    #[serde(default = "default_storage_directory")]
    pub default_storage_directory: PathBuf,
    /// Server whose playlists are currently shown.
    #[serde(default = "default_server")]
    pub active_server: String,
}

const fn default_cache_size() -> i64 {
    DEFAULT_CACHE_SIZE_MB
}

const fn default_min_free_space() -> u64 {
    DEFAULT_MIN_FREE_SPACE_MB
}

fn default_server() -> String {
    DEFAULT_SERVER.to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache_size_limit_mb: DEFAULT_CACHE_SIZE_MB,
            min_free_space_mb: DEFAULT_MIN_FREE_SPACE_MB,
            custom_storage_location: false,
            storage_location: None,
            default_storage_directory: default_storage_directory(),
            active_server: default_server(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `path`, or create default if not found.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("Config file not found, using defaults");
            let config = Self::default();
            if let Err(e) = config.save_to(path) {
                warn!("Failed to save default config: {}", e);
            }
            return Ok(config);
        }

        let content = fs::read_to_string(path)
            .map_err(|e| Error::io("read config", path.display().to_string(), e))?;

        let config: Self = serde_json::from_str(&content)
            .map_err(|e| Error::Configuration(format!("Failed to parse config file: {e}")))?;

        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Save configuration to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be written.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.exists()
        {
            fs::create_dir_all(parent)
                .map_err(|e| Error::io("create config dir", parent.display().to_string(), e))?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
            .map_err(|e| Error::io("write config", path.display().to_string(), e))?;

        debug!("Saved config to {}", path.display());
        Ok(())
    }

    /// Cache budget in bytes, or `None` when unlimited.
    #[must_use]
    pub fn cache_limit_bytes(&self) -> Option<u64> {
        u64::try_from(self.cache_size_limit_mb)
            .ok()
            .map(|mb| mb.saturating_mul(BYTES_PER_MB))
    }

    /// Free-space floor in bytes.
    #[must_use]
    pub const fn min_free_space_bytes(&self) -> u64 {
        self.min_free_space_mb.saturating_mul(BYTES_PER_MB)
    }

    /// Switch the cache to a user-granted storage tree.
    pub fn set_custom_location(&mut self, location: impl Into<String>) {
        self.custom_storage_location = true;
        self.storage_location = Some(location.into());
    }

    /// Switch the cache back to the default directory.
    pub fn use_default_location(&mut self) {
        self.custom_storage_location = false;
        self.storage_location = None;
    }

    /// Update the default storage directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory doesn't exist or isn't writable.
    pub fn set_default_storage_directory(&mut self, path: PathBuf) -> Result<()> {
        validate_storage_directory(&path)?;
        self.default_storage_directory = path;
        info!(
            "Updated default storage directory to: {}",
            self.default_storage_directory.display()
        );
        Ok(())
    }
}

/// Get the default on-device storage directory.
#[must_use]
pub fn default_storage_directory() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tunecache")
        .join("music")
}

/// Get the path to the config file.
#[must_use]
pub fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join("tunecache")
        .join("config.json")
}

/// Validate that a directory is suitable for holding the cache.
pub fn validate_storage_directory(path: &Path) -> Result<()> {
    if !path.is_absolute() {
        return Err(Error::Configuration(
            "Storage directory must be an absolute path".to_string(),
        ));
    }

    if path.exists() {
        if !path.is_dir() {
            return Err(Error::Configuration(format!(
                "Path exists but is not a directory: {}",
                path.display()
            )));
        }

        let test_file = path.join(".tunecache_write_test");
        match fs::write(&test_file, "test") {
            Ok(()) => {
                let _ = fs::remove_file(&test_file);
            }
            Err(e) => {
                return Err(Error::Configuration(format!(
                    "Directory is not writable: {} ({})",
                    path.display(),
                    e
                )));
            }
        }
    } else {
        fs::create_dir_all(path).map_err(|e| {
            Error::Configuration(format!("Cannot create directory {}: {}", path.display(), e))
        })?;
    }

    Ok(())
}

/// The settings the cache engine reads.
///
/// Implemented by [`ConfigManager`]; mocked in tests.
#[cfg_attr(test, mockall::automock)]
pub trait SettingsStore: Send + Sync {
    /// Snapshot of the current configuration.
    fn snapshot(&self) -> AppConfig;

    /// Forget the custom storage tree and fall back to the default directory.
    fn revert_to_default_location(&self);
}

/// Configuration manager that handles loading and caching config.
///
/// Interior mutability lets a single manager be shared (behind an `Arc`) by
/// the UI, the storage root and the cache cleaner.
#[derive(Debug)]
pub struct ConfigManager {
    config: RwLock<AppConfig>,
    /// Where the config is persisted; `None` keeps it in memory only.
    path: Option<PathBuf>,
}

impl ConfigManager {
    /// Create a config manager persisted at `path`.
    pub fn open(path: PathBuf) -> Result<Self> {
        let config = AppConfig::load_from(&path)?;
        Ok(Self {
            config: RwLock::new(config),
            path: Some(path),
        })
    }

    /// Create a config manager that never touches the disk.
    #[must_use]
    pub fn in_memory(config: AppConfig) -> Self {
        Self {
            config: RwLock::new(config),
            path: None,
        }
    }

    /// Get a copy of the current configuration.
    #[must_use]
    pub fn config(&self) -> AppConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Apply `change` to the configuration and persist it.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be saved.
    pub fn update(&self, change: impl FnOnce(&mut AppConfig)) -> Result<()> {
        let snapshot = {
            let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);
            change(&mut config);
            config.clone()
        };
        self.persist(&snapshot)
    }

    /// Reset to default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be saved.
    pub fn reset(&self) -> Result<()> {
        self.update(|config| *config = AppConfig::default())
    }

    fn persist(&self, config: &AppConfig) -> Result<()> {
        match &self.path {
            Some(path) => config.save_to(path),
            None => Ok(()),
        }
    }
}

impl SettingsStore for ConfigManager {
    fn snapshot(&self) -> AppConfig {
        self.config()
    }

    fn revert_to_default_location(&self) {
        if let Err(e) = self.update(AppConfig::use_default_location) {
            warn!("Failed to persist storage location fallback: {}", e);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.cache_size_limit_mb, DEFAULT_CACHE_SIZE_MB);
        assert_eq!(config.min_free_space_mb, DEFAULT_MIN_FREE_SPACE_MB);
        assert!(!config.custom_storage_location);
        assert!(config.storage_location.is_none());
        assert!(!config.default_storage_directory.as_os_str().is_empty());
    }

    #[test]
    fn test_cache_limit_bytes() {
        let mut config = AppConfig {
            cache_size_limit_mb: 3,
            ..Default::default()
        };
        assert_eq!(config.cache_limit_bytes(), Some(3 * 1024 * 1024));
        config.cache_size_limit_mb = UNLIMITED_CACHE_SIZE;
        assert_eq!(config.cache_limit_bytes(), None);
        config.cache_size_limit_mb = -42;
        assert_eq!(config.cache_limit_bytes(), None);
        config.cache_size_limit_mb = 0;
        assert_eq!(config.cache_limit_bytes(), Some(0));
    }

    #[test]
    fn test_min_free_space_bytes() {
        let config = AppConfig::default();
        assert_eq!(config.min_free_space_bytes(), 500 * 1024 * 1024);
    }

    #[test]
    fn test_location_switching() {
        let mut config = AppConfig::default();
        config.set_custom_location("primary:Music");
        assert!(config.custom_storage_location);
        assert_eq!(config.storage_location.as_deref(), Some("primary:Music"));
        config.use_default_location();
        assert!(!config.custom_storage_location);
        assert!(config.storage_location.is_none());
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = AppConfig {
            cache_size_limit_mb: 10,
            default_storage_directory: PathBuf::from("/test/path"),
            ..Default::default()
        };

        let json = serde_json::to_string_pretty(&config).expect("Should serialize");
        assert!(json.contains("cache_size_limit_mb"));

        let deserialized: AppConfig = serde_json::from_str(&json).expect("Should deserialize");
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_config_deserialization_fills_defaults() {
        let json = r#"{"cache_size_limit_mb": 12}"#;
        let config: AppConfig = serde_json::from_str(json).expect("Should deserialize");
        assert_eq!(config.cache_size_limit_mb, 12);
        assert_eq!(config.min_free_space_mb, DEFAULT_MIN_FREE_SPACE_MB);
        assert_eq!(config.active_server, DEFAULT_SERVER);
    }

    #[test]
    fn test_load_creates_default_file() {
        let temp_dir = TempDir::new().expect("Should create temp dir");
        let path = temp_dir.path().join("nested/config.json");
        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(path.exists());
    }

    #[test]
    fn test_load_rejects_garbage() {
        let temp_dir = TempDir::new().expect("Should create temp dir");
        let path = temp_dir.path().join("config.json");
        fs::write(&path, "not json").unwrap();
        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("parse"));
    }

    #[test]
    fn test_manager_update_persists() {
        let temp_dir = TempDir::new().expect("Should create temp dir");
        let path = temp_dir.path().join("config.json");
        let manager = ConfigManager::open(path.clone()).unwrap();
        manager
            .update(|c| c.set_custom_location("primary:Music"))
            .unwrap();

        let reloaded = AppConfig::load_from(&path).unwrap();
        assert!(reloaded.custom_storage_location);
        assert_eq!(reloaded.storage_location.as_deref(), Some("primary:Music"));
    }

    #[test]
    fn test_manager_revert_to_default_location() {
        let mut config = AppConfig::default();
        config.set_custom_location("primary:Music");
        let manager = ConfigManager::in_memory(config);
        manager.revert_to_default_location();
        let snapshot = manager.snapshot();
        assert!(!snapshot.custom_storage_location);
        assert!(snapshot.storage_location.is_none());
    }

    #[test]
    fn test_manager_reset() {
        let manager = ConfigManager::in_memory(AppConfig {
            cache_size_limit_mb: 1,
            ..Default::default()
        });
        manager.reset().unwrap();
        assert_eq!(manager.config(), AppConfig::default());
    }

    #[test]
    fn test_validate_storage_directory_success() {
        let temp_dir = TempDir::new().expect("Should create temp dir");
        assert!(validate_storage_directory(temp_dir.path()).is_ok());
    }

    #[test]
    fn test_validate_storage_directory_creates_nested() {
        let temp_dir = TempDir::new().expect("Should create temp dir");
        let nested_path = temp_dir.path().join("level1/level2");
        assert!(validate_storage_directory(&nested_path).is_ok());
        assert!(nested_path.is_dir());
    }

    #[test]
    fn test_validate_storage_directory_relative_path() {
        let err = validate_storage_directory(Path::new("./relative")).unwrap_err();
        assert!(err.to_string().contains("absolute"));
    }

    #[test]
    fn test_validate_storage_directory_existing_file() {
        let temp_dir = TempDir::new().expect("Should create temp dir");
        let file_path = temp_dir.path().join("not_a_directory");
        fs::write(&file_path, "test content").expect("Should write file");
        let err = validate_storage_directory(&file_path).unwrap_err();
        assert!(err.to_string().contains("not a directory"));
    }

    #[test]
    fn test_set_default_storage_directory() {
        let temp_dir = TempDir::new().expect("Should create temp dir");
        let mut config = AppConfig::default();
        config
            .set_default_storage_directory(temp_dir.path().to_path_buf())
            .unwrap();
        assert_eq!(config.default_storage_directory, temp_dir.path());
        assert!(
            config
                .set_default_storage_directory(PathBuf::from("relative"))
                .is_err()
        );
    }

    #[test]
    fn test_config_file_path_uses_correct_name() {
        let path = config_file_path();
        assert!(path.ends_with("tunecache/config.json"));
    }
}
