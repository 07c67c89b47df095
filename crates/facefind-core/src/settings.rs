//! Settings Persistence
//!
//! Application settings stored at `{root}/settings.json`.
//! Missing or unreadable files fall back to defaults; every loaded value is
//! normalized before use. Relative paths resolve against the root directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::engine::EngineConfig;
use crate::fs::atomic_write_bytes;
use crate::{CoreError, CoreResult};

/// Settings schema version for migration support
pub const SETTINGS_VERSION: u32 = 1;

/// Settings file name
pub const SETTINGS_FILE: &str = "settings.json";

/// Video record file name inside the data directory
pub const VIDEOS_FILE: &str = "videos.json";

/// Search history file name inside the data directory
pub const SEARCH_HISTORY_FILE: &str = "search_history.json";

/// Default root directory (`{data_dir}/facefind`)
pub fn default_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("facefind")
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub search: SearchSettings,
}

fn default_version() -> u32 {
    SETTINGS_VERSION
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            storage: StorageSettings::default(),
            engine: EngineSettings::default(),
            search: SearchSettings::default(),
        }
    }
}

/// Where media, faces and record files live
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageSettings {
    #[serde(default = "default_videos_dir")]
    pub videos_dir: PathBuf,
    #[serde(default = "default_faces_dir")]
    pub faces_dir: PathBuf,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            videos_dir: default_videos_dir(),
            faces_dir: default_faces_dir(),
            data_dir: default_data_dir(),
            temp_dir: default_temp_dir(),
        }
    }
}

fn default_videos_dir() -> PathBuf {
    PathBuf::from("storage/videos")
}

fn default_faces_dir() -> PathBuf {
    PathBuf::from("storage/faces")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("storage/data")
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("storage/temp")
}

/// How the analysis engine is launched
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EngineSettings {
    #[serde(default = "default_interpreter")]
    pub interpreter: PathBuf,
    #[serde(default = "default_detect_script")]
    pub detect_script: PathBuf,
    #[serde(default = "default_match_script")]
    pub match_script: PathBuf,
    /// Engine working directory (face references are relative to it)
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            detect_script: default_detect_script(),
            match_script: default_match_script(),
            working_dir: default_working_dir(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_interpreter() -> PathBuf {
    PathBuf::from("venv/bin/python3")
}

fn default_detect_script() -> PathBuf {
    PathBuf::from("python/face_detect.py")
}

fn default_match_script() -> PathBuf {
    PathBuf::from("python/face_search.py")
}

fn default_working_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_timeout_secs() -> u64 {
    600
}

/// Face search behaviour
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchSettings {
    /// Engine processes allowed to run at once during one search
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Also compare against archived videos
    #[serde(default)]
    pub include_archived: bool,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            include_archived: false,
        }
    }
}

fn default_max_concurrency() -> usize {
    num_cpus::get().max(2)
}

/// Absolute locations derived from [`StorageSettings`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePaths {
    pub videos_dir: PathBuf,
    pub faces_dir: PathBuf,
    pub data_dir: PathBuf,
    pub temp_dir: PathBuf,
}

impl StoragePaths {
    pub fn videos_file(&self) -> PathBuf {
        self.data_dir.join(VIDEOS_FILE)
    }

    pub fn history_file(&self) -> PathBuf {
        self.data_dir.join(SEARCH_HISTORY_FILE)
    }
}

fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

impl Settings {
    /// Clamps values so persisted state is always usable
    pub fn normalize(&mut self) {
        self.version = SETTINGS_VERSION;
        self.engine.timeout_secs = self.engine.timeout_secs.clamp(1, 24 * 60 * 60);
        self.search.max_concurrency = self.search.max_concurrency.clamp(1, 64);
    }

    pub fn storage_paths(&self, root: &Path) -> StoragePaths {
        StoragePaths {
            videos_dir: resolve(root, &self.storage.videos_dir),
            faces_dir: resolve(root, &self.storage.faces_dir),
            data_dir: resolve(root, &self.storage.data_dir),
            temp_dir: resolve(root, &self.storage.temp_dir),
        }
    }

    pub fn engine_config(&self, root: &Path) -> EngineConfig {
        let working_dir = resolve(root, &self.engine.working_dir);
        // A bare interpreter name ("python3") is looked up on PATH.
        let interpreter = if self.engine.interpreter.components().count() > 1 {
            resolve(&working_dir, &self.engine.interpreter)
        } else {
            self.engine.interpreter.clone()
        };
        EngineConfig {
            interpreter,
            detect_script: self.engine.detect_script.clone(),
            match_script: self.engine.match_script.clone(),
            working_dir,
            timeout: Duration::from_secs(self.engine.timeout_secs),
        }
    }
}

/// Loads and saves [`Settings`] under a root directory
pub struct SettingsManager {
    root: PathBuf,
    settings_path: PathBuf,
}

impl SettingsManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let settings_path = root.join(SETTINGS_FILE);
        Self {
            root,
            settings_path,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    /// Load settings from disk, returning defaults if the file is missing or broken
    pub fn load(&self) -> Settings {
        if !self.settings_path.exists() {
            info!("Settings file not found, using defaults");
            return Settings::default();
        }

        let parsed = std::fs::read_to_string(&self.settings_path)
            .map_err(|e| format!("Failed to read settings file: {}", e))
            .and_then(|content| {
                serde_json::from_str::<Settings>(&content)
                    .map_err(|e| format!("Failed to parse settings file: {}", e))
            });

        match parsed {
            Ok(mut settings) => {
                settings.normalize();
                settings
            }
            Err(e) => {
                warn!("Failed to load settings, using defaults: {}", e);
                Settings::default()
            }
        }
    }

    /// Normalizes and writes settings atomically
    pub fn save(&self, settings: &Settings) -> CoreResult<Settings> {
        let mut normalized = settings.clone();
        normalized.normalize();

        let bytes = serde_json::to_vec_pretty(&normalized)
            .map_err(|e| CoreError::Storage(format!("Failed to serialize settings: {}", e)))?;
        atomic_write_bytes(&self.settings_path, &bytes)
            .map_err(|e| CoreError::Storage(format!("Failed to write settings: {}", e)))?;

        info!("Settings saved to {:?}", self.settings_path);
        Ok(normalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.engine.timeout_secs, 600);
        assert!(settings.search.max_concurrency >= 2);
        assert!(!settings.search.include_archived);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let manager = SettingsManager::new(dir.path());
        assert_eq!(manager.load(), Settings::default());
    }

    #[test]
    fn test_load_corrupt_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(SETTINGS_FILE), "{oops").unwrap();
        let manager = SettingsManager::new(dir.path());
        assert_eq!(manager.load(), Settings::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(SETTINGS_FILE),
            r#"{"engine": {"timeoutSecs": 0, "interpreter": "python3"}}"#,
        )
        .unwrap();
        let settings = SettingsManager::new(dir.path()).load();
        assert_eq!(settings.engine.interpreter, PathBuf::from("python3"));
        assert_eq!(settings.engine.timeout_secs, 1);
        assert_eq!(settings.storage, StorageSettings::default());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let manager = SettingsManager::new(dir.path());

        let mut settings = Settings::default();
        settings.search.max_concurrency = 500;
        settings.search.include_archived = true;
        let saved = manager.save(&settings).unwrap();
        assert_eq!(saved.search.max_concurrency, 64);

        let loaded = manager.load();
        assert_eq!(loaded, saved);
    }

    #[test]
    fn test_storage_paths_resolve_against_root() {
        let mut settings = Settings::default();
        settings.storage.temp_dir = PathBuf::from("/var/tmp/facefind");
        let paths = settings.storage_paths(Path::new("/srv/app"));
        assert_eq!(paths.videos_dir, PathBuf::from("/srv/app/storage/videos"));
        assert_eq!(paths.temp_dir, PathBuf::from("/var/tmp/facefind"));
        assert_eq!(
            paths.videos_file(),
            PathBuf::from("/srv/app/storage/data/videos.json")
        );
        assert_eq!(
            paths.history_file(),
            PathBuf::from("/srv/app/storage/data/search_history.json")
        );
    }

    #[test]
    fn test_engine_config_resolution() {
        let mut settings = Settings::default();
        settings.engine.working_dir = PathBuf::from("api");
        let config = settings.engine_config(Path::new("/srv/app"));
        assert_eq!(config.working_dir, PathBuf::from("/srv/app/api"));
        assert_eq!(
            config.interpreter,
            PathBuf::from("/srv/app/api/venv/bin/python3")
        );
        assert_eq!(config.timeout, Duration::from_secs(600));

        settings.engine.interpreter = PathBuf::from("python3");
        let config = settings.engine_config(Path::new("/srv/app"));
        assert_eq!(config.interpreter, PathBuf::from("python3"));
    }
}
