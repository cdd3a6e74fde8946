use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::logging::LoggingConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub adapters: AdapterConfig,

    #[serde(default)]
    pub scanner: ScannerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Nominal budget for everything persisted, in bytes.
    #[serde(default = "default_budget_bytes")]
    pub budget_bytes: u64,
}

fn default_budget_bytes() -> u64 {
    5 * 1024 * 1024
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            budget_bytes: default_budget_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// How long a completed item stays visible before it is swept.
    #[serde(default = "default_completion_grace_ms")]
    pub completion_grace_ms: u64,

    /// Longest side of the thumbnail kept with each record.
    #[serde(default = "default_thumbnail_size")]
    pub thumbnail_size: u32,

    /// Images are shrunk to this size before being sent to a backend.
    #[serde(default = "default_analysis_max_dimension")]
    pub analysis_max_dimension: u32,

    /// Auto-process value used until the user sets one.
    #[serde(default)]
    pub auto_process_default: bool,
}

fn default_completion_grace_ms() -> u64 {
    1500
}

fn default_thumbnail_size() -> u32 {
    200
}

fn default_analysis_max_dimension() -> u32 {
    1024
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            completion_grace_ms: default_completion_grace_ms(),
            thumbnail_size: default_thumbnail_size(),
            analysis_max_dimension: default_analysis_max_dimension(),
            auto_process_default: false,
        }
    }
}

impl QueueConfig {
    pub fn completion_grace(&self) -> Duration {
        Duration::from_millis(self.completion_grace_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Simulated latency of the offline backend.
    #[serde(default = "default_mock_latency_ms")]
    pub mock_latency_ms: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Local models are slow on modest hardware, so they get longer.
    #[serde(default = "default_local_timeout_secs")]
    pub local_timeout_secs: u64,

    #[serde(default = "default_health_timeout_secs")]
    pub health_timeout_secs: u64,
}

fn default_mock_latency_ms() -> u64 {
    1000
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_local_timeout_secs() -> u64 {
    180
}

fn default_health_timeout_secs() -> u64 {
    3
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            mock_latency_ms: default_mock_latency_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            local_timeout_secs: default_local_timeout_secs(),
            health_timeout_secs: default_health_timeout_secs(),
        }
    }
}

impl AdapterConfig {
    pub fn mock_latency(&self) -> Duration {
        Duration::from_millis(self.mock_latency_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn local_timeout(&self) -> Duration {
        Duration::from_secs(self.local_timeout_secs)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,
}

fn default_image_extensions() -> Vec<String> {
    ["jpg", "jpeg", "png", "gif", "webp", "bmp", "tiff"]
        .iter()
        .map(|ext| ext.to_string())
        .collect()
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            image_extensions: default_image_extensions(),
        }
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("metalens")
        .join("metalens.db")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            storage: StorageConfig::default(),
            queue: QueueConfig::default(),
            adapters: AdapterConfig::default(),
            scanner: ScannerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load from `METALENS_CONFIG` if set, else the default location. A
    /// missing file is created with defaults.
    pub fn load() -> Result<Self> {
        match std::env::var_os("METALENS_CONFIG") {
            Some(path) => Self::load_or_create(Path::new(&path)),
            None => Self::load_or_create(&Self::config_path()),
        }
    }

    /// Load `path`, writing a default config there first if it is missing.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load_from(path);
        }
        let config = Config::default();
        config
            .save_to(path)
            .with_context(|| format!("Failed to create config file {}", path.display()))?;
        tracing::info!(path = %path.display(), "Created default config");
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("metalens")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "db_path = \"/tmp/lens.db\"\n\n[queue]\ncompletion_grace_ms = 0\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/lens.db"));
        assert_eq!(config.queue.completion_grace(), Duration::ZERO);
        assert_eq!(config.queue.thumbnail_size, 200);
        assert_eq!(config.storage.budget_bytes, 5 * 1024 * 1024);
        assert_eq!(config.adapters.health_timeout(), Duration::from_secs(3));
        assert!(config.scanner.image_extensions.contains(&"png".to_string()));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.adapters.mock_latency_ms = 0;
        config.queue.auto_process_default = true;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.adapters.mock_latency_ms, 0);
        assert!(loaded.queue.auto_process_default);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[queue\n").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_missing_file_is_created_with_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.storage.budget_bytes, 5 * 1024 * 1024);

        let reloaded = Config::load_or_create(&path).unwrap();
        assert_eq!(reloaded.queue.completion_grace_ms, 1500);
        assert_eq!(reloaded.logging.level, "info");
    }

    #[test]
    fn test_existing_file_is_not_overwritten() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[logging]\nlevel = \"debug\"\n").unwrap();

        let config = Config::load_or_create(&path).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "[logging]\nlevel = \"debug\"\n"
        );
    }
}
