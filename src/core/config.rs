//! Configuration management for Capstan.
//!
//! Handles loading and saving configuration from TOML files.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::loader::{LoaderSettings, MonitorSettings, MIN_POLL_INTERVAL};
use crate::registry::RegistrySettings;

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Discovery settings
    pub engine: EngineConfig,

    /// Hot reload settings
    pub monitor: MonitorConfig,

    /// Publishing settings
    pub registry: RegistryConfig,
}

/// Discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding one subdirectory per capability
    pub root: PathBuf,

    /// Name of the engine's own capability, always loaded first
    pub self_name: String,

    /// Capabilities loaded right after the engine itself
    pub meta_capabilities: Vec<String>,

    /// Extra directory names to skip when scanning
    pub ignore_dirs: Vec<String>,
}

/// Reconciliation loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Start the loop after bootstrap
    pub enabled: bool,

    /// Poll interval in milliseconds
    pub poll_interval_ms: u64,

    /// Back-off after a failed poll, in milliseconds
    pub error_backoff_ms: u64,

    /// Maximum wait when stopping the loop, in milliseconds
    pub stop_timeout_ms: u64,
}

/// Registry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Directory for the catalog, integration stubs and registration log
    pub dir: PathBuf,

    /// Append capability descriptions to consumer documents
    pub inject_consumer_docs: bool,

    /// Root directory for consumer documents
    pub consumer_root: PathBuf,

    /// Subdirectories of `consumer_root` searched for `<consumer>.md`, in order
    pub consumer_subdirs: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("features"),
            self_name: crate::SELF_CAPABILITY.to_string(),
            meta_capabilities: Vec::new(),
            ignore_dirs: Vec::new(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self { enabled: false, poll_interval_ms: 5_000, error_backoff_ms: 30_000, stop_timeout_ms: 5_000 }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        let defaults = RegistrySettings::new(".capstan");
        Self {
            dir: defaults.dir,
            inject_consumer_docs: defaults.inject_consumer_docs,
            consumer_root: defaults.consumer_root,
            consumer_subdirs: defaults.consumer_subdirs,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// Looks for config in:
    /// 1. `.capstan.toml` in current directory
    /// 2. `~/.config/capstan/config.toml`
    /// 3. Falls back to defaults
    pub fn load() -> anyhow::Result<Self> {
        let local_config = PathBuf::from(".capstan.toml");
        if local_config.exists() {
            return Self::load_from_file(&local_config);
        }

        if let Some(config_dir) = Self::config_dir() {
            let global_config = config_dir.join("config.toml");
            if global_config.exists() {
                return Self::load_from_file(&global_config);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the global config file.
    pub fn save(&self) -> anyhow::Result<()> {
        let config_dir =
            Self::config_dir().ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        std::fs::create_dir_all(&config_dir)?;

        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_dir.join("config.toml"), content)?;

        Ok(())
    }

    /// Get the config directory path.
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("capstan"))
    }

    /// Get the data directory path.
    pub fn data_dir() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join("capstan"))
    }

    /// Loader ordering hints.
    pub fn loader_settings(&self) -> LoaderSettings {
        LoaderSettings {
            self_name: self.engine.self_name.clone(),
            meta_capabilities: self.engine.meta_capabilities.clone(),
        }
    }

    /// Monitor timings. Intervals below [`MIN_POLL_INTERVAL`] are raised to it.
    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            poll_interval: Duration::from_millis(self.monitor.poll_interval_ms)
                .max(MIN_POLL_INTERVAL),
            error_backoff: Duration::from_millis(self.monitor.error_backoff_ms)
                .max(MIN_POLL_INTERVAL),
            stop_timeout: Duration::from_millis(self.monitor.stop_timeout_ms),
        }
    }

    /// Registry settings.
    pub fn registry_settings(&self) -> RegistrySettings {
        RegistrySettings {
            dir: self.registry.dir.clone(),
            inject_consumer_docs: self.registry.inject_consumer_docs,
            consumer_root: self.registry.consumer_root.clone(),
            consumer_subdirs: self.registry.consumer_subdirs.clone(),
        }
    }
}
