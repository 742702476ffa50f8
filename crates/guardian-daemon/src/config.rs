use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use guardian_common::config::EngineConfig;

/// Daemon-level configuration: the engine knobs plus where the file-backed
/// collaborators live on disk.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DaemonConfig {
    /// Child the daemon enforces for.
    pub child_id: Uuid,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub data: DataConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DataConfig {
    pub policy_path: PathBuf,
    pub usage_path: PathBuf,
    pub packages_path: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        let data_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("/tmp")).join("guardian");
        Self {
            policy_path: data_dir.join("policy.toml"),
            usage_path: data_dir.join("usage.json"),
            packages_path: data_dir.join("packages.json"),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self { child_id: Uuid::new_v4(), engine: EngineConfig::default(), data: DataConfig::default() }
    }
}

impl DaemonConfig {
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir().unwrap_or_else(|| PathBuf::from("/tmp")).join("guardian").join("daemon.toml")
    }

    /// Load configuration, writing a default file on first run.
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::default_config_path())
    }

    pub fn load_from_path(config_path: &Path) -> Result<Self> {
        debug!("loading daemon configuration from {:?}", config_path);

        if !config_path.exists() {
            info!("configuration not found at {:?}, writing defaults", config_path);
            let default_config = Self::default();
            default_config.save_to_path(config_path)?;
            return Ok(default_config);
        }

        let raw = fs::read_to_string(config_path)
            .with_context(|| format!("failed to read config file: {:?}", config_path))?;
        let config: DaemonConfig = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file: {:?}", config_path))?;
        Ok(config)
    }

    pub fn save_to_path(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create config directory: {:?}", parent))?;
        }
        let raw = toml::to_string_pretty(self).context("failed to serialize configuration")?;
        fs::write(config_path, raw)
            .with_context(|| format!("failed to write config file: {:?}", config_path))?;
        Ok(())
    }
}
