pub mod call_config;
pub mod scan_config;
pub mod target_config;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::config::call_config::CallConfig;
use crate::config::scan_config::ScanConfig;
use crate::config::target_config::TargetConfig;
use crate::utils::ensure_directory_exists;

const CONFIG_FILE_NAME: &str = "config.json";
/// Overrides the config file location
pub const CONFIG_PATH_ENV: &str = "HANDY_ALERT_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub target: TargetConfig,
    pub scan: ScanConfig,
    pub call: CallConfig,
    /// Default log level, overridden by `RUST_LOG`
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            target: TargetConfig::default(),
            scan: ScanConfig::default(),
            call: CallConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Location of the config file
    pub fn config_path() -> Result<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
            return Ok(PathBuf::from(path));
        }
        let dirs = ProjectDirs::from("com", "handy", "handy-alert")
            .context("No home directory to place the config in")?;
        Ok(dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// Loads the config, writing the defaults out on first run so there is a
    /// file to edit.
    pub async fn load_or_init() -> Result<Self> {
        let file_path = Self::config_path()?;
        let first_run = !file_path.exists();
        let config = Self::load_from(&file_path).await?;
        if first_run {
            if let Err(e) = config.save_to(&file_path).await {
                warn!("Could not write default config to {:?}: {}", file_path, e);
            }
        }
        Ok(config)
    }

    /// Reads the config at `file_path`, falling back to defaults if it is missing
    pub async fn load_from(file_path: &Path) -> Result<Self> {
        if !file_path.exists() {
            warn!("Config file not found at {:?}, using default.", file_path);
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(file_path).await?;
        let config: AppConfig = serde_json::from_str(&config_json)
            .with_context(|| format!("Invalid config file {:?}", file_path))?;
        info!("Config loaded from {:?}", file_path);
        Ok(config)
    }

    pub async fn save_to(&self, file_path: &Path) -> Result<()> {
        if let Some(config_dir) = file_path.parent() {
            ensure_directory_exists(config_dir).await?;
        }

        let config_json = match serde_json::to_string_pretty(self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize config to JSON: {}", e);
                return Err(e.into());
            }
        };
        fs::write(file_path, config_json).await?;
        info!("Config saved to {:?}", file_path);
        Ok(())
    }
}
