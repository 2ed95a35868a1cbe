use crate::discovery::DISCOVERY_URL;
use crate::dispatcher::DEFAULT_MAX_IN_FLIGHT;
use crate::error::{HueError, Result};
use crate::pairing::DeviceType;
use crate::palette::PaletteConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings read from `config.toml`; every field has a default
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// App part of the identifier shown in the bridge's access list
    pub app_name: String,
    /// Device part of that identifier, the host name when unset
    pub device_model: Option<String>,
    pub discovery_url: String,
    pub discovery_interval_secs: u64,
    pub request_timeout_secs: u64,
    /// Fade for color changes, in multiples of 100ms
    pub transition_time: Option<u16>,
    /// Light commands outstanding at once; further commands queue
    pub max_in_flight: usize,
    /// Where the paired bridge is remembered
    pub store_path: Option<PathBuf>,
    pub palette: PaletteConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: "hue_ambience".to_string(),
            device_model: None,
            discovery_url: DISCOVERY_URL.to_string(),
            discovery_interval_secs: 30,
            request_timeout_secs: 10,
            transition_time: None,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            store_path: None,
            palette: PaletteConfig::default(),
        }
    }
}

impl Config {
    /// Load from the standard path, falling back to defaults
    ///
    /// A missing file is silent; an unreadable or invalid one is logged.
    pub fn load() -> Self {
        let Some(path) = config_file_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }

        match Self::load_from(&path) {
            Ok(config) => {
                tracing::info!("Loaded config from {}", path.display());
                config
            }
            Err(e) => {
                tracing::warn!("Ignoring config at {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Load from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse TOML text; missing fields keep their defaults
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| HueError::Config(e.to_string()))
    }

    /// Identifier sent when pairing, built from `app_name` and `device_model`
    pub fn device_type(&self) -> DeviceType {
        match &self.device_model {
            Some(model) => DeviceType::new(&self.app_name, model),
            None => DeviceType::for_this_host(&self.app_name),
        }
    }

    /// Per-request HTTP timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Delay between successful directory lookups
    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs(self.discovery_interval_secs.max(1))
    }
}

/// `<config dir>/hue-ambience/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "hue-ambience").map(|d| d.config_dir().join("config.toml"))
}
