//! Persistence of the most recently paired bridge.

use crate::error::{HueError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Address and token of the last bridge that reached `Authorized`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedBridge {
    #[serde(rename = "recentAddress")]
    pub address: String,
    #[serde(rename = "recentToken")]
    pub token: String,
}

/// Key-value persistence for [`SavedBridge`]
pub trait BridgeStore: Send + Sync {
    /// Read the saved bridge, `None` if nothing was saved yet
    fn load(&self) -> Result<Option<SavedBridge>>;

    /// Replace the saved bridge
    fn save(&self, bridge: &SavedBridge) -> Result<()>;

    /// Forget the saved bridge
    fn clear(&self) -> Result<()>;
}

/// Store backed by a JSON file
#[derive(Debug, Clone)]
pub struct FileBridgeStore {
    path: PathBuf,
}

impl FileBridgeStore {
    /// Store backed by the JSON file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `<data dir>/hue-ambience/bridge.json`
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(default_store_path()?))
    }

    /// File the bridge is saved to
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Default location of the bridge file
pub fn default_store_path() -> Result<PathBuf> {
    directories::ProjectDirs::from("", "", "hue-ambience")
        .map(|dirs| dirs.data_dir().join("bridge.json"))
        .ok_or_else(|| HueError::Config("No home directory for the bridge store".to_string()))
}

impl BridgeStore for FileBridgeStore {
    fn load(&self) -> Result<Option<SavedBridge>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let saved = serde_json::from_str(&content)?;
        tracing::debug!("Loaded saved bridge from {}", self.path.display());
        Ok(Some(saved))
    }

    fn save(&self, bridge: &SavedBridge) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(bridge)?;
        std::fs::write(&self.path, json)?;
        tracing::info!("Saved bridge {} to {}", bridge.address, self.path.display());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryBridgeStore {
    saved: Mutex<Option<SavedBridge>>,
}

impl MemoryBridgeStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store already holding `bridge`
    pub fn with_saved(bridge: SavedBridge) -> Self {
        Self {
            saved: Mutex::new(Some(bridge)),
        }
    }
}

impl BridgeStore for MemoryBridgeStore {
    fn load(&self) -> Result<Option<SavedBridge>> {
        Ok(self.saved.lock().unwrap_or_else(|p| p.into_inner()).clone())
    }

    fn save(&self, bridge: &SavedBridge) -> Result<()> {
        *self.saved.lock().unwrap_or_else(|p| p.into_inner()) = Some(bridge.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.saved.lock().unwrap_or_else(|p| p.into_inner()) = None;
        Ok(())
    }
}
