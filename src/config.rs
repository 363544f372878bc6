//! Application configuration: scan filtering and connection retry policy,
//! persisted as JSON next to the application.

use std::path::Path;

use anyhow::Result;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::utils::ensure_directory_exists;

/// Minimum signal strength for a device to be reported by the scanner.
const DEFAULT_MIN_RSSI: i16 = -80;

/// Maximum number of connection retries
const DEFAULT_MAX_CONNECT_RETRIES: u32 = 5;

/// Delay between connection retries in milliseconds
const DEFAULT_CONNECT_RETRY_DELAY_MS: u64 = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Devices advertising below this RSSI are ignored.
    pub min_rssi: i16,
    /// Only report devices whose name contains this substring, when set.
    pub name_filter: Option<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            min_rssi: DEFAULT_MIN_RSSI,
            name_filter: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_CONNECT_RETRIES,
            retry_delay_ms: DEFAULT_CONNECT_RETRY_DELAY_MS,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub scan: ScanConfig,
    pub connection: ConnectionConfig,
}

impl AppConfig {
    /// Loads the config from a configuration file, falling back to defaults
    /// when the file does not exist.
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("Config file not found at {:?}, using default.", path);
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path).await?;
        let config = serde_json::from_str(&contents)?;
        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Saves the config to a configuration file.
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            ensure_directory_exists(parent).await?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents).await?;
        info!("Saved config to {:?}", path);
        Ok(())
    }
}
