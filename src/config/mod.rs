use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Complete missionsync configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub replication: ReplicationConfig,
}

/// HTTP/WebSocket listener
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3100".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

/// Mission persistence
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    /// How long a writer waits on a locked database (milliseconds)
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_database_path() -> String {
    "missions.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

/// Replication behaviour applied to every mission in the world
#[derive(Debug, Clone, Deserialize)]
pub struct ReplicationConfig {
    /// Send deltas on the reliable channel
    #[serde(default)]
    pub reliable_deltas: bool,
    /// Send baselines when a client subscribes
    #[serde(default = "default_baseline_on_subscribe")]
    pub baseline_on_subscribe: bool,
}

fn default_baseline_on_subscribe() -> bool {
    true
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            reliable_deltas: false,
            baseline_on_subscribe: default_baseline_on_subscribe(),
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: impl AsRef<Path>) -> Result<SyncConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: SyncConfig = toml::from_str(&contents)
        .with_context(|| format!("Invalid config file {}", path.display()))?;
    Ok(config)
}
