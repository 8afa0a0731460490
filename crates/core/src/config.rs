//! Configuration management for keymesh nodes.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Smallest RSA modulus accepted for a node identity.
pub const MIN_KEY_BITS: usize = 1024;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub node: NodeConfig,
    pub store: StoreConfig,
    pub gossip: GossipConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Human readable node name, only used in logs
    pub nickname: String,
    /// Gossip channel name; also the store bucket holding accepted keys
    pub channel: String,
    /// Default tracing directive when `RUST_LOG` is unset
    pub log_level: String,
    /// Emit JSON lines instead of human readable logs
    pub log_json: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file holding the `private` and `public` buckets
    pub path: PathBuf,
    /// RSA modulus size used when the node generates its identity
    pub key_bits: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GossipConfig {
    /// Every n-th outgoing payload carries the complete key set
    pub full_sync_rounds: u32,
    /// Number of entries in a partial (sampled) payload
    pub sample_size: usize,
    /// Depth of the accepted-key notification channel
    pub update_buffer: usize,
    /// Depth of the peer actor's command queue
    pub action_queue: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            nickname: "keymesh-node".to_string(),
            channel: "public".to_string(),
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("keys").join("keystore.db"),
            key_bits: 2048,
        }
    }
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            full_sync_rounds: 5,
            sample_size: 5,
            update_buffer: 64,
            action_queue: 32,
        }
    }
}

impl Config {
    /// Parse and validate a TOML config file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content).map_err(|source| CoreError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`, writing a default config there first if it does not exist.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Self::from_file(path);
        }

        warn!(path = %path.display(), "Config file missing, writing defaults");
        let config = Self::default();
        config.save(path)?;
        Ok(config)
    }

    /// Write the config as TOML, creating parent directories as needed.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> CoreResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let rendered = toml::to_string_pretty(self)?;
        std::fs::write(path, rendered)?;
        info!(path = %path.display(), "Config saved");
        Ok(())
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.node.channel.trim().is_empty() {
            return Err(CoreError::Config("node.channel must not be empty".to_string()));
        }
        if self.store.key_bits < MIN_KEY_BITS {
            return Err(CoreError::Config(format!(
                "store.key_bits {} below minimum {}",
                self.store.key_bits, MIN_KEY_BITS
            )));
        }
        if self.gossip.full_sync_rounds == 0 {
            return Err(CoreError::Config(
                "gossip.full_sync_rounds must be at least 1".to_string(),
            ));
        }
        if self.gossip.sample_size == 0 {
            return Err(CoreError::Config(
                "gossip.sample_size must be at least 1".to_string(),
            ));
        }
        if self.gossip.update_buffer == 0 || self.gossip.action_queue == 0 {
            return Err(CoreError::Config(
                "gossip channel depths must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
