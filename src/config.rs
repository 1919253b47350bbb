//! Receiver configuration
//!
//! The worker engine reads its static parameters through [`ConfigProvider`].
//! [`AppConfig`] is the TOML-backed implementation used by the binary.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::ConfigError;
use crate::protocol::ByteOrder;

/// A logical audio channel as listed in the configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: u32,
    pub name: String,
    pub enabled: bool,
}

impl Channel {
    pub fn new(id: u32, name: impl Into<String>, enabled: bool) -> Self {
        Self {
            id,
            name: name.into(),
            enabled,
        }
    }
}

/// Source of network/audio parameters and channel metadata.
///
/// Values come in the shape the configuration file stores them; parsing and
/// range checks happen in [`crate::protocol::NetworkConfig::from_provider`].
pub trait ConfigProvider: Send + Sync {
    fn server(&self) -> String;
    fn server_port(&self) -> String;
    fn multicast_address(&self) -> String;
    fn multicast_port(&self) -> String;
    fn chunk_size(&self) -> String;
    fn timeout(&self) -> String;
    fn channel_numbers(&self) -> u32;
    fn frequency(&self) -> u32;

    /// Every configured channel, enabled or not
    fn channels(&self) -> Vec<Channel>;

    fn channel_by_id(&self, id: u32) -> Option<Channel> {
        self.channels().into_iter().find(|c| c.id == id)
    }

    fn enabled_channels(&self) -> Vec<Channel> {
        self.channels().into_iter().filter(|c| c.enabled).collect()
    }

    /// Local interface used for the multicast join
    fn interface(&self) -> String {
        "0.0.0.0".to_string()
    }

    /// How channels map onto the blocks of a datagram
    fn layout(&self) -> LayoutConfig {
        LayoutConfig::default()
    }
}

/// Network section of the configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSection {
    pub server: String,
    pub port: String,
    pub multicast_address: String,
    pub multicast_port: String,
    pub interface: String,
    pub chunk_size: String,
    pub timeout: String,
    pub channel_numbers: u32,
    pub frequency: u32,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            server: "192.168.1.100".to_string(),
            port: "8080".to_string(),
            multicast_address: "224.0.0.1".to_string(),
            multicast_port: DEFAULT_MULTICAST_PORT.to_string(),
            interface: "0.0.0.0".to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE.to_string(),
            timeout: DEFAULT_TIMEOUT_MS.to_string(),
            channel_numbers: DEFAULT_CHANNEL_COUNT,
            frequency: DEFAULT_SAMPLE_RATE,
        }
    }
}

/// Datagram layout settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Byte order of the samples on the wire
    pub byte_order: ByteOrder,
    /// Channel id that maps to block 0
    pub block_base: u32,
    /// Explicit channel id -> block index overrides (TOML keys are strings)
    pub blocks: BTreeMap<String, usize>,
}

impl LayoutConfig {
    /// Block configured explicitly for a channel, if any
    pub fn block_override(&self, channel_id: u32) -> Option<usize> {
        self.blocks
            .iter()
            .find(|(key, _)| key.trim().parse::<u32>().ok() == Some(channel_id))
            .map(|(_, block)| *block)
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            byte_order: ByteOrder::Big,
            block_base: 1,
            blocks: BTreeMap::new(),
        }
    }
}

/// Worker pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSection {
    pub max_workers: usize,
    pub pool_threads: usize,
    pub shutdown_grace_ms: u64,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            max_workers: MAX_WORKERS,
            pool_threads: DEFAULT_POOL_THREADS,
            shutdown_grace_ms: SHUTDOWN_GRACE_MS,
        }
    }
}

impl WorkerSection {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Audio output settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSection {
    /// Output device name; the host default when absent
    pub output_device: Option<String>,
}

/// Complete configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub network: NetworkSection,
    pub layout: LayoutConfig,
    pub workers: WorkerSection,
    pub audio: AudioSection,
    pub channels: Vec<Channel>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            network: NetworkSection::default(),
            layout: LayoutConfig::default(),
            workers: WorkerSection::default(),
            audio: AudioSection::default(),
            channels: vec![
                Channel::new(1, "Channel 1", true),
                Channel::new(2, "Channel 2", false),
                Channel::new(3, "Channel 3", true),
            ],
        }
    }
}

impl AppConfig {
    /// Platform configuration file location
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        directories::ProjectDirs::from("com", "dante", "dante-receiver")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
            .ok_or(ConfigError::NoConfigDir)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(text)?;
        config.check_channels()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Load the file, writing the defaults first if it does not exist
    pub fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            return Self::load(path);
        }

        let config = Self::default();
        match config.save(path) {
            Ok(()) => tracing::info!("Wrote default configuration to {}", path.display()),
            Err(e) => tracing::warn!("Could not save default configuration, using it in memory: {}", e),
        }
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        std::fs::write(path, self.to_toml()?).map_err(write_err)
    }

    fn check_channels(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for channel in &self.channels {
            if !seen.insert(channel.id) {
                return Err(ConfigError::invalid(
                    "channels",
                    channel.id.to_string(),
                    "duplicate channel id",
                ));
            }
        }
        Ok(())
    }
}

impl ConfigProvider for AppConfig {
    fn server(&self) -> String {
        self.network.server.clone()
    }

    fn server_port(&self) -> String {
        self.network.port.clone()
    }

    fn multicast_address(&self) -> String {
        self.network.multicast_address.clone()
    }

    fn multicast_port(&self) -> String {
        self.network.multicast_port.clone()
    }

    fn chunk_size(&self) -> String {
        self.network.chunk_size.clone()
    }

    fn timeout(&self) -> String {
        self.network.timeout.clone()
    }

    fn channel_numbers(&self) -> u32 {
        self.network.channel_numbers
    }

    fn frequency(&self) -> u32 {
        self.network.frequency
    }

    fn channels(&self) -> Vec<Channel> {
        self.channels.clone()
    }

    fn interface(&self) -> String {
        self.network.interface.clone()
    }

    fn layout(&self) -> LayoutConfig {
        self.layout.clone()
    }
}
