//! Configuration module
//!
//! Handles loading and saving fishlink configuration.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::fish::FileLayout;
use crate::network::{channel_port, ChannelError, ChannelOptions};
use crate::protocol::{BASE_PORT, DEFAULT_PEER_PORT};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Engine process settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Engine channel settings
    #[serde(default)]
    pub network: NetworkConfig,

    /// Peer-to-peer link settings
    #[serde(default)]
    pub peer: PeerConfig,

    /// FISH file settings
    #[serde(default)]
    pub fish: FishConfig,
}

/// Engine process configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Engine executable to spawn
    pub executable: Option<PathBuf>,
    /// Scenario file passed to the engine
    pub scenario: Option<PathBuf>,
    /// The engine is started by hand; only wait for it to connect
    #[serde(default)]
    pub attach: bool,
}

/// Engine channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Interface to listen on
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
    /// Port of channel 0
    #[serde(default = "default_base_port")]
    pub base_port: u16,
    /// Channel index, 0 to 5
    #[serde(default)]
    pub channel: u8,
    /// How long to wait for the engine to connect (ms)
    pub accept_timeout_ms: Option<u64>,
    /// How long to wait for each reply (ms)
    pub read_timeout_ms: Option<u64>,
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_base_port() -> u16 {
    BASE_PORT
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            base_port: default_base_port(),
            channel: 0,
            accept_timeout_ms: None,
            read_timeout_ms: None,
        }
    }
}

impl NetworkConfig {
    /// Listening port for the configured channel
    pub fn port(&self) -> Result<u16, ChannelError> {
        channel_port(self.base_port, self.channel)
    }

    pub fn options(&self) -> ChannelOptions {
        options_from(self.accept_timeout_ms, self.read_timeout_ms)
    }
}

/// Peer-to-peer link configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Port the link server listens on
    #[serde(default = "default_peer_port")]
    pub port: u16,
    /// Connection timeout in ms
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// How long the server waits for a client (ms)
    pub accept_timeout_ms: Option<u64>,
}

fn default_peer_port() -> u16 {
    DEFAULT_PEER_PORT
}

fn default_connect_timeout() -> u64 {
    5000
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            port: default_peer_port(),
            connect_timeout_ms: default_connect_timeout(),
            accept_timeout_ms: None,
        }
    }
}

impl PeerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn options(&self) -> ChannelOptions {
        options_from(self.accept_timeout_ms, None)
    }
}

/// FISH file configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FishConfig {
    /// Integer layout of files written by the engine
    #[serde(default)]
    pub layout: FileLayout,
}

fn options_from(accept_ms: Option<u64>, read_ms: Option<u64>) -> ChannelOptions {
    let mut options = ChannelOptions::new();
    if let Some(ms) = accept_ms {
        options = options.with_accept_timeout(Duration::from_millis(ms));
    }
    if let Some(ms) = read_ms {
        options = options.with_read_timeout(Duration::from_millis(ms));
    }
    options
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default location
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("fishlink/config.toml")),
            Some(PathBuf::from("./fishlink.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                tracing::debug!("Using config {}", path.display());
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        Ok(())
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> ConfigResult<String> {
    let config = Config {
        engine: EngineConfig {
            executable: Some(PathBuf::from("/opt/engine/bin/engine")),
            scenario: Some(PathBuf::from("bridge.dat")),
            attach: false,
        },
        network: NetworkConfig {
            accept_timeout_ms: Some(60_000),
            ..Default::default()
        },
        ..Default::default()
    };

    Ok(toml::to_string_pretty(&config)?)
}
