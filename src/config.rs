//! Configuration file support for the timing relay.
//!
//! Loads settings from `~/.config/rmonitor-relay/config.toml` on Linux
//! (or platform-appropriate location on other OSes).

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::client::{DEFAULT_HOST, DEFAULT_PORT, TimingClientConfig};
use crate::relay::ForwardMode;

/// Application configuration loaded from TOML file.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Timing system hostname.
    pub host: String,

    /// Timing system port.
    pub port: u16,

    /// WebSocket endpoint to publish to. Without one the relay only decodes.
    pub publish_url: Option<String>,

    /// Whether to publish raw lines or decoded envelopes.
    pub forward: ForwardMode,

    /// Connection timeout in seconds.
    pub connect_timeout: u64,

    /// Read timeout in seconds.
    pub read_timeout: u64,

    /// Whether to automatically reconnect on disconnect.
    pub reconnect: bool,

    /// Delay between reconnection attempts in seconds.
    pub reconnect_delay: u64,

    /// Print statistics every N seconds.
    pub stats_interval: u64,

    /// Enable Prometheus metrics HTTP endpoint.
    pub metrics_enabled: bool,

    /// Port for Prometheus metrics HTTP endpoint.
    pub metrics_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            publish_url: None,
            forward: ForwardMode::Raw,
            connect_timeout: 30,
            read_timeout: 120,
            reconnect: true,
            reconnect_delay: 5,
            stats_interval: 30,
            metrics_enabled: false,
            metrics_port: 9090,
        }
    }
}

impl Config {
    /// Load configuration from the default config file location.
    ///
    /// Returns default config if the file doesn't exist.
    /// Returns an error if the file exists but is malformed.
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Config::default()),
        }
    }

    /// Load configuration from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Invalid TOML in config file: {}", path.display()))
    }

    /// Returns the path to the config file.
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("rmonitor-relay/config.toml"))
    }

    /// Validate all configuration settings.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("Invalid port: 0");
        }
        if let Some(ref url) = self.publish_url
            && !(url.starts_with("ws://") || url.starts_with("wss://"))
        {
            anyhow::bail!("Invalid publish_url '{}': expected ws:// or wss://", url);
        }
        Ok(())
    }

    /// Feed client settings derived from this config.
    pub fn client_config(&self) -> TimingClientConfig {
        TimingClientConfig {
            host: self.host.clone(),
            port: self.port,
            connect_timeout: Duration::from_secs(self.connect_timeout),
            read_timeout: Duration::from_secs(self.read_timeout),
            auto_reconnect: self.reconnect,
            reconnect_delay: Duration::from_secs(self.reconnect_delay),
        }
    }
}
