//! Configuration loading and persistence.
//!
//! Handles reading and writing the motionlink configuration file and
//! applying `MOTIONLINK_*` environment overrides on top of it.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::constants::{CONNECT_TIMEOUT, DEFAULT_HOST, DEFAULT_PORT};
use crate::transport::Protocol;

const CONFIG_FILE: &str = "config.json";

/// Configuration for the motionlink client.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Server IP address literal.
    pub host: String,
    /// Server port; also the local UDP bind port.
    pub port: u32,
    /// Use UDP instead of TCP.
    pub use_udp: bool,
    /// TCP handshake timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Log every inbound and outbound message at info level.
    pub log_messages: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: u32::from(DEFAULT_PORT),
            use_udp: false,
            connect_timeout_ms: u64::try_from(CONNECT_TIMEOUT.as_millis()).unwrap_or(u64::MAX),
            log_messages: false,
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// `MOTIONLINK_CONFIG_DIR` wins; otherwise the platform config dir
    /// (Linux: `~/.config/motionlink`).
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("MOTIONLINK_CONFIG_DIR") {
            PathBuf::from(dir)
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("motionlink")
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config dir {}", dir.display()))?;
        Ok(dir)
    }

    /// Path of the config file inside [`Config::config_dir`].
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join(CONFIG_FILE))
    }

    /// Loads configuration from file, with environment variable overrides.
    ///
    /// A missing or unreadable file falls back to defaults.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = Self::load_from(&path).unwrap_or_else(|e| {
            log::debug!("Using default config: {e:#}");
            Self::default()
        });
        config.apply_env_overrides();
        Ok(config)
    }

    /// Reads configuration from an explicit path. No env overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Persists the configuration to the default location.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Persists the configuration to `path` as pretty JSON.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        // Set restrictive permissions (owner read/write only)
        #[cfg(unix)]
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// Socket flavour selected by `use_udp`.
    pub fn protocol(&self) -> Protocol {
        Protocol::from_udp_flag(self.use_udp)
    }

    /// Handshake timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`; values that fail to parse are ignored.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("MOTIONLINK_HOST") {
            self.host = host;
        }

        if let Some(port) = lookup("MOTIONLINK_PORT") {
            if let Ok(port) = port.trim().parse::<u32>() {
                self.port = port;
            }
        }

        if let Some(flag) = lookup("MOTIONLINK_UDP") {
            if let Some(flag) = parse_flag(&flag) {
                self.use_udp = flag;
            }
        }

        if let Some(timeout) = lookup("MOTIONLINK_CONNECT_TIMEOUT_MS") {
            if let Ok(ms) = timeout.trim().parse::<u64>() {
                self.connect_timeout_ms = ms;
            }
        }

        if let Some(flag) = lookup("MOTIONLINK_LOG_MESSAGES") {
            if let Some(flag) = parse_flag(&flag) {
                self.log_messages = flag;
            }
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
