//! Core configuration types and loading.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use super::defaults::{
    default_bouncer_write_interval_ms, default_grace_ms, default_handshake_ms, default_welcome_ms,
};
use super::profile::Profile;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// External command execution.
    #[serde(default)]
    pub sandbox: SandboxConfig,
    /// Bounced client handling.
    #[serde(default)]
    pub bouncer: BouncerConfig,
    /// Bots started at boot.
    #[serde(default, rename = "bot")]
    pub bots: Vec<Profile>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

/// How pattern-matched commands are executed.
#[derive(Debug, Clone, Deserialize)]
pub struct SandboxConfig {
    /// Wrapper program. When set it is executed with the command name as its
    /// first argument; otherwise the command name itself is executed.
    #[serde(default)]
    pub program: Option<PathBuf>,
    /// How long an external command may take to exit once its output loop
    /// ended before it is killed.
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,
}

impl SandboxConfig {
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            program: None,
            grace_ms: default_grace_ms(),
        }
    }
}

/// Bounced client handling.
#[derive(Debug, Clone, Deserialize)]
pub struct BouncerConfig {
    /// Silence after which a connecting client is considered done handshaking.
    #[serde(default = "default_handshake_ms")]
    pub handshake_ms: u64,
    /// How long to wait for the session's login before giving up on a client.
    #[serde(default = "default_welcome_ms")]
    pub welcome_ms: u64,
    /// Write pacing towards bounced clients.
    #[serde(default = "default_bouncer_write_interval_ms")]
    pub write_interval_ms: u64,
}

impl BouncerConfig {
    pub fn handshake_grace(&self) -> Duration {
        Duration::from_millis(self.handshake_ms)
    }

    pub fn welcome_timeout(&self) -> Duration {
        Duration::from_millis(self.welcome_ms)
    }

    pub fn write_interval(&self) -> Duration {
        Duration::from_millis(self.write_interval_ms)
    }
}

impl Default for BouncerConfig {
    fn default() -> Self {
        Self {
            handshake_ms: default_handshake_ms(),
            welcome_ms: default_welcome_ms(),
            write_interval_ms: default_bouncer_write_interval_ms(),
        }
    }
}
