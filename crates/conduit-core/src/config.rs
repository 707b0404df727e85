//! Configuration system for Conduit.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $CONDUIT_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/conduit/config.toml
//!   3. ~/.config/conduit/config.toml

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::wire::{HEADER_SIZE, MAX_CHUNK_PAYLOAD};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConduitConfig {
    pub relay: RelayConfig,
    pub pool: PoolConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Address the daemon accepts client connections on.
    pub listen: String,
    /// Upstream every accepted session is relayed to.
    pub upstream: String,
    /// Inactivity timeout in seconds. 0 = reads may block forever.
    pub timeout_secs: u64,
    /// Whether client → upstream traffic carries one-time-auth chunks.
    pub mode: RelayMode,
    /// Length of the IV prefix the client sends in `ota` mode.
    pub iv_len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayMode {
    Plain,
    Ota,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Capacity of every pooled buffer in bytes.
    pub buf_size: usize,
    /// Free buffers kept for reuse. Extra buffers are dropped on release.
    pub max_free: usize,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

/// One chunk header plus a 4 KiB payload.
pub const DEFAULT_BUF_SIZE: usize = HEADER_SIZE + 4096;

pub const DEFAULT_MAX_FREE: usize = 2048;

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8388".to_string(),
            upstream: "127.0.0.1:8080".to_string(),
            timeout_secs: 300,
            mode: RelayMode::Plain,
            iv_len: 16,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            buf_size: DEFAULT_BUF_SIZE,
            max_free: DEFAULT_MAX_FREE,
        }
    }
}

impl RelayConfig {
    /// Inactivity timeout. `Duration::ZERO` disables it.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl std::str::FromStr for RelayMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plain" => Ok(RelayMode::Plain),
            "ota" => Ok(RelayMode::Ota),
            other => Err(ConfigError::Invalid(format!("unknown relay mode: {other}"))),
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("conduit")
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl ConduitConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            ConduitConfig::default()
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("CONDUIT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&ConduitConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Reject settings the relay cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.buf_size < HEADER_SIZE {
            return Err(ConfigError::Invalid(format!(
                "pool.buf_size {} is smaller than a chunk header ({HEADER_SIZE})",
                self.pool.buf_size
            )));
        }
        if self.pool.buf_size > HEADER_SIZE + MAX_CHUNK_PAYLOAD {
            return Err(ConfigError::Invalid(format!(
                "pool.buf_size {} exceeds the largest chunk ({})",
                self.pool.buf_size,
                HEADER_SIZE + MAX_CHUNK_PAYLOAD
            )));
        }
        if self.relay.mode == RelayMode::Ota && self.relay.iv_len == 0 {
            return Err(ConfigError::Invalid("relay.iv_len must be non-zero in ota mode".into()));
        }
        Ok(())
    }

    /// Apply CONDUIT_* env var overrides.
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(v) = std::env::var("CONDUIT_RELAY__LISTEN") {
            self.relay.listen = v;
        }
        if let Ok(v) = std::env::var("CONDUIT_RELAY__UPSTREAM") {
            self.relay.upstream = v;
        }
        if let Ok(v) = std::env::var("CONDUIT_RELAY__TIMEOUT_SECS") {
            if let Ok(secs) = v.parse() {
                self.relay.timeout_secs = secs;
            }
        }
        if let Ok(v) = std::env::var("CONDUIT_RELAY__MODE") {
            self.relay.mode = v.parse()?;
        }
        Ok(())
    }
}
