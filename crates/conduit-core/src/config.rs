//! Configuration system for Conduit.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $CONDUIT_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/conduit/config.toml
//!   3. ~/.config/conduit/config.toml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::coins::Coins;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConduitConfig {
    pub engine: EngineConfig,
}

/// Parameters the service engine consults on every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on a request's timeout, in blocks.
    pub max_request_timeout: i64,
    /// A binding's deposit must cover this many times its price.
    pub min_deposit_multiple: u64,
    /// Absolute deposit floor. Empty = none.
    pub min_deposit: Coins,
    /// Share of every earned fee routed to the tax collector, in basis points.
    pub service_fee_tax_bps: u32,
    /// Blocks a disabled binding waits before its deposit can be refunded.
    pub deposit_refund_delay: i64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_request_timeout: 100,
            min_deposit_multiple: 1000,
            min_deposit: Coins::new(),
            service_fee_tax_bps: 500,
            deposit_refund_delay: 100,
        }
    }
}

impl EngineConfig {
    /// Deposit a binding with `price` must hold to stay eligible.
    pub fn min_deposit_for(&self, price: &Coins) -> Coins {
        price
            .mul(self.min_deposit_multiple as u128)
            .max(&self.min_deposit)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("conduit")
}

fn dirs_or_home() -> PathBuf {
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
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl ConduitConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::file_path())?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Read `path` if it exists, defaults otherwise. No env overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(ConduitConfig::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
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
        Self::write_default_to(&path)?;
        Ok(path)
    }

    fn write_default_to(path: &Path) -> Result<(), ConfigError> {
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        let text = toml::to_string_pretty(&ConduitConfig::default())
            .map_err(ConfigError::SerializeFailed)?;
        std::fs::write(path, text).map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))
    }

    /// Apply CONDUIT_* overrides. Unparseable values are ignored.
    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        let engine = &mut self.engine;
        if let Some(v) = var("CONDUIT_ENGINE__MAX_REQUEST_TIMEOUT").and_then(|v| v.parse().ok()) {
            engine.max_request_timeout = v;
        }
        if let Some(v) = var("CONDUIT_ENGINE__MIN_DEPOSIT_MULTIPLE").and_then(|v| v.parse().ok()) {
            engine.min_deposit_multiple = v;
        }
        if let Some(v) = var("CONDUIT_ENGINE__MIN_DEPOSIT").and_then(|v| v.parse().ok()) {
            engine.min_deposit = v;
        }
        if let Some(v) = var("CONDUIT_ENGINE__SERVICE_FEE_TAX_BPS").and_then(|v| v.parse().ok()) {
            engine.service_fee_tax_bps = v;
        }
        if let Some(v) = var("CONDUIT_ENGINE__DEPOSIT_REFUND_DELAY").and_then(|v| v.parse().ok()) {
            engine.deposit_refund_delay = v;
        }
    }
}
