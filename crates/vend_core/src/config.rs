//! Core runtime configuration.
//!
//! # Responsibility
//! - Describe tunables for logging, store selection and built-in extensions.
//! - Parse JSON configuration with per-field defaults and validate it.
//!
//! # Invariants
//! - A validated config never carries zero intervals, TTLs or quotas.

use crate::logging::default_log_level;
use crate::model::ttl::Ttl;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration for one process.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub logging: LoggingConfig,
    pub store: StoreConfig,
    pub lock: LockConfig,
    pub cancellation: CancellationConfig,
    pub operations: OperationConfig,
    pub replay: ReplayConfig,
}

impl CoreConfig {
    /// Parses and validates a JSON document.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lock.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroValue("lock.poll_interval_ms"));
        }
        if self.lock.max_block_secs == 0 {
            return Err(ConfigError::ZeroValue("lock.max_block_secs"));
        }
        if self.cancellation.token_ttl_secs == 0 {
            return Err(ConfigError::ZeroValue("cancellation.token_ttl_secs"));
        }
        if self.cancellation.max_token_len == 0 {
            return Err(ConfigError::ZeroValue("cancellation.max_token_len"));
        }
        if self.operations.max_active_per_owner == 0 {
            return Err(ConfigError::ZeroValue("operations.max_active_per_owner"));
        }
        if self.operations.retention_secs == 0 {
            return Err(ConfigError::ZeroValue("operations.retention_secs"));
        }
        if self.replay.default_ttl.is_zero() {
            return Err(ConfigError::ZeroValue("replay.default_ttl"));
        }
        if !self.replay.default_ttl.is_within_limit() {
            return Err(ConfigError::TtlTooLong("replay.default_ttl"));
        }
        if self.replay.retention_secs == 0 {
            return Err(ConfigError::ZeroValue("replay.retention_secs"));
        }
        if let StoreConfig::Sqlite { path } = &self.store {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::EmptyStorePath);
            }
        }
        Ok(())
    }
}

/// Log level and optional file directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Absolute directory for rolling log files; `None` leaves logging off.
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level().to_string(),
            log_dir: None,
        }
    }
}

/// Keyed store backend selection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreConfig {
    #[default]
    Memory,
    Sqlite { path: PathBuf },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Delay between attempts while blocking on a held lock.
    pub poll_interval_ms: u64,
    /// Upper bound applied to any requested blocking wait.
    pub max_block_secs: u64,
}

impl LockConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_block(&self) -> Duration {
        Duration::from_secs(self.max_block_secs)
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 50,
            max_block_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CancellationConfig {
    pub token_ttl_secs: u64,
    /// Longer tokens are silently not registered.
    pub max_token_len: usize,
}

impl Default for CancellationConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: 300,
            max_token_len: 128,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationConfig {
    pub max_active_per_owner: usize,
    pub retention_secs: u64,
}

impl Default for OperationConfig {
    fn default() -> Self {
        Self {
            max_active_per_owner: 10,
            retention_secs: 24 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub default_ttl: Ttl,
    pub retention_secs: u64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            default_ttl: Ttl::hours(1),
            retention_secs: 7 * 24 * 60 * 60,
        }
    }
}

/// Configuration parse/validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Parse(String),
    ZeroValue(&'static str),
    TtlTooLong(&'static str),
    EmptyStorePath,
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(message) => write!(f, "invalid configuration: {message}"),
            Self::ZeroValue(field) => write!(f, "configuration value must be non-zero: {field}"),
            Self::TtlTooLong(field) => write!(f, "configured ttl is too long: {field}"),
            Self::EmptyStorePath => write!(f, "sqlite store path must not be empty"),
        }
    }
}

impl Error for ConfigError {}
