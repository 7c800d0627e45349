//! Config - 型付き設定
//!
//! 起動時に一度だけ読む。TOML ファイル（任意）を読み、`TETHER_*` 環境変数で上書きする。
//! 全フィールドにデフォルトがあるので、空ファイルやファイルなしでも有効な設定になる。
//!
//! ```toml
//! store_path = "/var/lib/tether/queue.json"
//! default_max_attempts = 3
//! pool_size = 4
//! execution_timeout_ms = 30000
//! retry_interval_ms = 60000
//! log_level = "info"
//! ```

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::DEFAULT_MAX_ATTEMPTS;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {name}: {value:?}")]
    InvalidVar { name: &'static str, value: String },

    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TetherConfig {
    /// JSON file holding the durable queue.
    pub store_path: PathBuf,
    pub default_max_attempts: u32,
    /// Worker count. `None` means available hardware parallelism.
    pub pool_size: Option<usize>,
    /// Per-execution timeout for queue tasks and pool jobs. `None` disables it.
    pub execution_timeout_ms: Option<u64>,
    /// Periodic retry sweep. `None` keeps retries purely event-driven.
    pub retry_interval_ms: Option<u64>,
    pub log_level: String,
}

impl Default for TetherConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("tether-queue.json"),
            default_max_attempts: DEFAULT_MAX_ATTEMPTS,
            pool_size: None,
            execution_timeout_ms: None,
            retry_interval_ms: None,
            log_level: "info".to_string(),
        }
    }
}

impl TetherConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file. A missing file yields the defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml_str(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// File (if given) first, then process environment.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.with_env_overrides(|name| std::env::var(name).ok())
    }

    /// Apply `TETHER_*` overrides read through `lookup`.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("TETHER_STORE_PATH") {
            self.store_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("TETHER_MAX_ATTEMPTS") {
            self.default_max_attempts = parse_var("TETHER_MAX_ATTEMPTS", v)?;
        }
        if let Some(v) = lookup("TETHER_POOL_SIZE") {
            self.pool_size = Some(parse_var("TETHER_POOL_SIZE", v)?);
        }
        if let Some(v) = lookup("TETHER_EXECUTION_TIMEOUT_MS") {
            self.execution_timeout_ms = Some(parse_var("TETHER_EXECUTION_TIMEOUT_MS", v)?);
        }
        if let Some(v) = lookup("TETHER_RETRY_INTERVAL_MS") {
            self.retry_interval_ms = Some(parse_var("TETHER_RETRY_INTERVAL_MS", v)?);
        }
        if let Some(v) = lookup("TETHER_LOG_LEVEL") {
            self.log_level = v;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "default_max_attempts must be at least 1".to_string(),
            ));
        }
        if self.pool_size == Some(0) {
            return Err(ConfigError::Invalid(
                "pool_size must be at least 1".to_string(),
            ));
        }
        if self.retry_interval_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "retry_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn execution_timeout(&self) -> Option<Duration> {
        self.execution_timeout_ms.map(Duration::from_millis)
    }

    pub fn retry_interval(&self) -> Option<Duration> {
        self.retry_interval_ms.map(Duration::from_millis)
    }

    /// Configured size, or the hardware default.
    pub fn pool_size_or_default(&self) -> usize {
        self.pool_size.unwrap_or_else(default_pool_size)
    }
}

/// Available hardware parallelism, at least 1.
pub fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

fn parse_var<T: std::str::FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidVar { name, value })
}
