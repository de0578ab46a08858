//! Configuration file support
//!
//! Settings live in `courier.toml`. Every field has a default, so an empty
//! file (or a missing section) is a valid configuration.
//!
//! ```toml
//! [transactions]
//! isolation = "serializable"
//! max_retries = 5
//!
//! [admission]
//! sweep_interval_secs = 60
//!
//! [admission.presets.auth]
//! max_events = 10
//! window_secs = 600
//! ```

use crate::options::{RetryConfig, TransactionOptions};
use courier_core::IsolationLevel;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Config file name
pub const CONFIG_FILE_NAME: &str = "courier.toml";

/// Result type alias for configuration loading
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Failure to load or store configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading or writing the file failed
    #[error("failed to access config file '{}': {source}", path.display())]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Serializing the configuration failed
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The file parsed but a value is out of range
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    /// Defaults for coordinated transactions
    pub transactions: TransactionDefaults,
    /// Rate admission settings
    pub admission: AdmissionSettings,
}

/// Default transaction settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionDefaults {
    /// Isolation level; engine default when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isolation: Option<IsolationLevel>,
    /// Conflict retries per call
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay_ms: u64,
    /// Cap on any single retry delay
    pub max_delay_ms: u64,
    /// Add jitter to retry delays
    pub jitter: bool,
    /// Per-statement timeout; none when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statement_timeout_ms: Option<u64>,
    /// Age after which a transaction is reported as stuck
    pub long_running_threshold_ms: u64,
}

impl Default for TransactionDefaults {
    fn default() -> Self {
        Self {
            isolation: None,
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 10_000,
            jitter: true,
            statement_timeout_ms: None,
            long_running_threshold_ms: 30_000,
        }
    }
}

impl TransactionDefaults {
    /// Options a coordinator hands out by default
    pub fn to_options(&self) -> TransactionOptions {
        TransactionOptions {
            isolation: self.isolation,
            read_only: false,
            timeout: self.statement_timeout_ms.map(Duration::from_millis),
            name: None,
            retry: RetryConfig {
                max_retries: self.max_retries,
                base_delay: Duration::from_millis(self.base_delay_ms),
                max_delay: Duration::from_millis(self.max_delay_ms),
                jitter: self.jitter,
            },
        }
    }

    /// Stuck-transaction threshold
    pub fn long_running_threshold(&self) -> Duration {
        Duration::from_millis(self.long_running_threshold_ms)
    }
}

/// Rate admission settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionSettings {
    /// Seconds between window sweeps
    pub sweep_interval_secs: u64,
    /// Preset overrides keyed by preset name (`api`, `auth`, ...)
    pub presets: BTreeMap<String, RateOverride>,
}

impl Default for AdmissionSettings {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 300,
            presets: BTreeMap::new(),
        }
    }
}

impl AdmissionSettings {
    /// Sweep interval as a duration
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Replacement limit for one preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateOverride {
    /// Events admitted per window
    pub max_events: u32,
    /// Window length in seconds
    pub window_secs: u64,
}

impl CourierConfig {
    /// Parse from TOML text
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: CourierConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse config from a file path
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Load `courier.toml` from `dir`, writing the defaults first if it is missing
    pub fn load_or_create(dir: &Path) -> ConfigResult<Self> {
        let path = dir.join(CONFIG_FILE_NAME);
        if !path.exists() {
            Self::default().write_to_file(&path)?;
            info!(target: "courier::config", path = %path.display(), "Wrote default config");
        }
        let config = Self::from_file(&path)?;
        info!(target: "courier::config", path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Serialize to TOML
    pub fn to_toml(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Serialize this config to TOML and write it to the given path
    pub fn write_to_file(&self, path: &Path) -> ConfigResult<()> {
        let content = self.to_toml()?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reject values that parse but cannot work
    pub fn validate(&self) -> ConfigResult<()> {
        let txn = &self.transactions;
        if txn.max_delay_ms < txn.base_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "transactions.max_delay_ms ({}) is below base_delay_ms ({})",
                txn.max_delay_ms, txn.base_delay_ms
            )));
        }
        if self.admission.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "admission.sweep_interval_secs must be positive".to_string(),
            ));
        }
        if let Some((name, _)) = self
            .admission
            .presets
            .iter()
            .find(|(_, o)| o.window_secs == 0)
        {
            return Err(ConfigError::Invalid(format!(
                "admission.presets.{name}.window_secs must be positive"
            )));
        }
        Ok(())
    }
}
