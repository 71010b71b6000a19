//! Configuration for the ledger

use crate::types::Currency;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// The single currency accounts may hold
    pub supported_currency: Currency,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Store transaction limits
    pub transactions: TransactionConfig,

    /// Notification queue configuration
    pub notifications: NotificationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/ledger"),
            service_name: "ledger-core".to_string(),
            supported_currency: Currency::RUB,
            rocksdb: RocksDBConfig::default(),
            transactions: TransactionConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 4,
            max_background_jobs: 4,
            enable_statistics: false,
        }
    }
}

/// Store transaction limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// How long a locked read may wait for another transaction's row lock (ms)
    pub lock_timeout_ms: u64,

    /// Hard deadline from begin to commit (ms); an expired transaction rolls back
    pub deadline_ms: u64,

    /// Let RocksDB detect lock cycles instead of waiting for the timeout
    pub deadlock_detect: bool,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 2_000,
            deadline_ms: 5_000,
            deadlock_detect: true,
        }
    }
}

/// Notification queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Bounded queue size; notifications beyond it are dropped and logged
    pub queue_capacity: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1_024,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Override fields from `LEDGER_*` environment variables
    pub fn apply_env(&mut self) -> crate::Result<()> {
        if let Ok(data_dir) = std::env::var("LEDGER_DATA_DIR") {
            self.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(code) = std::env::var("LEDGER_CURRENCY") {
            self.supported_currency = Currency::from_code(&code)
                .ok_or_else(|| crate::Error::Config(format!("Unknown currency '{}'", code)))?;
        }

        if let Ok(value) = std::env::var("LEDGER_LOCK_TIMEOUT_MS") {
            self.transactions.lock_timeout_ms = parse_env("LEDGER_LOCK_TIMEOUT_MS", &value)?;
        }

        if let Ok(value) = std::env::var("LEDGER_TX_DEADLINE_MS") {
            self.transactions.deadline_ms = parse_env("LEDGER_TX_DEADLINE_MS", &value)?;
        }

        self.validate()
    }

    /// Reject settings the store cannot honour
    pub fn validate(&self) -> crate::Result<()> {
        if self.transactions.lock_timeout_ms == 0 || self.transactions.deadline_ms == 0 {
            return Err(crate::Error::Config(
                "transaction timeouts must be non-zero".to_string(),
            ));
        }
        if self.transactions.lock_timeout_ms > self.transactions.deadline_ms {
            return Err(crate::Error::Config(
                "lock_timeout_ms must not exceed deadline_ms".to_string(),
            ));
        }
        if self.notifications.queue_capacity == 0 {
            return Err(crate::Error::Config(
                "notification queue_capacity must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> crate::Result<T> {
    value
        .parse()
        .map_err(|_| crate::Error::Config(format!("Invalid value '{}' for {}", value, name)))
}
