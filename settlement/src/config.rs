//! Configuration for the settlement scheduler

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Settlement configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Seconds between batch runs (default: 12 hours)
    pub interval_secs: u64,

    /// Run a batch immediately at startup instead of waiting one interval
    pub run_on_start: bool,

    /// Penalty recorded on an overdue installment, as a fraction of its amount
    pub penalty_rate: Decimal,

    /// Credits settled in parallel by one batch
    pub max_concurrent_credits: usize,

    /// Ledger configuration
    pub ledger: ledger_core::Config,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "settlement-scheduler".to_string(),
            interval_secs: 12 * 60 * 60,
            run_on_start: true,
            penalty_rate: dec!(0.10),
            max_concurrent_credits: 8,
            ledger: ledger_core::Config::default(),
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

    /// Override fields from `SETTLEMENT_*` (and `LEDGER_*`) environment variables
    pub fn apply_env(&mut self) -> crate::Result<()> {
        if let Ok(value) = std::env::var("SETTLEMENT_INTERVAL_SECS") {
            self.interval_secs = parse_env("SETTLEMENT_INTERVAL_SECS", &value)?;
        }

        if let Ok(value) = std::env::var("SETTLEMENT_PENALTY_RATE") {
            self.penalty_rate = parse_env("SETTLEMENT_PENALTY_RATE", &value)?;
        }

        if let Ok(value) = std::env::var("SETTLEMENT_MAX_CONCURRENCY") {
            self.max_concurrent_credits = parse_env("SETTLEMENT_MAX_CONCURRENCY", &value)?;
        }

        self.ledger.apply_env()?;
        self.validate()
    }

    /// Reject settings the scheduler cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.interval_secs == 0 {
            return Err(crate::Error::Config("interval_secs must be non-zero".to_string()));
        }
        if self.max_concurrent_credits == 0 {
            return Err(crate::Error::Config(
                "max_concurrent_credits must be non-zero".to_string(),
            ));
        }
        if self.penalty_rate < Decimal::ZERO {
            return Err(crate::Error::Config(
                "penalty_rate must not be negative".to_string(),
            ));
        }
        self.ledger.validate()?;
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> crate::Result<T> {
    value
        .parse()
        .map_err(|_| crate::Error::Config(format!("Invalid value '{}' for {}", value, name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.interval_secs, 43_200);
        assert_eq!(config.penalty_rate, dec!(0.10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_nested_ledger_section() {
        let config: Config = toml::from_str(
            r#"
            interval_secs = 60
            penalty_rate = "0.05"

            [ledger]
            data_dir = "/srv/ledger"
            "#,
        )
        .unwrap();
        assert_eq!(config.interval_secs, 60);
        assert_eq!(config.penalty_rate, dec!(0.05));
        assert_eq!(config.ledger.data_dir, std::path::PathBuf::from("/srv/ledger"));
        assert_eq!(config.max_concurrent_credits, 8);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = Config {
            max_concurrent_credits: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
