//! Configuration for credit issuance

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Credit pricing and term limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CreditConfig {
    /// Reference rate used when the rate source fails or times out (percent)
    pub fallback_rate: Decimal,

    /// Margin added to the reference rate (percent)
    pub margin: Decimal,

    /// Shortest term (months)
    pub min_term_months: u32,

    /// Longest term (months)
    pub max_term_months: u32,

    /// Rate lookup timeout (ms)
    pub rate_timeout_ms: u64,
}

impl Default for CreditConfig {
    fn default() -> Self {
        Self {
            fallback_rate: dec!(22),
            margin: dec!(5),
            min_term_months: 6,
            max_term_months: 60,
            rate_timeout_ms: 2_000,
        }
    }
}

impl CreditConfig {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: CreditConfig = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = CreditConfig::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Override fields from `CREDIT_*` environment variables
    pub fn apply_env(&mut self) -> crate::Result<()> {
        if let Ok(value) = std::env::var("CREDIT_FALLBACK_RATE") {
            self.fallback_rate = parse_env("CREDIT_FALLBACK_RATE", &value)?;
        }

        if let Ok(value) = std::env::var("CREDIT_MARGIN") {
            self.margin = parse_env("CREDIT_MARGIN", &value)?;
        }

        if let Ok(value) = std::env::var("CREDIT_RATE_TIMEOUT_MS") {
            self.rate_timeout_ms = parse_env("CREDIT_RATE_TIMEOUT_MS", &value)?;
        }

        self.validate()
    }

    /// Reject inconsistent limits
    pub fn validate(&self) -> crate::Result<()> {
        if self.fallback_rate < Decimal::ZERO || self.margin < Decimal::ZERO {
            return Err(crate::Error::Config(
                "rates must not be negative".to_string(),
            ));
        }
        if self.min_term_months == 0 || self.min_term_months > self.max_term_months {
            return Err(crate::Error::Config(format!(
                "invalid term bounds {}..={}",
                self.min_term_months, self.max_term_months
            )));
        }
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
        let config = CreditConfig::default();
        assert_eq!(config.fallback_rate + config.margin, dec!(27));
        assert_eq!(config.min_term_months, 6);
        assert_eq!(config.max_term_months, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_override() {
        let config: CreditConfig = toml::from_str(
            r#"
            margin = "4.5"
            max_term_months = 36
            "#,
        )
        .unwrap();
        assert_eq!(config.margin, dec!(4.5));
        assert_eq!(config.max_term_months, 36);
        assert_eq!(config.fallback_rate, dec!(22));
    }

    #[test]
    fn test_inverted_term_bounds_rejected() {
        let config = CreditConfig {
            min_term_months: 12,
            max_term_months: 6,
            ..CreditConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
