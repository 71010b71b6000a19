//! Configuration for analytics queries

use serde::{Deserialize, Serialize};

/// Analytics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Months of income averaged for the debt-to-income ratio
    pub income_window_months: u32,

    /// Longest balance forecast (days)
    pub max_forecast_days: u32,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            income_window_months: 3,
            max_forecast_days: 365,
        }
    }
}

impl AnalyticsConfig {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AnalyticsConfig = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = AnalyticsConfig::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Override fields from `ANALYTICS_*` environment variables
    pub fn apply_env(&mut self) -> crate::Result<()> {
        if let Ok(value) = std::env::var("ANALYTICS_INCOME_WINDOW_MONTHS") {
            self.income_window_months = parse_env("ANALYTICS_INCOME_WINDOW_MONTHS", &value)?;
        }

        if let Ok(value) = std::env::var("ANALYTICS_MAX_FORECAST_DAYS") {
            self.max_forecast_days = parse_env("ANALYTICS_MAX_FORECAST_DAYS", &value)?;
        }

        self.validate()
    }

    /// Both windows must be non-empty
    pub fn validate(&self) -> crate::Result<()> {
        if self.income_window_months == 0 {
            return Err(crate::Error::Config(
                "income_window_months must be non-zero".to_string(),
            ));
        }
        if self.max_forecast_days == 0 {
            return Err(crate::Error::Config(
                "max_forecast_days must be non-zero".to_string(),
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
