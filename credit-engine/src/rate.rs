//! Reference rate source

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

/// Rate lookup failure
#[derive(Error, Debug)]
pub enum RateError {
    /// Source could not be reached
    #[error("Rate source unavailable: {0}")]
    Unavailable(String),

    /// Source answered with something unusable
    #[error("Invalid rate: {0}")]
    Invalid(String),
}

/// External benchmark rate (annual, percent)
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Current reference rate
    async fn reference_rate(&self) -> Result<Decimal, RateError>;
}

/// Source that always answers with the same rate
#[derive(Debug, Clone, Copy)]
pub struct FixedRateSource {
    rate: Decimal,
}

impl FixedRateSource {
    /// Fixed rate in percent
    pub fn new(rate: Decimal) -> Self {
        Self { rate }
    }
}

#[async_trait]
impl RateSource for FixedRateSource {
    async fn reference_rate(&self) -> Result<Decimal, RateError> {
        Ok(self.rate)
    }
}
