//! Error types for analytics

use ledger_core::ErrorKind;
use thiserror::Error;

/// Result type for analytics queries
pub type Result<T> = std::result::Result<T, Error>;

/// Analytics errors
#[derive(Error, Debug)]
pub enum Error {
    /// Ledger error
    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger_core::Error),

    /// Forecast horizon outside `1..=max`
    #[error("Invalid forecast horizon: {days} days (allowed 1..={max})")]
    InvalidHorizon {
        /// Requested days
        days: u32,
        /// Longest allowed horizon
        max: u32,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Ledger(e) => e.kind(),
            Error::InvalidHorizon { .. } => ErrorKind::Validation,
            Error::Config(_) | Error::Io(_) => ErrorKind::Infrastructure,
        }
    }

    /// Whether the query may be repeated
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Ledger(e) => e.is_retryable(),
            _ => false,
        }
    }
}
