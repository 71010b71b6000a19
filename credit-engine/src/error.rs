//! Error types for credit issuance

use ledger_core::ErrorKind;
use thiserror::Error;

/// Result type for credit operations
pub type Result<T> = std::result::Result<T, Error>;

/// Credit errors
#[derive(Error, Debug)]
pub enum Error {
    /// Ledger error
    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger_core::Error),

    /// Term outside the allowed range
    #[error("Invalid term: {term} months (allowed {min}..={max})")]
    InvalidTerm {
        /// Requested term
        term: u32,
        /// Shortest allowed term
        min: u32,
        /// Longest allowed term
        max: u32,
    },

    /// Principal too small to yield a positive amount for every installment
    #[error("Principal {principal} over {term} months leaves installments that round to zero")]
    PrincipalTooSmall {
        /// Requested principal
        principal: rust_decimal::Decimal,
        /// Requested term
        term: u32,
    },

    /// Rate or payment cannot be computed
    #[error("Arithmetic error: {0}")]
    Arithmetic(String),

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
            Error::InvalidTerm { .. }
            | Error::PrincipalTooSmall { .. }
            | Error::Arithmetic(_) => ErrorKind::Validation,
            Error::Config(_) | Error::Io(_) => ErrorKind::Infrastructure,
        }
    }

    /// Whether the request may be resubmitted
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Ledger(e) => e.is_retryable(),
            _ => false,
        }
    }
}
