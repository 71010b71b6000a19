//! Error types for the ledger

use crate::types::{AccountId, Currency, UserId};
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Broad classification of an error, used by callers to pick a response
/// (user-facing message, retry, alert).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected before any store transaction was opened
    Validation,
    /// Requester does not own the resource
    Authorization,
    /// Referenced row does not exist
    NotFound,
    /// Expected business outcome detected inside a transaction
    BusinessRule,
    /// Storage, timeout or concurrency failure
    Infrastructure,
}

impl ErrorKind {
    /// Lowercase label for logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Authorization => "authorization",
            ErrorKind::NotFound => "not_found",
            ErrorKind::BusinessRule => "business_rule",
            ErrorKind::Infrastructure => "infrastructure",
        }
    }
}

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Amount is zero, negative or has sub-kopeck precision
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Currency is not the supported ledger currency
    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(Currency),

    /// Transfer source and destination are the same account
    #[error("Transfer source and destination are the same account: {0}")]
    SameAccount(AccountId),

    /// Query period ends before it starts
    #[error("Invalid period: {from} is after {to}")]
    InvalidPeriod {
        /// Period start
        from: chrono::DateTime<chrono::Utc>,
        /// Period end
        to: chrono::DateTime<chrono::Utc>,
    },

    /// Requester does not own the account
    #[error("Account {account_id} does not belong to {requester}")]
    NotOwner {
        /// Account being accessed
        account_id: AccountId,
        /// Authenticated requester
        requester: UserId,
    },

    /// Balance would go negative
    #[error("Insufficient funds on {account_id}: available {available}, requested {requested}")]
    InsufficientFunds {
        /// Debited account
        account_id: AccountId,
        /// Balance observed under lock
        available: Decimal,
        /// Amount requested
        requested: Decimal,
    },

    /// Transfer between accounts in different currencies
    #[error("Currency mismatch: {from} -> {to}")]
    CurrencyMismatch {
        /// Source account currency
        from: Currency,
        /// Destination account currency
        to: Currency,
    },

    /// Account not found
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// Credit not found
    #[error("Credit not found: {0}")]
    CreditNotFound(Uuid),

    /// Payment schedule entry not found
    #[error("Payment schedule entry not found: {0}")]
    ScheduleEntryNotFound(Uuid),

    /// Status change that would move a record backwards
    #[error("Invalid status transition: {0}")]
    InvalidTransition(String),

    /// Unique key already present
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Transaction exceeded its deadline or lock wait
    #[error("Transaction timed out: {0}")]
    Timeout(String),

    /// Lock conflict or deadlock reported by the store
    #[error("Transaction conflict: {0}")]
    Conflict(String),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Concurrency error (blocking task panicked, queue closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidAmount(_)
            | Error::UnsupportedCurrency(_)
            | Error::SameAccount(_)
            | Error::InvalidPeriod { .. } => ErrorKind::Validation,
            Error::NotOwner { .. } => ErrorKind::Authorization,
            Error::AccountNotFound(_)
            | Error::CreditNotFound(_)
            | Error::ScheduleEntryNotFound(_) => ErrorKind::NotFound,
            Error::InsufficientFunds { .. }
            | Error::CurrencyMismatch { .. }
            | Error::InvalidTransition(_) => ErrorKind::BusinessRule,
            Error::ConstraintViolation(_)
            | Error::Timeout(_)
            | Error::Conflict(_)
            | Error::Storage(_)
            | Error::Serialization(_)
            | Error::Concurrency(_)
            | Error::Config(_)
            | Error::Io(_) => ErrorKind::Infrastructure,
        }
    }

    /// Whether a caller may resubmit the request as a new attempt.
    ///
    /// A failed mutation never took effect, so resubmitting is a new logical
    /// request; only transient store failures qualify.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::Conflict(_) | Error::Storage(_) | Error::Concurrency(_)
        )
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        use rocksdb::ErrorKind as Rocks;

        match err.kind() {
            Rocks::TimedOut | Rocks::Expired => Error::Timeout(err.to_string()),
            Rocks::Busy | Rocks::TryAgain => Error::Conflict(err.to_string()),
            _ => Error::Storage(err.to_string()),
        }
    }
}
