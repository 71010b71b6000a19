//! Error types for installment settlement

use ledger_core::{ErrorKind, ScheduleStatus};
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Result type for settlement operations
pub type Result<T> = std::result::Result<T, Error>;

/// Settlement errors
#[derive(Error, Debug)]
pub enum Error {
    /// Ledger error
    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger_core::Error),

    /// Installment was settled by someone else first
    #[error("Installment {entry_id} already settled ({status:?})")]
    AlreadySettled {
        /// Schedule entry
        entry_id: Uuid,
        /// Status found under the row lock
        status: ScheduleStatus,
    },

    /// Credit has nothing left to pay
    #[error("No pending installment for credit {0}")]
    NoPendingInstallment(Uuid),

    /// Offered amount does not cover the installment
    #[error("Payment below due amount: offered {offered}, due {due}")]
    PaymentBelowDue {
        /// Installment amount
        due: Decimal,
        /// Amount offered by the borrower
        offered: Decimal,
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
            Error::AlreadySettled { .. } | Error::NoPendingInstallment(_) => {
                ErrorKind::BusinessRule
            }
            Error::PaymentBelowDue { .. } => ErrorKind::Validation,
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
