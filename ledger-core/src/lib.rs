//! Banking Ledger Core
//!
//! Durable account balances and the immutable entries that produced them.
//!
//! # Architecture
//!
//! - **Transactional store**: RocksDB `TransactionDB` with pessimistic row locks
//! - **Locked reads**: `get_for_update` holds a row until commit or rollback
//! - **Deadlines**: every store transaction has a lock timeout and an expiration
//! - **Post-commit notifications**: queued, best-effort, never part of the unit
//!
//! # Invariants
//!
//! - Balances never go negative
//! - A transfer books exactly two entries sharing one reference
//! - Entries are append-only
//! - `(credit_id, payment_number)` is unique in the payment schedule

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod notify;
pub mod storage;
pub mod types;

// Re-exports
pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use ledger::{Ledger, Movement, TransferReceipt};
pub use metrics::Metrics;
pub use notify::{
    LogNotifier, MemoryNotifier, Notification, NotificationDispatcher, NotificationKind,
    Notifier, NotifyError,
};
pub use storage::{Storage, StoreTx};
pub use types::{
    round_money, validate_amount, Account, AccountId, Credit, CreditStatus, Currency,
    EntryDirection, EntryKind, PaymentScheduleEntry, ScheduleStatus, TransactionEntry, UserId,
    MONEY_SCALE,
};
