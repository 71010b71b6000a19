//! Installment Settlement
//!
//! Collects due credit installments from borrower accounts.
//!
//! # Architecture
//!
//! 1. **Scan**: pending schedule rows with `due_date <= now`, oldest first
//! 2. **Group**: one sequential lane per credit
//! 3. **Settle**: each row in its own store transaction (paid or overdue)
//! 4. **Report**: counts per outcome plus the failures, which never stop the batch
//!
//! Manual payments go through the same settle routine as the batch.
//!
//! # Example
//!
//! ```no_run
//! use ledger_core::{Ledger, LogNotifier};
//! use settlement::{Config, SettlementScheduler, Settler};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> settlement::Result<()> {
//!     let config = Config::default();
//!     let ledger = Arc::new(Ledger::open(config.ledger.clone(), Arc::new(LogNotifier)).await?);
//!     let settler = Arc::new(Settler::new(ledger, config.penalty_rate));
//!     let scheduler = SettlementScheduler::new(settler, &config);
//!
//!     let report = scheduler.run_once(chrono::Utc::now()).await?;
//!     println!("paid {}, overdue {}", report.paid, report.overdue);
//!
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod error;
pub mod manual;
pub mod scheduler;
pub mod settle;

// Re-exports
pub use config::Config;
pub use error::{Error, Result};
pub use scheduler::{SettlementReport, SettlementScheduler};
pub use settle::{SettledInstallment, SettlementOutcome, Settler};
