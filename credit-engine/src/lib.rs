//! Credit Engine
//!
//! Installment credit on top of the ledger: annuity pricing, amortization
//! schedules and atomic issuance.
//!
//! # Example
//!
//! ```no_run
//! use credit_engine::{CreditConfig, CreditService, FixedRateSource};
//! use ledger_core::{Config, Currency, Ledger, LogNotifier, UserId};
//! use rust_decimal::Decimal;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> credit_engine::Result<()> {
//!     let ledger = Arc::new(Ledger::open(Config::default(), Arc::new(LogNotifier)).await?);
//!     let credits = CreditService::new(
//!         ledger.clone(),
//!         Arc::new(FixedRateSource::new(Decimal::from(21))),
//!         CreditConfig::default(),
//!     );
//!
//!     let borrower = UserId::new();
//!     let account = ledger.open_account(borrower, Currency::RUB).await?;
//!     let issued = credits
//!         .issue_credit(account.id, borrower, Decimal::from(100_000), 12)
//!         .await?;
//!     println!("monthly payment {}", issued.credit.monthly_payment);
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

pub mod amortization;
pub mod config;
pub mod error;
pub mod issuance;
pub mod rate;

// Re-exports
pub use amortization::{build_schedule, monthly_payment, Installment};
pub use config::CreditConfig;
pub use error::{Error, Result};
pub use issuance::{CreditService, IssuedCredit};
pub use rate::{FixedRateSource, RateError, RateSource};
