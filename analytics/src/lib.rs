//! Financial Analytics
//!
//! Read-only aggregates over accounts, entries and credits:
//!
//! - **Statistics**: income and expenses per entry kind over a period
//! - **Credit load**: open credits, outstanding principal, debt-to-income
//! - **Forecast**: daily projected balance from pending installments
//!
//! # Example
//!
//! ```no_run
//! use analytics::{AnalyticsConfig, AnalyticsService};
//! use ledger_core::{Config, Ledger, LogNotifier, UserId};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> analytics::Result<()> {
//!     let ledger = Arc::new(Ledger::open(Config::default(), Arc::new(LogNotifier)).await?);
//!     let analytics = AnalyticsService::new(ledger, AnalyticsConfig::default())?;
//!
//!     let user = UserId::new();
//!     let load = analytics.credit_load(user).await?;
//!     println!("debt to income: {}", load.debt_to_income);
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
pub mod forecast;
pub mod stats;

// Re-exports
pub use config::AnalyticsConfig;
pub use error::{Error, Result};
pub use forecast::BalanceForecast;
pub use stats::{AnalyticsService, CreditLoad, FinancialStats, KindStats};
