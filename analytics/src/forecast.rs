//! Daily balance projection
//!
//! Starts from the user's current total balance and subtracts pending
//! installments of credits still being collected on the day they fall due.
//! Installments already past due but not yet settled land on the first day.

use crate::stats::is_collecting;
use crate::{AnalyticsService, Error, Result};
use chrono::{Days, NaiveDate, Utc};
use ledger_core::UserId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

/// Projected balance for one day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceForecast {
    /// Calendar day (UTC)
    pub date: NaiveDate,

    /// Balance after the day's planned payments
    pub projected_balance: Decimal,

    /// Installments due that day
    pub planned_payments: Decimal,
}

impl AnalyticsService {
    /// Project the user's total balance over the next `days` days, today included
    pub async fn balance_forecast(&self, user: UserId, days: u32) -> Result<Vec<BalanceForecast>> {
        let started = Instant::now();
        let result = self.balance_forecast_inner(user, days).await;
        self.record("balance_forecast", started, &result);
        result
    }

    async fn balance_forecast_inner(&self, user: UserId, days: u32) -> Result<Vec<BalanceForecast>> {
        let max = self.config().max_forecast_days;
        if days == 0 || days > max {
            return Err(Error::InvalidHorizon { days, max });
        }

        let today = Utc::now().date_naive();
        let last_day = today
            .checked_add_days(Days::new(u64::from(days - 1)))
            .ok_or(Error::InvalidHorizon { days, max })?;

        let (balance, planned) = self
            .ledger()
            .storage()
            .query(move |storage| {
                let balance: Decimal = storage
                    .accounts_by_owner(user)?
                    .iter()
                    .map(|account| account.balance)
                    .sum();

                let mut planned: BTreeMap<NaiveDate, Decimal> = BTreeMap::new();
                for credit in storage.credits_by_borrower(user)? {
                    if !is_collecting(credit.status) {
                        continue;
                    }
                    for row in storage.payment_schedule(credit.id)? {
                        let due = row.due_date.date_naive();
                        if !row.is_pending() || due > last_day {
                            continue;
                        }
                        *planned.entry(due.max(today)).or_default() += row.amount;
                    }
                }
                Ok((balance, planned))
            })
            .await?;

        let mut forecast = Vec::with_capacity(days as usize);
        let mut running = balance;
        for offset in 0..u64::from(days) {
            let date = today
                .checked_add_days(Days::new(offset))
                .ok_or(Error::InvalidHorizon { days, max })?;
            let planned_payments = planned.get(&date).copied().unwrap_or(Decimal::ZERO);
            running -= planned_payments;
            forecast.push(BalanceForecast {
                date,
                projected_balance: running,
                planned_payments,
            });
        }

        tracing::info!(
            user_id = %user,
            days,
            start_balance = %balance,
            end_balance = %running,
            "Balance forecast computed"
        );
        Ok(forecast)
    }
}
