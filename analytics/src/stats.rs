//! Income, expense and credit-load statistics
//!
//! Read-only: every query runs against committed state and never locks rows.
//! Credit legs count as income, debit legs as expenses. A credit-payment
//! entry for an overdue installment is a debit leg too, so it shows up as an
//! expense even though the balance was not touched.

use crate::{AnalyticsConfig, Result};
use chrono::{DateTime, Months, Utc};
use ledger_core::{
    CreditStatus, EntryDirection, Error as LedgerError, Ledger, ScheduleStatus, TransactionEntry,
    UserId,
};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// Totals for one entry kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KindStats {
    /// Sum of credit legs
    pub income: Decimal,
    /// Sum of debit legs
    pub expenses: Decimal,
    /// Number of entries
    pub count: usize,
}

/// Income and expenses over a period
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinancialStats {
    /// Sum of all credit legs
    pub total_income: Decimal,

    /// Sum of all debit legs
    pub total_expenses: Decimal,

    /// `total_income - total_expenses`
    pub net_balance: Decimal,

    /// Breakdown keyed by entry kind (`deposit`, `transfer`, ...)
    pub by_kind: BTreeMap<String, KindStats>,
}

impl FinancialStats {
    fn add(&mut self, entry: &TransactionEntry) {
        let stats = self.by_kind.entry(entry.kind.as_str().to_string()).or_default();
        match entry.direction {
            EntryDirection::Credit => {
                self.total_income += entry.amount;
                stats.income += entry.amount;
            }
            EntryDirection::Debit => {
                self.total_expenses += entry.amount;
                stats.expenses += entry.amount;
            }
        }
        stats.count += 1;
        self.net_balance = self.total_income - self.total_expenses;
    }
}

/// Outstanding credit obligations of a borrower
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreditLoad {
    /// Credits still being collected (active or overdue)
    pub active_credits: usize,

    /// Principal not yet collected across those credits
    pub outstanding_principal: Decimal,

    /// Sum of their monthly payments
    pub monthly_payments: Decimal,

    /// Monthly payments over average monthly income; zero without income
    pub debt_to_income: Decimal,
}

/// Read-only analytics over the ledger
pub struct AnalyticsService {
    ledger: Arc<Ledger>,
    config: AnalyticsConfig,
}

impl std::fmt::Debug for AnalyticsService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyticsService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AnalyticsService {
    /// Create a service over a shared ledger; rejects an invalid configuration
    pub fn new(ledger: Arc<Ledger>, config: AnalyticsConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { ledger, config })
    }

    /// Underlying ledger
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Active configuration
    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    pub(crate) fn record<T>(&self, operation: &str, started: Instant, result: &Result<T>) {
        let outcome = match result {
            Ok(_) => "ok",
            Err(e) => e.kind().as_str(),
        };
        self.ledger
            .metrics()
            .record_outcome(operation, started, outcome);
    }

    /// Income and expenses across all of a user's accounts in `[start, end]`
    pub async fn financial_stats(
        &self,
        user: UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<FinancialStats> {
        let started = Instant::now();
        let result = self.financial_stats_inner(user, start, end).await;
        self.record("financial_stats", started, &result);
        result
    }

    async fn financial_stats_inner(
        &self,
        user: UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<FinancialStats> {
        if start > end {
            return Err(LedgerError::InvalidPeriod {
                from: start,
                to: end,
            }
            .into());
        }

        let entries = self
            .ledger
            .storage()
            .query(move |storage| {
                let mut entries = Vec::new();
                for account in storage.accounts_by_owner(user)? {
                    entries.extend(storage.entries_for_account(
                        account.id,
                        Some(start),
                        Some(end),
                    )?);
                }
                Ok(entries)
            })
            .await?;

        let mut stats = FinancialStats::default();
        for entry in &entries {
            stats.add(entry);
        }

        tracing::debug!(
            user_id = %user,
            entries = entries.len(),
            income = %stats.total_income,
            expenses = %stats.total_expenses,
            "Financial stats computed"
        );
        Ok(stats)
    }

    /// Credit load of a borrower as of now
    pub async fn credit_load(&self, user: UserId) -> Result<CreditLoad> {
        let started = Instant::now();
        let result = self.credit_load_inner(user, Utc::now()).await;
        self.record("credit_load", started, &result);
        result
    }

    async fn credit_load_inner(&self, user: UserId, now: DateTime<Utc>) -> Result<CreditLoad> {
        let (open_credits, outstanding) = self
            .ledger
            .storage()
            .query(move |storage| {
                let mut open = Vec::new();
                let mut outstanding = Decimal::ZERO;
                for credit in storage.credits_by_borrower(user)? {
                    if !is_collecting(credit.status) {
                        continue;
                    }
                    outstanding += storage
                        .payment_schedule(credit.id)?
                        .iter()
                        .filter(|row| row.status != ScheduleStatus::Paid)
                        .map(|row| row.principal_component)
                        .sum::<Decimal>();
                    open.push(credit);
                }
                Ok((open, outstanding))
            })
            .await?;

        let mut load = CreditLoad {
            active_credits: open_credits.len(),
            outstanding_principal: outstanding,
            monthly_payments: open_credits.iter().map(|c| c.monthly_payment).sum(),
            debt_to_income: Decimal::ZERO,
        };

        if load.monthly_payments > Decimal::ZERO {
            let window = self.config.income_window_months;
            let since = now.checked_sub_months(Months::new(window)).unwrap_or(now);
            let stats = self.financial_stats_inner(user, since, now).await?;

            let ratio = stats
                .total_income
                .checked_div(Decimal::from(window))
                .filter(|income| *income > Decimal::ZERO)
                .and_then(|income| load.monthly_payments.checked_div(income));
            if let Some(ratio) = ratio {
                load.debt_to_income =
                    ratio.round_dp_with_strategy(4, RoundingStrategy::MidpointAwayFromZero);
            }
        }

        tracing::info!(
            user_id = %user,
            active_credits = load.active_credits,
            outstanding = %load.outstanding_principal,
            monthly_payments = %load.monthly_payments,
            debt_to_income = %load.debt_to_income,
            "Credit load computed"
        );
        Ok(load)
    }
}

/// Credits still being collected
pub(crate) fn is_collecting(status: CreditStatus) -> bool {
    !status.is_terminal()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ledger_core::{AccountId, EntryKind};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn entry(kind: EntryKind, direction: EntryDirection, amount: Decimal) -> TransactionEntry {
        TransactionEntry::new(
            AccountId::new(),
            amount,
            kind,
            direction,
            Uuid::new_v4(),
            Utc::now(),
        )
    }

    #[test]
    fn test_stats_split_by_direction() {
        let mut stats = FinancialStats::default();
        stats.add(&entry(EntryKind::Deposit, EntryDirection::Credit, dec!(1000)));
        stats.add(&entry(EntryKind::Transfer, EntryDirection::Debit, dec!(250)));
        stats.add(&entry(EntryKind::Transfer, EntryDirection::Credit, dec!(100)));
        stats.add(&entry(EntryKind::Withdrawal, EntryDirection::Debit, dec!(50.50)));

        assert_eq!(stats.total_income, dec!(1100));
        assert_eq!(stats.total_expenses, dec!(300.50));
        assert_eq!(stats.net_balance, dec!(799.50));

        let transfer = &stats.by_kind["transfer"];
        assert_eq!(transfer.income, dec!(100));
        assert_eq!(transfer.expenses, dec!(250));
        assert_eq!(transfer.count, 2);
        assert_eq!(stats.by_kind["deposit"].count, 1);
    }

    #[test]
    fn test_collecting_statuses() {
        assert!(is_collecting(CreditStatus::Active));
        assert!(is_collecting(CreditStatus::Overdue));
        assert!(!is_collecting(CreditStatus::Paid));
        assert!(!is_collecting(CreditStatus::Defaulted));
    }
}
