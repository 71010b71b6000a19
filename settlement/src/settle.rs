//! Installment settlement
//!
//! One installment, one store transaction. Rows are locked in a fixed order:
//! schedule row, then account, then credit.
//!
//! The pending check runs under the schedule row lock, so a second attempt
//! (a concurrent batch, a retry, a manual payment racing the batch) sees the
//! settled status and stops with [`Error::AlreadySettled`] without touching
//! anything.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use ledger_core::{
    round_money, Credit, CreditStatus, EntryDirection, EntryKind, Ledger, Notification,
    NotificationKind, PaymentScheduleEntry, ScheduleStatus, TransactionEntry,
};
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// How an installment was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// Amount debited from the borrower's account
    Paid,
    /// Not enough funds; marked overdue with a recorded penalty
    Overdue,
}

impl SettlementOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            SettlementOutcome::Paid => "paid",
            SettlementOutcome::Overdue => "overdue",
        }
    }
}

/// Result of settling one installment
#[derive(Debug, Clone)]
pub struct SettledInstallment {
    /// Paid or overdue
    pub outcome: SettlementOutcome,

    /// Schedule row after the update
    pub entry: PaymentScheduleEntry,

    /// Credit after any status change
    pub credit: Credit,

    /// Credit-payment entry (amount includes the penalty)
    pub payment: TransactionEntry,

    /// Penalty recorded on an overdue installment (zero when paid)
    pub penalty: Decimal,
}

/// Credit status implied by its schedule as of `now`.
///
/// Paid once every row is paid. Overdue only once a row that failed
/// collection is actually past its due date, so an early "pay now" without
/// funds does not flag the credit.
fn credit_status_after(
    schedule: &[PaymentScheduleEntry],
    now: DateTime<Utc>,
) -> Option<CreditStatus> {
    if schedule.iter().all(|row| row.status == ScheduleStatus::Paid) {
        return Some(CreditStatus::Paid);
    }
    schedule
        .iter()
        .any(|row| row.status == ScheduleStatus::Overdue && row.due_date <= now)
        .then_some(CreditStatus::Overdue)
}

enum Attempt {
    Settled(SettledInstallment),
    Skipped(ScheduleStatus),
}

/// Settles installments against borrower accounts
pub struct Settler {
    ledger: Arc<Ledger>,
    penalty_rate: Decimal,
}

impl std::fmt::Debug for Settler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settler")
            .field("penalty_rate", &self.penalty_rate)
            .finish_non_exhaustive()
    }
}

impl Settler {
    /// Create a settler over a shared ledger
    pub fn new(ledger: Arc<Ledger>, penalty_rate: Decimal) -> Self {
        Self {
            ledger,
            penalty_rate,
        }
    }

    /// Underlying ledger
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Settle one installment as of `now`
    pub async fn settle_installment(
        &self,
        entry_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<SettledInstallment> {
        let started = Instant::now();
        let result = self.settle_inner(entry_id, now).await;

        let outcome = match &result {
            Ok(settled) => settled.outcome.as_str(),
            Err(Error::AlreadySettled { .. }) => "skipped",
            Err(e) => e.kind().as_str(),
        };
        self.ledger
            .metrics()
            .record_outcome("settle_installment", started, outcome);

        result
    }

    async fn settle_inner(&self, entry_id: Uuid, now: DateTime<Utc>) -> Result<SettledInstallment> {
        let penalty_rate = self.penalty_rate;

        let attempt = self
            .ledger
            .storage()
            .transaction("settle_installment", move |tx| {
                let mut entry = tx.lock_schedule_entry(entry_id)?;
                if !entry.is_pending() {
                    return Ok(Attempt::Skipped(entry.status));
                }

                let credit = tx.get_credit(entry.credit_id)?;
                let account = tx.lock_account(credit.account_id)?;

                let (outcome, penalty) = if account.balance >= entry.amount {
                    tx.apply_balance_delta(account.id, -entry.amount, now)?;
                    entry.status = ScheduleStatus::Paid;
                    entry.paid_at = Some(now);
                    (SettlementOutcome::Paid, Decimal::ZERO)
                } else {
                    entry.status = ScheduleStatus::Overdue;
                    (
                        SettlementOutcome::Overdue,
                        round_money(entry.amount * penalty_rate),
                    )
                };
                entry.updated_at = now;
                tx.update_schedule_entry(&entry)?;

                let payment = TransactionEntry::new(
                    account.id,
                    entry.amount + penalty,
                    EntryKind::CreditPayment,
                    EntryDirection::Debit,
                    entry.id,
                    now,
                );
                tx.insert_entry(&payment)?;

                let mut credit = tx.lock_credit(credit.id)?;
                let schedule = tx.schedule_for_credit(credit.id)?;
                let next_status = credit_status_after(&schedule, now);
                if let Some(next) = next_status {
                    if credit.status.can_transition_to(next) {
                        credit.transition(next, now)?;
                        tx.update_credit(&credit)?;
                    }
                }

                Ok(Attempt::Settled(SettledInstallment {
                    outcome,
                    entry,
                    credit,
                    payment,
                    penalty,
                }))
            })
            .await?;

        let settled = match attempt {
            Attempt::Settled(settled) => settled,
            Attempt::Skipped(status) => {
                tracing::debug!(entry_id = %entry_id, status = ?status, "Installment already settled");
                return Err(Error::AlreadySettled { entry_id, status });
            }
        };

        match settled.outcome {
            SettlementOutcome::Paid => tracing::info!(
                entry_id = %entry_id,
                credit_id = %settled.credit.id,
                payment_number = settled.entry.payment_number,
                amount = %settled.entry.amount,
                credit_status = ?settled.credit.status,
                "Installment paid"
            ),
            SettlementOutcome::Overdue => tracing::warn!(
                entry_id = %entry_id,
                credit_id = %settled.credit.id,
                payment_number = settled.entry.payment_number,
                amount = %settled.entry.amount,
                penalty = %settled.penalty,
                "Installment overdue"
            ),
        }

        let kind = match settled.outcome {
            SettlementOutcome::Paid => NotificationKind::InstallmentPaid,
            SettlementOutcome::Overdue => NotificationKind::InstallmentOverdue,
        };
        self.ledger.notifications().dispatch(Notification::new(
            settled.credit.borrower_id,
            kind,
            json!({
                "credit_id": settled.credit.id.to_string(),
                "payment_number": settled.entry.payment_number,
                "amount": settled.entry.amount.to_string(),
                "penalty": settled.penalty.to_string(),
            }),
        ));

        Ok(settled)
    }
}
