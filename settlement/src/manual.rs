//! Borrower-initiated "pay now"
//!
//! Finds the next pending installment and pushes it through the same
//! routine the batch uses, so a manual payment racing the batch settles the
//! installment exactly once.

use crate::{Error, Result, SettledInstallment, Settler};
use chrono::Utc;
use ledger_core::{validate_amount, PaymentScheduleEntry, UserId};
use rust_decimal::Decimal;
use uuid::Uuid;

impl Settler {
    /// Next pending installment of a credit the requester borrowed
    pub async fn next_installment(
        &self,
        credit_id: Uuid,
        requester: UserId,
    ) -> Result<PaymentScheduleEntry> {
        let storage = self.ledger().storage();

        let credit = storage
            .query(move |storage| storage.get_credit(credit_id))
            .await?;
        credit.ensure_borrower(requester)?;

        storage
            .query(move |storage| storage.next_pending_installment(credit_id))
            .await?
            .ok_or(Error::NoPendingInstallment(credit_id))
    }

    /// Pay the next pending installment now.
    ///
    /// `amount` must cover the installment; only the installment amount is
    /// debited.
    pub async fn pay_next_installment(
        &self,
        credit_id: Uuid,
        requester: UserId,
        amount: Decimal,
    ) -> Result<SettledInstallment> {
        validate_amount(amount)?;

        let next = self.next_installment(credit_id, requester).await?;
        if amount < next.amount {
            return Err(Error::PaymentBelowDue {
                due: next.amount,
                offered: amount,
            });
        }

        tracing::info!(
            credit_id = %credit_id,
            entry_id = %next.id,
            payment_number = next.payment_number,
            offered = %amount,
            "Manual installment payment"
        );

        self.settle_installment(next.id, Utc::now()).await
    }
}
