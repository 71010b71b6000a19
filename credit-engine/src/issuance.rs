//! Credit issuance and credit queries
//!
//! Issuance prices the loan from the reference rate, builds the full
//! amortization schedule and then commits, in one store transaction:
//!
//! 1. the credit row
//! 2. every schedule row
//! 3. the `+principal` balance delta on the borrower's account
//! 4. one credit-issuance entry referencing the credit

use crate::{
    amortization::{build_schedule, monthly_payment},
    rate::RateSource,
    CreditConfig, Error, Result,
};
use chrono::Utc;
use ledger_core::{
    validate_amount, Account, AccountId, Credit, CreditStatus, EntryDirection, EntryKind, Ledger,
    Notification, NotificationKind, PaymentScheduleEntry, ScheduleStatus, TransactionEntry,
    UserId,
};
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// A freshly issued credit
#[derive(Debug, Clone)]
pub struct IssuedCredit {
    /// Credit row
    pub credit: Credit,

    /// Schedule ordered by payment number
    pub schedule: Vec<PaymentScheduleEntry>,

    /// Borrower account after the principal was credited
    pub account: Account,
}

/// Issues credits and answers credit queries
pub struct CreditService {
    ledger: Arc<Ledger>,
    rates: Arc<dyn RateSource>,
    config: CreditConfig,
}

impl std::fmt::Debug for CreditService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreditService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CreditService {
    /// Create a service over a shared ledger
    pub fn new(ledger: Arc<Ledger>, rates: Arc<dyn RateSource>, config: CreditConfig) -> Self {
        Self {
            ledger,
            rates,
            config,
        }
    }

    /// Underlying ledger
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Pricing configuration
    pub fn config(&self) -> &CreditConfig {
        &self.config
    }

    /// Reference rate, falling back to the configured rate on error or timeout
    pub async fn reference_rate(&self) -> Decimal {
        let timeout = Duration::from_millis(self.config.rate_timeout_ms);
        match tokio::time::timeout(timeout, self.rates.reference_rate()).await {
            Ok(Ok(rate)) if rate >= Decimal::ZERO => rate,
            Ok(Ok(rate)) => {
                tracing::warn!(rate = %rate, fallback = %self.config.fallback_rate, "Negative reference rate, using fallback");
                self.config.fallback_rate
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, fallback = %self.config.fallback_rate, "Reference rate lookup failed, using fallback");
                self.config.fallback_rate
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.config.rate_timeout_ms,
                    fallback = %self.config.fallback_rate,
                    "Reference rate lookup timed out, using fallback"
                );
                self.config.fallback_rate
            }
        }
    }

    /// Annual rate charged on new credits (reference + margin)
    pub async fn annual_rate(&self) -> Decimal {
        self.reference_rate().await + self.config.margin
    }

    fn ensure_term(&self, term_months: u32) -> Result<()> {
        if term_months < self.config.min_term_months || term_months > self.config.max_term_months
        {
            return Err(Error::InvalidTerm {
                term: term_months,
                min: self.config.min_term_months,
                max: self.config.max_term_months,
            });
        }
        Ok(())
    }

    /// Issue an annuity credit against an owned account
    pub async fn issue_credit(
        &self,
        account_id: AccountId,
        requester: UserId,
        principal: Decimal,
        term_months: u32,
    ) -> Result<IssuedCredit> {
        let started = Instant::now();
        let result = self
            .issue_credit_inner(account_id, requester, principal, term_months)
            .await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind().as_str(),
        };
        self.ledger
            .metrics()
            .record_outcome("issue_credit", started, outcome);

        if let Err(e) = &result {
            tracing::warn!(
                account_id = %account_id,
                principal = %principal,
                term_months,
                error = %e,
                "Credit issuance rejected"
            );
        }
        result
    }

    async fn issue_credit_inner(
        &self,
        account_id: AccountId,
        requester: UserId,
        principal: Decimal,
        term_months: u32,
    ) -> Result<IssuedCredit> {
        validate_amount(principal)?;
        self.ensure_term(term_months)?;

        let account = self.ledger.owned_account(account_id, requester).await?;
        self.ledger.ensure_supported_currency(account.currency)?;

        let annual_rate = self.annual_rate().await;
        let payment = monthly_payment(principal, annual_rate, term_months)?;

        let now = Utc::now();
        let installments = build_schedule(principal, annual_rate, term_months, payment, now)?;
        if payment <= Decimal::ZERO || installments.iter().any(|i| i.amount <= Decimal::ZERO) {
            return Err(Error::PrincipalTooSmall {
                principal,
                term: term_months,
            });
        }
        let end_date = installments
            .last()
            .map(|i| i.due_date)
            .ok_or_else(|| Error::Arithmetic("empty schedule".to_string()))?;

        let credit = Credit {
            id: Uuid::new_v4(),
            account_id,
            borrower_id: requester,
            principal,
            annual_interest_rate: annual_rate,
            term_months,
            monthly_payment: payment,
            start_date: now,
            end_date,
            status: CreditStatus::Active,
            created_at: now,
            updated_at: now,
        };

        let schedule: Vec<PaymentScheduleEntry> = installments
            .into_iter()
            .map(|i| PaymentScheduleEntry {
                id: Uuid::new_v4(),
                credit_id: credit.id,
                payment_number: i.payment_number,
                due_date: i.due_date,
                amount: i.amount,
                principal_component: i.principal,
                interest_component: i.interest,
                status: ScheduleStatus::Pending,
                paid_at: None,
                created_at: now,
                updated_at: now,
            })
            .collect();

        let credit_row = credit.clone();
        let schedule_rows = schedule.clone();
        let account = self
            .ledger
            .storage()
            .transaction("issue_credit", move |tx| {
                tx.insert_credit(&credit_row)?;
                for row in &schedule_rows {
                    tx.insert_schedule_entry(row)?;
                }
                let account = tx.apply_balance_delta(account_id, principal, now)?;
                tx.insert_entry(&TransactionEntry::new(
                    account_id,
                    principal,
                    EntryKind::CreditIssuance,
                    EntryDirection::Credit,
                    credit_row.id,
                    now,
                ))?;
                Ok(account)
            })
            .await?;

        tracing::info!(
            credit_id = %credit.id,
            account_id = %account_id,
            principal = %principal,
            annual_rate = %annual_rate,
            monthly_payment = %payment,
            term_months,
            "Credit issued"
        );

        self.ledger.notifications().dispatch(Notification::new(
            requester,
            NotificationKind::CreditIssued,
            json!({
                "credit_id": credit.id.to_string(),
                "principal": principal.to_string(),
                "annual_rate": annual_rate.to_string(),
                "monthly_payment": payment.to_string(),
                "term_months": term_months,
            }),
        ));

        Ok(IssuedCredit {
            credit,
            schedule,
            account,
        })
    }

    /// Get a credit the requester borrowed
    pub async fn get_credit(&self, credit_id: Uuid, requester: UserId) -> Result<Credit> {
        let credit = self
            .ledger
            .storage()
            .query(move |storage| storage.get_credit(credit_id))
            .await?;
        credit.ensure_borrower(requester)?;
        Ok(credit)
    }

    /// All credits of a borrower
    pub async fn credits_for_borrower(&self, borrower_id: UserId) -> Result<Vec<Credit>> {
        Ok(self
            .ledger
            .storage()
            .query(move |storage| storage.credits_by_borrower(borrower_id))
            .await?)
    }

    /// Schedule of a credit ordered by payment number
    pub async fn payment_schedule(
        &self,
        credit_id: Uuid,
        requester: UserId,
    ) -> Result<Vec<PaymentScheduleEntry>> {
        self.get_credit(credit_id, requester).await?;
        Ok(self
            .ledger
            .storage()
            .query(move |storage| storage.payment_schedule(credit_id))
            .await?)
    }

    /// Lowest-numbered installment still pending
    pub async fn next_installment(
        &self,
        credit_id: Uuid,
        requester: UserId,
    ) -> Result<Option<PaymentScheduleEntry>> {
        self.get_credit(credit_id, requester).await?;
        Ok(self
            .ledger
            .storage()
            .query(move |storage| storage.next_pending_installment(credit_id))
            .await?)
    }
}
