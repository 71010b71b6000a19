//! Core types for the ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Exact arithmetic (Decimal for money, two fractional digits)
//! - Forward-only status machines

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Number of fractional digits carried by every stored amount
pub const MONEY_SCALE: u32 = 2;

/// Round an amount to the ledger's money scale (half away from zero)
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Check that an amount can be booked: strictly positive, at most two
/// fractional digits.
pub fn validate_amount(amount: Decimal) -> crate::Result<()> {
    if amount <= Decimal::ZERO {
        return Err(crate::Error::InvalidAmount(format!(
            "amount must be positive, got {}",
            amount
        )));
    }
    if amount.normalize().scale() > MONEY_SCALE {
        return Err(crate::Error::InvalidAmount(format!(
            "amount {} has more than {} fractional digits",
            amount, MONEY_SCALE
        )));
    }
    Ok(())
}

/// Account identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(Uuid);

impl AccountId {
    /// Generate a new account ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Underlying UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Authenticated user identifier (supplied by the identity provider)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(Uuid);

impl UserId {
    /// Generate a new user ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// ISO 4217 currency code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Currency {
    /// Russian Ruble
    RUB,
    /// US Dollar
    USD,
    /// Euro
    EUR,
}

impl Currency {
    /// ISO 4217 code
    pub fn code(&self) -> &'static str {
        match self {
            Currency::RUB => "RUB",
            Currency::USD => "USD",
            Currency::EUR => "EUR",
        }
    }

    /// Parse from string
    pub fn from_code(s: &str) -> Option<Self> {
        match s {
            "RUB" => Some(Currency::RUB),
            "USD" => Some(Currency::USD),
            "EUR" => Some(Currency::EUR),
            _ => None,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Customer account holding a single-currency balance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Account ID
    pub id: AccountId,

    /// Owning user
    pub owner_id: UserId,

    /// Current balance, never negative
    pub balance: Decimal,

    /// Account currency
    pub currency: Currency,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Last balance change
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Fresh account with zero balance
    pub fn open(owner_id: UserId, currency: Currency, now: DateTime<Utc>) -> Self {
        Self {
            id: AccountId::new(),
            owner_id,
            balance: Decimal::ZERO,
            currency,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check ownership against the authenticated requester
    pub fn ensure_owner(&self, requester: UserId) -> crate::Result<()> {
        if self.owner_id != requester {
            return Err(crate::Error::NotOwner {
                account_id: self.id,
                requester,
            });
        }
        Ok(())
    }
}

/// What kind of movement a transaction entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EntryKind {
    /// One leg of an account-to-account transfer
    Transfer = 1,
    /// Cash-in
    Deposit = 2,
    /// Cash-out
    Withdrawal = 3,
    /// Loan principal credited to the account
    CreditIssuance = 4,
    /// Installment collection attempt (amount includes any penalty)
    CreditPayment = 5,
    /// Payment made with a card linked to the account
    CardPayment = 6,
}

impl EntryKind {
    /// Stable lowercase name used in logs, metrics and analytics
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Transfer => "transfer",
            EntryKind::Deposit => "deposit",
            EntryKind::Withdrawal => "withdrawal",
            EntryKind::CreditIssuance => "credit_issuance",
            EntryKind::CreditPayment => "credit_payment",
            EntryKind::CardPayment => "card_payment",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Side of the account a leg touched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryDirection {
    /// Money leaves (or was due to leave) the account
    Debit,
    /// Money arrives on the account
    Credit,
}

/// Immutable record of one ledger movement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionEntry {
    /// Entry ID (UUIDv7 for time-ordering)
    pub id: Uuid,

    /// Account the leg was booked on
    pub account_id: AccountId,

    /// Positive magnitude
    pub amount: Decimal,

    /// Movement type
    pub kind: EntryKind,

    /// Debit or credit leg
    pub direction: EntryDirection,

    /// Correlates legs of one operation (transfer id, credit id, card id, ...)
    pub reference_id: Uuid,

    /// Booking timestamp
    pub created_at: DateTime<Utc>,
}

impl TransactionEntry {
    /// Build a new entry stamped with a fresh time-ordered ID
    pub fn new(
        account_id: AccountId,
        amount: Decimal,
        kind: EntryKind,
        direction: EntryDirection,
        reference_id: Uuid,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            account_id,
            amount,
            kind,
            direction,
            reference_id,
            created_at,
        }
    }
}

/// Credit status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CreditStatus {
    /// Installments are being collected
    Active = 1,
    /// Every installment collected (terminal)
    Paid = 2,
    /// At least one installment could not be collected
    Overdue = 3,
    /// Written off (terminal)
    Defaulted = 4,
}

impl CreditStatus {
    /// Forward-only state machine
    pub fn can_transition_to(&self, next: CreditStatus) -> bool {
        matches!(
            (self, next),
            (CreditStatus::Active, CreditStatus::Paid)
                | (CreditStatus::Active, CreditStatus::Overdue)
                | (CreditStatus::Overdue, CreditStatus::Defaulted)
        )
    }

    /// Check if credit is in terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, CreditStatus::Paid | CreditStatus::Defaulted)
    }
}

/// Installment credit issued against an account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credit {
    /// Credit ID
    pub id: Uuid,

    /// Account the principal was credited to and installments are debited from
    pub account_id: AccountId,

    /// Borrower (account owner at issuance)
    pub borrower_id: UserId,

    /// Principal amount
    pub principal: Decimal,

    /// Annual interest rate in percent (reference rate + margin)
    pub annual_interest_rate: Decimal,

    /// Term in months
    pub term_months: u32,

    /// Annuity installment, fixed at issuance
    pub monthly_payment: Decimal,

    /// Issuance date
    pub start_date: DateTime<Utc>,

    /// Due date of the final installment
    pub end_date: DateTime<Utc>,

    /// Current status
    pub status: CreditStatus,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Last status change
    pub updated_at: DateTime<Utc>,
}

impl Credit {
    /// Move to `next`, rejecting backwards transitions
    pub fn transition(&mut self, next: CreditStatus, now: DateTime<Utc>) -> crate::Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(crate::Error::InvalidTransition(format!(
                "credit {} cannot move from {:?} to {:?}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Check borrower against the authenticated requester
    pub fn ensure_borrower(&self, requester: UserId) -> crate::Result<()> {
        if self.borrower_id != requester {
            return Err(crate::Error::NotOwner {
                account_id: self.account_id,
                requester,
            });
        }
        Ok(())
    }
}

/// Installment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ScheduleStatus {
    /// Not yet settled
    Pending = 1,
    /// Collected
    Paid = 2,
    /// Collection failed for lack of funds
    Overdue = 3,
}

/// One row of a credit's amortization schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentScheduleEntry {
    /// Entry ID
    pub id: Uuid,

    /// Owning credit
    pub credit_id: Uuid,

    /// 1-based installment number, unique per credit
    pub payment_number: u32,

    /// When the installment falls due
    pub due_date: DateTime<Utc>,

    /// Installment amount
    pub amount: Decimal,

    /// Principal part of `amount`
    pub principal_component: Decimal,

    /// Interest part of `amount`
    pub interest_component: Decimal,

    /// Settlement status
    pub status: ScheduleStatus,

    /// When the installment was collected
    pub paid_at: Option<DateTime<Utc>>,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Last status change
    pub updated_at: DateTime<Utc>,
}

impl PaymentScheduleEntry {
    /// Check if the installment still awaits settlement
    pub fn is_pending(&self) -> bool {
        self.status == ScheduleStatus::Pending
    }
}
