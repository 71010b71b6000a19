//! Account ledger
//!
//! Ties storage, notifications and metrics together into the account-level
//! API: open accounts, move money, read history.
//!
//! Every mutation follows the same shape:
//!
//! 1. validate the request (no store access)
//! 2. one unlocked read to check ownership
//! 3. one store transaction: locked reads, balance deltas, entries, commit
//! 4. after commit: metrics, log line, queued notification
//!
//! # Example
//!
//! ```no_run
//! use ledger_core::{Config, Currency, Ledger, LogNotifier, UserId};
//! use rust_decimal::Decimal;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> ledger_core::Result<()> {
//!     let ledger = Ledger::open(Config::default(), Arc::new(LogNotifier)).await?;
//!
//!     let owner = UserId::new();
//!     let account = ledger.open_account(owner, Currency::RUB).await?;
//!     ledger.deposit(account.id, Decimal::new(10_000, 2), owner).await?;
//!
//!     Ok(())
//! }
//! ```

use crate::{
    notify::{Notification, NotificationDispatcher, NotificationKind, Notifier},
    types::{
        validate_amount, Account, AccountId, Currency, EntryDirection, EntryKind,
        TransactionEntry, UserId,
    },
    Config, Error, Metrics, Result, Storage,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Result of a single-leg movement
#[derive(Debug, Clone, PartialEq)]
pub struct Movement {
    /// Account after the balance change
    pub account: Account,

    /// The booked entry
    pub entry: TransactionEntry,
}

/// Result of a transfer
#[derive(Debug, Clone, PartialEq)]
pub struct TransferReceipt {
    /// Source account after the debit
    pub from: Account,

    /// Destination account after the credit
    pub to: Account,

    /// Debit leg on the source
    pub debit: TransactionEntry,

    /// Credit leg on the destination
    pub credit: TransactionEntry,

    /// Shared by both legs
    pub reference_id: Uuid,
}

/// Main ledger interface
pub struct Ledger {
    /// Transactional store
    storage: Arc<Storage>,

    /// Queue for post-commit notifications
    notifications: NotificationDispatcher,

    /// Operation metrics
    metrics: Metrics,

    /// Configuration
    config: Config,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("data_dir", &self.config.data_dir)
            .finish_non_exhaustive()
    }
}

impl Ledger {
    /// Open ledger with configuration.
    ///
    /// Must be called inside a Tokio runtime (spawns the notification worker).
    pub async fn open(config: Config, notifier: Arc<dyn Notifier>) -> Result<Self> {
        config.validate()?;

        let storage = Arc::new(Storage::open(&config)?);
        let notifications =
            NotificationDispatcher::spawn(notifier, config.notifications.queue_capacity);
        let metrics = Metrics::new()
            .map_err(|e| Error::Config(format!("Failed to register metrics: {}", e)))?;

        tracing::info!(
            service = %config.service_name,
            currency = %config.supported_currency,
            "Ledger opened"
        );

        Ok(Self {
            storage,
            notifications,
            metrics,
            config,
        })
    }

    /// Shared store handle
    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Notification queue
    pub fn notifications(&self) -> &NotificationDispatcher {
        &self.notifications
    }

    /// Operation metrics
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Reject currencies other than the configured one
    pub fn ensure_supported_currency(&self, currency: Currency) -> Result<()> {
        if currency != self.config.supported_currency {
            return Err(Error::UnsupportedCurrency(currency));
        }
        Ok(())
    }

    /// Unlocked read plus ownership check
    pub async fn owned_account(&self, account_id: AccountId, requester: UserId) -> Result<Account> {
        let account = self
            .storage
            .query(move |storage| storage.get_account(account_id))
            .await?;
        account.ensure_owner(requester)?;
        Ok(account)
    }

    // Accounts

    /// Open a zero-balance account in the supported currency
    pub async fn open_account(&self, owner_id: UserId, currency: Currency) -> Result<Account> {
        let started = Instant::now();
        let result = self.open_account_inner(owner_id, currency).await;
        self.metrics.record("open_account", started, &result);
        result
    }

    async fn open_account_inner(&self, owner_id: UserId, currency: Currency) -> Result<Account> {
        self.ensure_supported_currency(currency)?;

        let account = Account::open(owner_id, currency, Utc::now());
        let row = account.clone();
        self.storage
            .transaction("open_account", move |tx| tx.insert_account(&row))
            .await?;

        tracing::info!(account_id = %account.id, owner_id = %owner_id, "Account opened");
        Ok(account)
    }

    /// Get an account the requester owns
    pub async fn get_account(&self, account_id: AccountId, requester: UserId) -> Result<Account> {
        self.owned_account(account_id, requester).await
    }

    /// All accounts of a user
    pub async fn accounts_for_owner(&self, owner_id: UserId) -> Result<Vec<Account>> {
        self.storage
            .query(move |storage| storage.accounts_by_owner(owner_id))
            .await
    }

    /// Entries of an owned account in `[from, to]`, newest first
    pub async fn account_history(
        &self,
        account_id: AccountId,
        requester: UserId,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<TransactionEntry>> {
        if let (Some(from), Some(to)) = (from, to) {
            if from > to {
                return Err(Error::InvalidPeriod { from, to });
            }
        }
        self.owned_account(account_id, requester).await?;

        let mut entries = self
            .storage
            .query(move |storage| storage.entries_for_account(account_id, from, to))
            .await?;
        entries.reverse();
        Ok(entries)
    }

    // Money movement

    /// Credit an owned account
    pub async fn deposit(
        &self,
        account_id: AccountId,
        amount: Decimal,
        requester: UserId,
    ) -> Result<Movement> {
        self.single_leg(
            account_id,
            amount,
            requester,
            EntryKind::Deposit,
            Uuid::new_v4(),
        )
        .await
    }

    /// Debit an owned account; fails with `InsufficientFunds` on overdraw
    pub async fn withdraw(
        &self,
        account_id: AccountId,
        amount: Decimal,
        requester: UserId,
    ) -> Result<Movement> {
        self.single_leg(
            account_id,
            amount,
            requester,
            EntryKind::Withdrawal,
            Uuid::new_v4(),
        )
        .await
    }

    /// Debit an owned account for a card purchase; the entry references the card
    pub async fn card_payment(
        &self,
        account_id: AccountId,
        card_id: Uuid,
        amount: Decimal,
        requester: UserId,
    ) -> Result<Movement> {
        self.single_leg(account_id, amount, requester, EntryKind::CardPayment, card_id)
            .await
    }

    async fn single_leg(
        &self,
        account_id: AccountId,
        amount: Decimal,
        requester: UserId,
        kind: EntryKind,
        reference_id: Uuid,
    ) -> Result<Movement> {
        let started = Instant::now();
        let result = self
            .single_leg_inner(account_id, amount, requester, kind, reference_id)
            .await;
        self.metrics.record(kind.as_str(), started, &result);

        if let Err(e) = &result {
            tracing::warn!(
                account_id = %account_id,
                kind = %kind,
                amount = %amount,
                error = %e,
                "Movement rejected"
            );
        }
        result
    }

    async fn single_leg_inner(
        &self,
        account_id: AccountId,
        amount: Decimal,
        requester: UserId,
        kind: EntryKind,
        reference_id: Uuid,
    ) -> Result<Movement> {
        validate_amount(amount)?;

        let account = self.owned_account(account_id, requester).await?;
        self.ensure_supported_currency(account.currency)?;

        let (direction, delta) = match kind {
            EntryKind::Deposit => (EntryDirection::Credit, amount),
            _ => (EntryDirection::Debit, -amount),
        };
        let now = Utc::now();

        let movement = self
            .storage
            .transaction(kind.as_str(), move |tx| {
                let account = tx.apply_balance_delta(account_id, delta, now)?;
                let entry =
                    TransactionEntry::new(account_id, amount, kind, direction, reference_id, now);
                tx.insert_entry(&entry)?;
                Ok(Movement { account, entry })
            })
            .await?;

        tracing::info!(
            account_id = %account_id,
            entry_id = %movement.entry.id,
            kind = %kind,
            amount = %amount,
            balance = %movement.account.balance,
            "Movement booked"
        );

        let notification_kind = match kind {
            EntryKind::Deposit => NotificationKind::Deposit,
            EntryKind::CardPayment => NotificationKind::CardPayment,
            _ => NotificationKind::Withdrawal,
        };
        self.notifications.dispatch(Notification::new(
            movement.account.owner_id,
            notification_kind,
            json!({
                "account_id": account_id.to_string(),
                "amount": amount.to_string(),
                "balance": movement.account.balance.to_string(),
                "reference_id": reference_id.to_string(),
            }),
        ));

        Ok(movement)
    }

    /// Move money between accounts as one unit.
    ///
    /// Both rows are locked in ascending account-id order, so opposing
    /// concurrent transfers cannot deadlock.
    pub async fn transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: Decimal,
        requester: UserId,
    ) -> Result<TransferReceipt> {
        let started = Instant::now();
        let result = self.transfer_inner(from, to, amount, requester).await;
        self.metrics.record("transfer", started, &result);

        if let Err(e) = &result {
            tracing::warn!(from = %from, to = %to, amount = %amount, error = %e, "Transfer rejected");
        }
        result
    }

    async fn transfer_inner(
        &self,
        from: AccountId,
        to: AccountId,
        amount: Decimal,
        requester: UserId,
    ) -> Result<TransferReceipt> {
        validate_amount(amount)?;
        if from == to {
            return Err(Error::SameAccount(from));
        }

        self.owned_account(from, requester).await?;

        let supported = self.config.supported_currency;
        let reference_id = Uuid::new_v4();
        let now = Utc::now();

        let receipt = self
            .storage
            .transaction("transfer", move |tx| {
                let (first, second) = if from < to { (from, to) } else { (to, from) };
                let first = tx.lock_account(first)?;
                let second = tx.lock_account(second)?;
                let (source, dest) = if first.id == from {
                    (first, second)
                } else {
                    (second, first)
                };

                if source.currency != dest.currency {
                    return Err(Error::CurrencyMismatch {
                        from: source.currency,
                        to: dest.currency,
                    });
                }
                if source.currency != supported {
                    return Err(Error::UnsupportedCurrency(source.currency));
                }

                let from_account = tx.apply_balance_delta(from, -amount, now)?;
                let to_account = tx.apply_balance_delta(to, amount, now)?;

                let debit = TransactionEntry::new(
                    from,
                    amount,
                    EntryKind::Transfer,
                    EntryDirection::Debit,
                    reference_id,
                    now,
                );
                let credit = TransactionEntry::new(
                    to,
                    amount,
                    EntryKind::Transfer,
                    EntryDirection::Credit,
                    reference_id,
                    now,
                );
                tx.insert_entry(&debit)?;
                tx.insert_entry(&credit)?;

                Ok(TransferReceipt {
                    from: from_account,
                    to: to_account,
                    debit,
                    credit,
                    reference_id,
                })
            })
            .await?;

        tracing::info!(
            from = %from,
            to = %to,
            amount = %amount,
            reference_id = %reference_id,
            "Transfer booked"
        );

        self.notifications.dispatch(Notification::new(
            receipt.from.owner_id,
            NotificationKind::Transfer,
            json!({
                "from": from.to_string(),
                "to": to.to_string(),
                "amount": amount.to_string(),
                "reference_id": reference_id.to_string(),
            }),
        ));

        Ok(receipt)
    }

    /// Drain queued notifications and stop the worker
    pub async fn shutdown(&self) -> Result<()> {
        self.notifications.flush().await?;
        self.notifications.shutdown().await?;
        tracing::info!("Ledger shut down");
        Ok(())
    }
}
