//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `accounts` - Account rows (key: account_id)
//! - `transactions` - Append-only transaction entries (key: entry_id)
//! - `credits` - Credit rows (key: credit_id)
//! - `schedule` - Payment schedule rows (key: credit_id || payment_number)
//! - `indices` - Secondary indices for fast lookups
//!
//! # Index layout (`indices`)
//!
//! - `o` owner_id || account_id -> empty
//! - `t` account_id || created_at || entry_id -> empty
//! - `c` borrower_id || credit_id -> empty
//! - `d` due_date || credit_id || payment_number -> schedule key (pending rows only)
//! - `s` schedule_entry_id -> schedule key
//!
//! Every mutation goes through a pessimistic [`StoreTx`]. Locked reads use
//! `get_for_update`, which holds the row lock until commit or rollback.

use crate::{
    error::{Error, Result},
    types::{
        Account, AccountId, Credit, PaymentScheduleEntry, TransactionEntry, UserId,
    },
    Config,
};
use chrono::{DateTime, Utc};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, Direction, IteratorMode,
    MultiThreaded, Options, Transaction, TransactionDB, TransactionDBOptions,
    TransactionOptions, WriteOptions,
};
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Column family names
const CF_ACCOUNTS: &str = "accounts";
const CF_TRANSACTIONS: &str = "transactions";
const CF_CREDITS: &str = "credits";
const CF_SCHEDULE: &str = "schedule";
const CF_INDICES: &str = "indices";

/// Index prefixes
const IDX_OWNER_ACCOUNT: u8 = b'o';
const IDX_ACCOUNT_ENTRY: u8 = b't';
const IDX_BORROWER_CREDIT: u8 = b'c';
const IDX_DUE_SCHEDULE: u8 = b'd';
const IDX_SCHEDULE_ID: u8 = b's';

type Db = TransactionDB<MultiThreaded>;
type KvPair = (Box<[u8]>, Box<[u8]>);

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Db,
    lock_timeout: Duration,
    deadline: Duration,
    deadlock_detect: bool,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("lock_timeout", &self.lock_timeout)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);
        db_opts.set_compaction_style(DBCompactionStyle::Level);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let mut txn_db_opts = TransactionDBOptions::default();
        txn_db_opts.set_txn_lock_timeout(config.transactions.lock_timeout_ms as i64);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_ACCOUNTS, Self::cf_options_rows()),
            ColumnFamilyDescriptor::new(CF_TRANSACTIONS, Self::cf_options_entries()),
            ColumnFamilyDescriptor::new(CF_CREDITS, Self::cf_options_rows()),
            ColumnFamilyDescriptor::new(CF_SCHEDULE, Self::cf_options_rows()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
        ];

        let db = Db::open_cf_descriptors(&db_opts, &txn_db_opts, path, cf_descriptors)?;

        tracing::info!(
            path = ?path,
            lock_timeout_ms = config.transactions.lock_timeout_ms,
            deadline_ms = config.transactions.deadline_ms,
            "Opened RocksDB transaction store"
        );

        Ok(Self {
            db,
            lock_timeout: Duration::from_millis(config.transactions.lock_timeout_ms),
            deadline: Duration::from_millis(config.transactions.deadline_ms),
            deadlock_detect: config.transactions.deadlock_detect,
        })
    }

    // Column family options

    fn cf_options_rows() -> Options {
        let mut opts = Options::default();
        // Rows are read on every mutation, favour LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_entries() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    // Transactions

    /// Begin a pessimistic transaction with the configured lock timeout and deadline
    pub fn begin(&self, op: &'static str) -> StoreTx<'_> {
        let mut txn_opts = TransactionOptions::default();
        txn_opts.set_lock_timeout(self.lock_timeout.as_millis() as i64);
        txn_opts.set_expiration(self.deadline.as_millis() as i64);
        txn_opts.set_deadlock_detect(self.deadlock_detect);

        let txn = self.db.transaction_opt(&WriteOptions::default(), &txn_opts);

        StoreTx {
            storage: self,
            txn,
            op,
            deadline: Instant::now() + self.deadline,
        }
    }

    /// Run `f` inside one transaction: commit on `Ok`, roll back on `Err`.
    pub fn run_transaction<T, F>(&self, op: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&mut StoreTx<'_>) -> Result<T>,
    {
        let mut tx = self.begin(op);
        match f(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                tx.rollback();
                Err(err)
            }
        }
    }

    /// [`Storage::run_transaction`] on the blocking pool
    pub async fn transaction<T, F>(self: &Arc<Self>, op: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut StoreTx<'_>) -> Result<T> + Send + 'static,
    {
        let storage = Arc::clone(self);
        tokio::task::spawn_blocking(move || storage.run_transaction(op, f))
            .await
            .map_err(|e| Error::Concurrency(format!("{} task failed: {}", op, e)))?
    }

    /// Unlocked reads on the blocking pool
    pub async fn query<T, F>(self: &Arc<Self>, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Storage) -> Result<T> + Send + 'static,
    {
        let storage = Arc::clone(self);
        tokio::task::spawn_blocking(move || f(&storage))
            .await
            .map_err(|e| Error::Concurrency(format!("query task failed: {}", e)))?
    }

    // Unlocked reads (committed state)

    fn get_row<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        self.db.get_cf(&cf, key)?.map(|bytes| decode(&bytes)).transpose()
    }

    fn scan(&self, cf_name: &str, start: &[u8], prefix: &[u8]) -> Result<Vec<KvPair>> {
        let cf = self.cf(cf_name)?;
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(start, Direction::Forward));
        collect_prefix(iter, prefix)
    }

    /// Get account by ID
    pub fn get_account(&self, account_id: AccountId) -> Result<Account> {
        self.get_row(CF_ACCOUNTS, account_id.as_bytes())?
            .ok_or(Error::AccountNotFound(account_id))
    }

    /// Accounts owned by a user
    pub fn accounts_by_owner(&self, owner_id: UserId) -> Result<Vec<Account>> {
        let prefix = index_key(IDX_OWNER_ACCOUNT, &[owner_id.as_bytes()]);
        self.scan(CF_INDICES, &prefix, &prefix)?
            .into_iter()
            .map(|(key, _)| {
                let account_id = AccountId::from_uuid(uuid_at(&key, 17)?);
                self.get_account(account_id)
            })
            .collect()
    }

    /// Entries booked on an account within `[from, to]`, oldest first
    pub fn entries_for_account(
        &self,
        account_id: AccountId,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<TransactionEntry>> {
        let prefix = index_key(IDX_ACCOUNT_ENTRY, &[account_id.as_bytes()]);
        let mut start = prefix.clone();
        if let Some(from) = from {
            start.extend_from_slice(&time_key(from));
        }
        let upper = to.map(time_key);

        let mut entries = Vec::new();
        for (key, _) in self.scan(CF_INDICES, &start, &prefix)? {
            if let Some(upper) = upper {
                if key.len() < 25 || key[17..25] > upper[..] {
                    break;
                }
            }
            let entry_id = uuid_at(&key, 25)?;
            let entry = self
                .get_row(CF_TRANSACTIONS, entry_id.as_bytes())?
                .ok_or_else(|| Error::Storage(format!("dangling entry index {}", entry_id)))?;
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Get credit by ID
    pub fn get_credit(&self, credit_id: Uuid) -> Result<Credit> {
        self.get_row(CF_CREDITS, credit_id.as_bytes())?
            .ok_or(Error::CreditNotFound(credit_id))
    }

    /// Credits issued to a borrower
    pub fn credits_by_borrower(&self, borrower_id: UserId) -> Result<Vec<Credit>> {
        let prefix = index_key(IDX_BORROWER_CREDIT, &[borrower_id.as_bytes()]);
        self.scan(CF_INDICES, &prefix, &prefix)?
            .into_iter()
            .map(|(key, _)| self.get_credit(uuid_at(&key, 17)?))
            .collect()
    }

    /// Full schedule of a credit ordered by payment number
    pub fn payment_schedule(&self, credit_id: Uuid) -> Result<Vec<PaymentScheduleEntry>> {
        let prefix = credit_id.as_bytes().to_vec();
        self.scan(CF_SCHEDULE, &prefix, &prefix)?
            .into_iter()
            .map(|(_, value)| decode(&value))
            .collect()
    }

    /// Lowest-numbered pending installment of a credit
    pub fn next_pending_installment(
        &self,
        credit_id: Uuid,
    ) -> Result<Option<PaymentScheduleEntry>> {
        Ok(self
            .payment_schedule(credit_id)?
            .into_iter()
            .find(|entry| entry.is_pending()))
    }

    /// Get a schedule entry by its ID
    pub fn get_schedule_entry(&self, entry_id: Uuid) -> Result<PaymentScheduleEntry> {
        let key_idx = index_key(IDX_SCHEDULE_ID, &[entry_id.as_bytes()]);
        let cf = self.cf(CF_INDICES)?;
        let schedule_key = self
            .db
            .get_cf(&cf, &key_idx)?
            .ok_or(Error::ScheduleEntryNotFound(entry_id))?;
        self.get_row(CF_SCHEDULE, &schedule_key)?
            .ok_or(Error::ScheduleEntryNotFound(entry_id))
    }

    /// Pending schedule entries with `due_date <= now`, ordered by due date
    pub fn due_schedule_entries(&self, now: DateTime<Utc>) -> Result<Vec<PaymentScheduleEntry>> {
        let prefix = [IDX_DUE_SCHEDULE];
        let upper = time_key(now);

        let mut due = Vec::new();
        for (key, row_key) in self.scan(CF_INDICES, &prefix, &prefix)? {
            if key.len() < 9 || key[1..9] > upper[..] {
                break;
            }
            match self.get_row::<PaymentScheduleEntry>(CF_SCHEDULE, &row_key)? {
                Some(entry) if entry.is_pending() => due.push(entry),
                Some(entry) => {
                    tracing::warn!(entry_id = %entry.id, "Stale due index for settled entry");
                }
                None => {
                    tracing::warn!("Due index points at a missing schedule row");
                }
            }
        }
        Ok(due)
    }
}

/// Scoped store transaction.
///
/// Dropping a `StoreTx` without calling [`StoreTx::commit`] rolls it back.
pub struct StoreTx<'a> {
    storage: &'a Storage,
    txn: Transaction<'a, Db>,
    op: &'static str,
    deadline: Instant,
}

impl std::fmt::Debug for StoreTx<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreTx")
            .field("op", &self.op)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl<'a> StoreTx<'a> {
    /// Operation name this transaction was opened for
    pub fn op(&self) -> &'static str {
        self.op
    }

    fn check_deadline(&self) -> Result<()> {
        if Instant::now() > self.deadline {
            return Err(Error::Timeout(format!(
                "{} exceeded its {:?} deadline",
                self.op, self.storage.deadline
            )));
        }
        Ok(())
    }

    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'a>>> {
        self.storage.cf(name)
    }

    fn get_row<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        self.txn.get_cf(&cf, key)?.map(|bytes| decode(&bytes)).transpose()
    }

    fn lock_row<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        self.check_deadline()?;
        let cf = self.cf(cf_name)?;
        self.txn
            .get_for_update_cf(&cf, key, true)?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    fn put_row<T: Serialize>(&self, cf_name: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf(cf_name)?;
        self.txn.put_cf(&cf, key, bincode::serialize(value)?)?;
        Ok(())
    }

    fn put_index(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let cf = self.cf(CF_INDICES)?;
        self.txn.put_cf(&cf, key, value)?;
        Ok(())
    }

    fn delete_index(&self, key: &[u8]) -> Result<()> {
        let cf = self.cf(CF_INDICES)?;
        self.txn.delete_cf(&cf, key)?;
        Ok(())
    }

    // Accounts

    /// Create an account row and its owner index
    pub fn insert_account(&mut self, account: &Account) -> Result<()> {
        if self
            .lock_row::<Account>(CF_ACCOUNTS, account.id.as_bytes())?
            .is_some()
        {
            return Err(Error::ConstraintViolation(format!(
                "account {} already exists",
                account.id
            )));
        }
        self.put_row(CF_ACCOUNTS, account.id.as_bytes(), account)?;
        self.put_index(
            &index_key(
                IDX_OWNER_ACCOUNT,
                &[account.owner_id.as_bytes(), account.id.as_bytes()],
            ),
            &[],
        )?;

        tracing::debug!(account_id = %account.id, owner_id = %account.owner_id, "Account inserted");
        Ok(())
    }

    /// Read an account without locking it
    pub fn get_account(&self, account_id: AccountId) -> Result<Account> {
        self.get_row(CF_ACCOUNTS, account_id.as_bytes())?
            .ok_or(Error::AccountNotFound(account_id))
    }

    /// Locked read: the row stays locked until this transaction ends
    pub fn lock_account(&mut self, account_id: AccountId) -> Result<Account> {
        self.lock_row(CF_ACCOUNTS, account_id.as_bytes())?
            .ok_or(Error::AccountNotFound(account_id))
    }

    /// Add a signed amount to the balance under the row lock.
    ///
    /// Fails with `InsufficientFunds` when the result would be negative.
    pub fn apply_balance_delta(
        &mut self,
        account_id: AccountId,
        delta: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Account> {
        let mut account = self.lock_account(account_id)?;
        let new_balance = account.balance + delta;

        if new_balance < Decimal::ZERO {
            return Err(Error::InsufficientFunds {
                account_id,
                available: account.balance,
                requested: -delta,
            });
        }

        account.balance = new_balance;
        account.updated_at = now;
        self.put_row(CF_ACCOUNTS, account_id.as_bytes(), &account)?;

        tracing::debug!(
            account_id = %account_id,
            delta = %delta,
            balance = %account.balance,
            op = self.op,
            "Balance updated"
        );
        Ok(account)
    }

    // Transaction entries

    /// Append an immutable entry and its per-account time index
    pub fn insert_entry(&mut self, entry: &TransactionEntry) -> Result<()> {
        if self
            .get_row::<TransactionEntry>(CF_TRANSACTIONS, entry.id.as_bytes())?
            .is_some()
        {
            return Err(Error::ConstraintViolation(format!(
                "transaction entry {} already exists",
                entry.id
            )));
        }
        self.put_row(CF_TRANSACTIONS, entry.id.as_bytes(), entry)?;
        self.put_index(
            &index_key(
                IDX_ACCOUNT_ENTRY,
                &[
                    entry.account_id.as_bytes(),
                    &time_key(entry.created_at),
                    entry.id.as_bytes(),
                ],
            ),
            &[],
        )?;

        tracing::debug!(
            entry_id = %entry.id,
            account_id = %entry.account_id,
            kind = %entry.kind,
            amount = %entry.amount,
            "Entry appended"
        );
        Ok(())
    }

    // Credits

    /// Create a credit row and its borrower index
    pub fn insert_credit(&mut self, credit: &Credit) -> Result<()> {
        if self
            .lock_row::<Credit>(CF_CREDITS, credit.id.as_bytes())?
            .is_some()
        {
            return Err(Error::ConstraintViolation(format!(
                "credit {} already exists",
                credit.id
            )));
        }
        self.put_row(CF_CREDITS, credit.id.as_bytes(), credit)?;
        self.put_index(
            &index_key(
                IDX_BORROWER_CREDIT,
                &[credit.borrower_id.as_bytes(), credit.id.as_bytes()],
            ),
            &[],
        )
    }

    /// Read a credit without locking it
    pub fn get_credit(&self, credit_id: Uuid) -> Result<Credit> {
        self.get_row(CF_CREDITS, credit_id.as_bytes())?
            .ok_or(Error::CreditNotFound(credit_id))
    }

    /// Locked read of a credit
    pub fn lock_credit(&mut self, credit_id: Uuid) -> Result<Credit> {
        self.lock_row(CF_CREDITS, credit_id.as_bytes())?
            .ok_or(Error::CreditNotFound(credit_id))
    }

    /// Overwrite a credit row (status changes)
    pub fn update_credit(&mut self, credit: &Credit) -> Result<()> {
        self.put_row(CF_CREDITS, credit.id.as_bytes(), credit)
    }

    // Payment schedule

    /// Insert a schedule row; `(credit_id, payment_number)` must be unique
    pub fn insert_schedule_entry(&mut self, entry: &PaymentScheduleEntry) -> Result<()> {
        let key = schedule_key(entry.credit_id, entry.payment_number);
        if self
            .lock_row::<PaymentScheduleEntry>(CF_SCHEDULE, &key)?
            .is_some()
        {
            return Err(Error::ConstraintViolation(format!(
                "installment {} of credit {} already exists",
                entry.payment_number, entry.credit_id
            )));
        }
        self.put_row(CF_SCHEDULE, &key, entry)?;
        self.put_index(&index_key(IDX_SCHEDULE_ID, &[entry.id.as_bytes()]), &key)?;
        if entry.is_pending() {
            self.put_index(&due_key(entry), &key)?;
        }
        Ok(())
    }

    /// Locked read of a schedule row by its ID
    pub fn lock_schedule_entry(&mut self, entry_id: Uuid) -> Result<PaymentScheduleEntry> {
        let cf = self.cf(CF_INDICES)?;
        let key = self
            .txn
            .get_cf(&cf, index_key(IDX_SCHEDULE_ID, &[entry_id.as_bytes()]))?
            .ok_or(Error::ScheduleEntryNotFound(entry_id))?;
        self.lock_row(CF_SCHEDULE, &key)?
            .ok_or(Error::ScheduleEntryNotFound(entry_id))
    }

    /// Overwrite a schedule row, dropping it from the due index once settled
    pub fn update_schedule_entry(&mut self, entry: &PaymentScheduleEntry) -> Result<()> {
        let key = schedule_key(entry.credit_id, entry.payment_number);
        self.put_row(CF_SCHEDULE, &key, entry)?;
        if entry.is_pending() {
            self.put_index(&due_key(entry), &key)
        } else {
            self.delete_index(&due_key(entry))
        }
    }

    /// Full schedule of a credit as seen by this transaction
    pub fn schedule_for_credit(&self, credit_id: Uuid) -> Result<Vec<PaymentScheduleEntry>> {
        let cf = self.cf(CF_SCHEDULE)?;
        let prefix: &[u8] = credit_id.as_bytes();
        let iter = self
            .txn
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward));
        collect_prefix(iter, prefix)?
            .into_iter()
            .map(|(_, value)| decode(&value))
            .collect()
    }

    // Completion

    /// Commit, or roll back with `Timeout` if the deadline already passed
    pub fn commit(self) -> Result<()> {
        if let Err(err) = self.check_deadline() {
            self.rollback();
            return Err(err);
        }
        self.txn.commit()?;
        tracing::trace!(op = self.op, "Transaction committed");
        Ok(())
    }

    /// Discard every write made in this transaction
    pub fn rollback(self) {
        if let Err(err) = self.txn.rollback() {
            tracing::warn!(op = self.op, error = %err, "Rollback failed");
        } else {
            tracing::debug!(op = self.op, "Transaction rolled back");
        }
    }
}

// Key helpers

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}

fn collect_prefix<I>(iter: I, prefix: &[u8]) -> Result<Vec<KvPair>>
where
    I: Iterator<Item = std::result::Result<KvPair, rocksdb::Error>>,
{
    let mut out = Vec::new();
    for item in iter {
        let (key, value) = item?;
        if !key.starts_with(prefix) {
            break;
        }
        out.push((key, value));
    }
    Ok(out)
}

fn index_key(tag: u8, parts: &[&[u8]]) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + parts.iter().map(|p| p.len()).sum::<usize>());
    key.push(tag);
    for part in parts {
        key.extend_from_slice(part);
    }
    key
}

/// Order-preserving encoding of a timestamp (signed micros, sign bit flipped)
fn time_key(ts: DateTime<Utc>) -> [u8; 8] {
    ((ts.timestamp_micros() as u64) ^ (1 << 63)).to_be_bytes()
}

fn schedule_key(credit_id: Uuid, payment_number: u32) -> Vec<u8> {
    let mut key = credit_id.as_bytes().to_vec();
    key.extend_from_slice(&payment_number.to_be_bytes());
    key
}

fn due_key(entry: &PaymentScheduleEntry) -> Vec<u8> {
    index_key(
        IDX_DUE_SCHEDULE,
        &[
            &time_key(entry.due_date),
            entry.credit_id.as_bytes(),
            &entry.payment_number.to_be_bytes(),
        ],
    )
}

fn uuid_at(key: &[u8], offset: usize) -> Result<Uuid> {
    key.get(offset..offset + 16)
        .and_then(|bytes| Uuid::from_slice(bytes).ok())
        .ok_or_else(|| Error::Storage(format!("malformed index key of length {}", key.len())))
}
