//! Periodic settlement batch
//!
//! Every interval (12 hours by default) the scheduler collects pending
//! installments due at or before `now` and settles them:
//!
//! - installments of one credit run sequentially, in due-date order
//! - different credits run in parallel, bounded by a semaphore
//! - a failed installment is logged and reported; the batch goes on

use crate::{settle::SettlementOutcome, Config, Error, Result, Settler};
use chrono::{DateTime, Utc};
use ledger_core::PaymentScheduleEntry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Summary of one batch run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettlementReport {
    /// Due installments found
    pub scanned: usize,

    /// Installments collected
    pub paid: usize,

    /// Installments marked overdue
    pub overdue: usize,

    /// Installments someone else settled first
    pub skipped: usize,

    /// Installments that failed, with the reason
    pub failed: Vec<(Uuid, String)>,
}

impl SettlementReport {
    fn absorb(&mut self, entry_id: Uuid, result: Result<SettlementOutcome>) {
        match result {
            Ok(SettlementOutcome::Paid) => self.paid += 1,
            Ok(SettlementOutcome::Overdue) => self.overdue += 1,
            Err(Error::AlreadySettled { .. }) => self.skipped += 1,
            Err(e) => {
                error!(entry_id = %entry_id, error = %e, "Installment settlement failed");
                self.failed.push((entry_id, e.to_string()));
            }
        }
    }
}

/// Runs settlement batches on a fixed cadence
pub struct SettlementScheduler {
    settler: Arc<Settler>,
    interval: std::time::Duration,
    max_concurrent_credits: usize,
    run_on_start: bool,
}

impl std::fmt::Debug for SettlementScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettlementScheduler")
            .field("interval", &self.interval)
            .field("max_concurrent_credits", &self.max_concurrent_credits)
            .finish_non_exhaustive()
    }
}

impl SettlementScheduler {
    /// Create a scheduler from configuration
    pub fn new(settler: Arc<Settler>, config: &Config) -> Self {
        Self {
            settler,
            interval: std::time::Duration::from_secs(config.interval_secs),
            max_concurrent_credits: config.max_concurrent_credits.max(1),
            run_on_start: config.run_on_start,
        }
    }

    /// Settler used by each batch
    pub fn settler(&self) -> &Arc<Settler> {
        &self.settler
    }

    /// Settle everything due at or before `now`
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<SettlementReport> {
        let due = self
            .settler
            .ledger()
            .storage()
            .query(move |storage| storage.due_schedule_entries(now))
            .await?;

        let mut report = SettlementReport {
            scanned: due.len(),
            ..SettlementReport::default()
        };
        if due.is_empty() {
            info!(now = %now, "No installments due");
            return Ok(report);
        }

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_credits));
        let mut tasks = JoinSet::new();

        for (credit_id, entries) in group_by_credit(due) {
            let settler = Arc::clone(&self.settler);
            let semaphore = Arc::clone(&semaphore);

            tasks.spawn(async move {
                let mut results = Vec::with_capacity(entries.len());
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        warn!(credit_id = %credit_id, "Batch semaphore closed");
                        return results;
                    }
                };

                for entry in entries {
                    let result = settler
                        .settle_installment(entry.id, now)
                        .await
                        .map(|settled| settled.outcome);
                    results.push((entry.id, result));
                }
                results
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(results) => {
                    for (entry_id, result) in results {
                        report.absorb(entry_id, result);
                    }
                }
                Err(e) => {
                    error!(error = %e, "Settlement task aborted");
                    report.failed.push((Uuid::nil(), e.to_string()));
                }
            }
        }

        info!(
            scanned = report.scanned,
            paid = report.paid,
            overdue = report.overdue,
            skipped = report.skipped,
            failed = report.failed.len(),
            "Settlement batch complete"
        );

        Ok(report)
    }

    /// Run batches forever on the configured interval
    pub async fn start(self: Arc<Self>) {
        info!(interval_secs = self.interval.as_secs(), "Starting settlement scheduler");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        if !self.run_on_start {
            // First tick completes immediately
            interval.tick().await;
        }

        loop {
            interval.tick().await;

            if let Err(e) = self.run_once(Utc::now()).await {
                warn!(error = %e, "Settlement batch failed");
            }
        }
    }
}

/// Group due entries per credit, keeping due-date order within and across groups
fn group_by_credit(due: Vec<PaymentScheduleEntry>) -> Vec<(Uuid, Vec<PaymentScheduleEntry>)> {
    let mut index: HashMap<Uuid, usize> = HashMap::new();
    let mut groups: Vec<(Uuid, Vec<PaymentScheduleEntry>)> = Vec::new();

    for entry in due {
        match index.get(&entry.credit_id) {
            Some(&slot) => groups[slot].1.push(entry),
            None => {
                index.insert(entry.credit_id, groups.len());
                groups.push((entry.credit_id, vec![entry]));
            }
        }
    }
    groups
}
