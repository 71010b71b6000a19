//! Settlement batch and manual payments against a real store

use chrono::{DateTime, Duration, Utc};
use credit_engine::{CreditConfig, CreditService, FixedRateSource, IssuedCredit};
use ledger_core::{
    AccountId, CreditStatus, Currency, EntryDirection, EntryKind, Ledger, MemoryNotifier,
    NotificationKind, PaymentScheduleEntry, ScheduleStatus, UserId,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use settlement::{Config, Error, SettlementOutcome, SettlementScheduler, Settler};
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

struct Fixture {
    ledger: Arc<Ledger>,
    notifier: Arc<MemoryNotifier>,
    credits: CreditService,
    scheduler: Arc<SettlementScheduler>,
    _temp: TempDir,
}

impl Fixture {
    fn settler(&self) -> &Arc<Settler> {
        self.scheduler.settler()
    }

    /// Borrower with a fresh 100 000 RUB, 12 month credit at 26%
    async fn borrower(&self) -> (UserId, AccountId, IssuedCredit) {
        let borrower = UserId::new();
        let account = self
            .ledger
            .open_account(borrower, Currency::RUB)
            .await
            .unwrap();
        let issued = self
            .credits
            .issue_credit(account.id, borrower, dec!(100000), 12)
            .await
            .unwrap();
        (borrower, account.id, issued)
    }

    async fn balance(&self, account_id: AccountId, owner: UserId) -> Decimal {
        self.ledger
            .get_account(account_id, owner)
            .await
            .unwrap()
            .balance
    }

    async fn schedule(&self, credit_id: Uuid, borrower: UserId) -> Vec<PaymentScheduleEntry> {
        self.credits
            .payment_schedule(credit_id, borrower)
            .await
            .unwrap()
    }
}

async fn fixture() -> Fixture {
    let temp = TempDir::new().unwrap();
    let mut config = Config::default();
    config.ledger.data_dir = temp.path().to_path_buf();

    let notifier = Arc::new(MemoryNotifier::new());
    let ledger = Arc::new(
        Ledger::open(config.ledger.clone(), notifier.clone())
            .await
            .unwrap(),
    );
    let credits = CreditService::new(
        ledger.clone(),
        Arc::new(FixedRateSource::new(dec!(21))),
        CreditConfig::default(),
    );
    let settler = Arc::new(Settler::new(ledger.clone(), config.penalty_rate));
    let scheduler = Arc::new(SettlementScheduler::new(settler, &config));

    Fixture {
        ledger,
        notifier,
        credits,
        scheduler,
        _temp: temp,
    }
}

fn after_months(issued: &IssuedCredit, months: usize) -> DateTime<Utc> {
    issued.schedule[months - 1].due_date + Duration::hours(1)
}

#[tokio::test]
async fn test_batch_collects_due_installment() {
    let fx = fixture().await;
    let (borrower, account_id, issued) = fx.borrower().await;

    // Nothing due yet
    let report = fx.scheduler.run_once(Utc::now()).await.unwrap();
    assert_eq!(report.scanned, 0);

    let report = fx
        .scheduler
        .run_once(after_months(&issued, 1))
        .await
        .unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.paid, 1);
    assert!(report.failed.is_empty());

    assert_eq!(fx.balance(account_id, borrower).await, dec!(90446.99));

    let schedule = fx.schedule(issued.credit.id, borrower).await;
    assert_eq!(schedule[0].status, ScheduleStatus::Paid);
    assert!(schedule[0].paid_at.is_some());
    assert!(schedule[1..].iter().all(|e| e.status == ScheduleStatus::Pending));

    let history = fx
        .ledger
        .account_history(account_id, borrower, None, None)
        .await
        .unwrap();
    let payment = &history[0];
    assert_eq!(payment.kind, EntryKind::CreditPayment);
    assert_eq!(payment.direction, EntryDirection::Debit);
    assert_eq!(payment.amount, dec!(9553.01));
    assert_eq!(payment.reference_id, schedule[0].id);

    let credit = fx.credits.get_credit(issued.credit.id, borrower).await.unwrap();
    assert_eq!(credit.status, CreditStatus::Active);

    fx.ledger.notifications().flush().await.unwrap();
    assert_eq!(fx.notifier.of_kind(NotificationKind::InstallmentPaid).len(), 1);
}

#[tokio::test]
async fn test_insufficient_funds_marks_overdue() {
    let fx = fixture().await;
    let (borrower, account_id, issued) = fx.borrower().await;
    fx.ledger
        .withdraw(account_id, dec!(100000), borrower)
        .await
        .unwrap();

    let report = fx
        .scheduler
        .run_once(after_months(&issued, 1))
        .await
        .unwrap();
    assert_eq!(report.overdue, 1);
    assert_eq!(report.paid, 0);

    // Penalty is recorded, not deducted
    assert_eq!(fx.balance(account_id, borrower).await, Decimal::ZERO);

    let schedule = fx.schedule(issued.credit.id, borrower).await;
    assert_eq!(schedule[0].status, ScheduleStatus::Overdue);
    assert!(schedule[0].paid_at.is_none());

    let history = fx
        .ledger
        .account_history(account_id, borrower, None, None)
        .await
        .unwrap();
    assert_eq!(history[0].kind, EntryKind::CreditPayment);
    assert_eq!(history[0].amount, dec!(10508.31));

    let credit = fx.credits.get_credit(issued.credit.id, borrower).await.unwrap();
    assert_eq!(credit.status, CreditStatus::Overdue);

    fx.ledger.notifications().flush().await.unwrap();
    assert_eq!(
        fx.notifier.of_kind(NotificationKind::InstallmentOverdue).len(),
        1
    );
}

#[tokio::test]
async fn test_rerun_settles_nothing_twice() {
    let fx = fixture().await;
    let (borrower, account_id, issued) = fx.borrower().await;
    let at = after_months(&issued, 2);

    let first = fx.scheduler.run_once(at).await.unwrap();
    assert_eq!(first.paid, 2);

    let second = fx.scheduler.run_once(at).await.unwrap();
    assert_eq!(second.scanned, 0);
    assert_eq!(second.paid, 0);

    assert_eq!(
        fx.balance(account_id, borrower).await,
        dec!(100000) - dec!(9553.01) * dec!(2)
    );
}

#[tokio::test]
async fn test_settling_settled_installment_is_rejected() {
    let fx = fixture().await;
    let (_, _, issued) = fx.borrower().await;
    let entry_id = issued.schedule[0].id;
    let now = after_months(&issued, 1);

    let settled = fx.settler().settle_installment(entry_id, now).await.unwrap();
    assert_eq!(settled.outcome, SettlementOutcome::Paid);

    let again = fx.settler().settle_installment(entry_id, now).await;
    assert!(matches!(
        again,
        Err(Error::AlreadySettled {
            status: ScheduleStatus::Paid,
            ..
        })
    ));
    assert_eq!(
        fx.ledger.metrics().count("settle_installment", "skipped"),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_batches_charge_once() {
    let fx = fixture().await;
    let mut borrowers = Vec::new();
    for _ in 0..3 {
        borrowers.push(fx.borrower().await);
    }
    let at = after_months(&borrowers[0].2, 3) + Duration::days(1);

    let (a, b) = tokio::join!(fx.scheduler.run_once(at), fx.scheduler.run_once(at));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.paid + b.paid, 9);
    assert!(a.failed.is_empty(), "{:?}", a.failed);
    assert!(b.failed.is_empty(), "{:?}", b.failed);

    for (borrower, account_id, issued) in &borrowers {
        let schedule = fx.schedule(issued.credit.id, *borrower).await;
        assert_eq!(
            schedule
                .iter()
                .filter(|e| e.status == ScheduleStatus::Paid)
                .count(),
            3
        );
        assert_eq!(
            fx.balance(*account_id, *borrower).await,
            dec!(100000) - dec!(9553.01) * dec!(3)
        );
    }
}

#[tokio::test]
async fn test_final_installment_closes_credit() {
    let fx = fixture().await;
    let (borrower, account_id, issued) = fx.borrower().await;
    // Cover the interest on top of the principal
    fx.ledger
        .deposit(account_id, dec!(20000), borrower)
        .await
        .unwrap();

    let report = fx
        .scheduler
        .run_once(after_months(&issued, 12))
        .await
        .unwrap();
    assert_eq!(report.paid, 12);

    let credit = fx.credits.get_credit(issued.credit.id, borrower).await.unwrap();
    assert_eq!(credit.status, CreditStatus::Paid);

    let total: Decimal = issued.schedule.iter().map(|e| e.amount).sum();
    assert_eq!(
        fx.balance(account_id, borrower).await,
        dec!(120000) - total
    );
    assert!(fx
        .credits
        .next_installment(issued.credit.id, borrower)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_failure_does_not_abort_batch() {
    let fx = fixture().await;
    let (borrower, _, issued) = fx.borrower().await;
    let due = issued.schedule[0].due_date;

    // Schedule row whose credit does not exist
    let orphan = PaymentScheduleEntry {
        id: Uuid::new_v4(),
        credit_id: Uuid::new_v4(),
        payment_number: 1,
        due_date: due - Duration::days(1),
        amount: dec!(100),
        principal_component: dec!(100),
        interest_component: Decimal::ZERO,
        status: ScheduleStatus::Pending,
        paid_at: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    fx.ledger
        .storage()
        .run_transaction("test_orphan", |tx| tx.insert_schedule_entry(&orphan))
        .unwrap();

    let report = fx
        .scheduler
        .run_once(after_months(&issued, 1))
        .await
        .unwrap();
    assert_eq!(report.scanned, 2);
    assert_eq!(report.paid, 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, orphan.id);

    let schedule = fx.schedule(issued.credit.id, borrower).await;
    assert_eq!(schedule[0].status, ScheduleStatus::Paid);
}

#[tokio::test]
async fn test_manual_payment() {
    let fx = fixture().await;
    let (borrower, account_id, issued) = fx.borrower().await;
    let credit_id = issued.credit.id;

    let next = fx.settler().next_installment(credit_id, borrower).await.unwrap();
    assert_eq!(next.payment_number, 1);

    let below = fx
        .settler()
        .pay_next_installment(credit_id, borrower, dec!(100))
        .await;
    assert!(matches!(below, Err(Error::PaymentBelowDue { .. })));

    let stranger = fx
        .settler()
        .pay_next_installment(credit_id, UserId::new(), dec!(10000))
        .await;
    assert!(matches!(
        stranger,
        Err(Error::Ledger(ledger_core::Error::NotOwner { .. }))
    ));

    let paid = fx
        .settler()
        .pay_next_installment(credit_id, borrower, dec!(10000))
        .await
        .unwrap();
    assert_eq!(paid.outcome, SettlementOutcome::Paid);
    assert_eq!(paid.entry.payment_number, 1);
    // Only the installment amount is debited
    assert_eq!(fx.balance(account_id, borrower).await, dec!(90446.99));

    let next = fx.settler().next_installment(credit_id, borrower).await.unwrap();
    assert_eq!(next.payment_number, 2);

    // The batch does not pick up the installment paid early
    let report = fx
        .scheduler
        .run_once(after_months(&issued, 1))
        .await
        .unwrap();
    assert_eq!(report.scanned, 0);
}

#[tokio::test]
async fn test_manual_payment_without_pending_installment() {
    let fx = fixture().await;
    let (borrower, account_id, issued) = fx.borrower().await;
    fx.ledger
        .deposit(account_id, dec!(20000), borrower)
        .await
        .unwrap();
    fx.scheduler
        .run_once(after_months(&issued, 12))
        .await
        .unwrap();

    let result = fx
        .settler()
        .pay_next_installment(issued.credit.id, borrower, dec!(10000))
        .await;
    assert!(matches!(result, Err(Error::NoPendingInstallment(id)) if id == issued.credit.id));
}

#[tokio::test]
async fn test_early_payment_without_funds_keeps_credit_active() {
    let fx = fixture().await;
    let (borrower, account_id, issued) = fx.borrower().await;
    let credit_id = issued.credit.id;
    fx.ledger
        .withdraw(account_id, dec!(100000), borrower)
        .await
        .unwrap();

    let settled = fx
        .settler()
        .pay_next_installment(credit_id, borrower, dec!(10000))
        .await
        .unwrap();
    assert_eq!(settled.outcome, SettlementOutcome::Overdue);
    assert_eq!(settled.entry.status, ScheduleStatus::Overdue);
    assert_eq!(settled.penalty, dec!(955.30));
    assert_eq!(settled.credit.status, CreditStatus::Active);
    assert_eq!(fx.balance(account_id, borrower).await, Decimal::ZERO);

    // Once the failed installment is past due, the next settlement flags the credit
    fx.ledger
        .deposit(account_id, dec!(10000), borrower)
        .await
        .unwrap();
    let report = fx
        .scheduler
        .run_once(after_months(&issued, 2))
        .await
        .unwrap();
    assert_eq!(report.paid, 1);

    let credit = fx.credits.get_credit(credit_id, borrower).await.unwrap();
    assert_eq!(credit.status, CreditStatus::Overdue);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_manual_payment_racing_batch_charges_each_installment_once() {
    let fx = fixture().await;

    for _ in 0..8 {
        let (borrower, account_id, issued) = fx.borrower().await;
        let at = after_months(&issued, 1);

        let (manual, batch) = tokio::join!(
            fx.settler()
                .pay_next_installment(issued.credit.id, borrower, dec!(10000)),
            fx.scheduler.run_once(at)
        );
        let batch = batch.unwrap();
        assert!(batch.failed.is_empty(), "{:?}", batch.failed);
        match manual {
            Ok(settled) => assert_eq!(settled.outcome, SettlementOutcome::Paid),
            Err(Error::AlreadySettled { .. }) => {}
            Err(e) => panic!("unexpected manual payment error: {}", e),
        }

        let schedule = fx.schedule(issued.credit.id, borrower).await;
        assert_eq!(schedule[0].status, ScheduleStatus::Paid);
        let paid: Vec<Uuid> = schedule
            .iter()
            .filter(|e| e.status == ScheduleStatus::Paid)
            .map(|e| e.id)
            .collect();

        let mut charged: Vec<Uuid> = fx
            .ledger
            .account_history(account_id, borrower, None, None)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.kind == EntryKind::CreditPayment)
            .map(|e| e.reference_id)
            .collect();
        charged.sort();
        let mut expected = paid.clone();
        expected.sort();
        assert_eq!(charged, expected);

        assert_eq!(
            fx.balance(account_id, borrower).await,
            dec!(100000) - dec!(9553.01) * Decimal::from(paid.len() as u64)
        );
    }
}
