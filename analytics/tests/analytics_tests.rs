//! Analytics over a populated ledger

use analytics::{AnalyticsConfig, AnalyticsService, Error};
use chrono::{Duration, Utc};
use credit_engine::{CreditConfig, CreditService, FixedRateSource, IssuedCredit};
use ledger_core::{AccountId, Config, Currency, Ledger, LogNotifier, UserId};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use settlement::{SettlementScheduler, Settler};
use std::sync::Arc;
use tempfile::TempDir;

struct Fixture {
    ledger: Arc<Ledger>,
    credits: CreditService,
    scheduler: SettlementScheduler,
    analytics: AnalyticsService,
    _temp: TempDir,
}

async fn fixture() -> Fixture {
    let temp = TempDir::new().unwrap();
    let mut config = settlement::Config::default();
    config.ledger = Config {
        data_dir: temp.path().to_path_buf(),
        ..Config::default()
    };

    let ledger = Arc::new(
        Ledger::open(config.ledger.clone(), Arc::new(LogNotifier))
            .await
            .unwrap(),
    );
    let credits = CreditService::new(
        ledger.clone(),
        Arc::new(FixedRateSource::new(dec!(21))),
        CreditConfig::default(),
    );
    let settler = Arc::new(Settler::new(ledger.clone(), config.penalty_rate));
    let scheduler = SettlementScheduler::new(settler, &config);
    let analytics = AnalyticsService::new(ledger.clone(), AnalyticsConfig::default()).unwrap();

    Fixture {
        ledger,
        credits,
        scheduler,
        analytics,
        _temp: temp,
    }
}

impl Fixture {
    async fn account(&self, owner: UserId) -> AccountId {
        self.ledger
            .open_account(owner, Currency::RUB)
            .await
            .unwrap()
            .id
    }

    async fn credit(&self, owner: UserId, account_id: AccountId) -> IssuedCredit {
        self.credits
            .issue_credit(account_id, owner, dec!(100000), 12)
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn test_financial_stats_by_kind() {
    let fx = fixture().await;
    let alice = UserId::new();
    let bob = UserId::new();
    let a = fx.account(alice).await;
    let b = fx.account(bob).await;

    fx.ledger.deposit(a, dec!(1000), alice).await.unwrap();
    fx.ledger.withdraw(a, dec!(200), alice).await.unwrap();
    fx.ledger.transfer(a, b, dec!(300), alice).await.unwrap();

    let start = Utc::now() - Duration::hours(1);
    let end = Utc::now() + Duration::hours(1);

    let stats = fx.analytics.financial_stats(alice, start, end).await.unwrap();
    assert_eq!(stats.total_income, dec!(1000));
    assert_eq!(stats.total_expenses, dec!(500));
    assert_eq!(stats.net_balance, dec!(500));
    assert_eq!(stats.by_kind.len(), 3);
    assert_eq!(stats.by_kind["transfer"].expenses, dec!(300));
    assert_eq!(stats.by_kind["withdrawal"].count, 1);

    let stats = fx.analytics.financial_stats(bob, start, end).await.unwrap();
    assert_eq!(stats.total_income, dec!(300));
    assert_eq!(stats.total_expenses, Decimal::ZERO);
    assert_eq!(stats.by_kind["transfer"].income, dec!(300));

    // Window before any activity
    let stats = fx
        .analytics
        .financial_stats(alice, start - Duration::days(2), start - Duration::days(1))
        .await
        .unwrap();
    assert!(stats.by_kind.is_empty());
    assert_eq!(stats.net_balance, Decimal::ZERO);
}

#[tokio::test]
async fn test_financial_stats_rejects_reversed_period() {
    let fx = fixture().await;
    let now = Utc::now();

    let result = fx
        .analytics
        .financial_stats(UserId::new(), now, now - Duration::days(1))
        .await;
    assert!(matches!(
        result,
        Err(Error::Ledger(ledger_core::Error::InvalidPeriod { .. }))
    ));
}

#[tokio::test]
async fn test_overdue_payment_counts_as_expense() {
    let fx = fixture().await;
    let user = UserId::new();
    let account = fx.account(user).await;
    let issued = fx.credit(user, account).await;
    fx.ledger.withdraw(account, dec!(100000), user).await.unwrap();

    let at = issued.schedule[0].due_date + Duration::hours(1);
    let report = fx.scheduler.run_once(at).await.unwrap();
    assert_eq!(report.overdue, 1);

    let stats = fx
        .analytics
        .financial_stats(user, Utc::now() - Duration::hours(1), at)
        .await
        .unwrap();
    assert_eq!(stats.by_kind["credit_issuance"].income, dec!(100000));
    assert_eq!(stats.by_kind["credit_payment"].expenses, dec!(10508.31));
    assert_eq!(stats.total_expenses, dec!(110508.31));
}

#[tokio::test]
async fn test_credit_load() {
    let fx = fixture().await;
    let user = UserId::new();
    let account = fx.account(user).await;

    let empty = fx.analytics.credit_load(user).await.unwrap();
    assert_eq!(empty.active_credits, 0);
    assert_eq!(empty.debt_to_income, Decimal::ZERO);

    fx.credit(user, account).await;
    let load = fx.analytics.credit_load(user).await.unwrap();
    assert_eq!(load.active_credits, 1);
    assert_eq!(load.outstanding_principal, dec!(100000));
    assert_eq!(load.monthly_payments, dec!(9553.01));
    // 9553.01 / (100000 / 3)
    assert_eq!(load.debt_to_income, dec!(0.2866));
}

#[tokio::test]
async fn test_credit_load_tracks_settlement() {
    let fx = fixture().await;
    let user = UserId::new();
    let account = fx.account(user).await;
    let issued = fx.credit(user, account).await;

    fx.scheduler
        .run_once(issued.schedule[0].due_date + Duration::hours(1))
        .await
        .unwrap();
    let load = fx.analytics.credit_load(user).await.unwrap();
    assert_eq!(
        load.outstanding_principal,
        dec!(100000) - issued.schedule[0].principal_component
    );

    fx.ledger.deposit(account, dec!(20000), user).await.unwrap();
    fx.scheduler
        .run_once(issued.schedule[11].due_date + Duration::hours(1))
        .await
        .unwrap();
    let load = fx.analytics.credit_load(user).await.unwrap();
    assert_eq!(load.active_credits, 0);
    assert_eq!(load.outstanding_principal, Decimal::ZERO);
    assert_eq!(load.monthly_payments, Decimal::ZERO);
}

#[tokio::test]
async fn test_balance_forecast() {
    let fx = fixture().await;
    let user = UserId::new();
    let account = fx.account(user).await;
    fx.credit(user, account).await;

    // Two installments fall within 70 days, the third does not
    let forecast = fx.analytics.balance_forecast(user, 70).await.unwrap();
    assert_eq!(forecast.len(), 70);
    assert_eq!(forecast[0].date, Utc::now().date_naive());
    assert_eq!(forecast[0].projected_balance, dec!(100000));
    assert_eq!(
        forecast
            .iter()
            .filter(|day| day.planned_payments > Decimal::ZERO)
            .count(),
        2
    );
    assert_eq!(forecast[69].projected_balance, dec!(80893.98));

    for pair in forecast.windows(2) {
        assert_eq!(pair[1].date, pair[0].date.succ_opt().unwrap());
        assert_eq!(
            pair[1].projected_balance,
            pair[0].projected_balance - pair[1].planned_payments
        );
    }
}

#[tokio::test]
async fn test_balance_forecast_horizon_bounds() {
    let fx = fixture().await;
    let user = UserId::new();

    assert!(matches!(
        fx.analytics.balance_forecast(user, 0).await,
        Err(Error::InvalidHorizon { days: 0, max: 365 })
    ));
    assert!(matches!(
        fx.analytics.balance_forecast(user, 366).await,
        Err(Error::InvalidHorizon { days: 366, .. })
    ));

    let forecast = fx.analytics.balance_forecast(user, 365).await.unwrap();
    assert_eq!(forecast.len(), 365);
    assert!(forecast.iter().all(|day| day.projected_balance == Decimal::ZERO));
}

#[tokio::test]
async fn test_service_rejects_invalid_config() {
    let fx = fixture().await;

    let empty_window = AnalyticsConfig {
        income_window_months: 0,
        ..AnalyticsConfig::default()
    };
    assert!(matches!(
        AnalyticsService::new(fx.ledger.clone(), empty_window),
        Err(Error::Config(_))
    ));

    let no_horizon = AnalyticsConfig {
        max_forecast_days: 0,
        ..AnalyticsConfig::default()
    };
    assert!(matches!(
        AnalyticsService::new(fx.ledger.clone(), no_horizon),
        Err(Error::Config(_))
    ));

    let short_window = AnalyticsConfig {
        income_window_months: 1,
        ..AnalyticsConfig::default()
    };
    let analytics = AnalyticsService::new(fx.ledger.clone(), short_window).unwrap();
    let user = UserId::new();
    let account = fx.account(user).await;
    fx.credit(user, account).await;

    // 9553.01 / 100000
    let load = analytics.credit_load(user).await.unwrap();
    assert_eq!(load.debt_to_income, dec!(0.0955));
}
