//! Settlement scheduler daemon

use anyhow::Context;
use ledger_core::{Ledger, LogNotifier};
use settlement::{Config, SettlementScheduler, Settler};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());

    if std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false) {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn load_config() -> anyhow::Result<Config> {
    match std::env::var("SETTLEMENT_CONFIG") {
        Ok(path) => {
            let mut config = Config::from_file(&path)
                .with_context(|| format!("loading config from {}", path))?;
            config.apply_env().context("applying environment overrides")?;
            Ok(config)
        }
        Err(_) => Config::from_env().context("loading config from environment"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = load_config()?;
    tracing::info!(
        service = %config.service_name,
        data_dir = ?config.ledger.data_dir,
        interval_secs = config.interval_secs,
        "Starting settlement scheduler"
    );

    let ledger = Arc::new(
        Ledger::open(config.ledger.clone(), Arc::new(LogNotifier))
            .await
            .context("opening ledger")?,
    );
    let settler = Arc::new(Settler::new(ledger.clone(), config.penalty_rate));
    let scheduler = Arc::new(SettlementScheduler::new(settler, &config));

    tokio::select! {
        _ = scheduler.start() => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for shutdown signal")?;
            tracing::info!("Shutdown signal received");
        }
    }

    ledger.shutdown().await.context("shutting down ledger")?;
    tracing::info!("Settlement scheduler stopped");
    Ok(())
}
