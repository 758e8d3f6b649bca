//! Accrual reconciliation daemon
//!
//! Connects to PostgreSQL, starts the accrual poller and runs until
//! SIGINT/SIGTERM, then drains in-flight reconciliations.

use accrual_core::poller::{AccrualPoller, Reconciler};
use accrual_core::storage::PostgresStore;
use accrual_core::{AccrualClient, Config, Metrics};
use anyhow::Context;
use dotenv::dotenv;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    if config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    init_tracing(&config);
    info!("Starting accrual reconciliation daemon");

    let store = Arc::new(
        PostgresStore::connect(&config.database)
            .await
            .context("Failed to connect to database")?,
    );
    info!("Database connected");

    let provider = Arc::new(
        AccrualClient::new(config.provider.base_url.clone(), config.provider.timeout())?
            .with_default_retry_after(config.poller.default_retry_after()),
    );
    info!(base_url = %provider.base_url(), "Accrual provider client initialized");

    let metrics = Metrics::new().context("Failed to register metrics")?;
    let reconciler = Arc::new(
        Reconciler::new(store.clone(), provider, metrics.clone())
            .with_request_timeout(config.provider.timeout()),
    );
    let poller = AccrualPoller::start(store, reconciler, metrics.clone(), config.poller.clone())
        .spawn();

    shutdown_signal().await?;
    info!("Shutdown signal received");

    poller.shutdown(Some(config.poller.drain_timeout())).await;
    info!(metrics = %metrics.gather_text(), "Accrual daemon stopped");

    Ok(())
}
