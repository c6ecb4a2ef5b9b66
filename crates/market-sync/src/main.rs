use std::sync::Arc;

use anyhow::{Context, Result};
use finnhub_client::FinnhubClient;
use market_cache::SqliteCacheStore;
use market_core::SystemClock;
use market_sync::{MarketDataService, SyncConfig};
use tokio::signal::unix::SignalKind;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load .env, init tracing
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    tracing::info!("Starting market data sync daemon");

    // 2. Configuration
    let config = SyncConfig::from_env()?;
    tracing::info!("Configuration loaded");
    tracing::info!("  Provider: {}", config.finnhub_base_url);
    tracing::info!("  Cache: {}", config.database_url);
    tracing::info!(
        "  Universe: {} equities, {} crypto",
        config.universe.usa.len(),
        config.universe.crypto.len()
    );
    tracing::info!(
        "  Refresh every {}s, warm-up after {}s",
        config.refresh_interval.as_secs(),
        config.warmup_delay.as_secs()
    );

    // 3. Cache store (schema created on connect)
    let store = SqliteCacheStore::connect(&config.database_url)
        .await
        .with_context(|| format!("Failed to open cache database {}", config.database_url))?;
    tracing::info!("Cache store ready");

    // 4. Provider + service
    let provider = FinnhubClient::with_options(
        config.finnhub_api_key.clone(),
        config.finnhub_base_url.clone(),
        config.provider_timeout,
    );
    let service = MarketDataService::from_config(
        &config,
        Arc::new(provider),
        Arc::new(store),
        Arc::new(SystemClock),
    );

    service.start_jobs(config.refresh_interval, config.warmup_delay);
    let scheduler = service.scheduler();

    // 5. Run until SIGINT/SIGTERM
    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
    let shutdown = async {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received SIGINT");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM");
            }
        }
    };

    let driver = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run().await })
    };

    shutdown.await;
    tracing::info!("Shutdown signal received, stopping jobs...");
    scheduler.stop_all();

    // An in-flight refresh runs to completion before the driver returns
    if let Err(e) = driver.await {
        tracing::error!("Scheduler task ended abnormally: {}", e);
    }

    match service.get_data_stats().await {
        Ok(stats) => tracing::info!(
            "Cache holds {} records ({} USA, {} CRYPTO)",
            stats.total_records,
            stats.usa_records,
            stats.crypto_records
        ),
        Err(e) => tracing::warn!("Could not read cache stats on shutdown: {}", e),
    }

    tracing::info!("Market data sync daemon shut down.");
    Ok(())
}
