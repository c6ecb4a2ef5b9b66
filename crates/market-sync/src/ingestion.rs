use market_core::{
    CacheStore, Clock, Instrument, MarketClass, MarketDataProvider, MarketRecord, Provenance,
    ProviderErrorKind, RefreshError, Scope, StoreError, Universe,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ProviderLimiters;

/// Outcome of one clear-then-repopulate pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshReport {
    pub scope: Scope,
    /// Records removed before repopulating
    pub cleared: u64,
    pub stored: usize,
    /// Instruments the provider could not answer for
    pub failed: Vec<(String, ProviderErrorKind)>,
    pub elapsed: Duration,
}

impl RefreshReport {
    fn new(scope: Scope, cleared: u64) -> Self {
        Self {
            scope,
            cleared,
            stored: 0,
            failed: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }
}

/// Pulls quotes for the configured universe and writes them to the cache.
///
/// Every refresh wipes its scope first, then fetches instruments one at a
/// time through the market's rate limiter. A provider error skips that
/// instrument; a store error aborts the pass.
pub struct IngestionService {
    provider: Arc<dyn MarketDataProvider>,
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    universe: Universe,
    limiters: ProviderLimiters,
}

impl IngestionService {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        store: Arc<dyn CacheStore>,
        clock: Arc<dyn Clock>,
        universe: Universe,
        limiters: ProviderLimiters,
    ) -> Self {
        Self {
            provider,
            store,
            clock,
            universe,
            limiters,
        }
    }

    /// Clear the whole cache, then refresh crypto followed by equities.
    pub async fn update_all_markets(&self) -> Result<RefreshReport, RefreshError> {
        self.refresh(Scope::All).await
    }

    /// Clear and repopulate a single market class.
    pub async fn update_market_by_type(&self, market: MarketClass) -> Result<RefreshReport, RefreshError> {
        self.refresh(Scope::Market(market)).await
    }

    async fn refresh(&self, scope: Scope) -> Result<RefreshReport, RefreshError> {
        let started = self.clock.now();
        tracing::info!("Starting market refresh ({})", scope);

        let cleared = self.store.clear_scope(scope).await.map_err(|e| {
            tracing::error!("Failed to clear cache scope {}: {}", scope, e);
            e
        })?;
        tracing::info!("Cleared {} cached records ({})", cleared, scope);

        let mut report = RefreshReport::new(scope, cleared);

        for market in MarketClass::REFRESH_ORDER {
            if !scope.includes(market) {
                continue;
            }
            let before = report.stored;
            self.fetch_market(market, &mut report).await.map_err(|e| {
                tracing::error!("Aborting {} refresh: {}", market, e);
                e
            })?;
            tracing::info!(
                "Updated {} {} records ({} instruments)",
                report.stored - before,
                market,
                self.universe.instruments(market).len()
            );
        }

        report.elapsed = (self.clock.now() - started).to_std().unwrap_or_default();
        tracing::info!(
            "Market refresh ({}) finished in {:.1}s: {} stored, {} failed",
            scope,
            report.elapsed.as_secs_f64(),
            report.stored,
            report.failed.len()
        );

        Ok(report)
    }

    async fn fetch_market(&self, market: MarketClass, report: &mut RefreshReport) -> Result<(), StoreError> {
        let limiter = self.limiters.market(market);

        for instrument in self.universe.instruments(market) {
            limiter.acquire().await;

            match self.fetch_record(instrument).await {
                Ok(record) => {
                    self.store.upsert(&record).await?;
                    report.stored += 1;
                }
                Err(kind) => report.failed.push((instrument.symbol.clone(), kind)),
            }
        }

        Ok(())
    }

    async fn fetch_record(&self, instrument: &Instrument) -> Result<MarketRecord, ProviderErrorKind> {
        match self.provider.fetch_quote(instrument).await {
            Ok(quote) => Ok(MarketRecord::from_quote(
                instrument,
                &quote,
                Provenance::Cache,
                self.clock.now(),
            )),
            Err(e) if e.is_rate_limited() => {
                tracing::warn!(
                    "Rate limited fetching {} ({}), skipping until next cycle: {}",
                    instrument.symbol,
                    instrument.market,
                    e
                );
                Err(e.kind)
            }
            Err(e) => {
                tracing::warn!("Failed to fetch {} ({}): {}", instrument.symbol, instrument.market, e);
                Err(e.kind)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Pacing;
    use crate::testing::{clock, quote, universe, RecordingStore, StubProvider};
    use market_cache::SqliteCacheStore;
    use market_core::{CacheQuery, ManualClock, ProviderError};

    fn service(
        provider: Arc<StubProvider>,
        store: Arc<dyn CacheStore>,
        clock: Arc<ManualClock>,
    ) -> IngestionService {
        let limiters = ProviderLimiters::new(&Pacing::default(), clock.clone());
        IngestionService::new(provider, store, clock, universe(), limiters)
    }

    #[tokio::test]
    async fn test_full_refresh_stores_one_record_per_instrument() {
        let provider = Arc::new(StubProvider::answering_all(&universe()));
        let store = Arc::new(RecordingStore::new());
        let clock = clock();
        let ingestion = service(provider.clone(), store.clone(), clock.clone());

        let report = ingestion.update_all_markets().await.unwrap();

        assert_eq!(report.scope, Scope::All);
        assert_eq!(report.stored, 5);
        assert!(report.failed.is_empty());
        assert_eq!(store.clears(), vec![Scope::All]);

        let records = store.inner().read(&CacheQuery::all(None)).await.unwrap();
        assert_eq!(records.len(), 5);
        assert!(records.iter().all(|r| r.provenance == Provenance::Cache));
    }

    #[tokio::test]
    async fn test_crypto_refreshed_before_equities() {
        let provider = Arc::new(StubProvider::answering_all(&universe()));
        let store = Arc::new(RecordingStore::new());
        let ingestion = service(provider.clone(), store, clock());

        ingestion.update_all_markets().await.unwrap();

        assert_eq!(
            provider.quote_calls(),
            vec!["BINANCE:BTCUSDT", "BINANCE:ETHUSDT", "AAPL", "MSFT", "IBM"]
        );
    }

    #[tokio::test]
    async fn test_delays_follow_market_pacing() {
        let provider = Arc::new(StubProvider::answering_all(&universe()));
        let store = Arc::new(RecordingStore::new());
        let clock = clock();
        let ingestion = service(provider, store, clock.clone());

        ingestion.update_all_markets().await.unwrap();

        // One wait between the two crypto calls, two between the three equity calls
        assert_eq!(
            clock.slept(),
            vec![
                Duration::from_millis(1_000),
                Duration::from_millis(12_000),
                Duration::from_millis(12_000),
            ]
        );
    }

    #[tokio::test]
    async fn test_provider_failure_skips_instrument() {
        let provider = Arc::new(StubProvider::answering_all(&universe()));
        provider.fail_quote("MSFT", ProviderError::rate_limited("HTTP 429"));
        provider.fail_quote("BINANCE:ETHUSDT", ProviderError::transport("connection reset"));
        let store = Arc::new(RecordingStore::new());
        let ingestion = service(provider.clone(), store.clone(), clock());

        let report = ingestion.update_all_markets().await.unwrap();

        assert_eq!(report.stored, 3);
        assert_eq!(
            report.failed,
            vec![
                ("ETHEREUM".to_string(), ProviderErrorKind::Transport),
                ("MSFT".to_string(), ProviderErrorKind::RateLimited),
            ]
        );
        // IBM comes after the failing MSFT and is still fetched
        assert!(store.inner().read_one("IBM").await.unwrap().is_some());
        assert!(store.inner().read_one("MSFT").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_full_refresh_is_idempotent() {
        let provider = Arc::new(StubProvider::answering_all(&universe()));
        let store = Arc::new(RecordingStore::new());
        let ingestion = service(provider, store.clone(), clock());

        ingestion.update_all_markets().await.unwrap();
        let first = snapshot(&store).await;
        let second_report = ingestion.update_all_markets().await.unwrap();
        let second = snapshot(&store).await;

        assert_eq!(first, second);
        assert_eq!(second_report.cleared, 5);
    }

    #[tokio::test]
    async fn test_stale_records_removed_on_refresh() {
        let provider = Arc::new(StubProvider::answering_all(&universe()));
        let store = Arc::new(RecordingStore::new());
        let ingestion = service(provider.clone(), store.clone(), clock());

        ingestion.update_all_markets().await.unwrap();
        provider.fail_quote("IBM", ProviderError::not_found("unknown symbol"));
        ingestion.update_all_markets().await.unwrap();

        let records = store.inner().read(&CacheQuery::all(None)).await.unwrap();
        assert_eq!(records.len(), 4);
        assert!(records.iter().all(|r| r.symbol != "IBM"));
    }

    #[tokio::test]
    async fn test_market_refresh_clears_only_its_scope() {
        let provider = Arc::new(StubProvider::answering_all(&universe()));
        let store = Arc::new(RecordingStore::new());
        let ingestion = service(provider.clone(), store.clone(), clock());

        ingestion.update_all_markets().await.unwrap();
        let report = ingestion.update_market_by_type(MarketClass::Crypto).await.unwrap();

        assert_eq!(report.cleared, 2);
        assert_eq!(report.stored, 2);
        assert_eq!(store.clears(), vec![Scope::All, Scope::Market(MarketClass::Crypto)]);
        let stats = store.inner().stats().await.unwrap();
        assert_eq!(stats.usa_records, 3);
        assert_eq!(stats.crypto_records, 2);
    }

    #[tokio::test]
    async fn test_store_error_aborts_refresh() {
        let provider = Arc::new(StubProvider::answering_all(&universe()));
        let store = Arc::new(RecordingStore::new());
        store.fail_upserts(true);
        let ingestion = service(provider.clone(), store, clock());

        let err = ingestion.update_all_markets().await.unwrap_err();

        assert!(matches!(err, RefreshError::Store(_)));
        // Aborted on the first write
        assert_eq!(provider.quote_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_scenario_quote_normalised() {
        let provider = Arc::new(StubProvider::answering_all(&universe()));
        provider.set_quote("AAPL", quote(150.0, 148.0, 151.0, 147.0, 145.0));
        let store = Arc::new(RecordingStore::new());
        let ingestion = service(provider, store.clone(), clock());

        ingestion.update_market_by_type(MarketClass::Usa).await.unwrap();

        let record = store.inner().read_one("AAPL").await.unwrap().unwrap();
        assert_eq!(record.change, 5.0);
        assert!((record.change_percent - 3.45).abs() < 0.01);
        assert_eq!(record.provenance.as_str(), "cache");
    }

    #[tokio::test]
    async fn test_repeated_refresh_on_sqlite_keeps_one_row_per_instrument() {
        let provider = Arc::new(StubProvider::answering_all(&universe()));
        let store = Arc::new(SqliteCacheStore::in_memory().await.unwrap());
        let ingestion = service(provider.clone(), store.clone(), clock());

        ingestion.update_all_markets().await.unwrap();
        provider.set_quote("AAPL", quote(151.0, 148.0, 152.0, 147.0, 145.0));
        let second = ingestion.update_all_markets().await.unwrap();

        assert_eq!(second.cleared, 5);
        assert_eq!(second.stored, 5);
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_records, 5);
        assert_eq!(stats.usa_records, 3);
        assert_eq!(stats.crypto_records, 2);

        // Direct upsert of an existing key replaces the row
        let mut aapl = store.read_one("AAPL").await.unwrap().unwrap();
        assert_eq!(aapl.price, 151.0);
        aapl.price = 152.5;
        store.upsert(&aapl).await.unwrap();
        assert_eq!(store.stats().await.unwrap().total_records, 5);
        assert_eq!(store.read_one("AAPL").await.unwrap().unwrap().price, 152.5);
    }

    async fn snapshot(store: &RecordingStore) -> Vec<(String, MarketClass, f64)> {
        let mut rows: Vec<_> = store
            .inner()
            .read(&CacheQuery::all(None))
            .await
            .unwrap()
            .into_iter()
            .map(|r| (r.symbol, r.market, r.price))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }
}
