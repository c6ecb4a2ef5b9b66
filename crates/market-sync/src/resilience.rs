use market_core::{
    CacheQuery, CacheStore, Clock, MarketClass, MarketDataProvider, MarketRecord, Provenance,
    Universe,
};
use std::sync::Arc;

use crate::config::ProviderLimiters;

/// Two-tier market read: the cache first, then a bounded direct fetch from
/// the provider when the cache has nothing for the market.
///
/// The direct tier never writes to the cache. Its calls go through the same
/// per-market limiters as ingestion, so a fallback during a refresh does not
/// add to the provider budget.
pub struct ResilienceClient {
    store: Arc<dyn CacheStore>,
    provider: Arc<dyn MarketDataProvider>,
    clock: Arc<dyn Clock>,
    universe: Universe,
    limiters: ProviderLimiters,
    fallback_limit: usize,
}

impl ResilienceClient {
    pub fn new(
        store: Arc<dyn CacheStore>,
        provider: Arc<dyn MarketDataProvider>,
        clock: Arc<dyn Clock>,
        universe: Universe,
        limiters: ProviderLimiters,
        fallback_limit: usize,
    ) -> Self {
        Self {
            limiters,
            fallback_limit,
            store,
            provider,
            clock,
            universe,
        }
    }

    pub async fn read_market(&self, query: &CacheQuery) -> Vec<MarketRecord> {
        let Some(market) = query.market else {
            // Unscoped reads have no universe subset to fall back to
            return self.store.read(query).await.unwrap_or_else(|e| {
                tracing::warn!("Cache read failed: {}", e);
                Vec::new()
            });
        };

        match self.store.read(query).await {
            Ok(records) if !records.is_empty() => return records,
            Ok(_) => tracing::info!("No cached {} data, falling back to provider", market),
            Err(e) => tracing::warn!("Cache read for {} failed, falling back to provider: {}", market, e),
        }

        self.direct_fetch(market, query).await
    }

    /// Fetch the first `fallback_limit` instruments of `market`, in
    /// configured order, skipping any the provider fails on.
    async fn direct_fetch(&self, market: MarketClass, query: &CacheQuery) -> Vec<MarketRecord> {
        let candidates = self
            .universe
            .instruments(market)
            .iter()
            .filter(|i| query.symbol.as_deref().map_or(true, |s| i.symbol == s))
            .take(self.fallback_limit.min(query.limit));

        let limiter = self.limiters.market(market);
        let mut records = Vec::new();
        for instrument in candidates {
            self.limiters.fallback().acquire().await;
            limiter.acquire().await;
            match self.provider.fetch_quote(instrument).await {
                Ok(quote) => records.push(MarketRecord::from_quote(
                    instrument,
                    &quote,
                    Provenance::DirectFallback,
                    self.clock.now(),
                )),
                Err(e) if e.is_rate_limited() => {
                    tracing::warn!("Direct fetch for {} rate limited: {}", instrument.symbol, e)
                }
                Err(e) => tracing::warn!("Direct fetch for {} failed: {}", instrument.symbol, e),
            }
        }

        tracing::info!(
            "Direct fallback for {} returned {} records",
            market,
            records.len()
        );
        records
    }
}
