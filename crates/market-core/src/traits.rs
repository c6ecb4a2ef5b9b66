use async_trait::async_trait;
use chrono::NaiveDate;

use crate::{
    CacheQuery, CacheStats, CompanyProfile, Instrument, MarketRecord, ProviderError, RawArticle,
    RawMetrics, RawQuote, Scope, StoreError,
};

/// External market-data provider. Implementations surface provider errors
/// as-is and never retry; retry and pacing policy belongs to callers.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn fetch_quote(&self, instrument: &Instrument) -> Result<RawQuote, ProviderError>;

    async fn fetch_metrics(&self, symbol: &str) -> Result<RawMetrics, ProviderError>;

    async fn fetch_company_news(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
        limit: usize,
    ) -> Result<Vec<RawArticle>, ProviderError>;

    async fn fetch_market_news(
        &self,
        category: &str,
        limit: usize,
    ) -> Result<Vec<RawArticle>, ProviderError>;

    async fn fetch_company_profile(&self, symbol: &str) -> Result<CompanyProfile, ProviderError>;
}

/// Keyed store of the latest record per (symbol, market).
///
/// Readers get no isolation from a concurrent clear + repopulate: a scope can
/// read as empty or partially filled while a refresh is running.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Replace the record sharing (symbol, market), or insert it.
    async fn upsert(&self, record: &MarketRecord) -> Result<(), StoreError>;

    /// Delete every record in `scope`. Returns the number removed.
    async fn clear_scope(&self, scope: Scope) -> Result<u64, StoreError>;

    /// Records matching `query`, most recent first.
    async fn read(&self, query: &CacheQuery) -> Result<Vec<MarketRecord>, StoreError>;

    /// Most recent record for `symbol` across markets.
    async fn read_one(&self, symbol: &str) -> Result<Option<MarketRecord>, StoreError>;

    async fn stats(&self) -> Result<CacheStats, StoreError>;
}
