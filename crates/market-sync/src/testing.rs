//! Test doubles shared by the unit tests of this crate.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use market_cache::MemoryCacheStore;
use market_core::{
    CacheQuery, CacheStats, CacheStore, CompanyProfile, Instrument, ManualClock, MarketClass,
    MarketDataProvider, MarketRecord, Provenance, ProviderError, RawArticle, RawMetrics, RawQuote,
    Scope, StoreError, Universe,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 10, 14, 30, 0).unwrap()
}

pub fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(start()))
}

/// Three equities and two crypto pairs.
pub fn universe() -> Universe {
    Universe {
        usa: vec![
            Instrument::equity("AAPL"),
            Instrument::equity("MSFT"),
            Instrument::equity("IBM"),
        ],
        crypto: vec![
            Instrument::crypto("BITCOIN", "BINANCE:BTCUSDT"),
            Instrument::crypto("ETHEREUM", "BINANCE:ETHUSDT"),
        ],
    }
}

pub fn quote(current: f64, open: f64, high: f64, low: f64, previous_close: f64) -> RawQuote {
    RawQuote {
        current,
        open,
        high,
        low,
        previous_close,
    }
}

pub fn record(symbol: &str, market: MarketClass) -> MarketRecord {
    MarketRecord {
        symbol: symbol.to_string(),
        market,
        price: 100.0,
        open: 99.0,
        high: 101.0,
        low: 98.0,
        volume: 0.0,
        change: 1.0,
        change_percent: 1.0,
        last_update: start(),
        provenance: Provenance::Cache,
    }
}

pub fn article(id: i64, headline: &str, published: DateTime<Utc>) -> RawArticle {
    RawArticle {
        id,
        headline: headline.to_string(),
        summary: String::new(),
        url: format!("https://news.example.com/{}", id),
        image: String::new(),
        source: "Reuters".to_string(),
        datetime: published.timestamp(),
    }
}

/// Holds the first quote call until `release` is notified.
#[derive(Clone)]
pub struct QuoteGate {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewsCall {
    pub symbol: String,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub limit: usize,
}

/// Scripted provider keyed by provider symbol. Unknown symbols are not found.
#[derive(Default)]
pub struct StubProvider {
    quotes: Mutex<HashMap<String, Result<RawQuote, ProviderError>>>,
    quote_calls: Mutex<Vec<String>>,
    gate: Mutex<Option<QuoteGate>>,
    metrics: Mutex<HashMap<String, RawMetrics>>,
    company_news: Mutex<Vec<RawArticle>>,
    news_calls: Mutex<Vec<NewsCall>>,
    market_news: Mutex<Vec<RawArticle>>,
    categories: Mutex<Vec<String>>,
    profiles: Mutex<HashMap<String, CompanyProfile>>,
}

impl StubProvider {
    pub fn answering_all(universe: &Universe) -> Self {
        let stub = Self::default();
        for (i, instrument) in universe.crypto.iter().chain(universe.usa.iter()).enumerate() {
            let price = 100.0 + i as f64;
            stub.set_quote(&instrument.provider_symbol, quote(price, price - 1.0, price + 1.0, price - 2.0, price - 1.0));
        }
        stub
    }

    pub fn set_quote(&self, provider_symbol: &str, quote: RawQuote) {
        self.quotes.lock().unwrap().insert(provider_symbol.to_string(), Ok(quote));
    }

    pub fn fail_quote(&self, provider_symbol: &str, error: ProviderError) {
        self.quotes.lock().unwrap().insert(provider_symbol.to_string(), Err(error));
    }

    pub fn block_first_quote(&self) -> QuoteGate {
        let gate = QuoteGate {
            entered: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        };
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn quote_calls(&self) -> Vec<String> {
        self.quote_calls.lock().unwrap().clone()
    }

    pub fn set_metrics(&self, metrics: RawMetrics) {
        self.metrics.lock().unwrap().insert(metrics.symbol.clone(), metrics);
    }

    pub fn set_company_news(&self, articles: Vec<RawArticle>) {
        *self.company_news.lock().unwrap() = articles;
    }

    pub fn news_calls(&self) -> Vec<NewsCall> {
        self.news_calls.lock().unwrap().clone()
    }

    pub fn set_market_news(&self, articles: Vec<RawArticle>) {
        *self.market_news.lock().unwrap() = articles;
    }

    pub fn categories(&self) -> Vec<String> {
        self.categories.lock().unwrap().clone()
    }

    pub fn set_profile(&self, profile: CompanyProfile) {
        self.profiles.lock().unwrap().insert(profile.symbol.clone(), profile);
    }
}

#[async_trait]
impl MarketDataProvider for StubProvider {
    async fn fetch_quote(&self, instrument: &Instrument) -> Result<RawQuote, ProviderError> {
        self.quote_calls
            .lock()
            .unwrap()
            .push(instrument.provider_symbol.clone());

        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        self.quotes
            .lock()
            .unwrap()
            .get(&instrument.provider_symbol)
            .cloned()
            .unwrap_or_else(|| Err(ProviderError::not_found(instrument.provider_symbol.clone())))
    }

    async fn fetch_metrics(&self, symbol: &str) -> Result<RawMetrics, ProviderError> {
        self.metrics
            .lock()
            .unwrap()
            .get(symbol)
            .cloned()
            .ok_or_else(|| ProviderError::not_found(format!("no metrics for {}", symbol)))
    }

    async fn fetch_company_news(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
        limit: usize,
    ) -> Result<Vec<RawArticle>, ProviderError> {
        self.news_calls.lock().unwrap().push(NewsCall {
            symbol: symbol.to_string(),
            from,
            to,
            limit,
        });
        let mut articles = self.company_news.lock().unwrap().clone();
        articles.truncate(limit);
        Ok(articles)
    }

    async fn fetch_market_news(&self, category: &str, limit: usize) -> Result<Vec<RawArticle>, ProviderError> {
        self.categories.lock().unwrap().push(category.to_string());
        let mut articles = self.market_news.lock().unwrap().clone();
        articles.truncate(limit);
        Ok(articles)
    }

    async fn fetch_company_profile(&self, symbol: &str) -> Result<CompanyProfile, ProviderError> {
        self.profiles
            .lock()
            .unwrap()
            .get(symbol)
            .cloned()
            .ok_or_else(|| ProviderError::not_found(format!("no profile for {}", symbol)))
    }
}

/// In-memory store that records clears and can be told to fail.
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryCacheStore,
    clears: Mutex<Vec<Scope>>,
    fail_upserts: AtomicBool,
    fail_reads: AtomicBool,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryCacheStore {
        &self.inner
    }

    pub fn clears(&self) -> Vec<Scope> {
        self.clears.lock().unwrap().clone()
    }

    pub fn fail_upserts(&self, fail: bool) {
        self.fail_upserts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn check_reads(&self) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Database("database is locked".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for RecordingStore {
    async fn upsert(&self, record: &MarketRecord) -> Result<(), StoreError> {
        if self.fail_upserts.load(Ordering::SeqCst) {
            return Err(StoreError::Database("disk I/O error".into()));
        }
        self.inner.upsert(record).await
    }

    async fn clear_scope(&self, scope: Scope) -> Result<u64, StoreError> {
        self.clears.lock().unwrap().push(scope);
        self.inner.clear_scope(scope).await
    }

    async fn read(&self, query: &CacheQuery) -> Result<Vec<MarketRecord>, StoreError> {
        self.check_reads()?;
        self.inner.read(query).await
    }

    async fn read_one(&self, symbol: &str) -> Result<Option<MarketRecord>, StoreError> {
        self.check_reads()?;
        self.inner.read_one(symbol).await
    }

    async fn stats(&self) -> Result<CacheStats, StoreError> {
        self.check_reads()?;
        self.inner.stats().await
    }
}
