use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ScopeError;

/// Partition of the instrument universe. Each class has its own symbol set
/// and its own rate budget at the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarketClass {
    Usa,
    Crypto,
}

impl MarketClass {
    /// Refresh order for a full refresh: cheaper calls first.
    pub const REFRESH_ORDER: [MarketClass; 2] = [MarketClass::Crypto, MarketClass::Usa];

    pub fn as_str(&self) -> &'static str {
        match self {
            MarketClass::Usa => "USA",
            MarketClass::Crypto => "CRYPTO",
        }
    }
}

impl fmt::Display for MarketClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarketClass {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USA" => Ok(MarketClass::Usa),
            "CRYPTO" => Ok(MarketClass::Crypto),
            _ => Err(ScopeError::UnknownMarket(s.to_string())),
        }
    }
}

/// Target of a clear/repopulate operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scope {
    All,
    Market(MarketClass),
}

impl Scope {
    pub fn includes(&self, market: MarketClass) -> bool {
        match self {
            Scope::All => true,
            Scope::Market(m) => *m == market,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::All => f.write_str("ALL"),
            Scope::Market(m) => write!(f, "{}", m),
        }
    }
}

/// Where a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Written by the ingestion pipeline and read back from the cache store
    Cache,
    /// Fetched at request time by the fallback tier, never stored
    DirectFallback,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Cache => "cache",
            Provenance::DirectFallback => "direct_fallback",
        }
    }
}

impl FromStr for Provenance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cache" => Ok(Provenance::Cache),
            "direct_fallback" => Ok(Provenance::DirectFallback),
            other => Err(format!("unknown provenance tag: {}", other)),
        }
    }
}

/// One tracked instrument. `provider_symbol` is what the provider is queried
/// with (e.g. `BINANCE:BTCUSDT`); `symbol` is what gets stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub provider_symbol: String,
    pub market: MarketClass,
}

impl Instrument {
    pub fn equity(symbol: &str) -> Self {
        let symbol = symbol.trim().to_uppercase();
        Self {
            provider_symbol: symbol.clone(),
            symbol,
            market: MarketClass::Usa,
        }
    }

    pub fn crypto(symbol: &str, provider_symbol: &str) -> Self {
        Self {
            symbol: symbol.trim().to_uppercase(),
            provider_symbol: provider_symbol.trim().to_string(),
            market: MarketClass::Crypto,
        }
    }
}

/// Ordered instrument lists per market class.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Universe {
    pub usa: Vec<Instrument>,
    pub crypto: Vec<Instrument>,
}

impl Universe {
    pub fn instruments(&self, market: MarketClass) -> &[Instrument] {
        match market {
            MarketClass::Usa => &self.usa,
            MarketClass::Crypto => &self.crypto,
        }
    }

    pub fn len(&self) -> usize {
        self.usa.len() + self.crypto.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Quote as returned by the provider, before normalisation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawQuote {
    pub current: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub previous_close: f64,
}

/// Latest normalised quote snapshot for one (symbol, market) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketRecord {
    pub symbol: String,
    pub market: MarketClass,
    pub price: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub volume: f64,
    pub change: f64,
    pub change_percent: f64,
    pub last_update: DateTime<Utc>,
    pub provenance: Provenance,
}

impl MarketRecord {
    /// Normalise a raw quote. A zero previous close yields a 0.0 percent change.
    pub fn from_quote(
        instrument: &Instrument,
        quote: &RawQuote,
        provenance: Provenance,
        now: DateTime<Utc>,
    ) -> Self {
        let change = quote.current - quote.previous_close;
        let change_percent = if quote.previous_close == 0.0 {
            0.0
        } else {
            change / quote.previous_close * 100.0
        };

        Self {
            symbol: instrument.symbol.to_uppercase(),
            market: instrument.market,
            price: quote.current,
            open: quote.open,
            high: quote.high,
            low: quote.low,
            // Quote endpoint doesn't report volume
            volume: 0.0,
            change,
            change_percent,
            last_update: now,
            provenance,
        }
    }
}

/// Filter for cache reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheQuery {
    pub market: Option<MarketClass>,
    pub symbol: Option<String>,
    pub limit: usize,
}

impl CacheQuery {
    pub const DEFAULT_MARKET_LIMIT: usize = 20;
    pub const DEFAULT_UNSCOPED_LIMIT: usize = 50;

    pub fn market(market: MarketClass, limit: Option<usize>) -> Self {
        Self {
            market: Some(market),
            symbol: None,
            limit: limit.unwrap_or(Self::DEFAULT_MARKET_LIMIT),
        }
    }

    pub fn all(limit: Option<usize>) -> Self {
        Self {
            market: None,
            symbol: None,
            limit: limit.unwrap_or(Self::DEFAULT_UNSCOPED_LIMIT),
        }
    }

    pub fn with_symbol(mut self, symbol: &str) -> Self {
        self.symbol = Some(symbol.trim().to_uppercase());
        self
    }

    pub fn matches(&self, record: &MarketRecord) -> bool {
        self.market.map_or(true, |m| m == record.market)
            && self.symbol.as_deref().map_or(true, |s| s == record.symbol)
    }
}

/// Record counts held by the cache store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_records: u64,
    pub usa_records: u64,
    pub crypto_records: u64,
    pub last_update: Option<DateTime<Utc>>,
}

/// Flat ratio map from the provider's metrics endpoint. Values may be null,
/// and the same ratio can appear under different names depending on the
/// response shape, so lookups take a list of aliases.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawMetrics {
    pub symbol: String,
    pub metric: HashMap<String, serde_json::Value>,
}

impl RawMetrics {
    /// First numeric value found under any of `aliases`.
    pub fn value(&self, aliases: &[&str]) -> Option<f64> {
        aliases
            .iter()
            .filter_map(|name| self.metric.get(*name))
            .find_map(|v| v.as_f64())
            .filter(|v| v.is_finite())
    }
}

/// News article as returned by the company-news and general-news endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawArticle {
    pub id: i64,
    pub headline: String,
    pub summary: String,
    pub url: String,
    pub image: String,
    pub source: String,
    /// Epoch seconds
    pub datetime: i64,
}

/// Company profile (name, industry, listing details)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyProfile {
    pub symbol: String,
    pub name: String,
    pub industry: Option<String>,
    pub country: Option<String>,
    pub market_cap: Option<f64>,
    pub website: Option<String>,
    pub logo: Option<String>,
    pub phone: Option<String>,
    pub description: String,
}
