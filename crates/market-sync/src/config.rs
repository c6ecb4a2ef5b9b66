use anyhow::{bail, Context, Result};
use market_core::{Clock, Instrument, MarketClass, RateLimiter, Universe};
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_USA_SYMBOLS: &str = "AAPL,MSFT,GOOGL,AMZN,TSLA,META,NVDA,IBM";
const DEFAULT_CRYPTO_SYMBOLS: &str = "BITCOIN=BINANCE:BTCUSDT,ETHEREUM=BINANCE:ETHUSDT,\
     BINANCECOIN=BINANCE:BNBUSDT,CARDANO=BINANCE:ADAUSDT,SOLANA=BINANCE:SOLUSDT,\
     DOGECOIN=BINANCE:DOGEUSDT";

/// Per-source call spacing and the fallback bound.
#[derive(Debug, Clone, PartialEq)]
pub struct Pacing {
    pub usa_delay: Duration,
    pub crypto_delay: Duration,
    pub fallback_delay: Duration,
    pub fallback_limit: usize,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            usa_delay: Duration::from_millis(12_000),    // 5 calls/min free tier
            crypto_delay: Duration::from_millis(1_000),
            fallback_delay: Duration::from_millis(2_000),
            fallback_limit: 3,
        }
    }
}

/// The provider's rate limiters, one per market class plus the fallback
/// spacing. Clones share state, so ingestion and the fallback tier draw on
/// the same per-market budget.
#[derive(Clone)]
pub struct ProviderLimiters {
    usa: RateLimiter,
    crypto: RateLimiter,
    fallback: RateLimiter,
}

impl ProviderLimiters {
    pub fn new(pacing: &Pacing, clock: Arc<dyn Clock>) -> Self {
        Self {
            usa: RateLimiter::spacing("usa", pacing.usa_delay, clock.clone()),
            crypto: RateLimiter::spacing("crypto", pacing.crypto_delay, clock.clone()),
            fallback: RateLimiter::spacing("fallback", pacing.fallback_delay, clock),
        }
    }

    pub fn market(&self, market: MarketClass) -> &RateLimiter {
        match market {
            MarketClass::Usa => &self.usa,
            MarketClass::Crypto => &self.crypto,
        }
    }

    /// Extra spacing for request-time fallback calls, on top of the market budget.
    pub fn fallback(&self) -> &RateLimiter {
        &self.fallback
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    // Provider
    pub finnhub_api_key: String,
    pub finnhub_base_url: String,
    pub provider_timeout: Duration,

    // Cache store
    pub database_url: String,

    // Jobs
    pub refresh_interval: Duration,
    pub warmup_delay: Duration,

    pub universe: Universe,
    pub pacing: Pacing,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from any variable source. `lookup` returns `None` for unset names.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        let config = Self {
            finnhub_api_key: lookup("FINNHUB_API_KEY")
                .filter(|k| !k.trim().is_empty())
                .context("FINNHUB_API_KEY not set")?,
            finnhub_base_url: var("FINNHUB_BASE_URL", finnhub_client::DEFAULT_BASE_URL),
            provider_timeout: Duration::from_secs(parse_var(&lookup, "PROVIDER_TIMEOUT_SECS", 30)?),

            database_url: var("DATABASE_URL", "sqlite:market_cache.db"),

            refresh_interval: Duration::from_secs(parse_var(&lookup, "REFRESH_INTERVAL_SECS", 300)?),
            warmup_delay: Duration::from_secs(parse_var(&lookup, "WARMUP_DELAY_SECS", 30)?),

            universe: Universe {
                usa: parse_usa_symbols(&var("USA_SYMBOLS", DEFAULT_USA_SYMBOLS)),
                crypto: parse_crypto_symbols(&var("CRYPTO_SYMBOLS", DEFAULT_CRYPTO_SYMBOLS))?,
            },
            pacing: Pacing {
                usa_delay: Duration::from_millis(parse_var(&lookup, "USA_DELAY_MS", 12_000)?),
                crypto_delay: Duration::from_millis(parse_var(&lookup, "CRYPTO_DELAY_MS", 1_000)?),
                fallback_delay: Duration::from_millis(parse_var(&lookup, "FALLBACK_DELAY_MS", 2_000)?),
                fallback_limit: parse_var(&lookup, "FALLBACK_LIMIT", 3)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.refresh_interval.is_zero() {
            bail!("REFRESH_INTERVAL_SECS must be greater than zero");
        }
        if self.provider_timeout.is_zero() {
            bail!("PROVIDER_TIMEOUT_SECS must be greater than zero");
        }
        if self.universe.is_empty() {
            bail!("USA_SYMBOLS and CRYPTO_SYMBOLS are both empty");
        }
        Ok(())
    }
}

/// The built-in instrument universe.
pub fn default_universe() -> Universe {
    Universe {
        usa: parse_usa_symbols(DEFAULT_USA_SYMBOLS),
        // Constant input, always well formed
        crypto: parse_crypto_symbols(DEFAULT_CRYPTO_SYMBOLS).unwrap_or_default(),
    }
}

fn parse_var<F, T>(lookup: &F, name: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: '{}'", name, raw)),
        None => Ok(default),
    }
}

fn parse_usa_symbols(raw: &str) -> Vec<Instrument> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Instrument::equity)
        .collect()
}

/// `NAME=PROVIDER_SYMBOL` pairs, comma separated.
fn parse_crypto_symbols(raw: &str) -> Result<Vec<Instrument>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let (name, provider_symbol) = entry
                .split_once('=')
                .with_context(|| format!("Invalid CRYPTO_SYMBOLS entry '{}': expected NAME=PROVIDER_SYMBOL", entry))?;
            if name.trim().is_empty() || provider_symbol.trim().is_empty() {
                bail!("Invalid CRYPTO_SYMBOLS entry '{}'", entry);
            }
            Ok(Instrument::crypto(name, provider_symbol))
        })
        .collect()
}
