use async_trait::async_trait;
use chrono::NaiveDate;
use market_core::{
    CompanyProfile, Instrument, MarketDataProvider, ProviderError, RawArticle, RawMetrics,
    RawQuote,
};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://finnhub.io/api/v1";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Finnhub REST client.
///
/// Every call is bounded by the transport timeout. There is no retry and no
/// pacing here: a 429 comes back as a `rate_limited` error and the caller
/// decides what to do with it.
#[derive(Clone)]
pub struct FinnhubClient {
    api_key: String,
    base_url: String,
    client: Client,
}

impl FinnhubClient {
    pub fn new(api_key: String) -> Self {
        Self::with_options(api_key, DEFAULT_BASE_URL.to_string(), Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_options(api_key: String, base_url: String, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET `path` with `query`, decoded as `T`.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ProviderError> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .get(&url)
            .query(query)
            .query(&[("token", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| ProviderError::transport(format!("{}: {}", path, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, path, &body));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::transport(format!("{}: {}", path, e)))?;

        serde_json::from_str(&body)
            .map_err(|e| ProviderError::malformed(format!("{}: {}", path, e)))
    }
}

#[async_trait]
impl MarketDataProvider for FinnhubClient {
    async fn fetch_quote(&self, instrument: &Instrument) -> Result<RawQuote, ProviderError> {
        let quote: QuoteResponse = self
            .get_json("/quote", &[("symbol", instrument.provider_symbol.as_str())])
            .await?;
        parse_quote(&instrument.symbol, quote)
    }

    async fn fetch_metrics(&self, symbol: &str) -> Result<RawMetrics, ProviderError> {
        let response: MetricResponse = self
            .get_json("/stock/metric", &[("symbol", symbol), ("metric", "all")])
            .await?;
        parse_metrics(symbol, response)
    }

    async fn fetch_company_news(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
        limit: usize,
    ) -> Result<Vec<RawArticle>, ProviderError> {
        let from = from.format("%Y-%m-%d").to_string();
        let to = to.format("%Y-%m-%d").to_string();

        let body: serde_json::Value = self
            .get_json(
                "/company-news",
                &[("symbol", symbol), ("from", from.as_str()), ("to", to.as_str())],
            )
            .await?;

        let mut articles = parse_articles(body)?;
        articles.truncate(limit);
        tracing::debug!("Fetched {} company news articles for {}", articles.len(), symbol);
        Ok(articles)
    }

    async fn fetch_market_news(
        &self,
        category: &str,
        limit: usize,
    ) -> Result<Vec<RawArticle>, ProviderError> {
        let body: serde_json::Value = self.get_json("/news", &[("category", category)]).await?;

        let mut articles = parse_articles(body)?;
        articles.truncate(limit);
        Ok(articles)
    }

    async fn fetch_company_profile(&self, symbol: &str) -> Result<CompanyProfile, ProviderError> {
        let profile: ProfileResponse = self
            .get_json("/stock/profile2", &[("symbol", symbol)])
            .await?;
        parse_profile(symbol, profile)
    }
}

fn status_error(status: StatusCode, path: &str, body: &str) -> ProviderError {
    let message = format!("{} HTTP {}: {}", path, status.as_u16(), body.trim());
    match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderError::rate_limited(message),
        StatusCode::NOT_FOUND => ProviderError::not_found(message),
        _ => ProviderError::transport(message),
    }
}

fn parse_quote(symbol: &str, quote: QuoteResponse) -> Result<RawQuote, ProviderError> {
    let current = quote
        .c
        .ok_or_else(|| ProviderError::not_found(format!("No data found for symbol {}", symbol)))?;
    let previous_close = quote.pc.unwrap_or(0.0);

    // Unknown symbols come back as an all-zero quote
    if current == 0.0 && previous_close == 0.0 && quote.t.unwrap_or(0) == 0 {
        return Err(ProviderError::not_found(format!("No data found for symbol {}", symbol)));
    }

    Ok(RawQuote {
        current,
        open: quote.o.unwrap_or(0.0),
        high: quote.h.unwrap_or(0.0),
        low: quote.l.unwrap_or(0.0),
        previous_close,
    })
}

fn parse_metrics(symbol: &str, response: MetricResponse) -> Result<RawMetrics, ProviderError> {
    match response.metric {
        Some(metric) if !metric.is_empty() => Ok(RawMetrics {
            symbol: symbol.to_uppercase(),
            metric,
        }),
        _ => Err(ProviderError::not_found(format!(
            "No fundamental data found for {}",
            symbol
        ))),
    }
}

fn parse_articles(body: serde_json::Value) -> Result<Vec<RawArticle>, ProviderError> {
    if !body.is_array() {
        return Err(ProviderError::malformed("news payload is not an array"));
    }

    let items: Vec<NewsItem> =
        serde_json::from_value(body).map_err(|e| ProviderError::malformed(e.to_string()))?;

    Ok(items
        .into_iter()
        .map(|n| RawArticle {
            id: n.id,
            headline: n.headline,
            summary: n.summary,
            url: n.url,
            image: n.image,
            source: n.source,
            datetime: n.datetime,
        })
        .collect())
}

fn parse_profile(symbol: &str, profile: ProfileResponse) -> Result<CompanyProfile, ProviderError> {
    let name = profile
        .name
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ProviderError::not_found(format!("No company profile found for {}", symbol)))?;

    Ok(CompanyProfile {
        symbol: symbol.to_uppercase(),
        name,
        industry: profile.finnhub_industry,
        country: profile.country,
        market_cap: profile.market_capitalization,
        website: profile.weburl,
        logo: profile.logo,
        phone: profile.phone,
        description: profile
            .description
            .unwrap_or_else(|| "No description available".to_string()),
    })
}

// Response structures
#[derive(Debug, Deserialize)]
struct QuoteResponse {
    c: Option<f64>,  // current
    o: Option<f64>,  // open
    h: Option<f64>,  // high
    l: Option<f64>,  // low
    pc: Option<f64>, // previous close
    t: Option<i64>,  // timestamp
}

#[derive(Debug, Deserialize)]
struct MetricResponse {
    #[serde(default)]
    metric: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct NewsItem {
    #[serde(default)]
    id: i64,
    #[serde(default)]
    headline: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    image: String,
    #[serde(default)]
    source: String,
    #[serde(default)]
    datetime: i64,
}

#[derive(Debug, Deserialize)]
struct ProfileResponse {
    name: Option<String>,
    #[serde(rename = "finnhubIndustry")]
    finnhub_industry: Option<String>,
    country: Option<String>,
    #[serde(rename = "marketCapitalization")]
    market_capitalization: Option<f64>,
    weburl: Option<String>,
    logo: Option<String>,
    phone: Option<String>,
    description: Option<String>,
}
