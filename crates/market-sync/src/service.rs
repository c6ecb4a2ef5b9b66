use chrono::{Duration as ChronoDuration, NaiveDate};
use fundamental_analysis::{FinancialHealthEngine, FinancialHealthScore};
use market_core::{
    CacheQuery, CacheStats, CacheStore, Clock, CompanyProfile, MarketClass, MarketDataProvider,
    MarketRecord, ProviderError, Scope, ScopeError, StoreError, Universe,
};
use sentiment_analysis::{NewsAnalysisEngine, NewsArticleAnalysis, NewsSummary};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::{Pacing, ProviderLimiters, SyncConfig};
use crate::ingestion::IngestionService;
use crate::resilience::ResilienceClient;
use crate::scheduler::{self, JobStatus, RefreshCoordinator, RefreshOutcome, Scheduler};

const COMPANY_NEWS_DAYS: i64 = 7;
const DEFAULT_COMPANY_NEWS_LIMIT: usize = 20;
const DEFAULT_MARKET_NEWS_LIMIT: usize = 10;
const DEFAULT_NEWS_CATEGORY: &str = "general";

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Scope(#[from] ScopeError),

    #[error("No data found for {0}")]
    NotFound(String),

    #[error("A refresh is in progress")]
    Busy,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

pub type Result<T> = std::result::Result<T, ServiceError>;

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub jobs: Vec<JobStatus>,
    pub refresh_in_progress: bool,
    pub stats: CacheStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompanyNews {
    /// Highest impact first
    pub articles: Vec<NewsArticleAnalysis>,
    pub summary: NewsSummary,
}

/// Control-plane facade: everything the route/CLI layer calls.
pub struct MarketDataService {
    store: Arc<dyn CacheStore>,
    provider: Arc<dyn MarketDataProvider>,
    clock: Arc<dyn Clock>,
    coordinator: Arc<RefreshCoordinator>,
    resilience: ResilienceClient,
    scheduler: Arc<Scheduler>,
    health: FinancialHealthEngine,
    news: NewsAnalysisEngine,
}

impl MarketDataService {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        store: Arc<dyn CacheStore>,
        clock: Arc<dyn Clock>,
        universe: Universe,
        pacing: &Pacing,
    ) -> Self {
        // Ingestion and the fallback tier draw on one set of limiters
        let limiters = ProviderLimiters::new(pacing, clock.clone());
        let ingestion = Arc::new(IngestionService::new(
            provider.clone(),
            store.clone(),
            clock.clone(),
            universe.clone(),
            limiters.clone(),
        ));

        Self {
            coordinator: Arc::new(RefreshCoordinator::new(ingestion)),
            resilience: ResilienceClient::new(
                store.clone(),
                provider.clone(),
                clock.clone(),
                universe,
                limiters,
                pacing.fallback_limit,
            ),
            scheduler: Arc::new(Scheduler::new(clock.clone())),
            health: FinancialHealthEngine::new(),
            news: NewsAnalysisEngine::new(),
            store,
            provider,
            clock,
        }
    }

    pub fn from_config(
        config: &SyncConfig,
        provider: Arc<dyn MarketDataProvider>,
        store: Arc<dyn CacheStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::new(provider, store, clock, config.universe.clone(), &config.pacing)
    }

    pub fn scheduler(&self) -> Arc<Scheduler> {
        self.scheduler.clone()
    }

    /// Register the periodic refresh and the one-shot warm-up.
    pub fn start_jobs(&self, interval: Duration, warmup_delay: Duration) {
        scheduler::register_refresh_jobs(&self.scheduler, self.coordinator.clone(), interval, warmup_delay);
    }

    pub async fn get_status(&self) -> Result<ServiceStatus> {
        Ok(ServiceStatus {
            jobs: self.scheduler.jobs_status(),
            refresh_in_progress: self.coordinator.is_refreshing(),
            stats: self.store.stats().await?,
        })
    }

    pub async fn trigger_manual_refresh(&self) -> RefreshOutcome {
        tracing::info!("Manual refresh requested");
        self.coordinator.refresh_all().await
    }

    /// Refresh one market class. The name is validated before anything is cleared.
    pub async fn refresh_market(&self, market: &str) -> Result<RefreshOutcome> {
        let market: MarketClass = market.parse()?;
        Ok(self.coordinator.refresh_market(market).await)
    }

    pub async fn clear_all_cached_data(&self) -> Result<u64> {
        let cleared = self
            .coordinator
            .exclusive(|| self.store.clear_scope(Scope::All))
            .await
            .ok_or(ServiceError::Busy)??;
        tracing::info!("Cleared all cached market data ({} records)", cleared);
        Ok(cleared)
    }

    /// Cached records for `market` (or every market when `None`), falling
    /// back to a direct provider fetch when a market has nothing cached.
    pub async fn read_market(
        &self,
        market: Option<&str>,
        symbol: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<MarketRecord>> {
        let mut query = match market {
            Some(name) => CacheQuery::market(name.parse()?, limit),
            None => CacheQuery::all(limit),
        };
        if let Some(symbol) = symbol {
            query = query.with_symbol(symbol);
        }
        if query.limit == 0 {
            return Err(ServiceError::InvalidRequest("limit must be positive".into()));
        }
        if query.market.is_none() {
            return Ok(self.store.read(&query).await?);
        }

        Ok(self.resilience.read_market(&query).await)
    }

    pub async fn read_symbol(&self, symbol: &str) -> Result<MarketRecord> {
        self.store
            .read_one(symbol)
            .await?
            .ok_or_else(|| ServiceError::NotFound(symbol.to_uppercase()))
    }

    pub async fn get_fundamentals(&self, symbol: &str) -> Result<FinancialHealthScore> {
        let symbol = symbol.trim().to_uppercase();
        let metrics = self.provider.fetch_metrics(&symbol).await?;
        Ok(self.health.analyze(&metrics, self.clock.now()))
    }

    /// Analysed company news. The range defaults to the seven days ending today.
    pub async fn get_company_news(
        &self,
        symbol: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
        limit: Option<usize>,
    ) -> Result<CompanyNews> {
        let symbol = symbol.trim().to_uppercase();
        let now = self.clock.now();
        let to = to.unwrap_or_else(|| now.date_naive());
        let from = from.unwrap_or(to - ChronoDuration::days(COMPANY_NEWS_DAYS));
        if from > to {
            return Err(ServiceError::InvalidRequest(format!(
                "from ({}) is after to ({})",
                from, to
            )));
        }

        let limit = limit.unwrap_or(DEFAULT_COMPANY_NEWS_LIMIT);
        let raw = self.provider.fetch_company_news(&symbol, from, to, limit).await?;

        let mut articles = self.news.analyze_all(&raw, now);
        articles.sort_by(|a, b| b.impact_score.cmp(&a.impact_score));
        let summary = self.news.summarize(&symbol, from, to, &articles);

        Ok(CompanyNews { articles, summary })
    }

    /// Analysed general market news, newest first.
    pub async fn get_market_news(
        &self,
        category: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<NewsArticleAnalysis>> {
        let category = category
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_NEWS_CATEGORY);
        let limit = limit.unwrap_or(DEFAULT_MARKET_NEWS_LIMIT);

        let raw = self.provider.fetch_market_news(category, limit).await?;
        let mut articles = self.news.analyze_all(&raw, self.clock.now());
        articles.sort_by(|a, b| b.datetime.cmp(&a.datetime));
        Ok(articles)
    }

    pub async fn get_company_profile(&self, symbol: &str) -> Result<CompanyProfile> {
        Ok(self
            .provider
            .fetch_company_profile(&symbol.trim().to_uppercase())
            .await?)
    }

    pub async fn get_data_stats(&self) -> Result<CacheStats> {
        Ok(self.store.stats().await?)
    }
}
