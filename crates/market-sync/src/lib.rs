//! Keeps the market cache fresh and serves reads from it.
//!
//! The ingestion service repopulates the cache on a schedule, the resilience
//! client answers reads (falling back to the provider when the cache is
//! empty), and [`MarketDataService`] is the control-plane facade over both.

pub mod config;
pub mod ingestion;
pub mod resilience;
pub mod scheduler;
pub mod service;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{Pacing, ProviderLimiters, SyncConfig};
pub use ingestion::{IngestionService, RefreshReport};
pub use resilience::ResilienceClient;
pub use scheduler::{JobStatus, RefreshCoordinator, RefreshOutcome, Scheduler};
pub use service::{CompanyNews, MarketDataService, ServiceError, ServiceStatus};
