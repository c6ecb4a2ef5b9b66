use async_trait::async_trait;
use dashmap::DashMap;
use market_core::{
    CacheQuery, CacheStats, CacheStore, MarketClass, MarketRecord, Scope, StoreError,
};

/// Process-local cache store keyed by (symbol, market).
#[derive(Default)]
pub struct MemoryCacheStore {
    records: DashMap<(String, MarketClass), MarketRecord>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn sorted(&self, query: &CacheQuery) -> Vec<MarketRecord> {
        let mut matched: Vec<MarketRecord> = self
            .records
            .iter()
            .filter(|entry| query.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        matched.sort_by(|a, b| b.last_update.cmp(&a.last_update));
        matched
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn upsert(&self, record: &MarketRecord) -> Result<(), StoreError> {
        let mut record = record.clone();
        record.symbol = record.symbol.to_uppercase();
        self.records
            .insert((record.symbol.clone(), record.market), record);
        Ok(())
    }

    async fn clear_scope(&self, scope: Scope) -> Result<u64, StoreError> {
        let before = self.records.len();
        self.records.retain(|(_, market), _| !scope.includes(*market));
        Ok((before - self.records.len()) as u64)
    }

    async fn read(&self, query: &CacheQuery) -> Result<Vec<MarketRecord>, StoreError> {
        let mut records = self.sorted(query);
        records.truncate(query.limit);
        Ok(records)
    }

    async fn read_one(&self, symbol: &str) -> Result<Option<MarketRecord>, StoreError> {
        let query = CacheQuery::all(Some(1)).with_symbol(symbol);
        Ok(self.sorted(&query).into_iter().next())
    }

    async fn stats(&self) -> Result<CacheStats, StoreError> {
        let mut stats = CacheStats::default();
        for entry in self.records.iter() {
            let record = entry.value();
            stats.total_records += 1;
            match record.market {
                MarketClass::Usa => stats.usa_records += 1,
                MarketClass::Crypto => stats.crypto_records += 1,
            }
            if stats.last_update.map_or(true, |t| record.last_update > t) {
                stats.last_update = Some(record.last_update);
            }
        }
        Ok(stats)
    }
}
