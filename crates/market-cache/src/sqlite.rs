use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use market_core::{
    CacheQuery, CacheStats, CacheStore, MarketClass, MarketRecord, Scope, StoreError,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS market_records (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        symbol TEXT NOT NULL,
        market TEXT NOT NULL CHECK (market IN ('USA', 'CRYPTO')),
        price REAL NOT NULL,
        open REAL NOT NULL,
        high REAL NOT NULL,
        low REAL NOT NULL,
        volume REAL NOT NULL DEFAULT 0,
        price_change REAL NOT NULL DEFAULT 0,
        change_percent REAL NOT NULL DEFAULT 0,
        last_update TEXT NOT NULL,
        provenance TEXT NOT NULL,
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        UNIQUE (symbol, market)
    )",
    "CREATE INDEX IF NOT EXISTS idx_market_records_last_update ON market_records(last_update DESC)",
];

const SELECT_COLUMNS: &str = "SELECT symbol, market, price, open, high, low, volume, price_change, \
     change_percent, last_update, provenance FROM market_records";

#[derive(Clone)]
pub struct SqliteCacheStore {
    pool: SqlitePool,
}

impl SqliteCacheStore {
    /// Open (creating if missing) the database at `database_url` and make
    /// sure the schema exists.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        Self::connect_with(database_url, 5).await
    }

    /// Single-connection in-memory database. Every pooled connection to
    /// `sqlite::memory:` is its own database, hence one connection.
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::connect_with("sqlite::memory:", 1).await
    }

    pub async fn connect_with(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(db_err)?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        let store = Self { pool };
        store.init_schema().await?;
        tracing::info!("Cache store connected ({})", database_url);
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn upsert(&self, record: &MarketRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO market_records
             (symbol, market, price, open, high, low, volume, price_change, change_percent, last_update, provenance)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(symbol, market) DO UPDATE SET
                price = excluded.price,
                open = excluded.open,
                high = excluded.high,
                low = excluded.low,
                volume = excluded.volume,
                price_change = excluded.price_change,
                change_percent = excluded.change_percent,
                last_update = excluded.last_update,
                provenance = excluded.provenance",
        )
        .bind(record.symbol.to_uppercase())
        .bind(record.market.as_str())
        .bind(record.price)
        .bind(record.open)
        .bind(record.high)
        .bind(record.low)
        .bind(record.volume)
        .bind(record.change)
        .bind(record.change_percent)
        .bind(encode_ts(record.last_update))
        .bind(record.provenance.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn clear_scope(&self, scope: Scope) -> Result<u64, StoreError> {
        let result = match scope {
            Scope::All => sqlx::query("DELETE FROM market_records")
                .execute(&self.pool)
                .await,
            Scope::Market(market) => sqlx::query("DELETE FROM market_records WHERE market = ?")
                .bind(market.as_str())
                .execute(&self.pool)
                .await,
        }
        .map_err(db_err)?;

        tracing::debug!("Cleared {} records for scope {}", result.rows_affected(), scope);
        Ok(result.rows_affected())
    }

    async fn read(&self, query: &CacheQuery) -> Result<Vec<MarketRecord>, StoreError> {
        let sql = format!(
            "{} WHERE (?1 IS NULL OR market = ?1) AND (?2 IS NULL OR symbol = ?2)
             ORDER BY last_update DESC LIMIT ?3",
            SELECT_COLUMNS
        );

        let rows: Vec<RecordRow> = sqlx::query_as(&sql)
            .bind(query.market.map(|m| m.as_str()))
            .bind(query.symbol.as_deref())
            .bind(query.limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.into_iter().map(MarketRecord::try_from).collect()
    }

    async fn read_one(&self, symbol: &str) -> Result<Option<MarketRecord>, StoreError> {
        let sql = format!("{} WHERE symbol = ? ORDER BY last_update DESC LIMIT 1", SELECT_COLUMNS);

        let row: Option<RecordRow> = sqlx::query_as(&sql)
            .bind(symbol.trim().to_uppercase())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.map(MarketRecord::try_from).transpose()
    }

    async fn stats(&self) -> Result<CacheStats, StoreError> {
        let (total, usa, crypto, last): (i64, Option<i64>, Option<i64>, Option<String>) =
            sqlx::query_as(
                "SELECT COUNT(*),
                        SUM(CASE WHEN market = 'USA' THEN 1 ELSE 0 END),
                        SUM(CASE WHEN market = 'CRYPTO' THEN 1 ELSE 0 END),
                        MAX(last_update)
                 FROM market_records",
            )
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(CacheStats {
            total_records: total.max(0) as u64,
            usa_records: usa.unwrap_or(0).max(0) as u64,
            crypto_records: crypto.unwrap_or(0).max(0) as u64,
            last_update: last.as_deref().map(decode_ts).transpose()?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    symbol: String,
    market: String,
    price: f64,
    open: f64,
    high: f64,
    low: f64,
    volume: f64,
    price_change: f64,
    change_percent: f64,
    last_update: String,
    provenance: String,
}

impl TryFrom<RecordRow> for MarketRecord {
    type Error = StoreError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        Ok(MarketRecord {
            market: MarketClass::from_str(&row.market)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            provenance: row.provenance.parse().map_err(StoreError::Corrupt)?,
            last_update: decode_ts(&row.last_update)?,
            symbol: row.symbol,
            price: row.price,
            open: row.open,
            high: row.high,
            low: row.low,
            volume: row.volume,
            change: row.price_change,
            change_percent: row.change_percent,
        })
    }
}

// Fixed-width UTC so that text ordering matches time ordering
fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_ts(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{}': {}", s, e)))
}

fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}
