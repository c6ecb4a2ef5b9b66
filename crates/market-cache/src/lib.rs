//! Cache store backends: SQLite for the daemon, an in-memory map for
//! embedding and tests. Both enforce one record per (symbol, market).

mod memory;
mod sqlite;

pub use memory::MemoryCacheStore;
pub use sqlite::SqliteCacheStore;
