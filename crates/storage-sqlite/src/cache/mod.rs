//! Durable [`LocalCache`](questsync_core::progress::LocalCache) backed by SQLite.

mod model;
mod repository;

pub use model::CacheEntryDB;
pub use repository::SqliteLocalCache;
