//! SQLite persistence for questsync: the durable client cache and a
//! server-side authoritative store.

pub mod cache;
pub mod db;
pub mod errors;
pub mod progress;
pub mod schema;

pub use cache::SqliteLocalCache;
pub use db::{create_pool, get_connection, init, open, run_migrations, spawn_writer, WriteHandle};
pub use errors::StorageError;
pub use progress::SqliteProgressStore;
