//! Authoritative progress records persisted in SQLite.

mod model;
mod repository;

pub use model::{ProgressCompletionDB, ProgressRecordDB};
pub use repository::SqliteProgressStore;
