use diesel::prelude::*;

use questsync_core::errors::Result;
use questsync_core::progress::{CacheEntry, Identity};

/// One row per identity. `payload` holds the whole entry as JSON; `synced` is
/// a denormalized copy used by cheap pending-work queries.
#[derive(Queryable, Identifiable, Insertable, AsChangeset, Selectable, Debug, Clone)]
#[diesel(primary_key(identity))]
#[diesel(table_name = crate::schema::cache_entries)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CacheEntryDB {
    pub identity: String,
    pub payload: String,
    pub synced: bool,
    pub updated_at: i64,
}

impl CacheEntryDB {
    pub fn from_entry(identity: &Identity, entry: &CacheEntry) -> Result<Self> {
        Ok(Self {
            identity: identity.as_str().to_string(),
            payload: serde_json::to_string(entry)?,
            synced: entry.is_synced(),
            updated_at: entry.updated_at,
        })
    }

    pub fn into_entry(self) -> Result<CacheEntry> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}
