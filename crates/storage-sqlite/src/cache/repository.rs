use std::sync::Arc;

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use log::debug;

use questsync_core::errors::Result;
use questsync_core::progress::{CacheEntry, EntrySyncState, Identity, LocalCache};

use super::model::CacheEntryDB;
use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::StorageError;
use crate::schema::cache_entries;

pub struct SqliteLocalCache {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl SqliteLocalCache {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }

    fn load(conn: &mut SqliteConnection, identity: &str) -> Result<Option<CacheEntryDB>> {
        Ok(cache_entries::table
            .find(identity)
            .select(CacheEntryDB::as_select())
            .first::<CacheEntryDB>(conn)
            .optional()
            .map_err(StorageError::from)?)
    }

    fn upsert(conn: &mut SqliteConnection, row: &CacheEntryDB) -> Result<()> {
        diesel::insert_into(cache_entries::table)
            .values(row)
            .on_conflict(cache_entries::identity)
            .do_update()
            .set(row)
            .execute(conn)
            .map_err(StorageError::from)?;
        Ok(())
    }

    /// Identities whose entry still has unconfirmed intent.
    pub fn list_unsynced(&self) -> Result<Vec<Identity>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = cache_entries::table
            .filter(cache_entries::synced.eq(false))
            .select(cache_entries::identity)
            .order(cache_entries::updated_at.asc())
            .load::<String>(&mut conn)
            .map_err(StorageError::from)?;
        rows.into_iter().map(Identity::new).collect()
    }
}

#[async_trait]
impl LocalCache for SqliteLocalCache {
    async fn get(&self, identity: &Identity) -> Result<Option<CacheEntry>> {
        let mut conn = get_connection(&self.pool)?;
        Self::load(&mut conn, identity.as_str())?
            .map(CacheEntryDB::into_entry)
            .transpose()
    }

    async fn put(&self, identity: &Identity, entry: CacheEntry) -> Result<()> {
        let row = CacheEntryDB::from_entry(identity, &entry)?;
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<()> {
                Self::upsert(conn, &row)
            })
            .await
    }

    async fn clear(&self, identity: &Identity) -> Result<()> {
        let key = identity.as_str().to_string();
        let removed = self
            .writer
            .exec(move |conn: &mut SqliteConnection| -> Result<usize> {
                Ok(diesel::delete(cache_entries::table.find(key))
                    .execute(conn)
                    .map_err(StorageError::from)?)
            })
            .await?;
        debug!("Cleared {} cache entr(ies) for {}", removed, identity);
        Ok(())
    }

    async fn mark_unsynced(&self, identity: &Identity, attempts: u32) -> Result<()> {
        let key = identity.clone();
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<()> {
                let Some(row) = Self::load(conn, key.as_str())? else {
                    return Ok(());
                };
                let entry = row
                    .into_entry()?
                    .with_state(EntrySyncState::Unsynced { attempts });
                Self::upsert(conn, &CacheEntryDB::from_entry(&key, &entry)?)
            })
            .await
    }

    async fn has_unsynced(&self, identity: &Identity) -> Result<bool> {
        let mut conn = get_connection(&self.pool)?;
        let synced = cache_entries::table
            .find(identity.as_str())
            .select(cache_entries::synced)
            .first::<bool>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;
        Ok(synced == Some(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use questsync_core::progress::ProgressRecord;
    use tempfile::tempdir;

    use crate::db::{create_pool, init, run_migrations, spawn_writer};

    fn setup_db(data_dir: &str) -> SqliteLocalCache {
        let db_path = init(data_dir).expect("init db");
        run_migrations(&db_path).expect("migrate db");
        let pool = create_pool(&db_path).expect("create pool");
        let writer = spawn_writer(pool.as_ref().clone());
        SqliteLocalCache::new(pool, writer)
    }

    fn alice() -> Identity {
        Identity::new("alice").expect("identity")
    }

    fn record(locations: &[u64]) -> ProgressRecord {
        let mut rec = ProgressRecord::empty(3);
        for loc in locations {
            rec = rec.with_completion(*loc).expect("in range");
        }
        rec
    }

    #[tokio::test]
    async fn put_then_get_round_trips_entry() {
        let dir = tempdir().expect("tempdir");
        let cache = setup_db(&dir.path().to_string_lossy());

        assert!(cache.get(&alice()).await.expect("get").is_none());
        let entry = CacheEntry::new(record(&[2, 1]), EntrySyncState::Optimistic);
        cache.put(&alice(), entry.clone()).await.expect("put");
        assert_eq!(cache.get(&alice()).await.expect("get"), Some(entry));
        assert!(cache.has_unsynced(&alice()).await.expect("has_unsynced"));
    }

    #[tokio::test]
    async fn mark_unsynced_updates_state_and_column() {
        let dir = tempdir().expect("tempdir");
        let cache = setup_db(&dir.path().to_string_lossy());

        cache
            .put(&alice(), CacheEntry::confirmed(record(&[1])))
            .await
            .expect("put");
        assert!(!cache.has_unsynced(&alice()).await.expect("has_unsynced"));
        assert!(cache.list_unsynced().expect("list").is_empty());

        cache.mark_unsynced(&alice(), 3).await.expect("mark");
        let entry = cache.get(&alice()).await.expect("get").expect("entry");
        assert_eq!(entry.state, EntrySyncState::Unsynced { attempts: 3 });
        assert_eq!(entry.record.completed(), &[1]);
        assert_eq!(cache.list_unsynced().expect("list"), vec![alice()]);

        // Missing entries stay missing.
        let bob = Identity::new("bob").expect("identity");
        cache.mark_unsynced(&bob, 1).await.expect("mark");
        assert!(cache.get(&bob).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn clear_removes_only_that_identity() {
        let dir = tempdir().expect("tempdir");
        let cache = setup_db(&dir.path().to_string_lossy());
        let bob = Identity::new("bob").expect("identity");

        cache
            .put(&alice(), CacheEntry::confirmed(record(&[1])))
            .await
            .expect("put");
        cache
            .put(&bob, CacheEntry::confirmed(record(&[3])))
            .await
            .expect("put");
        cache.clear(&alice()).await.expect("clear");

        assert!(cache.get(&alice()).await.expect("get").is_none());
        assert!(cache.get(&bob).await.expect("get").is_some());
    }

    #[tokio::test]
    async fn entries_survive_reopening_the_database() {
        let dir = tempdir().expect("tempdir");
        let data_dir = dir.path().to_string_lossy().to_string();
        let entry = CacheEntry::new(record(&[1, 2]), EntrySyncState::Unsynced { attempts: 3 });
        {
            let cache = setup_db(&data_dir);
            cache.put(&alice(), entry.clone()).await.expect("put");
        }

        let reopened = setup_db(&data_dir);
        assert_eq!(reopened.get(&alice()).await.expect("get"), Some(entry));
        assert!(reopened.has_unsynced(&alice()).await.expect("has_unsynced"));
    }

    #[tokio::test]
    async fn stored_payload_uses_string_encoded_integers() {
        let dir = tempdir().expect("tempdir");
        let cache = setup_db(&dir.path().to_string_lossy());
        cache
            .put(&alice(), CacheEntry::confirmed(record(&[3])))
            .await
            .expect("put");

        let mut conn = get_connection(&cache.pool).expect("conn");
        let row = SqliteLocalCache::load(&mut conn, "alice")
            .expect("load")
            .expect("row");
        let json: serde_json::Value = serde_json::from_str(&row.payload).expect("json");
        assert_eq!(json["completedLocations"], serde_json::json!(["3"]));
        assert_eq!(json["synced"], serde_json::json!(true));
    }
}
