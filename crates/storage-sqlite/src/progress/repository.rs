use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use log::debug;

use questsync_core::errors::Result;
use questsync_core::progress::{AuthoritativeStore, Identity, LocationSeq, ProgressRecord};

use super::model::{ProgressCompletionDB, ProgressRecordDB};
use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::StorageError;
use crate::schema::{progress_completions, progress_records};

fn to_db(value: u64) -> Result<i64> {
    Ok(i64::try_from(value)
        .map_err(|_| StorageError::OutOfRange(format!("{} does not fit in a column", value)))?)
}

fn from_db(value: i64) -> Result<u64> {
    Ok(u64::try_from(value)
        .map_err(|_| StorageError::OutOfRange(format!("negative stored value {}", value)))?)
}

/// SQLite-backed [`AuthoritativeStore`].
///
/// All writes go through the single [`WriteHandle`], which serializes them
/// across identities as well as within one.
pub struct SqliteProgressStore {
    pool: Arc<DbPool>,
    writer: WriteHandle,
    total_locations: u64,
}

impl SqliteProgressStore {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle, total_locations: u64) -> Self {
        Self {
            pool,
            writer,
            total_locations,
        }
    }

    fn load(conn: &mut SqliteConnection, identity: &str) -> Result<Option<ProgressRecord>> {
        let Some(row) = progress_records::table
            .find(identity)
            .select(ProgressRecordDB::as_select())
            .first::<ProgressRecordDB>(conn)
            .optional()
            .map_err(StorageError::from)?
        else {
            return Ok(None);
        };

        let completed = progress_completions::table
            .filter(progress_completions::identity.eq(identity))
            .order(progress_completions::position.asc())
            .select(progress_completions::location_seq)
            .load::<i64>(conn)
            .map_err(StorageError::from)?
            .into_iter()
            .map(from_db)
            .collect::<Result<Vec<_>>>()?;
        let last = row.last_completed_location.map(from_db).transpose()?;
        let record = ProgressRecord::from_parts(completed, last, from_db(row.total_locations)?)?;
        Ok(Some(record))
    }

    /// Insert the header row for a first-time identity; no-op otherwise.
    fn ensure_row(conn: &mut SqliteConnection, identity: &str, total: u64) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let row = ProgressRecordDB {
            identity: identity.to_string(),
            total_locations: to_db(total)?,
            last_completed_location: None,
            created_at: now.clone(),
            updated_at: now,
        };
        diesel::insert_or_ignore_into(progress_records::table)
            .values(&row)
            .execute(conn)
            .map_err(StorageError::from)?;
        Ok(())
    }
}

#[async_trait]
impl AuthoritativeStore for SqliteProgressStore {
    async fn write(&self, identity: &Identity, location: LocationSeq) -> Result<ProgressRecord> {
        // Reject before queueing anything on the writer.
        ProgressRecord::empty(self.total_locations).with_completion(location)?;

        let key = identity.as_str().to_string();
        let total = self.total_locations;
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<ProgressRecord> {
                Self::ensure_row(conn, &key, total)?;
                let current = Self::load(conn, &key)?
                    .unwrap_or_else(|| ProgressRecord::empty(total));
                if current.contains(location) {
                    return Ok(current);
                }

                let now = Utc::now().to_rfc3339();
                let completion = ProgressCompletionDB {
                    identity: key.clone(),
                    location_seq: to_db(location)?,
                    position: i32::try_from(current.completed_count()).map_err(|_| {
                        StorageError::OutOfRange("too many completions".to_string())
                    })?,
                    completed_at: now.clone(),
                };
                diesel::insert_into(progress_completions::table)
                    .values(&completion)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                diesel::update(progress_records::table.find(key.as_str()))
                    .set((
                        progress_records::last_completed_location.eq(Some(to_db(location)?)),
                        progress_records::total_locations.eq(to_db(total)?),
                        progress_records::updated_at.eq(now),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;

                debug!("Recorded location {} for {}", location, key);
                current.with_completion(location)
            })
            .await
    }

    async fn read(&self, identity: &Identity) -> Result<ProgressRecord> {
        {
            let mut conn = get_connection(&self.pool)?;
            if let Some(record) = Self::load(&mut conn, identity.as_str())? {
                return Ok(record);
            }
        }

        let key = identity.as_str().to_string();
        let total = self.total_locations;
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<ProgressRecord> {
                Self::ensure_row(conn, &key, total)?;
                Ok(Self::load(conn, &key)?.unwrap_or_else(|| ProgressRecord::empty(total)))
            })
            .await
    }
}
