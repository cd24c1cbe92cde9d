use diesel::prelude::*;

#[derive(Queryable, Identifiable, Insertable, AsChangeset, Selectable, Debug, Clone)]
#[diesel(primary_key(identity))]
#[diesel(table_name = crate::schema::progress_records)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ProgressRecordDB {
    pub identity: String,
    pub total_locations: i64,
    pub last_completed_location: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

/// One completed location. `position` keeps insertion order.
#[derive(Queryable, Identifiable, Insertable, Selectable, Debug, Clone)]
#[diesel(primary_key(identity, location_seq))]
#[diesel(table_name = crate::schema::progress_completions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ProgressCompletionDB {
    pub identity: String,
    pub location_seq: i64,
    pub position: i32,
    pub completed_at: String,
}
