//! Application state and wiring shared by `main` and the tests.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tracing::info;

use questsync_core::progress::AuthoritativeStore;
use questsync_storage_sqlite::{create_pool, run_migrations, spawn_writer, SqliteProgressStore};

use crate::api;
use crate::config::ServerConfig;

pub struct AppState {
    pub store: Arc<dyn AuthoritativeStore>,
    pub total_locations: u64,
}

impl AppState {
    pub fn new(store: Arc<dyn AuthoritativeStore>, total_locations: u64) -> Self {
        Self {
            store,
            total_locations,
        }
    }
}

/// Open the SQLite database named by `config` and build the state around it.
pub fn build_state(config: &ServerConfig) -> anyhow::Result<Arc<AppState>> {
    if let Some(parent) = Path::new(&config.db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    run_migrations(&config.db_path).context("running migrations")?;
    let pool = create_pool(&config.db_path).context("opening connection pool")?;
    let writer = spawn_writer(pool.as_ref().clone());
    let store = SqliteProgressStore::new(pool, writer, config.total_locations);
    info!(
        "Progress store ready at {} ({} locations)",
        config.db_path, config.total_locations
    );
    Ok(Arc::new(AppState::new(
        Arc::new(store),
        config.total_locations,
    )))
}

pub fn app_router(state: Arc<AppState>) -> Router {
    api::router().with_state(state)
}
