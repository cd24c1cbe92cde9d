//! Progress endpoints over the authoritative store.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, put};
use axum::{Json, Router};
use tracing::{debug, info};

use questsync_core::progress::{LocationSeq, ProgressRecord};

use crate::auth::BearerIdentity;
use crate::error::{ApiError, ApiResult};
use crate::main_lib::AppState;

async fn get_progress(
    State(state): State<Arc<AppState>>,
    BearerIdentity(identity): BearerIdentity,
) -> ApiResult<Json<ProgressRecord>> {
    debug!("Reading progress for {}", identity);
    let record = state.store.read(&identity).await?;
    Ok(Json(record))
}

async fn complete_location(
    State(state): State<Arc<AppState>>,
    BearerIdentity(identity): BearerIdentity,
    Path(seq): Path<String>,
) -> ApiResult<Json<ProgressRecord>> {
    let location = seq
        .trim()
        .parse::<LocationSeq>()
        .map_err(|_| ApiError::BadRequest(format!("'{}' is not a location sequence", seq)))?;
    let record = state.store.write(&identity, location).await?;
    info!(
        "Location {} recorded for {} ({}/{})",
        location,
        identity,
        record.completed_count(),
        state.total_locations
    );
    Ok(Json(record))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/progress", get(get_progress))
        .route("/progress/locations/:seq", put(complete_location))
}
