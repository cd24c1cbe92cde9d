//! API error type rendered as `{"code": ..., "message": ...}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

use questsync_core::errors::StoreError;
use questsync_core::progress::encoding::opt_int_string;
use questsync_core::progress::LocationSeq;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("Location {location} is outside the trail (1..={total})")]
    InvalidLocation { location: LocationSeq, total: u64 },

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none", with = "opt_int_string")]
    location: Option<LocationSeq>,
    #[serde(skip_serializing_if = "Option::is_none", with = "opt_int_string")]
    total: Option<u64>,
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            Self::InvalidLocation { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_LOCATION"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        let (location, total) = match &self {
            Self::InvalidLocation { location, total } => (Some(*location), Some(*total)),
            _ => (None, None),
        };
        let body = ErrorBody {
            code,
            message: self.to_string(),
            location,
            total,
        };
        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidLocation { location, total } => {
                Self::InvalidLocation { location, total }
            }
            StoreError::Unauthorized(message) => Self::Unauthorized(message),
            other => Self::Internal(other.to_string()),
        }
    }
}
