//! Error types for the progress API client.

use questsync_core::errors::{RetryClass, StoreError, TransientKind};
use questsync_core::progress::LocationSeq;
use thiserror::Error;

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, SyncClientError>;

#[derive(Debug, Error)]
pub enum SyncClientError {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// API error response from the progress service
    #[error("API error ({status}) {code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    /// The service rejected the sequence number.
    #[error("Location {location} is outside the trail (1..={total})")]
    InvalidLocation { location: LocationSeq, total: u64 },

    /// Invalid request (bad base URL, etc.)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Identity could not be sent as a credential
    #[error("Authentication error: {0}")]
    Auth(String),
}

impl SyncClientError {
    pub fn api(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    /// HTTP status if this is an API error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Classify error for retry policy.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Api { status, .. } => match *status {
                401 | 403 => RetryClass::ReauthRequired,
                408 | 409 | 423 | 425 | 429 => RetryClass::Retryable,
                500..=599 => RetryClass::Retryable,
                _ => RetryClass::Permanent,
            },
            Self::Http(err) if err.is_decode() => RetryClass::Permanent,
            Self::Http(_) => RetryClass::Retryable,
            Self::Json(_) => RetryClass::Permanent,
            Self::InvalidLocation { .. } => RetryClass::Permanent,
            Self::InvalidRequest(_) => RetryClass::Permanent,
            Self::Auth(_) => RetryClass::ReauthRequired,
        }
    }
}

impl From<SyncClientError> for StoreError {
    fn from(err: SyncClientError) -> Self {
        let class = err.retry_class();
        match err {
            SyncClientError::InvalidLocation { location, total } => {
                StoreError::InvalidLocation { location, total }
            }
            SyncClientError::Http(http) if class == RetryClass::Retryable => {
                // A connect failure never reached the server; anything that
                // broke after dispatch may have been applied.
                let kind = if http.is_connect() {
                    TransientKind::Connectivity
                } else if http.is_timeout() {
                    TransientKind::Timeout
                } else if http.is_request() || http.is_body() {
                    TransientKind::Interrupted
                } else {
                    TransientKind::Connectivity
                };
                StoreError::transient(kind, http.to_string())
            }
            other => match class {
                RetryClass::Retryable => {
                    StoreError::transient(TransientKind::Server, other.to_string())
                }
                RetryClass::ReauthRequired => StoreError::unauthorized(other.to_string()),
                RetryClass::Permanent => StoreError::protocol(other.to_string()),
            },
        }
    }
}
