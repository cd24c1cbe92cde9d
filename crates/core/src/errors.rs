//! Error taxonomy shared by stores, the retry executor and the coordinator.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::progress::LocationSeq;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Retry policy class for a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryClass {
    Retryable,
    Permanent,
    ReauthRequired,
}

/// Which kind of transient failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransientKind {
    /// The request never reached the store.
    Connectivity,
    /// The request was dispatched but no answer arrived in time.
    Timeout,
    /// The connection broke after the request was sent.
    Interrupted,
    /// The store answered with a temporary failure (5xx, 429, ...).
    Server,
}

impl fmt::Display for TransientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connectivity => f.write_str("connectivity"),
            Self::Timeout => f.write_str("timeout"),
            Self::Interrupted => f.write_str("interrupted"),
            Self::Server => f.write_str("server"),
        }
    }
}

/// Errors raised by [`AuthoritativeStore`](crate::progress::AuthoritativeStore)
/// and [`LocalCache`](crate::progress::LocalCache) implementations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Sequence number outside `[1, total]`.
    #[error("Location {location} is outside the trail (1..={total})")]
    InvalidLocation { location: LocationSeq, total: u64 },

    /// Caller identity missing or rejected.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Network or server hiccup; worth retrying.
    #[error("Transient {kind} failure: {message}")]
    Transient { kind: TransientKind, message: String },

    /// A write was acknowledged but is not visible on read-back.
    #[error("Location {location} not visible after {attempts} verification reads")]
    VerificationMismatch { location: LocationSeq, attempts: u32 },

    /// Local persistence failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Malformed or unexpected response from the store.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl StoreError {
    pub fn transient(kind: TransientKind, message: impl Into<String>) -> Self {
        Self::Transient {
            kind,
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    /// True when the request may have been applied even though no answer came back.
    pub fn outcome_unknown(&self) -> bool {
        matches!(
            self,
            Self::Transient {
                kind: TransientKind::Timeout | TransientKind::Interrupted,
                ..
            }
        )
    }

    /// Validation and authorization failures. Only these undo a local completion.
    pub fn rejects_completion(&self) -> bool {
        matches!(self, Self::InvalidLocation { .. } | Self::Unauthorized(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(format!("serialization failed: {}", err))
    }
}

/// Errors that know how the retry executor should treat them.
pub trait Retryable {
    fn retry_class(&self) -> RetryClass;

    /// Value used when a single attempt exceeds its timeout.
    fn attempt_timed_out(after: std::time::Duration) -> Self;

    /// The failed attempt may still have been applied by the receiver.
    fn may_have_applied(&self) -> bool {
        false
    }
}

impl Retryable for StoreError {
    fn retry_class(&self) -> RetryClass {
        match self {
            Self::Transient { .. } | Self::VerificationMismatch { .. } => RetryClass::Retryable,
            Self::Unauthorized(_) => RetryClass::ReauthRequired,
            Self::InvalidLocation { .. } | Self::Storage(_) | Self::Protocol(_) => {
                RetryClass::Permanent
            }
        }
    }

    fn attempt_timed_out(after: std::time::Duration) -> Self {
        Self::transient(
            TransientKind::Timeout,
            format!("no response within {} ms", after.as_millis()),
        )
    }

    fn may_have_applied(&self) -> bool {
        self.outcome_unknown()
    }
}

/// What is known about a completion that could not be confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    /// The server never received the write. Saved locally, will sync.
    NotDelivered,
    /// Some attempt reached the server without a usable answer; it may or may not have applied.
    Unknown,
    /// The server acknowledged the write but read-back did not show it.
    Unverified,
}

/// Errors surfaced by the [`SyncCoordinator`](crate::sync::SyncCoordinator).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Kept locally and queued for reconciliation.
    #[error("Location {location} saved locally after {attempts} attempts ({delivery:?})")]
    Queued {
        location: LocationSeq,
        attempts: u32,
        delivery: Delivery,
    },

    #[error("Location {location} is outside the trail (1..={total})")]
    InvalidLocation { location: LocationSeq, total: u64 },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Terminal rejection that is neither validation nor authorization.
    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Local cache error: {0}")]
    LocalCache(String),

    /// The authoritative store could not be reached for a read.
    #[error("Store unavailable after {attempts} attempts: {message}")]
    Unavailable { attempts: u32, message: String },

    /// The background task driving the attempt did not finish.
    #[error("Completion interrupted: {0}")]
    Interrupted(String),
}

impl SyncError {
    /// Fatal errors mean the action did not happen and the UI must say so.
    /// Network degradation (queued or unavailable) is never fatal.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Queued { .. } | Self::Unavailable { .. })
    }

    pub fn requires_reauth(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }

    /// Map a terminal store failure onto the coordinator taxonomy.
    pub(crate) fn from_terminal(err: StoreError) -> Self {
        match err {
            StoreError::InvalidLocation { location, total } => {
                Self::InvalidLocation { location, total }
            }
            StoreError::Unauthorized(message) => Self::Unauthorized(message),
            other => Self::Rejected(other.to_string()),
        }
    }

    pub(crate) fn cache(err: StoreError) -> Self {
        Self::LocalCache(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn retry_class_follows_taxonomy() {
        assert_eq!(
            StoreError::transient(TransientKind::Connectivity, "offline").retry_class(),
            RetryClass::Retryable
        );
        assert_eq!(
            StoreError::VerificationMismatch {
                location: 2,
                attempts: 3
            }
            .retry_class(),
            RetryClass::Retryable
        );
        assert_eq!(
            StoreError::unauthorized("expired").retry_class(),
            RetryClass::ReauthRequired
        );
        assert_eq!(
            StoreError::InvalidLocation {
                location: 9,
                total: 3
            }
            .retry_class(),
            RetryClass::Permanent
        );
    }

    #[test]
    fn timeout_marks_outcome_unknown() {
        let err = StoreError::attempt_timed_out(Duration::from_secs(5));
        assert!(err.outcome_unknown());
        assert!(!StoreError::transient(TransientKind::Connectivity, "x").outcome_unknown());
        assert!(StoreError::transient(TransientKind::Interrupted, "reset").may_have_applied());
    }

    #[test]
    fn only_validation_and_auth_reject_a_completion() {
        assert!(StoreError::unauthorized("expired").rejects_completion());
        assert!(StoreError::InvalidLocation {
            location: 9,
            total: 3
        }
        .rejects_completion());
        assert!(!StoreError::protocol("expected JSON, got <html>").rejects_completion());
        assert!(!StoreError::storage("disk full").rejects_completion());
    }

    #[test]
    fn network_degradation_is_not_fatal() {
        let queued = SyncError::Queued {
            location: 1,
            attempts: 3,
            delivery: Delivery::NotDelivered,
        };
        assert!(!queued.is_fatal());
        assert!(!SyncError::Unavailable {
            attempts: 3,
            message: "offline".into()
        }
        .is_fatal());
        assert!(SyncError::Unauthorized("x".into()).is_fatal());
        assert!(SyncError::Unauthorized("x".into()).requires_reauth());
    }
}
