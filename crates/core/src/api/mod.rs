//! UI-facing façade over the [`SyncCoordinator`].
//!
//! The façade holds no progress state of its own: every call resolves the
//! current identity, delegates to the coordinator, and shapes the outcome into
//! a view the UI can render directly. Network degradation is never an error
//! here; a queued completion comes back as [`CompletionStatus::Queued`].

mod background;

use std::sync::Arc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::errors::{Delivery, SyncError};
use crate::progress::{
    CacheEntry, EntrySyncState, Identity, IdentityProvider, LocationResolver, LocationSeq,
    ProgressRecord, StageFlags,
};
use crate::sync::{ReconcileReport, ReconcileStatus, ReconcileTrigger, SyncCoordinator};

pub use background::{spawn_reconcile_loop, ReconcileLoop};

// ─────────────────────────────────────────────────────────────────────────────
// Views
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressView {
    pub completed_count: usize,
    pub total_locations: u64,
    pub completed_locations: Vec<LocationSeq>,
    pub last_completed_location: Option<LocationSeq>,
    pub stage_flags: StageFlags,
    pub synced: bool,
    pub sync_state: EntrySyncState,
}

impl ProgressView {
    fn from_entry(entry: &CacheEntry) -> Self {
        Self::from_record(&entry.record, entry.state)
    }

    fn from_record(record: &ProgressRecord, state: EntrySyncState) -> Self {
        Self {
            completed_count: record.completed_count(),
            total_locations: record.total_locations(),
            completed_locations: record.completed().to_vec(),
            last_completed_location: record.last_completed(),
            stage_flags: record.stage_flags(),
            synced: state.is_synced(),
            sync_state: state,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    Confirmed,
    /// Saved locally and queued; success with a caveat.
    Queued,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionView {
    pub location: LocationSeq,
    pub status: CompletionStatus,
    pub message: String,
    pub already_completed: bool,
    pub requires_reauth: bool,
    pub attempts: u32,
    pub error: Option<ApiErrorKind>,
    pub progress: ProgressView,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileView {
    pub trigger: ReconcileTrigger,
    pub status: ReconcileStatus,
    pub replayed: Vec<LocationSeq>,
    pub pending: Vec<LocationSeq>,
    pub dropped: Vec<LocationSeq>,
    pub attempts: u32,
    pub progress: Option<ProgressView>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorKind {
    Unauthenticated,
    InvalidLocation,
    UnknownCode,
    Unavailable,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    fn signed_out() -> Self {
        Self::new(ApiErrorKind::Unauthenticated, "Sign in to record progress.")
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        let kind = match &err {
            SyncError::Unauthorized(_) => ApiErrorKind::Unauthenticated,
            SyncError::InvalidLocation { .. } => ApiErrorKind::InvalidLocation,
            SyncError::Queued { .. } | SyncError::Unavailable { .. } => ApiErrorKind::Unavailable,
            SyncError::Rejected(_) | SyncError::LocalCache(_) | SyncError::Interrupted(_) => {
                ApiErrorKind::Internal
            }
        };
        Self::new(kind, err.to_string())
    }
}

fn queued_message(delivery: Delivery) -> &'static str {
    match delivery {
        Delivery::NotDelivered => "Saved on this device. It will sync when you're back online.",
        Delivery::Unknown => {
            "Saved on this device. The server may already have it; it will sync automatically."
        }
        Delivery::Unverified => {
            "Saved on this device. The server has not shown it yet; it will sync automatically."
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Façade
// ─────────────────────────────────────────────────────────────────────────────

pub struct QuestCompletionApi {
    coordinator: Arc<SyncCoordinator>,
    identity: Arc<dyn IdentityProvider>,
    resolver: Option<Arc<dyn LocationResolver>>,
}

impl QuestCompletionApi {
    pub fn new(coordinator: Arc<SyncCoordinator>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            coordinator,
            identity,
            resolver: None,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn LocationResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    fn identity(&self) -> Result<Identity, ApiError> {
        self.identity
            .current_identity()
            .ok_or_else(ApiError::signed_out)
    }

    async fn progress_or_empty(&self, identity: &Identity) -> ProgressView {
        match self.coordinator.cached(identity).await {
            Ok(Some(entry)) => ProgressView::from_entry(&entry),
            Ok(None) => self.empty_progress(),
            Err(err) => {
                warn!("Reading cached progress for {} failed: {}", identity, err);
                self.empty_progress()
            }
        }
    }

    fn empty_progress(&self) -> ProgressView {
        let record = ProgressRecord::empty(self.coordinator.config().total_locations);
        ProgressView::from_record(&record, EntrySyncState::Confirmed)
    }

    /// Mark `location` completed for the signed-in user.
    pub async fn complete(&self, location: LocationSeq) -> Result<CompletionView, ApiError> {
        let identity = self.identity()?;
        let outcome = self.coordinator.complete(&identity, location).await;
        let progress = self.progress_or_empty(&identity).await;

        let view = match outcome {
            Ok(completion) => CompletionView {
                location,
                status: CompletionStatus::Confirmed,
                message: if completion.already_completed {
                    format!("Location {} was already completed.", location)
                } else {
                    format!("Location {} completed.", location)
                },
                already_completed: completion.already_completed,
                requires_reauth: false,
                attempts: completion.attempts,
                error: None,
                progress,
            },
            Err(SyncError::Queued {
                attempts, delivery, ..
            }) => CompletionView {
                location,
                status: CompletionStatus::Queued,
                message: queued_message(delivery).to_string(),
                already_completed: false,
                requires_reauth: false,
                attempts,
                error: None,
                progress,
            },
            Err(err) => {
                let requires_reauth = err.requires_reauth();
                let api_error = ApiError::from(err);
                CompletionView {
                    location,
                    status: CompletionStatus::Failed,
                    message: api_error.message,
                    already_completed: false,
                    requires_reauth,
                    attempts: 0,
                    error: Some(api_error.kind),
                    progress,
                }
            }
        };
        Ok(view)
    }

    /// Resolve a scanned code, then complete its location.
    pub async fn complete_scanned(&self, code: &str) -> Result<CompletionView, ApiError> {
        let resolved = self
            .resolver
            .as_ref()
            .and_then(|resolver| resolver.resolve(code))
            .ok_or_else(|| {
                ApiError::new(
                    ApiErrorKind::UnknownCode,
                    format!("Code '{}' does not match any location.", code),
                )
            })?;
        debug!(
            "Scanned code resolved to {} (sequence {})",
            resolved.location_id, resolved.sequence
        );
        self.complete(resolved.sequence).await
    }

    /// Cached progress, fetched from the server the first time.
    pub async fn get_progress(&self) -> Result<ProgressView, ApiError> {
        let identity = self.identity()?;
        if let Some(entry) = self.coordinator.cached(&identity).await? {
            return Ok(ProgressView::from_entry(&entry));
        }
        self.refresh_for(&identity).await
    }

    /// Always reads the server.
    pub async fn refresh_progress(&self) -> Result<ProgressView, ApiError> {
        let identity = self.identity()?;
        self.refresh_for(&identity).await
    }

    async fn refresh_for(&self, identity: &Identity) -> Result<ProgressView, ApiError> {
        let entry = self.coordinator.fetch(identity).await?;
        Ok(ProgressView::from_entry(&entry))
    }

    pub async fn reconcile(&self, trigger: ReconcileTrigger) -> Result<ReconcileView, ApiError> {
        let identity = self.identity()?;
        info!("Reconcile for {} triggered by {}", identity, trigger);
        let ReconcileReport {
            status,
            replayed,
            pending,
            dropped,
            attempts,
            record,
        } = self.coordinator.reconcile(&identity).await?;
        let progress = match record {
            Some(_) => Some(self.progress_or_empty(&identity).await),
            None => None,
        };
        Ok(ReconcileView {
            trigger,
            status,
            replayed,
            pending,
            dropped,
            attempts,
            progress,
        })
    }

    /// Forget local progress for the signed-in user (log out).
    pub async fn clear_local_state(&self) -> Result<(), ApiError> {
        let identity = self.identity()?;
        self.coordinator.clear_local_state(&identity).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests;
