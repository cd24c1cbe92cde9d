//! Completion protocol: optimistic cache write, authoritative write,
//! verification, and reconciliation of queued intent.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::config::SyncConfig;
use super::keyed_lock::KeyedLocks;
use super::retry::{Retried, RetryExecutor, RetryFailure};
use crate::errors::{Delivery, StoreError, SyncError};
use crate::progress::{
    AuthoritativeStore, CacheEntry, CompletionPhase, EntrySyncState, Identity, LocalCache,
    LocationSeq, ProgressRecord,
};

pub type CompletionResult = Result<Completion, SyncError>;

type SharedCompletion = Shared<BoxFuture<'static, CompletionResult>>;

/// A completion the authoritative store has confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub location: LocationSeq,
    /// Authoritative record as returned by the store (or the confirmed cache
    /// copy for a duplicate).
    pub record: ProgressRecord,
    /// Network attempts spent, writes plus verification reads.
    pub attempts: u32,
    /// The location was already confirmed locally; nothing was sent.
    pub already_completed: bool,
}

/// Observer for per-attempt phase transitions.
pub trait CompletionReporter: Send + Sync {
    fn report_phase(&self, identity: &Identity, location: LocationSeq, phase: CompletionPhase);
}

pub struct NoOpCompletionReporter;

impl CompletionReporter for NoOpCompletionReporter {
    fn report_phase(&self, _identity: &Identity, _location: LocationSeq, _phase: CompletionPhase) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileStatus {
    /// Nothing was unsynced.
    UpToDate,
    /// Every local completion is now on the server.
    Synced,
    /// Some completions are still queued.
    StillUnsynced,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub status: ReconcileStatus,
    /// Locations written to the server by this pass.
    pub replayed: Vec<LocationSeq>,
    /// Locations still not known to be on the server.
    pub pending: Vec<LocationSeq>,
    /// Locations the server rejected as invalid and that were removed locally.
    pub dropped: Vec<LocationSeq>,
    pub attempts: u32,
    /// Cache record after the pass.
    pub record: Option<ProgressRecord>,
}

impl ReconcileReport {
    fn up_to_date(record: Option<ProgressRecord>) -> Self {
        Self {
            status: ReconcileStatus::UpToDate,
            replayed: Vec::new(),
            pending: Vec::new(),
            dropped: Vec::new(),
            attempts: 0,
            record,
        }
    }
}

enum OptimisticStep {
    AlreadyConfirmed(ProgressRecord),
    Applied {
        prior: Option<CacheEntry>,
        inserted: bool,
    },
}

/// Drives completions and reconciliation for any number of identities.
pub struct SyncCoordinator {
    store: Arc<dyn AuthoritativeStore>,
    cache: Arc<dyn LocalCache>,
    config: SyncConfig,
    retry: RetryExecutor,
    reporter: Arc<dyn CompletionReporter>,
    cache_locks: KeyedLocks<Identity>,
    in_flight: Mutex<HashMap<(Identity, LocationSeq), SharedCompletion>>,
}

impl SyncCoordinator {
    pub fn new(
        store: Arc<dyn AuthoritativeStore>,
        cache: Arc<dyn LocalCache>,
        config: SyncConfig,
    ) -> Self {
        let retry = config.retry_executor();
        Self {
            store,
            cache,
            config,
            retry,
            reporter: Arc::new(NoOpCompletionReporter),
            cache_locks: KeyedLocks::new(),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Sets the reporter notified on every phase transition.
    pub fn with_reporter(mut self, reporter: Arc<dyn CompletionReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Record `location` as completed for `identity`.
    ///
    /// The attempt runs on its own task: dropping the returned future does not
    /// cancel it, and concurrent calls for the same location share one attempt.
    pub async fn complete(
        self: &Arc<Self>,
        identity: &Identity,
        location: LocationSeq,
    ) -> CompletionResult {
        let key = (identity.clone(), location);
        let shared = {
            let mut in_flight = self.in_flight.lock().await;
            if let Some(existing) = in_flight.get(&key) {
                debug!(
                    "Coalescing duplicate completion of location {} for {}",
                    location, identity
                );
                existing.clone()
            } else {
                let coordinator = Arc::clone(self);
                let task_key = key.clone();
                let handle = tokio::spawn(async move {
                    let result = coordinator.run_completion(&task_key.0, task_key.1).await;
                    coordinator.in_flight.lock().await.remove(&task_key);
                    result
                });
                let shared = handle
                    .map(|joined| {
                        joined.unwrap_or_else(|err| Err(SyncError::Interrupted(err.to_string())))
                    })
                    .boxed()
                    .shared();
                in_flight.insert(key, shared.clone());
                shared
            }
        };
        shared.await
    }

    /// Replay every cached completion the server lacks.
    pub async fn reconcile(&self, identity: &Identity) -> Result<ReconcileReport, SyncError> {
        if !self
            .cache
            .has_unsynced(identity)
            .await
            .map_err(SyncError::cache)?
        {
            let cached = self.cache.get(identity).await.map_err(SyncError::cache)?;
            return Ok(ReconcileReport::up_to_date(cached.map(|e| e.record)));
        }
        let Some(cached) = self.cache.get(identity).await.map_err(SyncError::cache)? else {
            return Ok(ReconcileReport::up_to_date(None));
        };

        let mut attempts = 0u32;
        let mut server = match self.read_with_retry(identity).await {
            Ok(read) => {
                attempts += read.attempts;
                read.value
            }
            Err(failure) if failure.exhausted() => {
                attempts += failure.attempts;
                debug!(
                    "Reconcile for {} deferred, store unreachable: {}",
                    identity, failure.error
                );
                let record = self.keep_unsynced(identity, attempts).await?;
                return Ok(ReconcileReport {
                    status: ReconcileStatus::StillUnsynced,
                    replayed: Vec::new(),
                    pending: cached.record.completed().to_vec(),
                    dropped: Vec::new(),
                    attempts,
                    record,
                });
            }
            Err(failure) => return Err(SyncError::from_terminal(failure.error)),
        };

        let missing = cached.record.missing_from(&server);
        let mut replayed = Vec::new();
        let mut pending = Vec::new();
        let mut dropped = Vec::new();

        for (idx, location) in missing.iter().copied().enumerate() {
            match self.write_with_retry(identity, location).await {
                Ok(written) => {
                    attempts += written.attempts;
                    if written.value.contains(location) {
                        replayed.push(location);
                    } else {
                        warn!(
                            "Replay of location {} for {} acknowledged but not applied",
                            location, identity
                        );
                        pending.push(location);
                    }
                    server = written.value.union(&server);
                }
                Err(failure) if failure.exhausted() => {
                    attempts += failure.attempts;
                    // The store is unreachable; leave the rest for the next pass.
                    pending.extend_from_slice(&missing[idx..]);
                    break;
                }
                Err(RetryFailure {
                    error: StoreError::InvalidLocation { location, total },
                    ..
                }) => {
                    warn!(
                        "Dropping location {} for {}: outside the trail (1..={})",
                        location, identity, total
                    );
                    dropped.push(location);
                }
                Err(failure) => return Err(SyncError::from_terminal(failure.error)),
            }
        }

        let _guard = self.cache_locks.lock(identity).await;
        let Some(current) = self.cache.get(identity).await.map_err(SyncError::cache)? else {
            // Cleared while reconciling (log out); do not resurrect it.
            return Ok(ReconcileReport {
                status: ReconcileStatus::StillUnsynced,
                replayed,
                pending,
                dropped,
                attempts,
                record: None,
            });
        };

        let mut merged = server.union(&current.record);
        for location in &dropped {
            merged = merged.without_location(*location);
        }
        let outstanding = merged.missing_from(&server);
        let state = if pending.is_empty() && (outstanding.is_empty() || current.is_synced()) {
            EntrySyncState::Confirmed
        } else if pending.is_empty() {
            // Only completions started after this pass are outstanding.
            current.state
        } else {
            EntrySyncState::Unsynced { attempts }
        };
        let status = if state.is_synced() {
            ReconcileStatus::Synced
        } else {
            ReconcileStatus::StillUnsynced
        };
        self.cache
            .put(identity, CacheEntry::new(merged.clone(), state))
            .await
            .map_err(SyncError::cache)?;

        info!(
            "Reconciled {}: replayed {:?}, pending {:?}, dropped {:?} ({} attempts)",
            identity, replayed, pending, dropped, attempts
        );
        Ok(ReconcileReport {
            status,
            replayed,
            pending,
            dropped,
            attempts,
            record: Some(merged),
        })
    }

    /// Read the authoritative record and merge it into the cache.
    pub async fn fetch(&self, identity: &Identity) -> Result<CacheEntry, SyncError> {
        let server = match self.read_with_retry(identity).await {
            Ok(read) => read.value,
            Err(failure) if failure.exhausted() => {
                return Err(SyncError::Unavailable {
                    attempts: failure.attempts,
                    message: failure.error.to_string(),
                })
            }
            Err(failure) => return Err(SyncError::from_terminal(failure.error)),
        };

        let _guard = self.cache_locks.lock(identity).await;
        let current = self.cache.get(identity).await.map_err(SyncError::cache)?;
        let entry = merge_authoritative(&server, current.as_ref());
        self.cache
            .put(identity, entry.clone())
            .await
            .map_err(SyncError::cache)?;
        Ok(entry)
    }

    /// Current cache entry, if any.
    pub async fn cached(&self, identity: &Identity) -> Result<Option<CacheEntry>, SyncError> {
        self.cache.get(identity).await.map_err(SyncError::cache)
    }

    /// Forget the local mirror for `identity` (log out).
    pub async fn clear_local_state(&self, identity: &Identity) -> Result<(), SyncError> {
        let _guard = self.cache_locks.lock(identity).await;
        self.cache.clear(identity).await.map_err(SyncError::cache)?;
        debug!("Cleared local progress for {}", identity);
        Ok(())
    }

    async fn run_completion(&self, identity: &Identity, location: LocationSeq) -> CompletionResult {
        self.report(identity, location, CompletionPhase::Pending);

        let (prior, inserted) = match self.apply_optimistic(identity, location).await? {
            OptimisticStep::AlreadyConfirmed(record) => {
                debug!(
                    "Location {} already confirmed for {}; skipping write",
                    location, identity
                );
                self.report(identity, location, CompletionPhase::Confirmed);
                return Ok(Completion {
                    location,
                    record,
                    attempts: 0,
                    already_completed: true,
                });
            }
            OptimisticStep::Applied { prior, inserted } => (prior, inserted),
        };
        self.report(identity, location, CompletionPhase::Optimistic);

        match self.write_with_retry(identity, location).await {
            Ok(Retried { value, attempts }) if value.contains(location) => {
                self.confirm(identity, location, value, attempts).await
            }
            Ok(Retried { attempts, .. }) => {
                warn!(
                    "Write of location {} for {} acknowledged without the location; verifying",
                    location, identity
                );
                match self.verify(identity, location).await {
                    Ok(read) => {
                        self.confirm(identity, location, read.value, attempts + read.attempts)
                            .await
                    }
                    Err(failure) => {
                        self.queue(
                            identity,
                            location,
                            attempts + failure.attempts,
                            Delivery::Unverified,
                        )
                        .await
                    }
                }
            }
            Err(failure) if failure.exhausted() => {
                let delivery = if failure.maybe_applied {
                    Delivery::Unknown
                } else {
                    Delivery::NotDelivered
                };
                self.queue(identity, location, failure.attempts, delivery)
                    .await
            }
            Err(failure) if failure.error.rejects_completion() => {
                if inserted {
                    self.rollback(identity, location, prior).await?;
                }
                Err(SyncError::from_terminal(failure.error))
            }
            Err(failure) => {
                // The server may have applied it; reconcile settles the outcome.
                warn!(
                    "Write of location {} for {} failed without a verdict, keeping it queued: {}",
                    location, identity, failure.error
                );
                self.queue(identity, location, failure.attempts, Delivery::Unknown)
                    .await
            }
        }
    }

    async fn apply_optimistic(
        &self,
        identity: &Identity,
        location: LocationSeq,
    ) -> Result<OptimisticStep, SyncError> {
        let _guard = self.cache_locks.lock(identity).await;
        let prior = self.cache.get(identity).await.map_err(SyncError::cache)?;
        let base = prior
            .as_ref()
            .map(|entry| entry.record.clone())
            .unwrap_or_else(|| ProgressRecord::empty(self.config.total_locations));

        if base.contains(location) {
            if let Some(entry) = prior.as_ref().filter(|entry| entry.is_synced()) {
                return Ok(OptimisticStep::AlreadyConfirmed(entry.record.clone()));
            }
            return Ok(OptimisticStep::Applied {
                prior,
                inserted: false,
            });
        }

        let next = base
            .with_completion(location)
            .map_err(SyncError::from_terminal)?;
        // Queued intent already on the entry keeps its marker.
        let state = match prior.as_ref().map(|entry| entry.state) {
            Some(unsynced @ EntrySyncState::Unsynced { .. }) => unsynced,
            _ => EntrySyncState::Optimistic,
        };
        self.cache
            .put(identity, CacheEntry::new(next, state))
            .await
            .map_err(SyncError::cache)?;
        Ok(OptimisticStep::Applied {
            prior,
            inserted: true,
        })
    }

    async fn confirm(
        &self,
        identity: &Identity,
        location: LocationSeq,
        record: ProgressRecord,
        attempts: u32,
    ) -> CompletionResult {
        {
            let _guard = self.cache_locks.lock(identity).await;
            let current = self.cache.get(identity).await.map_err(SyncError::cache)?;
            let entry = merge_authoritative(&record, current.as_ref());
            self.cache
                .put(identity, entry)
                .await
                .map_err(SyncError::cache)?;
        }
        debug!(
            "Location {} confirmed for {} after {} attempts",
            location, identity, attempts
        );
        self.report(identity, location, CompletionPhase::Confirmed);
        Ok(Completion {
            location,
            record,
            attempts,
            already_completed: false,
        })
    }

    async fn queue(
        &self,
        identity: &Identity,
        location: LocationSeq,
        attempts: u32,
        delivery: Delivery,
    ) -> CompletionResult {
        {
            let _guard = self.cache_locks.lock(identity).await;
            let current = self.cache.get(identity).await.map_err(SyncError::cache)?;
            let result = match current {
                Some(entry) if entry.record.contains(location) => {
                    self.cache.mark_unsynced(identity, attempts).await
                }
                other => {
                    // A concurrent confirm replaced the entry; put the intent back.
                    let base = other
                        .map(|entry| entry.record)
                        .unwrap_or_else(|| ProgressRecord::empty(self.config.total_locations));
                    let record = base
                        .with_completion(location)
                        .map_err(SyncError::from_terminal)?;
                    self.cache
                        .put(
                            identity,
                            CacheEntry::new(record, EntrySyncState::Unsynced { attempts }),
                        )
                        .await
                }
            };
            result.map_err(SyncError::cache)?;
        }
        warn!(
            "Location {} for {} queued for reconciliation after {} attempts ({:?})",
            location, identity, attempts, delivery
        );
        self.report(identity, location, CompletionPhase::Queued);
        Err(SyncError::Queued {
            location,
            attempts,
            delivery,
        })
    }

    async fn rollback(
        &self,
        identity: &Identity,
        location: LocationSeq,
        prior: Option<CacheEntry>,
    ) -> Result<(), SyncError> {
        {
            let _guard = self.cache_locks.lock(identity).await;
            let Some(current) = self.cache.get(identity).await.map_err(SyncError::cache)? else {
                return Ok(());
            };
            let restored = current.record.without_location(location);
            let result = match prior {
                None if restored.completed_count() == 0 => self.cache.clear(identity).await,
                Some(prior) if restored.same_locations(&prior.record) => {
                    self.cache.put(identity, prior).await
                }
                _ => {
                    self.cache
                        .put(identity, CacheEntry::new(restored, current.state))
                        .await
                }
            };
            result.map_err(SyncError::cache)?;
        }
        warn!(
            "Rolled back optimistic completion of location {} for {}",
            location, identity
        );
        self.report(identity, location, CompletionPhase::RolledBack);
        Ok(())
    }

    async fn write_with_retry(
        &self,
        identity: &Identity,
        location: LocationSeq,
    ) -> Result<Retried<ProgressRecord>, RetryFailure<StoreError>> {
        let store = &self.store;
        self.retry
            .run(self.config.write_attempts, |attempt| {
                let store = Arc::clone(store);
                let identity = identity.clone();
                async move {
                    debug!(
                        "Writing location {} for {} (attempt {})",
                        location, identity, attempt
                    );
                    store.write(&identity, location).await
                }
            })
            .await
    }

    async fn read_with_retry(
        &self,
        identity: &Identity,
    ) -> Result<Retried<ProgressRecord>, RetryFailure<StoreError>> {
        let store = &self.store;
        self.retry
            .run(self.config.write_attempts, |_| {
                let store = Arc::clone(store);
                let identity = identity.clone();
                async move { store.read(&identity).await }
            })
            .await
    }

    /// Read back until `location` shows up or verification attempts run out.
    async fn verify(
        &self,
        identity: &Identity,
        location: LocationSeq,
    ) -> Result<Retried<ProgressRecord>, RetryFailure<StoreError>> {
        let store = &self.store;
        self.retry
            .run(self.config.verify_attempts, |attempt| {
                let store = Arc::clone(store);
                let identity = identity.clone();
                async move {
                    let record = store.read(&identity).await?;
                    if record.contains(location) {
                        Ok(record)
                    } else {
                        Err(StoreError::VerificationMismatch { location, attempts: attempt })
                    }
                }
            })
            .await
    }

    async fn keep_unsynced(
        &self,
        identity: &Identity,
        attempts: u32,
    ) -> Result<Option<ProgressRecord>, SyncError> {
        let _guard = self.cache_locks.lock(identity).await;
        let current = self.cache.get(identity).await.map_err(SyncError::cache)?;
        if let Some(entry) = &current {
            if !entry.is_synced() {
                self.cache
                    .mark_unsynced(identity, attempts)
                    .await
                    .map_err(SyncError::cache)?;
            }
        }
        Ok(current.map(|entry| entry.record))
    }

    fn report(&self, identity: &Identity, location: LocationSeq, phase: CompletionPhase) {
        self.reporter.report_phase(identity, location, phase);
    }
}

/// Cache entry after learning `server`: the server set wins by union.
///
/// A confirmed entry only ever holds locations the server acknowledged, and
/// server sets never shrink, so it stays confirmed even when `server` is a
/// stale response. Otherwise the entry is confirmed only when nothing local
/// is missing from `server`.
fn merge_authoritative(server: &ProgressRecord, current: Option<&CacheEntry>) -> CacheEntry {
    let Some(entry) = current else {
        return CacheEntry::confirmed(server.clone());
    };
    let merged = server.union(&entry.record);
    if entry.is_synced() || merged.same_locations(server) {
        return CacheEntry::confirmed(merged);
    }
    CacheEntry::new(merged, entry.state)
}
