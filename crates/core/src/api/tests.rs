use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::*;
use crate::errors::{Result, StoreError, TransientKind};
use crate::progress::{
    AuthoritativeStore, InMemoryAuthoritativeStore, InMemoryLocalCache, ResolvedLocation,
    StaticIdentityProvider,
};
use crate::sync::{BackoffPolicy, SyncConfig};

struct SwitchableStore {
    inner: InMemoryAuthoritativeStore,
    offline: AtomicBool,
}

impl SwitchableStore {
    fn new(total: u64) -> Self {
        Self {
            inner: InMemoryAuthoritativeStore::new(total),
            offline: AtomicBool::new(false),
        }
    }

    fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::transient(TransientKind::Connectivity, "offline"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl AuthoritativeStore for SwitchableStore {
    async fn write(&self, identity: &Identity, location: LocationSeq) -> Result<ProgressRecord> {
        self.check()?;
        self.inner.write(identity, location).await
    }

    async fn read(&self, identity: &Identity) -> Result<ProgressRecord> {
        self.check()?;
        self.inner.read(identity).await
    }
}

struct TrailCodes(HashMap<&'static str, LocationSeq>);

impl LocationResolver for TrailCodes {
    fn resolve(&self, code: &str) -> Option<ResolvedLocation> {
        self.0.get(code).map(|sequence| ResolvedLocation {
            location_id: format!("loc-{}", sequence),
            sequence: *sequence,
        })
    }
}

fn alice() -> Identity {
    Identity::new("alice").unwrap()
}

fn setup(identity: Option<Identity>) -> (Arc<SwitchableStore>, Arc<QuestCompletionApi>) {
    let store = Arc::new(SwitchableStore::new(3));
    let config = SyncConfig::default().with_backoff(BackoffPolicy::new(
        Duration::from_millis(1),
        Duration::from_millis(2),
    ));
    let coordinator = Arc::new(SyncCoordinator::new(
        store.clone(),
        Arc::new(InMemoryLocalCache::new()),
        config,
    ));
    let provider = match identity {
        Some(identity) => StaticIdentityProvider::new(identity),
        None => StaticIdentityProvider::signed_out(),
    };
    let codes = TrailCodes(HashMap::from([("QR-OAK", 1), ("QR-PINE", 2)]));
    let api = QuestCompletionApi::new(coordinator, Arc::new(provider))
        .with_resolver(Arc::new(codes));
    (store, Arc::new(api))
}

#[tokio::test]
async fn signed_out_user_cannot_complete() {
    let (_, api) = setup(None);
    let err = api.complete(1).await.unwrap_err();
    assert_eq!(err.kind, ApiErrorKind::Unauthenticated);
    assert_eq!(
        api.get_progress().await.unwrap_err().kind,
        ApiErrorKind::Unauthenticated
    );
}

#[tokio::test]
async fn confirmed_completion_view() {
    let (_, api) = setup(Some(alice()));
    let view = api.complete(1).await.unwrap();
    assert_eq!(view.status, CompletionStatus::Confirmed);
    assert_eq!(view.attempts, 1);
    assert!(!view.already_completed);
    assert_eq!(view.progress.completed_count, 1);
    assert_eq!(view.progress.total_locations, 3);
    assert_eq!(view.progress.stage_flags.as_array(), [true, false, false]);
    assert!(view.progress.synced);

    let again = api.complete(1).await.unwrap();
    assert!(again.already_completed);
    assert_eq!(again.status, CompletionStatus::Confirmed);
}

#[tokio::test]
async fn queued_completion_is_success_with_caveat() {
    let (store, api) = setup(Some(alice()));
    store.set_offline(true);

    let view = api.complete(2).await.unwrap();
    assert_eq!(view.status, CompletionStatus::Queued);
    assert!(view.message.contains("Saved on this device"));
    assert_eq!(view.error, None);
    assert_eq!(view.progress.completed_locations, vec![2]);
    assert!(!view.progress.synced);

    store.set_offline(false);
    let reconciled = api.reconcile(ReconcileTrigger::NetworkRestored).await.unwrap();
    assert_eq!(reconciled.status, ReconcileStatus::Synced);
    assert_eq!(reconciled.replayed, vec![2]);
    assert!(reconciled.progress.unwrap().synced);
}

#[tokio::test]
async fn invalid_location_fails_without_reauth() {
    let (_, api) = setup(Some(alice()));
    let view = api.complete(7).await.unwrap();
    assert_eq!(view.status, CompletionStatus::Failed);
    assert_eq!(view.error, Some(ApiErrorKind::InvalidLocation));
    assert!(!view.requires_reauth);
    assert_eq!(view.progress.completed_count, 0);
}

#[tokio::test]
async fn scanned_codes_resolve_to_locations() {
    let (_, api) = setup(Some(alice()));
    let view = api.complete_scanned("QR-PINE").await.unwrap();
    assert_eq!(view.location, 2);
    assert_eq!(view.status, CompletionStatus::Confirmed);

    let err = api.complete_scanned("QR-ELM").await.unwrap_err();
    assert_eq!(err.kind, ApiErrorKind::UnknownCode);
}

#[tokio::test]
async fn first_progress_read_fetches_from_server() {
    let (store, api) = setup(Some(alice()));
    store.inner.write(&alice(), 3).await.unwrap();

    let view = api.get_progress().await.unwrap();
    assert_eq!(view.completed_locations, vec![3]);
    assert!(view.synced);

    // Served from the cache once it exists.
    store.set_offline(true);
    assert_eq!(api.get_progress().await.unwrap(), view);
    assert_eq!(
        api.refresh_progress().await.unwrap_err().kind,
        ApiErrorKind::Unavailable
    );
}

#[tokio::test]
async fn clear_local_state_forgets_the_cache() {
    let (store, api) = setup(Some(alice()));
    api.complete(1).await.unwrap();
    api.clear_local_state().await.unwrap();

    store.set_offline(true);
    assert_eq!(
        api.get_progress().await.unwrap_err().kind,
        ApiErrorKind::Unavailable
    );
    store.set_offline(false);
    assert_eq!(api.get_progress().await.unwrap().completed_locations, vec![1]);
}

#[tokio::test(start_paused = true)]
async fn background_loop_reconciles_on_start_and_periodically() {
    let (store, api) = setup(Some(alice()));
    store.set_offline(true);
    api.complete(1).await.unwrap();
    store.set_offline(false);

    let background = spawn_reconcile_loop(Arc::clone(&api), Duration::from_secs(45));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(store.inner.read(&alice()).await.unwrap().completed(), &[1]);

    store.set_offline(true);
    assert_eq!(
        api.complete(2).await.unwrap().status,
        CompletionStatus::Queued
    );
    store.set_offline(false);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(store.inner.read(&alice()).await.unwrap().completed(), &[1, 2]);
    assert!(api.get_progress().await.unwrap().synced);

    assert!(background.is_running());
    background.stop();
}
