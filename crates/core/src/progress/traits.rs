use async_trait::async_trait;

use super::model::{CacheEntry, EntrySyncState, Identity, LocationSeq, ProgressRecord};
use crate::errors::Result;

/// Server-side single source of truth, one [`ProgressRecord`] per identity.
///
/// Implementations must serialize writes per identity so the idempotent
/// check-and-insert cannot race with itself.
#[async_trait]
pub trait AuthoritativeStore: Send + Sync {
    /// Add `location` to the identity's completed set. Re-writing a completed
    /// location returns the unchanged record.
    async fn write(&self, identity: &Identity, location: LocationSeq) -> Result<ProgressRecord>;

    /// Current record, lazily creating an empty one for a first-time identity.
    async fn read(&self, identity: &Identity) -> Result<ProgressRecord>;
}

/// Durable client-side mirror of the authoritative record.
#[async_trait]
pub trait LocalCache: Send + Sync {
    async fn get(&self, identity: &Identity) -> Result<Option<CacheEntry>>;

    /// Replace the whole entry.
    async fn put(&self, identity: &Identity, entry: CacheEntry) -> Result<()>;

    /// Drop the entry (log out). Never touches the authoritative store.
    async fn clear(&self, identity: &Identity) -> Result<()>;

    async fn mark_unsynced(&self, identity: &Identity, attempts: u32) -> Result<()> {
        if let Some(entry) = self.get(identity).await? {
            self.put(identity, entry.with_state(EntrySyncState::Unsynced { attempts }))
                .await?;
        }
        Ok(())
    }

    async fn has_unsynced(&self, identity: &Identity) -> Result<bool> {
        Ok(self
            .get(identity)
            .await?
            .map(|entry| !entry.is_synced())
            .unwrap_or(false))
    }
}

/// Supplies the caller identity before any store operation.
pub trait IdentityProvider: Send + Sync {
    fn current_identity(&self) -> Option<Identity>;
}

/// A scanned code resolved to a trail location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLocation {
    pub location_id: String,
    pub sequence: LocationSeq,
}

/// Maps a scanned code to its location.
pub trait LocationResolver: Send + Sync {
    fn resolve(&self, code: &str) -> Option<ResolvedLocation>;
}

/// Identity provider that always returns the same identity.
#[derive(Debug, Clone)]
pub struct StaticIdentityProvider {
    identity: Option<Identity>,
}

impl StaticIdentityProvider {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity: Some(identity),
        }
    }

    pub fn signed_out() -> Self {
        Self { identity: None }
    }
}

impl IdentityProvider for StaticIdentityProvider {
    fn current_identity(&self) -> Option<Identity> {
        self.identity.clone()
    }
}
