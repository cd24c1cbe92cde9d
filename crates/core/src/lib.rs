//! Quest progress synchronization engine.
//!
//! An [`AuthoritativeStore`](progress::AuthoritativeStore) owns each user's
//! completed locations; a [`LocalCache`](progress::LocalCache) mirrors it on
//! the device. The [`SyncCoordinator`](sync::SyncCoordinator) applies
//! completions optimistically, confirms them against the store with bounded
//! retries, and reconciles anything that could not be delivered.

pub mod api;
pub mod errors;
pub mod progress;
pub mod sync;

pub use api::{spawn_reconcile_loop, QuestCompletionApi};
pub use errors::{Result, StoreError, SyncError};
