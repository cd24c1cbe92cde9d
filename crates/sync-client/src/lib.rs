//! HTTP client for the questsync progress API.
//!
//! [`HttpProgressStore`] implements
//! [`AuthoritativeStore`](questsync_core::progress::AuthoritativeStore) over the
//! server's REST endpoints so a device can run the sync coordinator against a
//! remote store.

mod client;
mod error;

pub use client::{api_base_url, HttpProgressStore, DEFAULT_API_URL};
pub use error::{Result, SyncClientError};
