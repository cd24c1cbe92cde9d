//! Progress domain: records, cache entries and the store contracts.

pub mod encoding;
mod memory;
mod model;
mod traits;

pub use memory::{InMemoryAuthoritativeStore, InMemoryLocalCache};
pub use model::*;
pub use traits::*;
