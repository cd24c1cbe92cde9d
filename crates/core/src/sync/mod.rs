//! Completion protocol, retry policy and reconciliation.

mod config;
mod coordinator;
mod keyed_lock;
mod retry;
mod scheduler;

pub use config::*;
pub use coordinator::*;
pub use keyed_lock::KeyedLocks;
pub use retry::*;
pub use scheduler::*;
