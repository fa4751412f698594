//! State management with actor pattern
//!
//! StateManager owns the digest Store and processes messages via channels,
//! so every store call is an awaitable message on the caller's runtime.

mod manager;
mod messages;
mod recovery;

pub use manager::StateManager;
pub use messages::{StateCommand, StateError, StateResponse};
pub use recovery::{RecoveryStats, release_abandoned_locks, sweep_stale_in_progress};
