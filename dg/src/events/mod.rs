//! Notification stream for UI and other clients
//!
//! Fire-and-forget: the worker emits notifications as digest rows change and
//! the host rebroadcasts them on a [`NotificationBus`]. Nothing in the digest
//! protocol waits on a subscriber.

mod bus;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, NotificationBus};
pub use types::NotificationEvent;
