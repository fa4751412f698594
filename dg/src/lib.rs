//! digestd - background digest orchestration
//!
//! digestd runs a registered chain of content-processing steps ("digesters")
//! over every file in a library and tracks one durable row per
//! (file, digester) pair.
//!
//! # Core Concepts
//!
//! - **Registration order is execution order**: a digester that reads another's
//!   output is registered after it and fails with "dependency not ready" until
//!   the upstream row completes
//! - **Rows converge**: failures are retried up to an attempt cap, stale claims
//!   are swept back to `todo`, and rows for removed digesters are retired
//! - **One sequential worker**: a dedicated thread drains a deduplicating queue
//!   one file at a time, supervised and restarted by the host
//!
//! # Modules
//!
//! - [`digest`] - Digester trait, registry and built-in digesters
//! - [`coordinator`] - Per-file execution and row reconciliation
//! - [`worker`] - Queue, processing loop and supervisor
//! - [`client`] - Host-side worker supervision
//! - [`state`] - StateManager actor over the digest store
//! - [`catalog`] - Library scanning
//! - [`events`] - Notification stream
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod catalog;
pub mod cli;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod daemon;
pub mod digest;
pub mod events;
pub mod state;
pub mod worker;

// Re-export commonly used types
pub use client::{ClientConfig, WorkerClient};
pub use config::Config;
pub use coordinator::{Coordinator, FileOutcome, Reconciler};
pub use digest::{DigestContext, DigestError, DigestOutput, Digester, DigesterRegistry, RegistryError};
pub use events::{NotificationBus, NotificationEvent};
pub use state::{StateError, StateManager};
pub use worker::{WorkQueue, WorkerConfig, WorkerEvent, WorkerRequest, WorkerSetup};
