//! Background digest worker
//!
//! A deduplicating queue drained by one sequential processing loop, fed by
//! host requests and by the supervisor's periodic discovery.

mod config;
mod core;
mod messages;
mod queue;
mod supervisor;

pub use config::WorkerConfig;
pub use core::{DigestWorker, WorkerSetup, spawn_worker_thread};
pub use messages::{WorkerEvent, WorkerRequest};
pub use queue::{EnqueueResult, QueueState, QueueStats, WorkQueue};
pub use supervisor::{Supervisor, TickStats};
