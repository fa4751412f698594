//! Host-side worker supervision

mod config;
mod worker_client;

pub use config::ClientConfig;
pub use worker_client::WorkerClient;
