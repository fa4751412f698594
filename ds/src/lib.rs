//! digeststore - SQLite persistence for the digest pipeline
//!
//! Holds three tables: the file catalog, one digest row per (file, digester)
//! pair, and per-file processing locks used to detect crashed runs.

mod schema;
mod store;
mod types;

pub use store::Store;
pub use types::{DigestRecord, DigestStats, DigestStatus, FileRecord, ProcessingLock};

/// Current time in Unix milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
