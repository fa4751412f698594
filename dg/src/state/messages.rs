//! State manager messages
//!
//! Commands and responses for the actor pattern.

use digeststore::{DigestRecord, DigestStats, FileRecord, ProcessingLock};
use thiserror::Error;
use tokio::sync::oneshot;

/// Errors from state operations
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Channel error")]
    ChannelError,
}

/// Response from state operations
pub type StateResponse<T> = Result<T, StateError>;

/// Commands sent to the StateManager actor
#[derive(Debug)]
pub enum StateCommand {
    // File catalog
    UpsertFile {
        file: FileRecord,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    GetFile {
        path: String,
        reply: oneshot::Sender<StateResponse<Option<FileRecord>>>,
    },
    DeleteFile {
        path: String,
        reply: oneshot::Sender<StateResponse<bool>>,
    },
    ListFilePaths {
        excluded: Vec<String>,
        reply: oneshot::Sender<StateResponse<Vec<String>>>,
    },

    // Digest rows
    ListDigests {
        file_path: String,
        reply: oneshot::Sender<StateResponse<Vec<DigestRecord>>>,
    },
    InsertDigestIfMissing {
        file_path: String,
        digester: String,
        reply: oneshot::Sender<StateResponse<bool>>,
    },
    UpdateDigest {
        record: DigestRecord,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    ResetStaleInProgress {
        cutoff_ms: i64,
        reply: oneshot::Sender<StateResponse<usize>>,
    },
    FilesNeedingDigestion {
        excluded: Vec<String>,
        max_attempts: u32,
        limit: usize,
        reply: oneshot::Sender<StateResponse<Vec<String>>>,
    },
    ResetDigester {
        digester: String,
        reply: oneshot::Sender<StateResponse<usize>>,
    },
    ResetFileDigests {
        file_path: String,
        reply: oneshot::Sender<StateResponse<usize>>,
    },
    DigestStats {
        reply: oneshot::Sender<StateResponse<DigestStats>>,
    },

    // Processing locks
    AcquireLock {
        file_path: String,
        owner: String,
        reply: oneshot::Sender<StateResponse<bool>>,
    },
    ReleaseLock {
        file_path: String,
        reply: oneshot::Sender<StateResponse<bool>>,
    },
    ReleaseLocksBefore {
        cutoff_ms: i64,
        reply: oneshot::Sender<StateResponse<usize>>,
    },
    ListLocks {
        reply: oneshot::Sender<StateResponse<Vec<ProcessingLock>>>,
    },

    /// Stop the actor
    Shutdown,
}
