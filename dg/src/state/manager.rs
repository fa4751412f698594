//! StateManager - actor that owns the digest Store
//!
//! Processes commands via channels for thread-safe access to persistent state.

use std::path::Path;

use digeststore::{DigestRecord, DigestStats, FileRecord, ProcessingLock, Store};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use super::messages::{StateCommand, StateError, StateResponse};

/// Handle to send commands to the StateManager
#[derive(Clone)]
pub struct StateManager {
    tx: mpsc::Sender<StateCommand>,
}

impl StateManager {
    /// Spawn a new StateManager actor over the database file at `db_path`
    pub fn spawn(db_path: impl AsRef<Path>) -> eyre::Result<Self> {
        debug!(db_path = %db_path.as_ref().display(), "spawn: called");
        let store = Store::open(db_path.as_ref())?;
        Ok(Self::from_store(store))
    }

    /// Spawn the actor over an already opened store
    pub fn from_store(store: Store) -> Self {
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(actor_loop(store, rx));
        info!("StateManager spawned");
        Self { tx }
    }

    /// Spawn the actor over a private in-memory store
    pub fn in_memory() -> eyre::Result<Self> {
        Ok(Self::from_store(Store::open_in_memory()?))
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<StateResponse<T>>) -> StateCommand) -> StateResponse<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    // === File catalog ===

    pub async fn upsert_file(&self, file: FileRecord) -> StateResponse<()> {
        debug!(path = %file.path, "upsert_file: called");
        self.request(|reply| StateCommand::UpsertFile { file, reply }).await
    }

    pub async fn get_file(&self, path: &str) -> StateResponse<Option<FileRecord>> {
        debug!(%path, "get_file: called");
        self.request(|reply| StateCommand::GetFile {
            path: path.to_string(),
            reply,
        })
        .await
    }

    /// Get a file record, returning error if not found
    pub async fn get_file_required(&self, path: &str) -> StateResponse<FileRecord> {
        self.get_file(path)
            .await?
            .ok_or_else(|| StateError::NotFound(format!("File {}", path)))
    }

    pub async fn delete_file(&self, path: &str) -> StateResponse<bool> {
        debug!(%path, "delete_file: called");
        self.request(|reply| StateCommand::DeleteFile {
            path: path.to_string(),
            reply,
        })
        .await
    }

    pub async fn list_file_paths(&self, excluded: &[String]) -> StateResponse<Vec<String>> {
        debug!(?excluded, "list_file_paths: called");
        self.request(|reply| StateCommand::ListFilePaths {
            excluded: excluded.to_vec(),
            reply,
        })
        .await
    }

    // === Digest rows ===

    pub async fn list_digests(&self, file_path: &str) -> StateResponse<Vec<DigestRecord>> {
        debug!(%file_path, "list_digests: called");
        self.request(|reply| StateCommand::ListDigests {
            file_path: file_path.to_string(),
            reply,
        })
        .await
    }

    pub async fn insert_digest_if_missing(&self, file_path: &str, digester: &str) -> StateResponse<bool> {
        debug!(%file_path, %digester, "insert_digest_if_missing: called");
        self.request(|reply| StateCommand::InsertDigestIfMissing {
            file_path: file_path.to_string(),
            digester: digester.to_string(),
            reply,
        })
        .await
    }

    pub async fn update_digest(&self, record: DigestRecord) -> StateResponse<()> {
        debug!(id = %record.id, digester = %record.digester, status = %record.status, "update_digest: called");
        self.request(|reply| StateCommand::UpdateDigest { record, reply }).await
    }

    pub async fn reset_stale_in_progress(&self, cutoff_ms: i64) -> StateResponse<usize> {
        debug!(cutoff_ms, "reset_stale_in_progress: called");
        self.request(|reply| StateCommand::ResetStaleInProgress { cutoff_ms, reply })
            .await
    }

    pub async fn files_needing_digestion(
        &self,
        excluded: &[String],
        max_attempts: u32,
        limit: usize,
    ) -> StateResponse<Vec<String>> {
        debug!(max_attempts, limit, "files_needing_digestion: called");
        self.request(|reply| StateCommand::FilesNeedingDigestion {
            excluded: excluded.to_vec(),
            max_attempts,
            limit,
            reply,
        })
        .await
    }

    pub async fn reset_digester(&self, digester: &str) -> StateResponse<usize> {
        debug!(%digester, "reset_digester: called");
        self.request(|reply| StateCommand::ResetDigester {
            digester: digester.to_string(),
            reply,
        })
        .await
    }

    pub async fn reset_file_digests(&self, file_path: &str) -> StateResponse<usize> {
        debug!(%file_path, "reset_file_digests: called");
        self.request(|reply| StateCommand::ResetFileDigests {
            file_path: file_path.to_string(),
            reply,
        })
        .await
    }

    pub async fn digest_stats(&self) -> StateResponse<DigestStats> {
        debug!("digest_stats: called");
        self.request(|reply| StateCommand::DigestStats { reply }).await
    }

    // === Processing locks ===

    pub async fn acquire_lock(&self, file_path: &str, owner: &str) -> StateResponse<bool> {
        debug!(%file_path, %owner, "acquire_lock: called");
        self.request(|reply| StateCommand::AcquireLock {
            file_path: file_path.to_string(),
            owner: owner.to_string(),
            reply,
        })
        .await
    }

    pub async fn release_lock(&self, file_path: &str) -> StateResponse<bool> {
        debug!(%file_path, "release_lock: called");
        self.request(|reply| StateCommand::ReleaseLock {
            file_path: file_path.to_string(),
            reply,
        })
        .await
    }

    pub async fn release_locks_before(&self, cutoff_ms: i64) -> StateResponse<usize> {
        debug!(cutoff_ms, "release_locks_before: called");
        self.request(|reply| StateCommand::ReleaseLocksBefore { cutoff_ms, reply })
            .await
    }

    pub async fn list_locks(&self) -> StateResponse<Vec<ProcessingLock>> {
        self.request(|reply| StateCommand::ListLocks { reply }).await
    }

    /// Shutdown the actor
    pub async fn shutdown(&self) -> StateResponse<()> {
        debug!("shutdown: called");
        self.tx
            .send(StateCommand::Shutdown)
            .await
            .map_err(|_| StateError::ChannelError)
    }
}

fn store_err(e: eyre::Report) -> StateError {
    StateError::StoreError(e.to_string())
}

/// The actor loop that processes commands
async fn actor_loop(store: Store, mut rx: mpsc::Receiver<StateCommand>) {
    debug!("StateManager actor started");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            StateCommand::UpsertFile { file, reply } => {
                let _ = reply.send(store.upsert_file(&file).map_err(store_err));
            }
            StateCommand::GetFile { path, reply } => {
                let _ = reply.send(store.get_file(&path).map_err(store_err));
            }
            StateCommand::DeleteFile { path, reply } => {
                let _ = reply.send(store.delete_file(&path).map_err(store_err));
            }
            StateCommand::ListFilePaths { excluded, reply } => {
                let _ = reply.send(store.list_file_paths(&excluded).map_err(store_err));
            }

            StateCommand::ListDigests { file_path, reply } => {
                let _ = reply.send(store.list_digests(&file_path).map_err(store_err));
            }
            StateCommand::InsertDigestIfMissing {
                file_path,
                digester,
                reply,
            } => {
                let result = store.insert_digest_if_missing(&file_path, &digester).map_err(store_err);
                let _ = reply.send(result);
            }
            StateCommand::UpdateDigest { record, reply } => {
                let result = match store.update_digest(&record) {
                    Ok(true) => Ok(()),
                    Ok(false) => Err(StateError::NotFound(format!("Digest {}", record.id))),
                    Err(e) => Err(store_err(e)),
                };
                let _ = reply.send(result);
            }
            StateCommand::ResetStaleInProgress { cutoff_ms, reply } => {
                let _ = reply.send(store.reset_stale_in_progress(cutoff_ms).map_err(store_err));
            }
            StateCommand::FilesNeedingDigestion {
                excluded,
                max_attempts,
                limit,
                reply,
            } => {
                let result = store
                    .files_needing_digestion(&excluded, max_attempts, limit)
                    .map_err(store_err);
                let _ = reply.send(result);
            }
            StateCommand::ResetDigester { digester, reply } => {
                let _ = reply.send(store.reset_digester(&digester).map_err(store_err));
            }
            StateCommand::ResetFileDigests { file_path, reply } => {
                let _ = reply.send(store.reset_file_digests(&file_path).map_err(store_err));
            }
            StateCommand::DigestStats { reply } => {
                let _ = reply.send(store.digest_stats().map_err(store_err));
            }

            StateCommand::AcquireLock {
                file_path,
                owner,
                reply,
            } => {
                let _ = reply.send(store.acquire_lock(&file_path, &owner).map_err(store_err));
            }
            StateCommand::ReleaseLock { file_path, reply } => {
                let _ = reply.send(store.release_lock(&file_path).map_err(store_err));
            }
            StateCommand::ReleaseLocksBefore { cutoff_ms, reply } => {
                let _ = reply.send(store.release_locks_before(cutoff_ms).map_err(store_err));
            }
            StateCommand::ListLocks { reply } => {
                let _ = reply.send(store.list_locks().map_err(store_err));
            }

            StateCommand::Shutdown => {
                info!("StateManager shutting down");
                break;
            }
        }
    }

    debug!("StateManager actor stopped");
}
