//! WorkQueue - deduplicating FIFO of file paths awaiting digestion

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tracing::debug;

/// Result of a `queue_file` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResult {
    /// Added at this 1-based position
    Queued { position: usize },
    AlreadyQueued,
    AlreadyProcessing,
    ShuttingDown,
}

impl EnqueueResult {
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued { .. })
    }
}

/// Counters kept for status output
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub total_queued: u64,
    pub total_deduplicated: u64,
    pub total_finished: u64,
    pub peak_depth: usize,
}

/// Point-in-time view of the queue
#[derive(Debug, Clone)]
pub struct QueueState {
    pub pending: Vec<String>,
    pub processing: Vec<String>,
    /// In-flight paths whose rows are reset once their pass finishes
    pub deferred_resets: Vec<String>,
    pub shutting_down: bool,
    pub stats: QueueStats,
}

struct QueueInner {
    pending: VecDeque<String>,
    /// Mirrors `pending` for O(1) dedup
    queued: HashSet<String>,
    processing: HashSet<String>,
    deferred_resets: HashSet<String>,
    stats: QueueStats,
}

/// Paths waiting for the processing loop, plus the paths it is working on
pub struct WorkQueue {
    inner: Mutex<QueueInner>,
    shutting_down: Arc<AtomicBool>,
    notify: Notify,
    idle: Notify,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        debug!("WorkQueue::new: called");
        Self {
            inner: Mutex::new(QueueInner {
                pending: VecDeque::new(),
                queued: HashSet::new(),
                processing: HashSet::new(),
                deferred_resets: HashSet::new(),
                stats: QueueStats::default(),
            }),
            shutting_down: Arc::new(AtomicBool::new(false)),
            notify: Notify::new(),
            idle: Notify::new(),
        }
    }

    /// Enqueue a path unless it is already queued or in flight
    pub async fn queue_file(&self, file_path: &str) -> EnqueueResult {
        debug!(%file_path, "WorkQueue::queue_file: called");
        if self.is_shutting_down() {
            return EnqueueResult::ShuttingDown;
        }

        let mut inner = self.inner.lock().await;
        if inner.processing.contains(file_path) {
            inner.stats.total_deduplicated += 1;
            return EnqueueResult::AlreadyProcessing;
        }
        if inner.queued.contains(file_path) {
            inner.stats.total_deduplicated += 1;
            return EnqueueResult::AlreadyQueued;
        }

        inner.queued.insert(file_path.to_string());
        inner.pending.push_back(file_path.to_string());
        inner.stats.total_queued += 1;
        inner.stats.peak_depth = inner.stats.peak_depth.max(inner.pending.len());
        let position = inner.pending.len();
        drop(inner);

        self.notify.notify_one();
        EnqueueResult::Queued { position }
    }

    /// Wait for the next path and move it to the processing set.
    ///
    /// Returns `None` once shutdown has begun.
    pub async fn next_file(&self) -> Option<String> {
        loop {
            if self.is_shutting_down() {
                return None;
            }
            {
                let mut inner = self.inner.lock().await;
                if let Some(file_path) = inner.pending.pop_front() {
                    inner.queued.remove(&file_path);
                    inner.processing.insert(file_path.clone());
                    debug!(%file_path, "WorkQueue::next_file: dequeued");
                    return Some(file_path);
                }
            }
            self.notify.notified().await;
        }
    }

    /// Record a reset for a path that is in flight.
    ///
    /// Returns false when the path is not being processed; the caller resets
    /// its rows directly then.
    pub async fn defer_reset(&self, file_path: &str) -> bool {
        let mut inner = self.inner.lock().await;
        if !inner.processing.contains(file_path) {
            return false;
        }
        debug!(%file_path, "WorkQueue::defer_reset: path in flight");
        inner.deferred_resets.insert(file_path.to_string());
        true
    }

    /// Remove a path from the processing set.
    ///
    /// Returns true when a reset was deferred while it ran; the caller must
    /// reset the rows and queue the path again.
    pub async fn finish(&self, file_path: &str) -> bool {
        debug!(%file_path, "WorkQueue::finish: called");
        let mut inner = self.inner.lock().await;
        if inner.processing.remove(file_path) {
            inner.stats.total_finished += 1;
        }
        let reset_pending = inner.deferred_resets.remove(file_path);
        if inner.processing.is_empty() {
            self.idle.notify_waiters();
        }
        reset_pending
    }

    /// Refuse new entries and wake the processing loop so it can exit
    pub fn begin_shutdown(&self) {
        debug!("WorkQueue::begin_shutdown: called");
        self.shutting_down.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// The flag the coordinator checks between digesters
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutting_down.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.pending.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn processing_len(&self) -> usize {
        self.inner.lock().await.processing.len()
    }

    pub async fn snapshot(&self) -> QueueState {
        let inner = self.inner.lock().await;
        let mut processing: Vec<String> = inner.processing.iter().cloned().collect();
        processing.sort();
        let mut deferred_resets: Vec<String> = inner.deferred_resets.iter().cloned().collect();
        deferred_resets.sort();
        QueueState {
            pending: inner.pending.iter().cloned().collect(),
            processing,
            deferred_resets,
            shutting_down: self.is_shutting_down(),
            stats: inner.stats,
        }
    }

    /// Wait until nothing is in flight. Returns false if `timeout` passed first.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.inner.lock().await.processing.is_empty() {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}
