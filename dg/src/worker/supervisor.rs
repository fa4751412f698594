//! Supervisor - periodic discovery and stale-row recovery

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::config::WorkerConfig;
use super::queue::WorkQueue;
use crate::digest::DigesterRegistry;
use crate::state::{RecoveryStats, StateManager, release_abandoned_locks, sweep_stale_in_progress};

/// What one supervisor tick did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickStats {
    /// Paths returned by discovery and newly queued
    pub discovered: usize,
    /// Stale in-progress rows moved back to todo; `None` when no sweep ran
    pub swept: Option<usize>,
}

/// Keeps the queue fed from the store and recovers abandoned rows
pub struct Supervisor {
    queue: Arc<WorkQueue>,
    state: StateManager,
    registry: Arc<DigesterRegistry>,
    config: WorkerConfig,
    last_sweep: Option<Instant>,
}

impl Supervisor {
    pub fn new(queue: Arc<WorkQueue>, state: StateManager, registry: Arc<DigesterRegistry>, config: WorkerConfig) -> Self {
        Self {
            queue,
            state,
            registry,
            config,
            last_sweep: None,
        }
    }

    /// One-time recovery when a worker starts.
    ///
    /// Locks older than this worker are abandoned; the stale sweep also runs
    /// here so the first tick does not repeat it.
    pub async fn startup(&mut self, started_at_ms: i64) -> eyre::Result<RecoveryStats> {
        debug!(started_at_ms, "Supervisor::startup: called");
        let locks_released = release_abandoned_locks(&self.state, started_at_ms).await?;
        let stale_rows_reset = sweep_stale_in_progress(&self.state, self.config.stale_after()).await?;
        self.last_sweep = Some(Instant::now());
        Ok(RecoveryStats {
            stale_rows_reset,
            locks_released,
        })
    }

    /// Run discovery if the queue is shallow, and the stale sweep if it is due
    pub async fn tick(&mut self) -> eyre::Result<TickStats> {
        let mut stats = TickStats::default();

        let sweep_due = self
            .last_sweep
            .is_none_or(|last| last.elapsed() >= self.config.stale_sweep_interval());
        if sweep_due {
            stats.swept = Some(sweep_stale_in_progress(&self.state, self.config.stale_after()).await?);
            self.last_sweep = Some(Instant::now());
        }

        if self.registry.is_empty() {
            debug!("Supervisor::tick: no digesters registered, skipping discovery");
            return Ok(stats);
        }

        let depth = self.queue.len().await;
        if depth >= self.config.low_water_mark {
            debug!(depth, "Supervisor::tick: queue above low-water mark");
            return Ok(stats);
        }

        let paths = self
            .state
            .files_needing_digestion(
                &self.config.excluded_prefixes,
                self.config.max_attempts,
                self.config.discovery_batch_size,
            )
            .await?;
        for path in &paths {
            if self.queue.queue_file(path).await.is_queued() {
                stats.discovered += 1;
            }
        }
        if stats.discovered > 0 {
            info!(discovered = stats.discovered, "Discovery queued files");
        }
        Ok(stats)
    }

    /// Tick on the configured interval until the queue shuts down
    pub async fn run(mut self) {
        info!(interval = ?self.config.supervisor_interval(), "Supervisor started");
        let mut interval = tokio::time::interval(self.config.supervisor_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if self.queue.is_shutting_down() {
                break;
            }
            if let Err(e) = self.tick().await {
                warn!(error = %e, "Supervisor tick failed");
            }
        }
        info!("Supervisor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::{DigestContext, DigestError, DigestOutput, Digester};
    use async_trait::async_trait;
    use digeststore::{DigestStatus, FileRecord, now_ms};
    use std::time::Duration;

    struct Noop;

    #[async_trait]
    impl Digester for Noop {
        fn name(&self) -> &str {
            "noop"
        }

        fn can_digest(&self, _file_path: &str, _file: &FileRecord) -> bool {
            true
        }

        async fn digest(&self, _ctx: &DigestContext<'_>) -> Result<Vec<DigestOutput>, DigestError> {
            Ok(vec![DigestOutput::completed("noop", None)])
        }
    }

    fn registry() -> Arc<DigesterRegistry> {
        let mut registry = DigesterRegistry::new();
        registry.register(Arc::new(Noop)).unwrap();
        Arc::new(registry)
    }

    fn config() -> WorkerConfig {
        WorkerConfig {
            low_water_mark: 2,
            excluded_prefixes: vec!["app/".to_string()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_discovery_fills_queue() {
        let state = StateManager::in_memory().unwrap();
        for path in ["a.txt", "b.txt", "app/c.txt"] {
            state.upsert_file(FileRecord::new(path)).await.unwrap();
        }
        state.upsert_file(FileRecord::folder("dir")).await.unwrap();

        let queue = Arc::new(WorkQueue::new());
        let mut supervisor = Supervisor::new(queue.clone(), state, registry(), config());

        let stats = supervisor.tick().await.unwrap();
        assert_eq!(stats.discovered, 2);
        assert_eq!(queue.snapshot().await.pending, vec!["a.txt", "b.txt"]);

        // Queue now at the low-water mark: no discovery, and no duplicate entries
        let stats = supervisor.tick().await.unwrap();
        assert_eq!(stats.discovered, 0);
        assert_eq!(queue.len().await, 2);
    }

    #[tokio::test]
    async fn test_empty_registry_skips_discovery() {
        let state = StateManager::in_memory().unwrap();
        state.upsert_file(FileRecord::new("a.txt")).await.unwrap();
        let queue = Arc::new(WorkQueue::new());
        let mut supervisor = Supervisor::new(queue.clone(), state, Arc::new(DigesterRegistry::new()), config());

        let stats = supervisor.tick().await.unwrap();
        assert_eq!(stats.discovered, 0);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_sweep_runs_on_first_tick_then_waits() {
        let state = StateManager::in_memory().unwrap();
        state.insert_digest_if_missing("a.txt", "noop").await.unwrap();
        let mut record = state.list_digests("a.txt").await.unwrap().remove(0);
        record.status = DigestStatus::InProgress;
        record.updated_at = now_ms() - 60_000;
        state.update_digest(record).await.unwrap();

        let queue = Arc::new(WorkQueue::new());
        let mut supervisor = Supervisor::new(
            queue,
            state.clone(),
            registry(),
            WorkerConfig {
                stale_after_secs: 30,
                ..config()
            },
        );

        let stats = supervisor.tick().await.unwrap();
        assert_eq!(stats.swept, Some(1));
        assert_eq!(state.list_digests("a.txt").await.unwrap()[0].status, DigestStatus::Todo);

        let stats = supervisor.tick().await.unwrap();
        assert_eq!(stats.swept, None);
    }

    #[tokio::test]
    async fn test_startup_releases_old_locks() {
        let state = StateManager::in_memory().unwrap();
        assert!(state.acquire_lock("a.txt", "old-worker").await.unwrap());
        tokio::time::sleep(Duration::from_millis(5)).await;

        let mut supervisor = Supervisor::new(Arc::new(WorkQueue::new()), state.clone(), registry(), config());
        let stats = supervisor.startup(now_ms()).await.unwrap();
        assert_eq!(stats.locks_released, 1);
        assert_eq!(stats.stale_rows_reset, 0);
        assert!(state.list_locks().await.unwrap().is_empty());

        // The sweep already ran, so the first tick skips it
        assert_eq!(supervisor.tick().await.unwrap().swept, None);
    }
}
