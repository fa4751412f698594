//! Crash recovery
//!
//! Puts work abandoned by a crashed or killed worker back where discovery can see it.

use digeststore::now_ms;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::StateManager;

/// Recovery statistics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryStats {
    /// In-progress rows moved back to todo
    pub stale_rows_reset: usize,
    /// Processing locks left by a previous run
    pub locks_released: usize,
}

impl std::fmt::Display for RecoveryStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "stale rows reset: {}, locks released: {}",
            self.stale_rows_reset, self.locks_released
        )
    }
}

/// Reset `in-progress` rows untouched for longer than `stale_after`.
///
/// A row updated within the threshold is never touched, so a digester that is
/// merely slow keeps its claim.
pub async fn sweep_stale_in_progress(state: &StateManager, stale_after: Duration) -> eyre::Result<usize> {
    let threshold_ms = i64::try_from(stale_after.as_millis()).unwrap_or(i64::MAX);
    let cutoff_ms = now_ms().saturating_sub(threshold_ms);

    let reset = state
        .reset_stale_in_progress(cutoff_ms)
        .await
        .map_err(|e| eyre::eyre!("Failed to reset stale in-progress digests: {}", e))?;

    if reset > 0 {
        warn!(reset, threshold_ms, "Reset stale in-progress digests to todo");
    } else {
        debug!("Stale sweep found nothing to reset");
    }
    Ok(reset)
}

/// Release every processing lock acquired before `started_at_ms`.
///
/// Called once when a worker starts; any lock older than the worker belongs to
/// a run that no longer exists.
pub async fn release_abandoned_locks(state: &StateManager, started_at_ms: i64) -> eyre::Result<usize> {
    let released = state
        .release_locks_before(started_at_ms)
        .await
        .map_err(|e| eyre::eyre!("Failed to release abandoned locks: {}", e))?;

    if released > 0 {
        info!(released, "Released processing locks from a previous run");
    }
    Ok(released)
}

#[cfg(test)]
mod tests {
    use super::*;
    use digeststore::DigestStatus;

    #[tokio::test]
    async fn test_sweep_leaves_fresh_rows_alone() {
        let state = StateManager::in_memory().unwrap();
        state.insert_digest_if_missing("a.txt", "slow").await.unwrap();
        let mut record = state.list_digests("a.txt").await.unwrap().remove(0);
        record.status = DigestStatus::InProgress;
        record.touch();
        state.update_digest(record).await.unwrap();

        let reset = sweep_stale_in_progress(&state, Duration::from_secs(600)).await.unwrap();
        assert_eq!(reset, 0);
        assert_eq!(
            state.list_digests("a.txt").await.unwrap()[0].status,
            DigestStatus::InProgress
        );
    }

    #[tokio::test]
    async fn test_sweep_resets_rows_past_threshold() {
        let state = StateManager::in_memory().unwrap();
        state.insert_digest_if_missing("a.txt", "stuck").await.unwrap();
        let mut record = state.list_digests("a.txt").await.unwrap().remove(0);
        record.status = DigestStatus::InProgress;
        record.updated_at = now_ms() - 11 * 60 * 1000;
        state.update_digest(record).await.unwrap();

        let reset = sweep_stale_in_progress(&state, Duration::from_secs(600)).await.unwrap();
        assert_eq!(reset, 1);
        assert_eq!(state.list_digests("a.txt").await.unwrap()[0].status, DigestStatus::Todo);
    }

    #[tokio::test]
    async fn test_release_abandoned_locks() {
        let state = StateManager::in_memory().unwrap();
        state.acquire_lock("a.txt", "old-worker").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let started_at = now_ms();

        let released = release_abandoned_locks(&state, started_at).await.unwrap();
        assert_eq!(released, 1);
        assert!(state.list_locks().await.unwrap().is_empty());
    }

    #[test]
    fn test_recovery_stats_display() {
        let stats = RecoveryStats {
            stale_rows_reset: 2,
            locks_released: 1,
        };
        assert_eq!(stats.to_string(), "stale rows reset: 2, locks released: 1");
    }
}
