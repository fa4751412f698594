//! Reconciler - aligns persisted digest rows with the registered digester set

use std::collections::HashSet;
use std::sync::Arc;

use digeststore::DigestStatus;
use tracing::{debug, info, warn};

use crate::digest::DigesterRegistry;
use crate::state::StateManager;

/// Error stored on rows whose digester is gone
pub const ORPHAN_ERROR: &str = "Digester no longer registered";

/// Result of reconciling one file
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EnsureStats {
    /// Placeholder rows inserted
    pub added: usize,
    /// Orphan rows moved to skipped
    pub orphaned_skipped: usize,
}

/// Result of reconciling the whole catalog
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BackfillStats {
    pub files: usize,
    pub added: usize,
    pub orphaned_skipped: usize,
    /// Files whose reconciliation errored and was skipped
    pub failed_files: usize,
}

impl std::fmt::Display for BackfillStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "files: {}, added: {}, orphaned skipped: {}, failed: {}",
            self.files, self.added, self.orphaned_skipped, self.failed_files
        )
    }
}

/// Inserts missing placeholders and retires orphan rows
#[derive(Clone)]
pub struct Reconciler {
    registry: Arc<DigesterRegistry>,
    state: StateManager,
    excluded_prefixes: Vec<String>,
}

impl Reconciler {
    pub fn new(registry: Arc<DigesterRegistry>, state: StateManager, excluded_prefixes: Vec<String>) -> Self {
        Self {
            registry,
            state,
            excluded_prefixes,
        }
    }

    /// Reconcile one file's rows against the registry. Idempotent.
    pub async fn ensure_all_digesters(&self, file_path: &str) -> eyre::Result<EnsureStats> {
        debug!(%file_path, "ensure_all_digesters: called");
        let registered = self.registry.all_digest_types();
        let existing = self.state.list_digests(file_path).await?;
        let present: HashSet<&str> = existing.iter().map(|r| r.digester.as_str()).collect();

        let mut stats = EnsureStats::default();
        for name in &registered {
            if !present.contains(name.as_str()) && self.state.insert_digest_if_missing(file_path, name).await? {
                stats.added += 1;
            }
        }

        for mut record in existing {
            if registered.contains(&record.digester) {
                continue;
            }
            // Completed and skipped orphans keep their history
            if matches!(record.status, DigestStatus::Todo | DigestStatus::Failed) {
                debug!(%file_path, digester = %record.digester, "Skipping orphan digest row");
                record.status = DigestStatus::Skipped;
                record.error = Some(ORPHAN_ERROR.to_string());
                record.touch();
                self.state.update_digest(record).await?;
                stats.orphaned_skipped += 1;
            }
        }

        if stats.added > 0 || stats.orphaned_skipped > 0 {
            debug!(%file_path, added = stats.added, orphaned_skipped = stats.orphaned_skipped, "Reconciled digest rows");
        }
        Ok(stats)
    }

    /// Reconcile every catalogued, non-excluded file.
    ///
    /// A file that fails is logged and counted; the sweep continues.
    pub async fn ensure_all_digesters_for_existing_files(&self) -> eyre::Result<BackfillStats> {
        let paths = self.state.list_file_paths(&self.excluded_prefixes).await?;
        info!(files = paths.len(), "Reconciling digest rows for existing files");

        let mut stats = BackfillStats::default();
        for path in paths {
            stats.files += 1;
            match self.ensure_all_digesters(&path).await {
                Ok(file_stats) => {
                    stats.added += file_stats.added;
                    stats.orphaned_skipped += file_stats.orphaned_skipped;
                }
                Err(e) => {
                    warn!(file_path = %path, error = %e, "Failed to reconcile digest rows");
                    stats.failed_files += 1;
                }
            }
        }

        info!(%stats, "Reconciliation complete");
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::{DigestContext, DigestError, DigestOutput, Digester};
    use async_trait::async_trait;
    use digeststore::FileRecord;

    struct Named(&'static str);

    #[async_trait]
    impl Digester for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn can_digest(&self, _file_path: &str, _file: &FileRecord) -> bool {
            true
        }

        async fn digest(&self, _ctx: &DigestContext<'_>) -> Result<Vec<DigestOutput>, DigestError> {
            Ok(vec![DigestOutput::completed(self.0, None)])
        }
    }

    fn registry(names: &[&'static str]) -> Arc<DigesterRegistry> {
        let mut registry = DigesterRegistry::new();
        for name in names {
            registry.register(Arc::new(Named(name))).unwrap();
        }
        Arc::new(registry)
    }

    async fn set_status(state: &StateManager, path: &str, digester: &str, status: DigestStatus) {
        let mut record = state
            .list_digests(path)
            .await
            .unwrap()
            .into_iter()
            .find(|r| r.digester == digester)
            .unwrap();
        record.status = status;
        state.update_digest(record).await.unwrap();
    }

    #[tokio::test]
    async fn test_ensure_inserts_placeholders_once() {
        let state = StateManager::in_memory().unwrap();
        let reconciler = Reconciler::new(registry(&["a", "b"]), state.clone(), vec![]);

        let first = reconciler.ensure_all_digesters("x.txt").await.unwrap();
        assert_eq!(first, EnsureStats { added: 2, orphaned_skipped: 0 });

        let second = reconciler.ensure_all_digesters("x.txt").await.unwrap();
        assert_eq!(second, EnsureStats::default());

        let rows = state.list_digests("x.txt").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.status == DigestStatus::Todo && r.content.is_none()));
    }

    #[tokio::test]
    async fn test_orphans_skipped_but_completed_kept() {
        let state = StateManager::in_memory().unwrap();
        let old = Reconciler::new(registry(&["a", "gone-todo", "gone-failed", "gone-done"]), state.clone(), vec![]);
        old.ensure_all_digesters("x.txt").await.unwrap();
        set_status(&state, "x.txt", "gone-failed", DigestStatus::Failed).await;
        set_status(&state, "x.txt", "gone-done", DigestStatus::Completed).await;

        let current = Reconciler::new(registry(&["a"]), state.clone(), vec![]);
        let stats = current.ensure_all_digesters("x.txt").await.unwrap();
        assert_eq!(stats, EnsureStats { added: 0, orphaned_skipped: 2 });

        let rows = state.list_digests("x.txt").await.unwrap();
        let status_of = |name: &str| rows.iter().find(|r| r.digester == name).unwrap().status;
        assert_eq!(status_of("gone-todo"), DigestStatus::Skipped);
        assert_eq!(status_of("gone-failed"), DigestStatus::Skipped);
        assert_eq!(status_of("gone-done"), DigestStatus::Completed);
        assert_eq!(status_of("a"), DigestStatus::Todo);

        let orphan = rows.iter().find(|r| r.digester == "gone-todo").unwrap();
        assert_eq!(orphan.error.as_deref(), Some(ORPHAN_ERROR));

        // Second pass is a no-op
        assert_eq!(current.ensure_all_digesters("x.txt").await.unwrap(), EnsureStats::default());
    }

    #[tokio::test]
    async fn test_backfill_existing_files() {
        let state = StateManager::in_memory().unwrap();
        state.upsert_file(FileRecord::new("a.txt")).await.unwrap();
        state.upsert_file(FileRecord::new("b.txt")).await.unwrap();
        state.upsert_file(FileRecord::new("app/c.txt")).await.unwrap();
        state.upsert_file(FileRecord::folder("docs")).await.unwrap();

        let reconciler = Reconciler::new(registry(&["a", "b"]), state.clone(), vec!["app/".to_string()]);
        let stats = reconciler.ensure_all_digesters_for_existing_files().await.unwrap();
        assert_eq!(stats.files, 2);
        assert_eq!(stats.added, 4);
        assert_eq!(stats.failed_files, 0);
        assert!(state.list_digests("app/c.txt").await.unwrap().is_empty());

        let again = reconciler.ensure_all_digesters_for_existing_files().await.unwrap();
        assert_eq!(again.added, 0);
        assert_eq!(again.orphaned_skipped, 0);
    }
}
