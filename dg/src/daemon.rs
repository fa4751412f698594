//! Daemon wiring
//!
//! Builds the registry, starts the worker through a `WorkerClient`, and keeps
//! the catalog in sync with the library root until asked to stop.

use std::future::Future;
use std::sync::Arc;

use eyre::{Context, Result};
use tracing::{debug, error, info, warn};

use crate::catalog::{CatalogScanner, ScanReport};
use crate::client::WorkerClient;
use crate::config::Config;
use crate::digest::{DigesterRegistry, builtin_digesters};
use crate::events::{NotificationBus, NotificationEvent};
use crate::state::StateManager;
use crate::worker::WorkerSetup;

/// Register the built-in digesters for this configuration
pub fn build_registry(config: &Config) -> Result<Arc<DigesterRegistry>> {
    let mut registry = DigesterRegistry::new();
    registry
        .initialize(builtin_digesters(&config.library.root, &config.digesters))
        .context("Failed to register digesters")?;
    Ok(Arc::new(registry))
}

/// Worker settings derived from the full configuration
pub fn worker_setup(config: &Config, registry: Arc<DigesterRegistry>) -> WorkerSetup {
    let mut worker = config.worker.clone();
    worker.excluded_prefixes = config.library.excluded_prefixes.clone();
    WorkerSetup {
        config: worker,
        db_path: config.storage.db_path.clone(),
        registry,
    }
}

/// Run in the foreground until Ctrl-C
pub async fn run_daemon(config: &Config) -> Result<()> {
    run_until(config, NotificationBus::default(), async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
        }
        info!("Ctrl-C received");
    })
    .await
}

/// Run until `shutdown` resolves, then stop the worker
pub async fn run_until(config: &Config, bus: NotificationBus, shutdown: impl Future<Output = ()>) -> Result<()> {
    info!("Daemon starting");
    config.validate()?;

    let state = StateManager::spawn(&config.storage.db_path).context("Failed to open digest store")?;
    let registry = build_registry(config)?;
    info!(digesters = ?registry.all_digest_types(), "Registry initialized");

    let client = WorkerClient::new(worker_setup(config, registry), config.client.clone(), bus.clone());
    client.start().await?;
    if !client.wait_ready(config.client.ready_timeout()).await {
        warn!(timeout = ?config.client.ready_timeout(), "Worker not ready yet, scanning anyway");
    }

    let scanner = CatalogScanner::new(
        config.library.root.clone(),
        config.library.excluded_prefixes.clone(),
        state.clone(),
    );

    tokio::pin!(shutdown);
    let mut interval = tokio::time::interval(config.library.scan_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!(root = %config.library.root.display(), "Daemon running");
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = interval.tick() => {
                match scanner.scan().await {
                    Ok(report) => forward_changes(&client, &bus, &report).await,
                    Err(e) => warn!(error = %e, "Catalog scan failed"),
                }
            }
        }
    }

    info!("Daemon stopping");
    let stopped = client.stop().await;
    let _ = state.shutdown().await;
    stopped
}

async fn forward_changes(client: &WorkerClient, bus: &NotificationBus, report: &ScanReport) {
    if report.is_empty() {
        debug!("forward_changes: nothing changed");
        return;
    }
    for change in &report.changes {
        if !client
            .notify_file_change(&change.file_path, change.is_new, change.content_changed)
            .await
        {
            debug!(file_path = %change.file_path, "Change held until the worker is ready");
        }
    }
    bus.emit(NotificationEvent::inbox_changed(None));
}

#[cfg(test)]
mod tests {
    use super::*;
    use digeststore::{DigestStatus, Store};
    use std::time::Duration;
    use tempfile::tempdir;

    fn config(root: &std::path::Path, db: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.library.root = root.to_path_buf();
        config.library.scan_interval_secs = 3600;
        config.storage.db_path = db.to_path_buf();
        config.worker.supervisor_interval_ms = 3_600_000;
        config
    }

    #[test]
    fn test_worker_setup_copies_exclusions() {
        let temp = tempdir().unwrap();
        let config = config(temp.path(), &temp.path().join("d.db"));
        let registry = build_registry(&config).unwrap();
        assert_eq!(registry.all_digest_types(), vec!["text-content", "word-stats"]);

        let setup = worker_setup(&config, registry);
        assert_eq!(setup.config.excluded_prefixes, config.library.excluded_prefixes);
        assert_eq!(setup.db_path, config.storage.db_path);
    }

    #[tokio::test]
    async fn test_daemon_digests_library() {
        let library = tempdir().unwrap();
        std::fs::write(library.path().join("notes.txt"), "digest orchestration digest").unwrap();
        std::fs::write(library.path().join("photo.png"), [0u8, 1, 2]).unwrap();
        let data = tempdir().unwrap();
        let db_path = data.path().join("digests.db");
        let config = config(library.path(), &db_path);

        let bus = NotificationBus::default();
        let mut rx = bus.subscribe();
        let shutdown = async move {
            // Stop once word-stats lands for the text file
            loop {
                match rx.recv().await {
                    Ok(NotificationEvent::DigestUpdated { file_path, digester, .. })
                        if file_path == "notes.txt" && digester == "word-stats" =>
                    {
                        break;
                    }
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(20), run_until(&config, bus, shutdown))
            .await
            .unwrap()
            .unwrap();

        let store = Store::open(&db_path).unwrap();
        let stats = store.get_digest("notes.txt", "word-stats").unwrap().unwrap();
        assert_eq!(stats.status, DigestStatus::Completed);
        assert!(stats.content.unwrap().contains("\"words\":3"));
        // The png may or may not have been reached before shutdown; it is never completed
        if let Some(row) = store.get_digest("photo.png", "text-content").unwrap() {
            assert_ne!(row.status, DigestStatus::Completed);
        }
    }
}
