//! DigestWorker - the background execution context
//!
//! Runs on its own OS thread with a current-thread runtime. The processing
//! loop, the supervisor and request handling are tasks that interleave only
//! at await points.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use digeststore::now_ms;
use eyre::eyre;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::config::WorkerConfig;
use super::messages::{WorkerEvent, WorkerRequest};
use super::queue::WorkQueue;
use super::supervisor::Supervisor;
use crate::coordinator::{Coordinator, Reconciler};
use crate::digest::DigesterRegistry;
use crate::events::NotificationEvent;
use crate::state::StateManager;

const WORKER_THREAD_NAME: &str = "digest-worker";
const NOTIFICATION_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything needed to start a fresh worker
#[derive(Clone)]
pub struct WorkerSetup {
    pub config: WorkerConfig,
    pub db_path: PathBuf,
    pub registry: Arc<DigesterRegistry>,
}

/// Entry point of the background context
pub struct DigestWorker;

impl DigestWorker {
    /// Run until a `shutdown` request or the request channel closes.
    ///
    /// Returns an error when the processing loop dies underneath the worker;
    /// the host treats that as a crash.
    pub async fn run(
        setup: WorkerSetup,
        mut requests: mpsc::Receiver<WorkerRequest>,
        events: mpsc::Sender<WorkerEvent>,
    ) -> eyre::Result<()> {
        let started_at = now_ms();
        let owner = format!("worker-{}-{}", std::process::id(), started_at);
        info!(%owner, db_path = %setup.db_path.display(), "Digest worker starting");

        let state = StateManager::spawn(&setup.db_path)?;
        let config = setup.config;
        let queue = Arc::new(WorkQueue::new());
        let reconciler = Reconciler::new(setup.registry.clone(), state.clone(), config.excluded_prefixes.clone());

        let mut supervisor = Supervisor::new(queue.clone(), state.clone(), setup.registry.clone(), config.clone());
        match supervisor.startup(started_at).await {
            Ok(stats) => info!(%stats, "Startup recovery done"),
            Err(e) => warn!(error = %e, "Startup recovery failed"),
        }
        if let Err(e) = reconciler.ensure_all_digesters_for_existing_files().await {
            warn!(error = %e, "Start-up reconciliation failed, continuing");
        }

        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let coordinator = Coordinator::new(setup.registry.clone(), state.clone(), reconciler.clone(), config.max_attempts)
            .with_notifications(notify_tx)
            .with_halt_flag(queue.shutdown_flag());

        let mut processing = tokio::spawn(processing_loop(
            queue.clone(),
            coordinator,
            state.clone(),
            owner,
            events.clone(),
        ));
        let supervisor_task = tokio::spawn(supervisor.run());
        let forwarder = tokio::spawn(forward_notifications(notify_rx, events.clone()));

        let _ = events.send(WorkerEvent::Ready).await;
        info!("Digest worker ready");

        let outcome = loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(WorkerRequest::Shutdown) => {
                        info!("Shutdown requested");
                        break Ok(());
                    }
                    None => {
                        info!("Request channel closed, shutting down");
                        break Ok(());
                    }
                    Some(request) => {
                        if let Err(e) = handle_request(request, &queue, &state, &reconciler, &config).await {
                            warn!(error = %e, "Failed to handle worker request");
                        }
                    }
                },
                joined = &mut processing => {
                    break Err(match joined {
                        Ok(()) => eyre!("Processing loop exited unexpectedly"),
                        Err(e) => eyre!("Processing loop crashed: {}", e),
                    });
                }
            }
        };

        queue.begin_shutdown();
        supervisor_task.abort();

        if let Err(e) = outcome {
            error!(error = %e, "Digest worker failed");
            forwarder.abort();
            let _ = state.shutdown().await;
            return Err(e);
        }

        if !queue.wait_idle(config.shutdown_timeout()).await {
            let in_flight = queue.snapshot().await.processing;
            warn!(?in_flight, "Shutdown timeout reached with work in flight");
            processing.abort();
        }
        if tokio::time::timeout(config.shutdown_timeout(), &mut processing).await.is_err() {
            processing.abort();
        }
        // The coordinator, and with it the notification sender, is gone now
        let _ = tokio::time::timeout(NOTIFICATION_FLUSH_TIMEOUT, forwarder).await;

        let _ = events.send(WorkerEvent::ShutdownComplete).await;
        let _ = state.shutdown().await;
        info!("Digest worker stopped");
        Ok(())
    }
}

/// Start a worker on a dedicated thread with its own current-thread runtime
pub fn spawn_worker_thread(
    setup: WorkerSetup,
    requests: mpsc::Receiver<WorkerRequest>,
    events: mpsc::Sender<WorkerEvent>,
) -> std::io::Result<JoinHandle<eyre::Result<()>>> {
    std::thread::Builder::new()
        .name(WORKER_THREAD_NAME.to_string())
        .spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
            runtime.block_on(DigestWorker::run(setup, requests, events))
        })
}

async fn handle_request(
    request: WorkerRequest,
    queue: &WorkQueue,
    state: &StateManager,
    reconciler: &Reconciler,
    config: &WorkerConfig,
) -> eyre::Result<()> {
    match request {
        WorkerRequest::Digest { file_path, reset } => {
            if config.is_excluded(&file_path) {
                debug!(%file_path, "Ignoring digest request for excluded path");
                return Ok(());
            }
            if reset {
                if queue.defer_reset(&file_path).await {
                    info!(%file_path, "File in flight, reset deferred");
                    return Ok(());
                }
                let rows = state.reset_file_digests(&file_path).await?;
                info!(%file_path, rows, "Reset digests before re-queue");
            }
            let result = queue.queue_file(&file_path).await;
            debug!(%file_path, ?result, "Digest requested");
        }
        WorkerRequest::FileChange {
            file_path,
            is_new,
            content_changed,
        } => {
            if config.is_excluded(&file_path) {
                debug!(%file_path, "Ignoring change to excluded path");
                return Ok(());
            }
            if is_new {
                reconciler.ensure_all_digesters(&file_path).await?;
            } else if content_changed {
                // Rows in flight would be overwritten with results from the old content
                if queue.defer_reset(&file_path).await {
                    debug!(%file_path, "Content changed during a pass, reset deferred");
                    return Ok(());
                }
                let rows = state.reset_file_digests(&file_path).await?;
                debug!(%file_path, rows, "Content changed, digests reset");
            }
            let result = queue.queue_file(&file_path).await;
            debug!(%file_path, ?result, "File change queued");
        }
        WorkerRequest::Shutdown => {}
    }
    Ok(())
}

async fn processing_loop(
    queue: Arc<WorkQueue>,
    coordinator: Coordinator,
    state: StateManager,
    owner: String,
    events: mpsc::Sender<WorkerEvent>,
) {
    info!("Processing loop started");
    while let Some(file_path) = queue.next_file().await {
        match state.acquire_lock(&file_path, &owner).await {
            Ok(true) => {}
            Ok(false) => warn!(%file_path, "Processing lock already held, continuing"),
            Err(e) => warn!(%file_path, error = %e, "Failed to acquire processing lock"),
        }

        let _ = events
            .send(WorkerEvent::DigestStarted {
                file_path: file_path.clone(),
            })
            .await;

        let success = match coordinator.process_file(&file_path).await {
            Ok(outcome) => {
                debug!(%file_path, ?outcome, "File processed");
                outcome.is_success()
            }
            Err(e) => {
                error!(%file_path, error = %e, "Failed to process file");
                false
            }
        };

        let _ = events
            .send(WorkerEvent::DigestComplete {
                file_path: file_path.clone(),
                success,
            })
            .await;

        if let Err(e) = state.release_lock(&file_path).await {
            warn!(%file_path, error = %e, "Failed to release processing lock");
        }
        if queue.finish(&file_path).await {
            requeue_after_reset(&queue, &state, &file_path).await;
        }
    }
    info!("Processing loop stopped");
}

/// Apply a reset that arrived while the file was in flight
async fn requeue_after_reset(queue: &WorkQueue, state: &StateManager, file_path: &str) {
    match state.reset_file_digests(file_path).await {
        Ok(rows) => info!(%file_path, rows, "Applied deferred reset"),
        Err(e) => {
            warn!(%file_path, error = %e, "Failed to apply deferred reset");
            return;
        }
    }
    let result = queue.queue_file(file_path).await;
    debug!(%file_path, ?result, "Re-queued after deferred reset");
}

async fn forward_notifications(mut rx: mpsc::UnboundedReceiver<NotificationEvent>, events: mpsc::Sender<WorkerEvent>) {
    while let Some(event) = rx.recv().await {
        if events.send(WorkerEvent::Notification { event }).await.is_err() {
            debug!("Host gone, dropping notifications");
            break;
        }
    }
}
