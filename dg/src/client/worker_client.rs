//! WorkerClient - host-side owner of the background worker
//!
//! Starts the worker thread, forwards requests into it, fans its events out to
//! subscribers, and respawns it after an unexpected exit.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use eyre::eyre;
use tokio::sync::{Mutex, Notify, broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::ClientConfig;
use crate::events::{NotificationBus, NotificationEvent};
use crate::worker::{WorkerEvent, WorkerRequest, WorkerSetup, spawn_worker_thread};

/// Slack on top of the worker's own shutdown timeout
const STOP_GRACE: Duration = Duration::from_secs(5);

/// State shared between the client handle and its supervision task
struct Shared {
    ready: AtomicBool,
    stopping: AtomicBool,
    restarts: AtomicU64,
    requests: Mutex<Option<mpsc::Sender<WorkerRequest>>>,
    /// File changes seen while no worker was ready; guards `ready` transitions to true
    held_changes: Mutex<Vec<WorkerRequest>>,
    ready_changed: Notify,
    stop_requested: Notify,
}

/// Handle the host uses to drive the worker
pub struct WorkerClient {
    setup: WorkerSetup,
    config: ClientConfig,
    shared: Arc<Shared>,
    bus: NotificationBus,
    events: broadcast::Sender<WorkerEvent>,
    supervision: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerClient {
    pub fn new(setup: WorkerSetup, config: ClientConfig, bus: NotificationBus) -> Self {
        debug!("WorkerClient::new: called");
        let (events, _) = broadcast::channel(setup.config.channel_buffer);
        Self {
            setup,
            config,
            shared: Arc::new(Shared {
                ready: AtomicBool::new(false),
                stopping: AtomicBool::new(false),
                restarts: AtomicU64::new(0),
                requests: Mutex::new(None),
                held_changes: Mutex::new(Vec::new()),
                ready_changed: Notify::new(),
                stop_requested: Notify::new(),
            }),
            bus,
            events,
            supervision: Mutex::new(None),
        }
    }

    /// Spawn the worker and its supervision task. Calling twice is a no-op.
    pub async fn start(&self) -> eyre::Result<()> {
        let mut supervision = self.supervision.lock().await;
        if supervision.is_some() {
            debug!("WorkerClient::start: already started");
            return Ok(());
        }
        if self.shared.stopping.load(Ordering::SeqCst) {
            return Err(eyre!("Worker client has been stopped"));
        }

        info!("Starting digest worker");
        *supervision = Some(tokio::spawn(supervise(
            self.setup.clone(),
            self.config.clone(),
            self.shared.clone(),
            self.bus.clone(),
            self.events.clone(),
        )));
        Ok(())
    }

    /// Wait until the worker reports ready. Returns false on timeout.
    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.shared.ready_changed.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.is_ready() {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }

    pub fn is_ready(&self) -> bool {
        self.shared.ready.load(Ordering::SeqCst)
    }

    /// Times the worker was respawned after an unexpected exit
    pub fn restart_count(&self) -> u64 {
        self.shared.restarts.load(Ordering::SeqCst)
    }

    /// Ask the worker to digest a file. Dropped with a warning while not ready.
    pub async fn request_digest(&self, file_path: &str) -> bool {
        self.send(WorkerRequest::Digest {
            file_path: file_path.to_string(),
            reset: false,
        })
        .await
    }

    /// Return a file's rows to `todo`, then queue it
    pub async fn request_reset(&self, file_path: &str) -> bool {
        self.send(WorkerRequest::Digest {
            file_path: file_path.to_string(),
            reset: true,
        })
        .await
    }

    /// Forward a catalog change observed on the host.
    ///
    /// Returns false when no worker is ready; the change is then held and
    /// delivered to the next worker that reports ready.
    pub async fn notify_file_change(&self, file_path: &str, is_new: bool, content_changed: bool) -> bool {
        {
            let mut held = self.shared.held_changes.lock().await;
            if !self.is_ready() {
                debug!(%file_path, "Worker not ready, holding file change");
                hold_change(&mut held, file_path, is_new, content_changed);
                return false;
            }
        }

        let request = WorkerRequest::FileChange {
            file_path: file_path.to_string(),
            is_new,
            content_changed,
        };
        if self.send(request).await {
            return true;
        }
        hold_change(
            &mut *self.shared.held_changes.lock().await,
            file_path,
            is_new,
            content_changed,
        );
        false
    }

    /// File changes waiting for a ready worker
    pub async fn held_changes(&self) -> Vec<WorkerRequest> {
        self.shared.held_changes.lock().await.clone()
    }

    pub fn notifications(&self) -> &NotificationBus {
        &self.bus
    }

    pub fn subscribe_notifications(&self) -> broadcast::Receiver<NotificationEvent> {
        self.bus.subscribe()
    }

    /// Every event the worker sends, including start/complete reports
    pub fn subscribe_events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.events.subscribe()
    }

    /// Shut the worker down and wait for the supervision task to finish
    pub async fn stop(&self) -> eyre::Result<()> {
        info!("Stopping digest worker");
        self.shared.stopping.store(true, Ordering::SeqCst);
        self.shared.stop_requested.notify_one();

        let sender = self.shared.requests.lock().await.clone();
        if let Some(sender) = sender
            && sender.send(WorkerRequest::Shutdown).await.is_err()
        {
            debug!("Worker already gone");
        }

        let Some(handle) = self.supervision.lock().await.take() else {
            return Ok(());
        };
        let limit = self.setup.config.shutdown_timeout() + STOP_GRACE;
        match tokio::time::timeout(limit, handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(eyre!("Worker supervision task failed: {}", e)),
            Err(_) => Err(eyre!("Worker did not stop within {:?}", limit)),
        }
    }

    async fn send(&self, request: WorkerRequest) -> bool {
        if !self.is_ready() {
            warn!(?request, "Worker not ready, dropping request");
            return false;
        }
        let sender = self.shared.requests.lock().await.clone();
        let Some(sender) = sender else {
            warn!(?request, "Worker not running, dropping request");
            return false;
        };
        match sender.send(request).await {
            Ok(()) => true,
            Err(e) => {
                warn!(request = ?e.0, "Worker channel closed, dropping request");
                false
            }
        }
    }
}

/// Merge a change into the held list, one entry per path
fn hold_change(held: &mut Vec<WorkerRequest>, file_path: &str, is_new: bool, content_changed: bool) {
    for request in held.iter_mut() {
        if let WorkerRequest::FileChange {
            file_path: held_path,
            is_new: held_new,
            content_changed: held_changed,
        } = request
            && held_path == file_path
        {
            *held_new |= is_new;
            *held_changed |= content_changed;
            return;
        }
    }
    held.push(WorkerRequest::FileChange {
        file_path: file_path.to_string(),
        is_new,
        content_changed,
    });
}

/// Send held changes to a fresh worker; whatever it does not take is held again
async fn deliver_held(shared: Arc<Shared>, sender: mpsc::Sender<WorkerRequest>, held: Vec<WorkerRequest>) {
    info!(count = held.len(), "Delivering held file changes");
    let mut remaining = held.into_iter();
    while let Some(request) = remaining.next() {
        if let Err(e) = sender.send(request).await {
            warn!(request = ?e.0, "Worker gone before held changes were delivered");
            let mut held = shared.held_changes.lock().await;
            for request in std::iter::once(e.0).chain(remaining) {
                if let WorkerRequest::FileChange {
                    file_path,
                    is_new,
                    content_changed,
                } = request
                {
                    hold_change(&mut held, &file_path, is_new, content_changed);
                }
            }
            return;
        }
    }
}

/// Run a worker, pump its events, and respawn it until the client stops
async fn supervise(
    setup: WorkerSetup,
    config: ClientConfig,
    shared: Arc<Shared>,
    bus: NotificationBus,
    events: broadcast::Sender<WorkerEvent>,
) {
    loop {
        let buffer = setup.config.channel_buffer;
        let (req_tx, req_rx) = mpsc::channel(buffer);
        let (ev_tx, mut ev_rx) = mpsc::channel(buffer);

        match spawn_worker_thread(setup.clone(), req_rx, ev_tx) {
            Ok(handle) => {
                *shared.requests.lock().await = Some(req_tx.clone());

                // Ends when the worker thread drops its last event sender
                while let Some(event) = ev_rx.recv().await {
                    match &event {
                        WorkerEvent::Ready => {
                            let held = {
                                let mut held = shared.held_changes.lock().await;
                                shared.ready.store(true, Ordering::SeqCst);
                                std::mem::take(&mut *held)
                            };
                            shared.ready_changed.notify_waiters();
                            if !held.is_empty() {
                                tokio::spawn(deliver_held(shared.clone(), req_tx.clone(), held));
                            }
                        }
                        WorkerEvent::Notification { event } => bus.emit(event.clone()),
                        WorkerEvent::ShutdownComplete => debug!("Worker reported shutdown complete"),
                        _ => {}
                    }
                    let _ = events.send(event);
                }

                shared.ready.store(false, Ordering::SeqCst);
                shared.ready_changed.notify_waiters();
                shared.requests.lock().await.take();
                drop(req_tx);

                match tokio::task::spawn_blocking(move || handle.join()).await {
                    Ok(Ok(Ok(()))) => debug!("Worker thread exited cleanly"),
                    Ok(Ok(Err(e))) => error!(error = %e, "Worker exited with error"),
                    Ok(Err(_)) => error!("Worker thread panicked"),
                    Err(e) => error!(error = %e, "Failed to join worker thread"),
                }
            }
            Err(e) => error!(error = %e, "Failed to spawn worker thread"),
        }

        if shared.stopping.load(Ordering::SeqCst) {
            info!("Digest worker stopped");
            break;
        }

        error!(delay = ?config.restart_delay(), "Worker exited unexpectedly, restarting");
        tokio::select! {
            _ = tokio::time::sleep(config.restart_delay()) => {}
            _ = shared.stop_requested.notified() => {}
        }
        if shared.stopping.load(Ordering::SeqCst) {
            break;
        }
        shared.restarts.fetch_add(1, Ordering::SeqCst);
    }
}
