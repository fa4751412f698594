//! Coordinator - runs the registered digesters against one file

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use digeststore::{DigestRecord, DigestStatus, FileRecord};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::reconciler::Reconciler;
use crate::digest::{DigestContext, DigestOutput, Digester, DigesterRegistry};
use crate::events::NotificationEvent;
use crate::state::StateManager;

/// Stored when a digester returns an empty output list
pub const NO_OUTPUT_ERROR: &str = "No output produced";

/// Stored for a pending output the digester did not return
pub const OUTPUT_NOT_PRODUCED_ERROR: &str = "Output not produced";

/// What one `process_file` pass did, counted per digester
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FileOutcome {
    /// Digesters whose pending outputs all completed
    pub completed: usize,
    /// Digesters with at least one failed output
    pub failed: usize,
    /// Digesters that do not apply to this file
    pub skipped: usize,
    /// Digesters with nothing pending
    pub unchanged: usize,
    /// Digesters whose rows were already in progress
    pub in_progress: usize,
    /// The pass stopped early for shutdown
    pub interrupted: bool,
}

impl FileOutcome {
    pub fn is_success(&self) -> bool {
        self.failed == 0 && !self.interrupted
    }

    fn changed(&self) -> bool {
        self.completed + self.failed + self.skipped > 0
    }
}

/// Result of one digester step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Unchanged,
    InProgress,
    Skipped,
    Completed,
    Failed,
}

/// Applies the digest state machine for one file at a time
pub struct Coordinator {
    registry: Arc<DigesterRegistry>,
    state: StateManager,
    reconciler: Reconciler,
    max_attempts: u32,
    notifications: Option<mpsc::UnboundedSender<NotificationEvent>>,
    halt: Option<Arc<AtomicBool>>,
}

impl Coordinator {
    pub fn new(registry: Arc<DigesterRegistry>, state: StateManager, reconciler: Reconciler, max_attempts: u32) -> Self {
        debug!(max_attempts, digesters = registry.count(), "Coordinator::new: called");
        Self {
            registry,
            state,
            reconciler,
            max_attempts,
            notifications: None,
            halt: None,
        }
    }

    /// Send a notification for every row written
    pub fn with_notifications(mut self, tx: mpsc::UnboundedSender<NotificationEvent>) -> Self {
        self.notifications = Some(tx);
        self
    }

    /// Stop between digesters once `flag` is set
    pub fn with_halt_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.halt = Some(flag);
        self
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    fn halted(&self) -> bool {
        self.halt.as_ref().is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    fn notify(&self, event: NotificationEvent) {
        if let Some(tx) = &self.notifications {
            let _ = tx.send(event);
        }
    }

    /// Run every applicable digester against `file_path`, in registry order.
    ///
    /// Digester failures are recorded on their rows and counted in the outcome;
    /// an `Err` means the file is unknown or the store failed.
    pub async fn process_file(&self, file_path: &str) -> eyre::Result<FileOutcome> {
        debug!(%file_path, "process_file: called");
        let file = self.state.get_file_required(file_path).await?;

        let mut outcome = FileOutcome::default();
        if file.is_folder {
            debug!(%file_path, "process_file: folder, nothing to digest");
            return Ok(outcome);
        }

        self.reconciler.ensure_all_digesters(file_path).await?;

        for digester in self.registry.digesters() {
            if self.halted() {
                info!(%file_path, "Shutdown requested, stopping before {}", digester.name());
                outcome.interrupted = true;
                break;
            }

            match self.run_digester(digester.as_ref(), file_path, &file).await? {
                Step::Unchanged => outcome.unchanged += 1,
                Step::InProgress => outcome.in_progress += 1,
                Step::Skipped => outcome.skipped += 1,
                Step::Completed => outcome.completed += 1,
                Step::Failed => outcome.failed += 1,
            }
        }

        if outcome.changed() {
            self.notify(NotificationEvent::inbox_changed(Some(file_path.to_string())));
        }
        debug!(%file_path, ?outcome, "process_file: done");
        Ok(outcome)
    }

    async fn run_digester(&self, digester: &dyn Digester, file_path: &str, file: &FileRecord) -> eyre::Result<Step> {
        let name = digester.name();
        let outputs = digester.output_names();

        // Rows are reloaded for every digester so upstream results are visible
        let mut existing = self.state.list_digests(file_path).await?;
        if outputs.iter().any(|o| !existing.iter().any(|r| &r.digester == o)) {
            self.reconciler.ensure_all_digesters(file_path).await?;
            existing = self.state.list_digests(file_path).await?;
        }

        let own: Vec<DigestRecord> = existing
            .iter()
            .filter(|r| outputs.contains(&r.digester))
            .cloned()
            .collect();

        if own.iter().any(|r| r.status == DigestStatus::InProgress) {
            debug!(%file_path, digester = %name, "Rows already in progress, leaving them");
            return Ok(Step::InProgress);
        }

        let reopen =
            own.iter().any(|r| r.status == DigestStatus::Completed) && digester.should_reprocess_completed(&existing);
        if reopen {
            debug!(%file_path, digester = %name, "Upstream changed, reprocessing completed rows");
        }

        let pending: Vec<DigestRecord> = own
            .into_iter()
            .filter(|r| match r.status {
                DigestStatus::Todo => true,
                DigestStatus::Failed => r.can_retry(self.max_attempts),
                DigestStatus::Completed => reopen,
                DigestStatus::InProgress | DigestStatus::Skipped => false,
            })
            .collect();

        if pending.is_empty() {
            return Ok(Step::Unchanged);
        }

        if !digester.can_digest(file_path, file) {
            debug!(%file_path, digester = %name, "Digester does not apply, skipping");
            for mut record in pending {
                record.status = DigestStatus::Skipped;
                record.error = None;
                self.save(record).await?;
            }
            return Ok(Step::Skipped);
        }

        let mut claimed = Vec::with_capacity(pending.len());
        for mut record in pending {
            record.status = DigestStatus::InProgress;
            record.touch();
            self.state.update_digest(record.clone()).await?;
            claimed.push(record);
        }

        let ctx = DigestContext {
            file_path,
            file,
            existing: &existing,
            state: &self.state,
        };

        match digester.digest(&ctx).await {
            Err(e) => {
                if e.is_dependency_not_ready() {
                    debug!(%file_path, digester = %name, error = %e, "Dependency not ready");
                } else if e.is_transient() {
                    info!(%file_path, digester = %name, error = %e, "Digester failed, may recover on retry");
                } else {
                    warn!(%file_path, digester = %name, error = %e, "Digester failed");
                }
                let message = e.to_string();
                for record in claimed {
                    self.fail(record, &message).await?;
                }
                Ok(Step::Failed)
            }
            Ok(produced) if produced.is_empty() => {
                warn!(%file_path, digester = %name, "Digester returned no output");
                for record in claimed {
                    self.fail(record, NO_OUTPUT_ERROR).await?;
                }
                Ok(Step::Failed)
            }
            Ok(produced) => self.persist_outputs(name, &outputs, file_path, claimed, produced).await,
        }
    }

    async fn persist_outputs(
        &self,
        name: &str,
        declared: &[String],
        file_path: &str,
        claimed: Vec<DigestRecord>,
        produced: Vec<DigestOutput>,
    ) -> eyre::Result<Step> {
        let mut step = Step::Completed;
        let mut claimed: HashMap<String, DigestRecord> = claimed.into_iter().map(|r| (r.digester.clone(), r)).collect();

        for output in produced {
            if !declared.contains(&output.digester) {
                warn!(%file_path, digester = %name, output = %output.digester, "Ignoring undeclared output");
                continue;
            }
            let Some(mut record) = claimed.remove(&output.digester) else {
                debug!(%file_path, output = %output.digester, "Output was not pending, ignoring");
                continue;
            };

            match output.status {
                DigestStatus::Completed => {
                    record.status = DigestStatus::Completed;
                    record.content = output.content;
                    record.error = None;
                    record.attempts = 0;
                    self.save(record).await?;
                }
                DigestStatus::Failed => {
                    let message = output.error.unwrap_or_else(|| "Digest failed".to_string());
                    self.fail(record, &message).await?;
                    step = Step::Failed;
                }
                other => {
                    let message = format!("Invalid output status: {}", other);
                    self.fail(record, &message).await?;
                    step = Step::Failed;
                }
            }
        }

        for (_, record) in claimed {
            warn!(%file_path, output = %record.digester, "Declared output not produced");
            self.fail(record, OUTPUT_NOT_PRODUCED_ERROR).await?;
            step = Step::Failed;
        }

        Ok(step)
    }

    async fn fail(&self, mut record: DigestRecord, message: &str) -> eyre::Result<()> {
        record.status = DigestStatus::Failed;
        record.error = Some(message.to_string());
        record.attempts = record.attempts.saturating_add(1);
        self.save(record).await
    }

    async fn save(&self, mut record: DigestRecord) -> eyre::Result<()> {
        record.touch();
        let event = NotificationEvent::digest_updated(&record.file_path, &record.digester, record.status);
        self.state.update_digest(record).await?;
        self.notify(event);
        Ok(())
    }
}
