//! Digester trait definition

use async_trait::async_trait;
use digeststore::{DigestRecord, DigestStatus, FileRecord};

use super::error::DigestError;
use crate::state::StateManager;

/// Everything a digester sees for one invocation
pub struct DigestContext<'a> {
    pub file_path: &'a str,
    pub file: &'a FileRecord,
    /// Every digest row for the file, loaded just before this step
    pub existing: &'a [DigestRecord],
    pub state: &'a StateManager,
}

impl<'a> DigestContext<'a> {
    /// Row for a digest output, if one exists
    pub fn existing(&self, digester: &str) -> Option<&'a DigestRecord> {
        self.existing.iter().find(|r| r.digester == digester)
    }

    /// Upstream row that must be completed before this digester can run
    pub fn require_completed(&self, digester: &str) -> Result<&'a DigestRecord, DigestError> {
        match self.existing(digester) {
            Some(record) if record.status == DigestStatus::Completed => Ok(record),
            _ => Err(DigestError::DependencyNotReady(digester.to_string())),
        }
    }
}

/// One produced output of a digester
#[derive(Debug, Clone, PartialEq)]
pub struct DigestOutput {
    pub digester: String,
    pub status: DigestStatus,
    pub content: Option<String>,
    pub error: Option<String>,
}

impl DigestOutput {
    /// Create a completed output; `None` content is a valid empty result
    pub fn completed(digester: impl Into<String>, content: Option<String>) -> Self {
        Self {
            digester: digester.into(),
            status: DigestStatus::Completed,
            content,
            error: None,
        }
    }

    /// Create a failed output for one name of a multi-output digester
    pub fn failed(digester: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            digester: digester.into(),
            status: DigestStatus::Failed,
            content: None,
            error: Some(error.into()),
        }
    }
}

/// A content-processing step run against catalog files
#[async_trait]
pub trait Digester: Send + Sync {
    /// Unique name; also the default output name
    fn name(&self) -> &str;

    /// Human-readable name
    fn label(&self) -> &str {
        self.name()
    }

    fn description(&self) -> &str {
        ""
    }

    /// Digest rows this digester writes
    fn output_names(&self) -> Vec<String> {
        vec![self.name().to_string()]
    }

    /// Output names this digester reads; they must be registered earlier
    fn upstreams(&self) -> Vec<String> {
        Vec::new()
    }

    /// Static applicability check on file facts only
    fn can_digest(&self, file_path: &str, file: &FileRecord) -> bool;

    /// Produce outputs, or fail. Must tolerate being invoked again for the same file.
    async fn digest(&self, ctx: &DigestContext<'_>) -> Result<Vec<DigestOutput>, DigestError>;

    /// Whether completed rows of this digester should run again.
    ///
    /// The default reopens them when a completed upstream row is strictly newer.
    fn should_reprocess_completed(&self, existing: &[DigestRecord]) -> bool {
        upstream_is_newer(existing, &self.output_names(), &self.upstreams())
    }
}

/// True when a completed upstream row was updated after any completed output row
pub fn upstream_is_newer(existing: &[DigestRecord], outputs: &[String], upstreams: &[String]) -> bool {
    let newest_upstream = existing
        .iter()
        .filter(|r| r.status == DigestStatus::Completed && upstreams.contains(&r.digester))
        .map(|r| r.updated_at)
        .max();

    let Some(newest_upstream) = newest_upstream else {
        return false;
    };

    existing
        .iter()
        .filter(|r| r.status == DigestStatus::Completed && outputs.contains(&r.digester))
        .any(|r| newest_upstream > r.updated_at)
}
