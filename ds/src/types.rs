//! Row types persisted by the store

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::now_ms;

/// Status of one (file, digester) row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DigestStatus {
    /// Placeholder, not yet run
    #[default]
    Todo,
    /// Claimed by a running coordinator pass
    InProgress,
    /// Finished; content may be null
    Completed,
    /// Last attempt failed; retried until the attempt cap
    Failed,
    /// Not applicable to this file, or the digester is no longer registered
    Skipped,
}

impl DigestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// Completed and skipped rows are never picked up again on their own
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }

    pub fn all() -> [DigestStatus; 5] {
        [
            Self::Todo,
            Self::InProgress,
            Self::Completed,
            Self::Failed,
            Self::Skipped,
        ]
    }
}

impl std::fmt::Display for DigestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DigestStatus {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(Self::Todo),
            "in-progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            other => Err(eyre::eyre!("unknown digest status: {}", other)),
        }
    }
}

/// One row per (file_path, digester)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigestRecord {
    /// Opaque row id (UUIDv7)
    pub id: String,
    pub file_path: String,
    pub digester: String,
    pub status: DigestStatus,
    /// Digester payload; `None` on a completed row is a valid empty result
    pub content: Option<String>,
    /// Last failure message
    pub error: Option<String>,
    pub attempts: u32,
    /// Unix milliseconds
    pub created_at: i64,
    /// Unix milliseconds; drives stale sweeps and cascade comparisons
    pub updated_at: i64,
}

impl DigestRecord {
    /// New `todo` placeholder with a fresh id
    pub fn placeholder(file_path: impl Into<String>, digester: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            file_path: file_path.into(),
            digester: digester.into(),
            status: DigestStatus::Todo,
            content: None,
            error: None,
            attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether a failed row still has attempts left under `max_attempts`
    pub fn can_retry(&self, max_attempts: u32) -> bool {
        self.status == DigestStatus::Failed && self.attempts < max_attempts
    }

    pub fn touch(&mut self) {
        self.updated_at = now_ms();
    }
}

/// Catalog entry for a file in the library
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Path relative to the library root, forward slashes
    pub path: String,
    pub name: String,
    pub is_folder: bool,
    pub mime_type: Option<String>,
    pub size: Option<i64>,
    /// Unix milliseconds
    pub modified_at: i64,
    /// Unix milliseconds
    pub created_at: i64,
}

impl FileRecord {
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        let name = path.rsplit('/').next().unwrap_or(&path).to_string();
        let now = now_ms();
        Self {
            path,
            name,
            is_folder: false,
            mime_type: None,
            size: None,
            modified_at: now,
            created_at: now,
        }
    }

    pub fn folder(path: impl Into<String>) -> Self {
        Self {
            is_folder: true,
            ..Self::new(path)
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_size(mut self, size: i64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_modified_at(mut self, modified_at: i64) -> Self {
        self.modified_at = modified_at;
        self
    }
}

/// Per-file mutex row; survives a crash so the next run can release it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingLock {
    pub file_path: String,
    pub owner: String,
    /// Unix milliseconds
    pub acquired_at: i64,
}

/// Row counts for status reporting
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DigestStats {
    pub total: u64,
    /// status -> count
    pub by_status: BTreeMap<String, u64>,
    /// digester -> status -> count
    pub by_digester: BTreeMap<String, BTreeMap<String, u64>>,
}

impl DigestStats {
    pub fn count(&self, status: DigestStatus) -> u64 {
        self.by_status.get(status.as_str()).copied().unwrap_or(0)
    }
}
