//! Notification event types

use chrono::{DateTime, Utc};
use digeststore::DigestStatus;
use serde::{Deserialize, Serialize};

/// Something a client may want to refresh
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum NotificationEvent {
    /// The set of files, or a file's overall digest state, changed
    InboxChanged {
        file_path: Option<String>,
        timestamp: DateTime<Utc>,
    },
    /// One digest row was written with a new status
    DigestUpdated {
        file_path: String,
        digester: String,
        status: DigestStatus,
        timestamp: DateTime<Utc>,
    },
}

impl NotificationEvent {
    pub fn inbox_changed(file_path: Option<String>) -> Self {
        Self::InboxChanged {
            file_path,
            timestamp: Utc::now(),
        }
    }

    pub fn digest_updated(file_path: impl Into<String>, digester: impl Into<String>, status: DigestStatus) -> Self {
        Self::DigestUpdated {
            file_path: file_path.into(),
            digester: digester.into(),
            status,
            timestamp: Utc::now(),
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::InboxChanged { .. } => "inbox-changed",
            Self::DigestUpdated { .. } => "digest-updated",
        }
    }

    pub fn file_path(&self) -> Option<&str> {
        match self {
            Self::InboxChanged { file_path, .. } => file_path.as_deref(),
            Self::DigestUpdated { file_path, .. } => Some(file_path),
        }
    }
}
