//! Host/worker message types
//!
//! The worker runs on its own thread; these are the only values that cross
//! that boundary. Each is a self-describing JSON object tagged by `type`.

use serde::{Deserialize, Serialize};

use crate::events::NotificationEvent;

/// Messages from the host to the worker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WorkerRequest {
    /// Queue a file; `reset` first returns all its rows to `todo`
    Digest {
        file_path: String,
        #[serde(default)]
        reset: bool,
    },

    /// A catalog change observed by the host
    FileChange {
        file_path: String,
        is_new: bool,
        content_changed: bool,
    },

    /// Drain and stop
    Shutdown,
}

/// Messages from the worker to the host
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WorkerEvent {
    /// Worker finished start-up and accepts requests
    Ready,

    DigestStarted {
        file_path: String,
    },

    DigestComplete {
        file_path: String,
        success: bool,
    },

    /// Sent last, after in-flight work drained or the shutdown timeout passed
    ShutdownComplete,

    /// Pass-through for the host's notification bus
    Notification {
        event: NotificationEvent,
    },
}

impl WorkerEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::DigestStarted { .. } => "digest-started",
            Self::DigestComplete { .. } => "digest-complete",
            Self::ShutdownComplete => "shutdown-complete",
            Self::Notification { .. } => "notification",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use digeststore::DigestStatus;

    #[test]
    fn test_digest_request_serialize() {
        let msg = WorkerRequest::Digest {
            file_path: "inbox/a.txt".to_string(),
            reset: true,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"digest","file_path":"inbox/a.txt","reset":true}"#);
    }

    #[test]
    fn test_digest_request_reset_defaults_false() {
        let json = r#"{"type":"digest","file_path":"a.txt"}"#;
        let msg: WorkerRequest = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg,
            WorkerRequest::Digest {
                file_path: "a.txt".to_string(),
                reset: false
            }
        );
    }

    #[test]
    fn test_file_change_serialize() {
        let msg = WorkerRequest::FileChange {
            file_path: "a.txt".to_string(),
            is_new: true,
            content_changed: false,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(
            json,
            r#"{"type":"file-change","file_path":"a.txt","is_new":true,"content_changed":false}"#
        );
    }

    #[test]
    fn test_shutdown_serialize() {
        let json = serde_json::to_string(&WorkerRequest::Shutdown).unwrap();
        assert_eq!(json, r#"{"type":"shutdown"}"#);
    }

    #[test]
    fn test_worker_events_serialize() {
        assert_eq!(serde_json::to_string(&WorkerEvent::Ready).unwrap(), r#"{"type":"ready"}"#);
        assert_eq!(
            serde_json::to_string(&WorkerEvent::DigestComplete {
                file_path: "a.txt".to_string(),
                success: false
            })
            .unwrap(),
            r#"{"type":"digest-complete","file_path":"a.txt","success":false}"#
        );
        assert_eq!(
            serde_json::to_string(&WorkerEvent::ShutdownComplete).unwrap(),
            r#"{"type":"shutdown-complete"}"#
        );
    }

    #[test]
    fn test_notification_round_trip() {
        let msg = WorkerEvent::Notification {
            event: NotificationEvent::digest_updated("a.txt", "word-stats", DigestStatus::Skipped),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.starts_with(r#"{"type":"notification","event":{"type":"digest-updated""#));
        let parsed: WorkerEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
        assert_eq!(parsed.event_type(), "notification");
    }
}
