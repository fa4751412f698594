//! Digester error types

use thiserror::Error;

use crate::state::StateError;

/// Errors a digester can return from `digest`
#[derive(Debug, Error)]
pub enum DigestError {
    /// An upstream row this digester reads is not completed yet
    #[error("Dependency not ready: {0}")]
    DependencyNotReady(String),

    #[error("Unsupported input: {0}")]
    Unsupported(String),

    #[error("Digest failed: {0}")]
    Failed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("State error: {0}")]
    State(#[from] StateError),
}

impl DigestError {
    /// Check if this is the expected ordering failure
    pub fn is_dependency_not_ready(&self) -> bool {
        matches!(self, DigestError::DependencyNotReady(_))
    }

    /// Whether a later attempt could plausibly succeed
    pub fn is_transient(&self) -> bool {
        match self {
            DigestError::DependencyNotReady(_) => true,
            DigestError::Io(_) => true,
            DigestError::State(_) => true,
            DigestError::Unsupported(_) => false,
            DigestError::Failed(_) => false,
            DigestError::Json(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_not_ready_is_transient() {
        let err = DigestError::DependencyNotReady("text-content".to_string());
        assert!(err.is_dependency_not_ready());
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "Dependency not ready: text-content");
    }

    #[test]
    fn test_content_failures_are_not_transient() {
        assert!(!DigestError::Failed("bad pdf".to_string()).is_transient());
        assert!(!DigestError::Unsupported("zip".to_string()).is_dependency_not_ready());
    }

    #[test]
    fn test_io_error_converts() {
        let err: DigestError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(err.is_transient());
        assert!(err.to_string().contains("gone"));
    }
}
