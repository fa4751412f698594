//! Built-in local digesters
//!
//! These run without any external service and give every library a working
//! pipeline: `text-content` extracts text, `word-stats` summarizes it.

use async_trait::async_trait;
use digeststore::FileRecord;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use super::error::DigestError;
use super::traits::{DigestContext, DigestOutput, Digester};
use crate::config::DigestersConfig;

pub const TEXT_CONTENT: &str = "text-content";
pub const WORD_STATS: &str = "word-stats";

const TEXT_MIME_TYPES: &[&str] = &[
    "application/json",
    "application/xml",
    "application/x-yaml",
    "application/toml",
];

const TOP_TERMS: usize = 5;
const MIN_TERM_LEN: usize = 3;

fn is_text(file: &FileRecord) -> bool {
    if file.is_folder {
        return false;
    }
    match file.mime_type.as_deref() {
        Some(mime) => mime.starts_with("text/") || TEXT_MIME_TYPES.contains(&mime),
        None => false,
    }
}

/// Build the default digester set for a library rooted at `root`
pub fn builtin_digesters(root: &Path, config: &DigestersConfig) -> Vec<Arc<dyn Digester>> {
    vec![
        Arc::new(TextContentDigester::new(root, config.text_max_bytes)),
        Arc::new(WordStatsDigester),
    ]
}

/// Reads text files; empty files complete with no content
pub struct TextContentDigester {
    root: PathBuf,
    max_bytes: usize,
}

impl TextContentDigester {
    pub fn new(root: impl Into<PathBuf>, max_bytes: usize) -> Self {
        Self {
            root: root.into(),
            max_bytes,
        }
    }
}

#[async_trait]
impl Digester for TextContentDigester {
    fn name(&self) -> &str {
        TEXT_CONTENT
    }

    fn label(&self) -> &str {
        "Text content"
    }

    fn description(&self) -> &str {
        "Plain text of text-like files, capped in size"
    }

    fn can_digest(&self, _file_path: &str, file: &FileRecord) -> bool {
        is_text(file)
    }

    async fn digest(&self, ctx: &DigestContext<'_>) -> Result<Vec<DigestOutput>, DigestError> {
        let path = self.root.join(ctx.file_path);
        debug!(path = %path.display(), "TextContentDigester::digest: called");

        let mut bytes = tokio::fs::read(&path).await?;
        bytes.truncate(self.max_bytes);
        let text = String::from_utf8_lossy(&bytes);
        let text = text.trim();

        let content = if text.is_empty() { None } else { Some(text.to_string()) };
        Ok(vec![DigestOutput::completed(TEXT_CONTENT, content)])
    }
}

/// Counts stored as the `word-stats` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordStats {
    pub words: usize,
    pub lines: usize,
    pub top_terms: Vec<String>,
}

impl WordStats {
    pub fn from_text(text: &str) -> Self {
        let mut counts: HashMap<String, usize> = HashMap::new();
        let mut words = 0;
        for word in text.split_whitespace() {
            words += 1;
            let term: String = word
                .chars()
                .filter(|c| c.is_alphanumeric())
                .flat_map(char::to_lowercase)
                .collect();
            if term.chars().count() >= MIN_TERM_LEN {
                *counts.entry(term).or_default() += 1;
            }
        }

        let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        Self {
            words,
            lines: text.lines().count(),
            top_terms: ranked.into_iter().take(TOP_TERMS).map(|(term, _)| term).collect(),
        }
    }
}

/// Word and line counts over `text-content`
pub struct WordStatsDigester;

#[async_trait]
impl Digester for WordStatsDigester {
    fn name(&self) -> &str {
        WORD_STATS
    }

    fn label(&self) -> &str {
        "Word statistics"
    }

    fn description(&self) -> &str {
        "Word count, line count and most frequent terms"
    }

    fn upstreams(&self) -> Vec<String> {
        vec![TEXT_CONTENT.to_string()]
    }

    fn can_digest(&self, _file_path: &str, file: &FileRecord) -> bool {
        is_text(file)
    }

    async fn digest(&self, ctx: &DigestContext<'_>) -> Result<Vec<DigestOutput>, DigestError> {
        let upstream = ctx.require_completed(TEXT_CONTENT)?;

        let content = match upstream.content.as_deref() {
            Some(text) => Some(serde_json::to_string(&WordStats::from_text(text))?),
            None => None,
        };
        Ok(vec![DigestOutput::completed(WORD_STATS, content)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateManager;
    use digeststore::{DigestRecord, DigestStatus};
    use tempfile::tempdir;

    fn text_file(path: &str) -> FileRecord {
        FileRecord::new(path).with_mime_type("text/plain")
    }

    #[test]
    fn test_can_digest_text_only() {
        let digester = TextContentDigester::new("/tmp", 1024);
        assert!(digester.can_digest("a.txt", &text_file("a.txt")));
        assert!(digester.can_digest("a.json", &FileRecord::new("a.json").with_mime_type("application/json")));
        assert!(!digester.can_digest("a.png", &FileRecord::new("a.png").with_mime_type("image/png")));
        assert!(!digester.can_digest("a", &FileRecord::new("a")));
        assert!(!digester.can_digest("dir", &FileRecord::folder("dir").with_mime_type("text/plain")));
    }

    #[tokio::test]
    async fn test_text_content_reads_and_caps() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("a.txt"), "hello world, this is long").unwrap();
        let digester = TextContentDigester::new(temp.path(), 11);
        let state = StateManager::in_memory().unwrap();
        let file = text_file("a.txt");

        let ctx = DigestContext {
            file_path: "a.txt",
            file: &file,
            existing: &[],
            state: &state,
        };
        let outputs = digester.digest(&ctx).await.unwrap();
        assert_eq!(outputs, vec![DigestOutput::completed(TEXT_CONTENT, Some("hello world".to_string()))]);
    }

    #[tokio::test]
    async fn test_text_content_empty_file_is_null_content() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("empty.txt"), "  \n").unwrap();
        let digester = TextContentDigester::new(temp.path(), 1024);
        let state = StateManager::in_memory().unwrap();
        let file = text_file("empty.txt");

        let ctx = DigestContext {
            file_path: "empty.txt",
            file: &file,
            existing: &[],
            state: &state,
        };
        let outputs = digester.digest(&ctx).await.unwrap();
        assert_eq!(outputs[0].status, DigestStatus::Completed);
        assert!(outputs[0].content.is_none());
    }

    #[tokio::test]
    async fn test_text_content_missing_file_errors() {
        let temp = tempdir().unwrap();
        let digester = TextContentDigester::new(temp.path(), 1024);
        let state = StateManager::in_memory().unwrap();
        let file = text_file("gone.txt");

        let ctx = DigestContext {
            file_path: "gone.txt",
            file: &file,
            existing: &[],
            state: &state,
        };
        assert!(matches!(digester.digest(&ctx).await, Err(DigestError::Io(_))));
    }

    #[tokio::test]
    async fn test_word_stats_waits_for_text_content() {
        let state = StateManager::in_memory().unwrap();
        let file = text_file("a.txt");
        let existing = vec![DigestRecord::placeholder("a.txt", TEXT_CONTENT)];

        let ctx = DigestContext {
            file_path: "a.txt",
            file: &file,
            existing: &existing,
            state: &state,
        };
        let err = WordStatsDigester.digest(&ctx).await.unwrap_err();
        assert!(err.is_dependency_not_ready());
    }

    #[tokio::test]
    async fn test_word_stats_over_completed_text() {
        let state = StateManager::in_memory().unwrap();
        let file = text_file("a.txt");
        let mut upstream = DigestRecord::placeholder("a.txt", TEXT_CONTENT);
        upstream.status = DigestStatus::Completed;
        upstream.content = Some("Rust rust RUST code\nmore code".to_string());
        let existing = vec![upstream];

        let ctx = DigestContext {
            file_path: "a.txt",
            file: &file,
            existing: &existing,
            state: &state,
        };
        let outputs = WordStatsDigester.digest(&ctx).await.unwrap();
        let stats: WordStats = serde_json::from_str(outputs[0].content.as_deref().unwrap()).unwrap();
        assert_eq!(stats.words, 6);
        assert_eq!(stats.lines, 2);
        assert_eq!(stats.top_terms, vec!["rust", "code", "more"]);
    }

    #[tokio::test]
    async fn test_word_stats_null_upstream_is_null() {
        let state = StateManager::in_memory().unwrap();
        let file = text_file("a.txt");
        let mut upstream = DigestRecord::placeholder("a.txt", TEXT_CONTENT);
        upstream.status = DigestStatus::Completed;
        let existing = vec![upstream];

        let ctx = DigestContext {
            file_path: "a.txt",
            file: &file,
            existing: &existing,
            state: &state,
        };
        let outputs = WordStatsDigester.digest(&ctx).await.unwrap();
        assert_eq!(outputs, vec![DigestOutput::completed(WORD_STATS, None)]);
    }
}
