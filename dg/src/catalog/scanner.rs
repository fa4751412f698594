//! CatalogScanner - polls the library root and keeps the file catalog current

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use digeststore::FileRecord;
use eyre::Context;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::is_excluded;
use crate::state::StateManager;

/// Extension to mime type; anything else is catalogued without one
const MIME_TYPES: &[(&str, &str)] = &[
    ("txt", "text/plain"),
    ("md", "text/markdown"),
    ("markdown", "text/markdown"),
    ("csv", "text/csv"),
    ("html", "text/html"),
    ("htm", "text/html"),
    ("json", "application/json"),
    ("xml", "application/xml"),
    ("yml", "application/x-yaml"),
    ("yaml", "application/x-yaml"),
    ("toml", "application/toml"),
    ("pdf", "application/pdf"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("mp3", "audio/mpeg"),
    ("m4a", "audio/mp4"),
    ("wav", "audio/wav"),
    ("mp4", "video/mp4"),
];

pub fn mime_for(path: &str) -> Option<&'static str> {
    let ext = path.rsplit_once('.')?.1.to_ascii_lowercase();
    MIME_TYPES.iter().find(|(e, _)| *e == ext).map(|(_, mime)| *mime)
}

/// A catalog change to forward to the worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub file_path: String,
    pub is_new: bool,
    pub content_changed: bool,
}

/// Result of one scan
#[derive(Debug, Default, Clone)]
pub struct ScanReport {
    /// New or modified files, in path order
    pub changes: Vec<FileChange>,
    /// Catalogued files no longer on disk
    pub removed: Vec<String>,
    pub unchanged: usize,
}

impl ScanReport {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.removed.is_empty()
    }
}

/// Mirrors a directory tree into the file catalog
pub struct CatalogScanner {
    root: PathBuf,
    excluded_prefixes: Vec<String>,
    state: StateManager,
}

impl CatalogScanner {
    pub fn new(root: impl Into<PathBuf>, excluded_prefixes: Vec<String>, state: StateManager) -> Self {
        Self {
            root: root.into(),
            excluded_prefixes,
            state,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Walk the root once, update the catalog, and report what changed
    pub async fn scan(&self) -> eyre::Result<ScanReport> {
        debug!(root = %self.root.display(), "scan: called");
        let root = self.root.clone();
        let excluded = self.excluded_prefixes.clone();
        let found = tokio::task::spawn_blocking(move || walk(&root, &excluded))
            .await
            .context("Catalog walk task failed")??;

        let mut report = ScanReport::default();
        let mut seen = HashSet::new();
        for file in found {
            seen.insert(file.path.clone());
            let existing = self.state.get_file(&file.path).await?;

            if file.is_folder {
                if existing.is_none() {
                    self.state.upsert_file(file).await?;
                }
                continue;
            }

            let change = match existing {
                None => Some(FileChange {
                    file_path: file.path.clone(),
                    is_new: true,
                    content_changed: false,
                }),
                Some(old) if old.size != file.size || old.modified_at != file.modified_at => Some(FileChange {
                    file_path: file.path.clone(),
                    is_new: false,
                    content_changed: true,
                }),
                Some(_) => None,
            };

            match change {
                Some(change) => {
                    self.state.upsert_file(file).await?;
                    report.changes.push(change);
                }
                None => report.unchanged += 1,
            }
        }

        for path in self.state.list_file_paths(&self.excluded_prefixes).await? {
            if !seen.contains(&path) {
                self.state.delete_file(&path).await?;
                report.removed.push(path);
            }
        }

        if !report.is_empty() {
            info!(
                changed = report.changes.len(),
                removed = report.removed.len(),
                unchanged = report.unchanged,
                "Catalog scan found changes"
            );
        }
        Ok(report)
    }
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel.components().map(|c| c.as_os_str().to_string_lossy().to_string()).collect();
    if parts.is_empty() { None } else { Some(parts.join("/")) }
}

/// Collect file records under `root`, pruning excluded subtrees
fn walk(root: &Path, excluded: &[String]) -> eyre::Result<Vec<FileRecord>> {
    if !root.is_dir() {
        return Err(eyre::eyre!("Library root is not a directory: {}", root.display()));
    }

    let walker = WalkDir::new(root).sort_by_file_name().into_iter().filter_entry(|e| {
        match relative_path(root, e.path()) {
            // Directories are matched with a trailing slash so "app/" prunes "app"
            Some(rel) if e.file_type().is_dir() => !is_excluded(excluded, &format!("{}/", rel)),
            Some(rel) => !is_excluded(excluded, &rel),
            None => true,
        }
    });

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable catalog entry");
                continue;
            }
        };
        let Some(rel) = relative_path(root, entry.path()) else {
            continue;
        };

        if entry.file_type().is_dir() {
            files.push(FileRecord::folder(rel));
            continue;
        }
        if !entry.file_type().is_file() {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(path = %rel, error = %e, "Skipping file without metadata");
                continue;
            }
        };
        let modified_at = metadata
            .modified()
            .map(|t| DateTime::<Utc>::from(t).timestamp_millis())
            .unwrap_or_default();

        let mut file = FileRecord::new(rel)
            .with_size(i64::try_from(metadata.len()).unwrap_or(i64::MAX))
            .with_modified_at(modified_at);
        if let Some(mime) = mime_for(&file.path) {
            file = file.with_mime_type(mime);
        }
        files.push(file);
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn scanner(root: &Path, state: &StateManager) -> CatalogScanner {
        CatalogScanner::new(root, vec![".git/".to_string()], state.clone())
    }

    #[test]
    fn test_mime_for() {
        assert_eq!(mime_for("notes/a.TXT"), Some("text/plain"));
        assert_eq!(mime_for("b.json"), Some("application/json"));
        assert_eq!(mime_for("noext"), None);
        assert_eq!(mime_for("a.bin"), None);
    }

    #[tokio::test]
    async fn test_scan_new_files_and_exclusions() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("a.txt"), "hello").unwrap();
        fs::create_dir(temp.path().join("notes")).unwrap();
        fs::write(temp.path().join("notes/b.md"), "# b").unwrap();
        fs::create_dir(temp.path().join(".git")).unwrap();
        fs::write(temp.path().join(".git/HEAD"), "ref").unwrap();

        let state = StateManager::in_memory().unwrap();
        let report = scanner(temp.path(), &state).scan().await.unwrap();

        let paths: Vec<&str> = report.changes.iter().map(|c| c.file_path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt", "notes/b.md"]);
        assert!(report.changes.iter().all(|c| c.is_new && !c.content_changed));

        let file = state.get_file_required("notes/b.md").await.unwrap();
        assert_eq!(file.name, "b.md");
        assert_eq!(file.mime_type.as_deref(), Some("text/markdown"));
        assert_eq!(file.size, Some(3));
        assert!(state.get_file_required("notes").await.unwrap().is_folder);
        assert!(state.get_file(".git/HEAD").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rescan_detects_changes_and_removals() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("a.txt"), "hello").unwrap();
        fs::write(temp.path().join("b.txt"), "bye").unwrap();
        let state = StateManager::in_memory().unwrap();
        let scanner = scanner(temp.path(), &state);
        scanner.scan().await.unwrap();

        let unchanged = scanner.scan().await.unwrap();
        assert!(unchanged.is_empty());
        assert_eq!(unchanged.unchanged, 2);

        fs::write(temp.path().join("a.txt"), "hello, longer now").unwrap();
        fs::remove_file(temp.path().join("b.txt")).unwrap();
        let report = scanner.scan().await.unwrap();
        assert_eq!(
            report.changes,
            vec![FileChange {
                file_path: "a.txt".to_string(),
                is_new: false,
                content_changed: true,
            }]
        );
        assert_eq!(report.removed, vec!["b.txt"]);
        assert!(state.get_file("b.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_root_errors() {
        let temp = tempdir().unwrap();
        let state = StateManager::in_memory().unwrap();
        let scanner = scanner(&temp.path().join("nope"), &state);
        assert!(scanner.scan().await.is_err());
    }
}
