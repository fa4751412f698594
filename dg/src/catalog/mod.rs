//! File catalog maintenance

mod scanner;

pub use scanner::{CatalogScanner, FileChange, ScanReport, mime_for};
