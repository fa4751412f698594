//! Store - synchronous SQLite access for files, digests and locks

use eyre::{Context, Result};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, Value, ValueRef};
use rusqlite::{Connection, OptionalExtension, Row, ToSql, params, params_from_iter};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::now_ms;
use crate::schema::SCHEMA;
use crate::types::{DigestRecord, DigestStats, DigestStatus, FileRecord, ProcessingLock};

const DIGEST_COLUMNS: &str = "id, file_path, digester, status, content, error, attempts, created_at, updated_at";
const FILE_COLUMNS: &str = "path, name, is_folder, mime_type, size, modified_at, created_at";

impl ToSql for DigestStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for DigestStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: eyre::Report| FromSqlError::Other(e.into()))
    }
}

fn digest_from_row(row: &Row<'_>) -> rusqlite::Result<DigestRecord> {
    Ok(DigestRecord {
        id: row.get(0)?,
        file_path: row.get(1)?,
        digester: row.get(2)?,
        status: row.get(3)?,
        content: row.get(4)?,
        error: row.get(5)?,
        attempts: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        path: row.get(0)?,
        name: row.get(1)?,
        is_folder: row.get(2)?,
        mime_type: row.get(3)?,
        size: row.get(4)?,
        modified_at: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Escape `%`, `_` and `\` so a path prefix can be used in a LIKE pattern
fn escape_like(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Append one `NOT LIKE` clause per excluded prefix, pushing the bound values
fn exclusion_clause(column: &str, excluded: &[String], params: &mut Vec<Value>) -> String {
    let mut clause = String::new();
    for prefix in excluded.iter().filter(|p| !p.is_empty()) {
        clause.push_str(&format!(" AND {} NOT LIKE ? ESCAPE '\\'", column));
        params.push(Value::Text(format!("{}%", escape_like(prefix))));
    }
    clause
}

/// SQLite-backed store
pub struct Store {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Store {
    /// Open (or create) the database file and apply the schema
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        debug!(db_path = %db_path.display(), "Store::open: called");

        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create store directory {}", parent.display()))?;
        }

        let conn = Connection::open(db_path).with_context(|| format!("Failed to open {}", db_path.display()))?;
        // Host and worker each hold a connection to the same file
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL; \
             PRAGMA synchronous = NORMAL;",
        )?;

        let store = Self {
            conn,
            path: Some(db_path.to_path_buf()),
        };
        store.migrate()?;
        info!(db_path = %db_path.display(), "Store opened");
        Ok(store)
    }

    /// Private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        debug!("Store::open_in_memory: called");
        let store = Self {
            conn: Connection::open_in_memory()?,
            path: None,
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA).context("Failed to apply schema")
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    // === File catalog ===

    pub fn upsert_file(&self, file: &FileRecord) -> Result<()> {
        debug!(path = %file.path, "Store::upsert_file: called");
        self.conn.execute(
            "INSERT INTO files (path, name, is_folder, mime_type, size, modified_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(path) DO UPDATE SET
                name = excluded.name,
                is_folder = excluded.is_folder,
                mime_type = excluded.mime_type,
                size = excluded.size,
                modified_at = excluded.modified_at",
            params![
                file.path,
                file.name,
                file.is_folder,
                file.mime_type,
                file.size,
                file.modified_at,
                file.created_at
            ],
        )?;
        Ok(())
    }

    pub fn get_file(&self, path: &str) -> Result<Option<FileRecord>> {
        let sql = format!("SELECT {} FROM files WHERE path = ?1", FILE_COLUMNS);
        let file = self.conn.query_row(&sql, params![path], file_from_row).optional()?;
        Ok(file)
    }

    /// Remove a catalog entry. Digest rows for the path are kept.
    pub fn delete_file(&self, path: &str) -> Result<bool> {
        debug!(%path, "Store::delete_file: called");
        let changed = self.conn.execute("DELETE FROM files WHERE path = ?1", params![path])?;
        Ok(changed > 0)
    }

    /// Non-folder file paths outside the excluded prefixes, ordered by path
    pub fn list_file_paths(&self, excluded: &[String]) -> Result<Vec<String>> {
        let mut values = Vec::new();
        let mut sql = String::from("SELECT path FROM files WHERE is_folder = 0");
        sql.push_str(&exclusion_clause("path", excluded, &mut values));
        sql.push_str(" ORDER BY path");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // === Digest rows ===

    pub fn list_digests(&self, file_path: &str) -> Result<Vec<DigestRecord>> {
        let sql = format!(
            "SELECT {} FROM digests WHERE file_path = ?1 ORDER BY created_at, digester",
            DIGEST_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![file_path], digest_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn get_digest(&self, file_path: &str, digester: &str) -> Result<Option<DigestRecord>> {
        let sql = format!(
            "SELECT {} FROM digests WHERE file_path = ?1 AND digester = ?2",
            DIGEST_COLUMNS
        );
        let record = self
            .conn
            .query_row(&sql, params![file_path, digester], digest_from_row)
            .optional()?;
        Ok(record)
    }

    /// Insert a `todo` placeholder unless a row already exists. Returns true when inserted.
    pub fn insert_digest_if_missing(&self, file_path: &str, digester: &str) -> Result<bool> {
        let record = DigestRecord::placeholder(file_path, digester);
        let sql = format!(
            "INSERT OR IGNORE INTO digests ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            DIGEST_COLUMNS
        );
        let changed = self.conn.execute(
            &sql,
            params![
                record.id,
                record.file_path,
                record.digester,
                record.status,
                record.content,
                record.error,
                record.attempts,
                record.created_at,
                record.updated_at
            ],
        )?;
        Ok(changed == 1)
    }

    /// Overwrite the mutable columns of an existing row, matched by id.
    /// Returns false when no row has that id.
    pub fn update_digest(&self, record: &DigestRecord) -> Result<bool> {
        debug!(id = %record.id, status = %record.status, "Store::update_digest: called");
        let changed = self.conn.execute(
            "UPDATE digests
             SET status = ?2, content = ?3, error = ?4, attempts = ?5, updated_at = ?6
             WHERE id = ?1",
            params![
                record.id,
                record.status,
                record.content,
                record.error,
                record.attempts,
                record.updated_at
            ],
        )?;
        Ok(changed > 0)
    }

    /// Move `in-progress` rows last touched before `cutoff_ms` back to `todo`
    pub fn reset_stale_in_progress(&self, cutoff_ms: i64) -> Result<usize> {
        let changed = self.conn.execute(
            "UPDATE digests SET status = 'todo', updated_at = ?1
             WHERE status = 'in-progress' AND updated_at < ?2",
            params![now_ms(), cutoff_ms],
        )?;
        Ok(changed)
    }

    /// Files with a `todo` row, a `failed` row under the attempt cap, or no rows at all
    pub fn files_needing_digestion(&self, excluded: &[String], max_attempts: u32, limit: usize) -> Result<Vec<String>> {
        let mut values = vec![Value::Integer(i64::from(max_attempts))];
        let mut sql = String::from(
            "SELECT f.path FROM files f
             WHERE f.is_folder = 0
               AND (
                 EXISTS (
                   SELECT 1 FROM digests d
                   WHERE d.file_path = f.path
                     AND (d.status = 'todo' OR (d.status = 'failed' AND d.attempts < ?))
                 )
                 OR NOT EXISTS (SELECT 1 FROM digests d WHERE d.file_path = f.path)
               )",
        );
        sql.push_str(&exclusion_clause("f.path", excluded, &mut values));
        sql.push_str(" ORDER BY f.path LIMIT ?");
        values.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Reset every row of one digester to a fresh `todo`
    pub fn reset_digester(&self, digester: &str) -> Result<usize> {
        info!(%digester, "Resetting all rows for digester");
        let changed = self.conn.execute(
            "UPDATE digests
             SET status = 'todo', content = NULL, error = NULL, attempts = 0, updated_at = ?1
             WHERE digester = ?2",
            params![now_ms(), digester],
        )?;
        Ok(changed)
    }

    /// Reset every row of one file to a fresh `todo`
    pub fn reset_file_digests(&self, file_path: &str) -> Result<usize> {
        debug!(%file_path, "Store::reset_file_digests: called");
        let changed = self.conn.execute(
            "UPDATE digests
             SET status = 'todo', content = NULL, error = NULL, attempts = 0, updated_at = ?1
             WHERE file_path = ?2",
            params![now_ms(), file_path],
        )?;
        Ok(changed)
    }

    pub fn digest_stats(&self) -> Result<DigestStats> {
        let mut stmt = self
            .conn
            .prepare("SELECT digester, status, COUNT(*) FROM digests GROUP BY digester, status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, i64>(2)?))
        })?;

        let mut stats = DigestStats::default();
        for row in rows {
            let (digester, status, count) = row?;
            let count = count.max(0) as u64;
            stats.total += count;
            *stats.by_status.entry(status.clone()).or_default() += count;
            *stats.by_digester.entry(digester).or_default().entry(status).or_default() += count;
        }
        Ok(stats)
    }

    // === Processing locks ===

    /// Take the lock for a file. Returns false when another owner holds it.
    pub fn acquire_lock(&self, file_path: &str, owner: &str) -> Result<bool> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO processing_locks (file_path, owner, acquired_at) VALUES (?1, ?2, ?3)",
            params![file_path, owner, now_ms()],
        )?;
        Ok(changed == 1)
    }

    pub fn release_lock(&self, file_path: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM processing_locks WHERE file_path = ?1", params![file_path])?;
        Ok(changed > 0)
    }

    /// Drop locks acquired before `cutoff_ms`
    pub fn release_locks_before(&self, cutoff_ms: i64) -> Result<usize> {
        let changed = self
            .conn
            .execute("DELETE FROM processing_locks WHERE acquired_at < ?1", params![cutoff_ms])?;
        Ok(changed)
    }

    pub fn list_locks(&self) -> Result<Vec<ProcessingLock>> {
        let mut stmt = self
            .conn
            .prepare("SELECT file_path, owner, acquired_at FROM processing_locks ORDER BY file_path")?;
        let rows = stmt.query_map([], |row| {
            Ok(ProcessingLock {
                file_path: row.get(0)?,
                owner: row.get(1)?,
                acquired_at: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    #[cfg(test)]
    fn set_updated_at(&self, id: &str, updated_at: i64) -> Result<()> {
        self.conn
            .execute("UPDATE digests SET updated_at = ?1 WHERE id = ?2", params![updated_at, id])?;
        Ok(())
    }
}
