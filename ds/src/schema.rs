//! Table definitions, applied idempotently on open

pub(crate) const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    path        TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    is_folder   INTEGER NOT NULL DEFAULT 0,
    mime_type   TEXT,
    size        INTEGER,
    modified_at INTEGER NOT NULL,
    created_at  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS digests (
    id         TEXT PRIMARY KEY,
    file_path  TEXT NOT NULL,
    digester   TEXT NOT NULL,
    status     TEXT NOT NULL DEFAULT 'todo',
    content    TEXT,
    error      TEXT,
    attempts   INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE(file_path, digester)
);

CREATE INDEX IF NOT EXISTS idx_digests_file_path ON digests(file_path);
CREATE INDEX IF NOT EXISTS idx_digests_status ON digests(status);
CREATE INDEX IF NOT EXISTS idx_digests_digester ON digests(digester);

CREATE TABLE IF NOT EXISTS processing_locks (
    file_path   TEXT PRIMARY KEY,
    owner       TEXT NOT NULL,
    acquired_at INTEGER NOT NULL
);
"#;
