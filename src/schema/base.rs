pub const CREATE_SCHEMA_SQL: &str = r#"
BEGIN TRANSACTION;

CREATE TABLE IF NOT EXISTS db_metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

INSERT OR REPLACE INTO db_metadata (key, value) VALUES ('schema_version', '2');

-- Key/value application state. Holds the sync_in_progress latch, which is
-- acquired and released transactionally at run boundaries.
CREATE TABLE IF NOT EXISTS app_setting (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Document library lookup table, refreshed from the Graph drive listing
CREATE TABLE IF NOT EXISTS drive (
    id TEXT PRIMARY KEY,               -- Graph drive id
    name TEXT NOT NULL,
    web_url TEXT,
    updated_at TEXT NOT NULL
);

-- Deduplicated content bodies, addressed by SHA-256
CREATE TABLE IF NOT EXISTS file_blob (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sha256_hash TEXT NOT NULL UNIQUE,  -- 64 lowercase hex chars
    file_size INTEGER NOT NULL,
    mime_type TEXT NOT NULL,
    reference_count INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_file_blob_hash ON file_blob (sha256_hash);

-- One row per SharePoint item ever mirrored. Deletions are soft so the
-- event history stays resolvable.
CREATE TABLE IF NOT EXISTS document (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    item_id TEXT NOT NULL,             -- stable Graph item id
    drive_id TEXT NOT NULL,
    name TEXT NOT NULL,
    path TEXT NOT NULL,                -- absolute path within the drive
    mime_type TEXT,
    file_size INTEGER,
    web_url TEXT,
    created_by TEXT,
    last_modified_by TEXT,
    remote_created_at TEXT,
    remote_modified_at TEXT,
    quickxor_hash TEXT,                -- server-advertised, base64
    blob_id INTEGER REFERENCES file_blob(id),
    is_deleted INTEGER NOT NULL DEFAULT 0,
    synced_at TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (item_id, drive_id)
);

CREATE INDEX IF NOT EXISTS idx_document_remote ON document (item_id, drive_id);
CREATE INDEX IF NOT EXISTS idx_document_path ON document (path);
CREATE INDEX IF NOT EXISTS idx_document_blob ON document (blob_id);

-- Per-drive delta resumption point. Absent row = full enumeration.
CREATE TABLE IF NOT EXISTS delta_cursor (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    drive_id TEXT NOT NULL UNIQUE,
    delta_link TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- One row per orchestrator invocation
CREATE TABLE IF NOT EXISTS sync_run (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    status TEXT NOT NULL,              -- running | completed | failed
    started_at TEXT NOT NULL,
    completed_at TEXT,
    is_full_sync INTEGER NOT NULL DEFAULT 0,
    files_added INTEGER NOT NULL DEFAULT 0,
    files_modified INTEGER NOT NULL DEFAULT 0,
    files_removed INTEGER NOT NULL DEFAULT 0,
    files_unchanged INTEGER NOT NULL DEFAULT 0,
    files_skipped INTEGER NOT NULL DEFAULT 0,
    bytes_downloaded INTEGER NOT NULL DEFAULT 0,
    error_message TEXT
);

-- Append-only audit trail. A content change is a modify_remove/modify_add
-- pair under the same run id, preserving the before and after snapshots.
CREATE TABLE IF NOT EXISTS sync_event (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sync_run_id INTEGER NOT NULL REFERENCES sync_run(id),
    document_id INTEGER REFERENCES document(id),
    event_type TEXT NOT NULL,          -- add | remove | modify_add | modify_remove | failed
    item_id TEXT NOT NULL,
    name TEXT NOT NULL,
    path TEXT NOT NULL,
    file_size INTEGER,
    file_blob_id INTEGER,
    logged_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sync_event_run ON sync_event (sync_run_id);

-- Full-text search over document name and path, kept current by triggers
CREATE VIRTUAL TABLE IF NOT EXISTS document_fts USING fts5(
    name,
    path,
    content='document',
    content_rowid='id'
);

CREATE TRIGGER IF NOT EXISTS document_fts_ai AFTER INSERT ON document BEGIN
    INSERT INTO document_fts (rowid, name, path) VALUES (new.id, new.name, new.path);
END;

CREATE TRIGGER IF NOT EXISTS document_fts_ad AFTER DELETE ON document BEGIN
    INSERT INTO document_fts (document_fts, rowid, name, path)
    VALUES ('delete', old.id, old.name, old.path);
END;

CREATE TRIGGER IF NOT EXISTS document_fts_au AFTER UPDATE ON document BEGIN
    INSERT INTO document_fts (document_fts, rowid, name, path)
    VALUES ('delete', old.id, old.name, old.path);
    INSERT INTO document_fts (rowid, name, path) VALUES (new.id, new.name, new.path);
END;

COMMIT;
"#;
