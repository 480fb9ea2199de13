// v1 predates server-side hash tracking and the drive lookup table.
pub const UPGRADE_1_TO_2_SQL: &str = r#"
BEGIN TRANSACTION;

ALTER TABLE document ADD COLUMN quickxor_hash TEXT;

CREATE TABLE IF NOT EXISTS drive (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    web_url TEXT,
    updated_at TEXT NOT NULL
);

INSERT OR REPLACE INTO db_metadata (key, value) VALUES ('schema_version', '2');

COMMIT;
"#;
