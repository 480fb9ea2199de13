use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::info;
use rusqlite::{Connection, OptionalExtension};

use crate::error::MirrorError;
use crate::schema::{CREATE_SCHEMA_SQL, UPGRADE_1_TO_2_SQL};

const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Single-writer catalog connection. Readers may open their own connections;
/// all mutations in the process go through this one.
pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    pub fn open(db_path: &Path) -> Result<Self, MirrorError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        info!("Opening database: {}", db_path.display());
        let conn = Connection::open(db_path)?;
        Self::configure(&conn)?;

        let db = Self {
            conn,
            path: db_path.to_path_buf(),
        };
        db.ensure_schema()?;

        Ok(db)
    }

    /// In-memory database for tests. Same pragmas and schema as `open`,
    /// minus WAL (not applicable to memory databases).
    pub fn open_in_memory() -> Result<Self, MirrorError> {
        let conn = Connection::open_in_memory()?;
        conn.busy_timeout(Duration::from_millis(5000))?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let db = Self {
            conn,
            path: PathBuf::from(":memory:"),
        };
        db.ensure_schema()?;

        Ok(db)
    }

    fn configure(conn: &Connection) -> Result<(), MirrorError> {
        // busy_timeout first so the journal-mode switch can wait for locks
        conn.busy_timeout(Duration::from_millis(5000))?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let _mode: String =
            conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        Ok(())
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` inside a `BEGIN IMMEDIATE` transaction. Commits on `Ok`,
    /// rolls back on `Err`.
    pub fn immediate_transaction<T, F>(&self, f: F) -> Result<T, MirrorError>
    where
        F: FnOnce(&Connection) -> Result<T, MirrorError>,
    {
        self.conn.execute_batch("BEGIN IMMEDIATE;")?;
        match f(&self.conn) {
            Ok(value) => {
                self.conn.execute_batch("COMMIT;")?;
                Ok(value)
            }
            Err(err) => {
                let _ = self.conn.execute_batch("ROLLBACK;");
                Err(err)
            }
        }
    }

    fn ensure_schema(&self) -> Result<(), MirrorError> {
        let table_exists: bool = self
            .conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name='db_metadata'",
                [],
                |row| row.get::<_, i32>(0),
            )
            .map(|count| count > 0)
            .unwrap_or(false);

        if !table_exists {
            self.create_schema()?;
            return Ok(());
        }

        let db_version_str: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM db_metadata WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()?;

        let db_version_str = db_version_str
            .ok_or_else(|| MirrorError::Error("Schema version missing".to_string()))?;

        let mut db_version: u32 = db_version_str
            .parse()
            .map_err(|_| MirrorError::Error("Schema version is not a number".to_string()))?;

        loop {
            db_version = match db_version {
                CURRENT_SCHEMA_VERSION => break,
                1 => self.upgrade_schema(db_version, UPGRADE_1_TO_2_SQL)?,
                _ => {
                    return Err(MirrorError::Error(format!(
                        "No upgrade path from schema version {db_version}"
                    )))
                }
            }
        }

        Ok(())
    }

    fn create_schema(&self) -> Result<(), MirrorError> {
        info!("Database is uninitialized - creating schema at version {CURRENT_SCHEMA_VERSION}");
        self.conn.execute_batch(CREATE_SCHEMA_SQL)?;
        info!("Database successfully initialized");
        Ok(())
    }

    fn upgrade_schema(
        &self,
        current_version: u32,
        batch: &'static str,
    ) -> Result<u32, MirrorError> {
        info!(
            "Upgrading database schema {} => {}",
            current_version,
            current_version + 1
        );
        self.conn.execute_batch(batch)?;
        info!("Database successfully upgraded");

        Ok(current_version + 1)
    }
}
