use std::fmt;

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::database::Database;
use crate::error::MirrorError;
use crate::utils::Utils;

const LATCH_KEY: &str = "sync_in_progress";

const SQL_SELECT: &str = "SELECT id, status, started_at, completed_at, is_full_sync,
        files_added, files_modified, files_removed, files_unchanged,
        files_skipped, bytes_downloaded, error_message
     FROM sync_run";

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-run counters. Advanced inside the same transaction as the catalog
/// mutation they describe.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunCounters {
    pub added: i64,
    pub modified: i64,
    pub removed: i64,
    pub unchanged: i64,
    pub skipped: i64,
    pub bytes_downloaded: i64,
}

impl RunCounters {
    pub fn absorb(&mut self, other: &RunCounters) {
        self.added += other.added;
        self.modified += other.modified;
        self.removed += other.removed;
        self.unchanged += other.unchanged;
        self.skipped += other.skipped;
        self.bytes_downloaded += other.bytes_downloaded;
    }
}

/// One orchestrator invocation.
#[derive(Clone, Debug)]
pub struct SyncRun {
    id: i64,
    status: RunStatus,
    started_at: String,
    completed_at: Option<String>,
    is_full_sync: bool,
    counters: RunCounters,
    error_message: Option<String>,
}

impl SyncRun {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        let status_str: String = row.get(1)?;
        let status = RunStatus::from_str(&status_str).unwrap_or(RunStatus::Failed);
        Ok(SyncRun {
            id: row.get(0)?,
            status,
            started_at: row.get(2)?,
            completed_at: row.get(3)?,
            is_full_sync: row.get(4)?,
            counters: RunCounters {
                added: row.get(5)?,
                modified: row.get(6)?,
                removed: row.get(7)?,
                unchanged: row.get(8)?,
                skipped: row.get(9)?,
                bytes_downloaded: row.get(10)?,
            },
            error_message: row.get(11)?,
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn started_at(&self) -> &str {
        &self.started_at
    }

    pub fn completed_at(&self) -> Option<&str> {
        self.completed_at.as_deref()
    }

    pub fn is_full_sync(&self) -> bool {
        self.is_full_sync
    }

    pub fn counters(&self) -> &RunCounters {
        &self.counters
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Atomically check-and-set the sync_in_progress latch and insert a
    /// `running` row. Fails with `AlreadyRunning` if the latch is held,
    /// which keeps mutual exclusion correct across processes sharing the
    /// same catalog.
    pub fn start(db: &Database, is_full_sync: bool) -> Result<Self, MirrorError> {
        db.immediate_transaction(|conn| {
            if Self::latch_is_set(conn)? {
                return Err(MirrorError::AlreadyRunning);
            }
            Self::set_latch(conn, true)?;

            let now = Utils::now_iso();
            let id: i64 = conn.query_row(
                "INSERT INTO sync_run (status, started_at, is_full_sync)
                 VALUES ('running', ?, ?)
                 RETURNING id",
                params![now, is_full_sync],
                |row| row.get(0),
            )?;

            Ok(SyncRun {
                id,
                status: RunStatus::Running,
                started_at: now,
                completed_at: None,
                is_full_sync,
                counters: RunCounters::default(),
                error_message: None,
            })
        })
    }

    /// Release the latch and finalize the run as completed or failed. The
    /// stored counters are authoritative at this point; `finish` only
    /// stamps status, completion time, and the error message.
    pub fn finish(
        db: &Database,
        run_id: i64,
        error_message: Option<&str>,
    ) -> Result<(), MirrorError> {
        db.immediate_transaction(|conn| {
            Self::set_latch(conn, false)?;

            let status = if error_message.is_some() {
                RunStatus::Failed
            } else {
                RunStatus::Completed
            };
            conn.execute(
                "UPDATE sync_run SET status = ?, completed_at = ?, error_message = ? WHERE id = ?",
                params![status.as_str(), Utils::now_iso(), error_message, run_id],
            )?;
            Ok(())
        })
    }

    /// Advance counters for a run. Callers invoke this inside the
    /// transaction that performs the corresponding catalog mutation.
    pub fn add_counts(
        conn: &Connection,
        run_id: i64,
        delta: &RunCounters,
    ) -> Result<(), MirrorError> {
        conn.execute(
            "UPDATE sync_run SET
                files_added = files_added + ?,
                files_modified = files_modified + ?,
                files_removed = files_removed + ?,
                files_unchanged = files_unchanged + ?,
                files_skipped = files_skipped + ?,
                bytes_downloaded = bytes_downloaded + ?
             WHERE id = ?",
            params![
                delta.added,
                delta.modified,
                delta.removed,
                delta.unchanged,
                delta.skipped,
                delta.bytes_downloaded,
                run_id
            ],
        )?;
        Ok(())
    }

    pub fn get_by_id(conn: &Connection, run_id: i64) -> Result<Option<Self>, MirrorError> {
        conn.query_row(&format!("{SQL_SELECT} WHERE id = ?"), [run_id], Self::from_row)
            .optional()
            .map_err(MirrorError::Database)
    }

    pub fn get_latest(conn: &Connection) -> Result<Option<Self>, MirrorError> {
        conn.query_row(
            &format!("{SQL_SELECT} ORDER BY id DESC LIMIT 1"),
            [],
            Self::from_row,
        )
        .optional()
        .map_err(MirrorError::Database)
    }

    pub fn get_latest_finished(conn: &Connection) -> Result<Option<Self>, MirrorError> {
        conn.query_row(
            &format!("{SQL_SELECT} WHERE status != 'running' ORDER BY id DESC LIMIT 1"),
            [],
            Self::from_row,
        )
        .optional()
        .map_err(MirrorError::Database)
    }

    pub fn get_running(conn: &Connection) -> Result<Option<Self>, MirrorError> {
        conn.query_row(
            &format!("{SQL_SELECT} WHERE status = 'running' ORDER BY id DESC LIMIT 1"),
            [],
            Self::from_row,
        )
        .optional()
        .map_err(MirrorError::Database)
    }

    fn latch_is_set(conn: &Connection) -> Result<bool, MirrorError> {
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM app_setting WHERE key = ?",
                [LATCH_KEY],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.as_deref() == Some("1"))
    }

    fn set_latch(conn: &Connection, held: bool) -> Result<(), MirrorError> {
        conn.execute(
            "INSERT INTO app_setting (key, value, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET
                 value = excluded.value,
                 updated_at = excluded.updated_at",
            params![LATCH_KEY, if held { "1" } else { "0" }, Utils::now_iso()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_sets_latch_and_inserts_running_row() {
        let db = Database::open_in_memory().unwrap();

        let run = SyncRun::start(&db, false).unwrap();
        assert_eq!(run.status(), RunStatus::Running);
        assert!(!run.is_full_sync());

        let running = SyncRun::get_running(db.conn()).unwrap().unwrap();
        assert_eq!(running.id(), run.id());
    }

    #[test]
    fn test_second_start_rejected_while_latch_held() {
        let db = Database::open_in_memory().unwrap();

        let _run = SyncRun::start(&db, false).unwrap();
        let err = SyncRun::start(&db, true).unwrap_err();
        assert!(matches!(err, MirrorError::AlreadyRunning));
    }

    #[test]
    fn test_finish_completed_releases_latch() {
        let db = Database::open_in_memory().unwrap();

        let run = SyncRun::start(&db, true).unwrap();
        SyncRun::finish(&db, run.id(), None).unwrap();

        let finished = SyncRun::get_by_id(db.conn(), run.id()).unwrap().unwrap();
        assert_eq!(finished.status(), RunStatus::Completed);
        assert!(finished.completed_at().is_some());
        assert!(finished.is_full_sync());

        // Latch released: a new run can start
        let next = SyncRun::start(&db, false).unwrap();
        assert!(next.id() > run.id());
    }

    #[test]
    fn test_finish_failed_records_error() {
        let db = Database::open_in_memory().unwrap();

        let run = SyncRun::start(&db, false).unwrap();
        SyncRun::finish(&db, run.id(), Some("cancelled")).unwrap();

        let finished = SyncRun::get_by_id(db.conn(), run.id()).unwrap().unwrap();
        assert_eq!(finished.status(), RunStatus::Failed);
        assert_eq!(finished.error_message(), Some("cancelled"));
        assert!(SyncRun::get_running(db.conn()).unwrap().is_none());
    }

    #[test]
    fn test_add_counts_accumulates() {
        let db = Database::open_in_memory().unwrap();

        let run = SyncRun::start(&db, false).unwrap();
        SyncRun::add_counts(
            db.conn(),
            run.id(),
            &RunCounters {
                added: 2,
                bytes_downloaded: 300,
                ..Default::default()
            },
        )
        .unwrap();
        SyncRun::add_counts(
            db.conn(),
            run.id(),
            &RunCounters {
                added: 1,
                skipped: 1,
                bytes_downloaded: 50,
                ..Default::default()
            },
        )
        .unwrap();

        let fetched = SyncRun::get_by_id(db.conn(), run.id()).unwrap().unwrap();
        assert_eq!(fetched.counters().added, 3);
        assert_eq!(fetched.counters().skipped, 1);
        assert_eq!(fetched.counters().bytes_downloaded, 350);
    }

    #[test]
    fn test_get_latest() {
        let db = Database::open_in_memory().unwrap();
        assert!(SyncRun::get_latest(db.conn()).unwrap().is_none());

        let first = SyncRun::start(&db, false).unwrap();
        SyncRun::finish(&db, first.id(), None).unwrap();
        let second = SyncRun::start(&db, false).unwrap();

        let latest = SyncRun::get_latest(db.conn()).unwrap().unwrap();
        assert_eq!(latest.id(), second.id());
    }

    #[test]
    fn test_counters_absorb() {
        let mut total = RunCounters::default();
        total.absorb(&RunCounters {
            added: 1,
            modified: 2,
            removed: 3,
            unchanged: 4,
            skipped: 5,
            bytes_downloaded: 6,
        });
        total.absorb(&RunCounters {
            added: 1,
            ..Default::default()
        });
        assert_eq!(total.added, 2);
        assert_eq!(total.modified, 2);
        assert_eq!(total.bytes_downloaded, 6);
    }
}
