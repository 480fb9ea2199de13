use rusqlite::{params, Connection, OptionalExtension};

use crate::error::MirrorError;
use crate::utils::Utils;

/// Per-drive delta resumption point. No row means the next traversal is a
/// full enumeration. Only the orchestrator advances cursors, and only after
/// a terminal deltaLink commits.
pub struct DeltaCursor;

impl DeltaCursor {
    pub fn get(conn: &Connection, drive_id: &str) -> Result<Option<String>, MirrorError> {
        conn.query_row(
            "SELECT delta_link FROM delta_cursor WHERE drive_id = ?",
            [drive_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(MirrorError::Database)
    }

    pub fn set(conn: &Connection, drive_id: &str, delta_link: &str) -> Result<(), MirrorError> {
        conn.execute(
            "INSERT INTO delta_cursor (drive_id, delta_link, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT(drive_id) DO UPDATE SET
                 delta_link = excluded.delta_link,
                 updated_at = excluded.updated_at",
            params![drive_id, delta_link, Utils::now_iso()],
        )?;
        Ok(())
    }

    pub fn clear(conn: &Connection, drive_id: &str) -> Result<(), MirrorError> {
        conn.execute("DELETE FROM delta_cursor WHERE drive_id = ?", [drive_id])?;
        Ok(())
    }

    pub fn clear_all(conn: &Connection) -> Result<usize, MirrorError> {
        let cleared = conn.execute("DELETE FROM delta_cursor", [])?;
        Ok(cleared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;

    #[test]
    fn test_get_absent() {
        let db = Database::open_in_memory().unwrap();
        assert!(DeltaCursor::get(db.conn(), "d1").unwrap().is_none());
    }

    #[test]
    fn test_set_then_rotate() {
        let db = Database::open_in_memory().unwrap();

        DeltaCursor::set(db.conn(), "d1", "https://graph/delta?token=a").unwrap();
        assert_eq!(
            DeltaCursor::get(db.conn(), "d1").unwrap().as_deref(),
            Some("https://graph/delta?token=a")
        );

        DeltaCursor::set(db.conn(), "d1", "https://graph/delta?token=b").unwrap();
        assert_eq!(
            DeltaCursor::get(db.conn(), "d1").unwrap().as_deref(),
            Some("https://graph/delta?token=b")
        );
    }

    #[test]
    fn test_clear_single_and_all() {
        let db = Database::open_in_memory().unwrap();
        DeltaCursor::set(db.conn(), "d1", "link1").unwrap();
        DeltaCursor::set(db.conn(), "d2", "link2").unwrap();

        DeltaCursor::clear(db.conn(), "d1").unwrap();
        assert!(DeltaCursor::get(db.conn(), "d1").unwrap().is_none());
        assert!(DeltaCursor::get(db.conn(), "d2").unwrap().is_some());

        let cleared = DeltaCursor::clear_all(db.conn()).unwrap();
        assert_eq!(cleared, 1);
        assert!(DeltaCursor::get(db.conn(), "d2").unwrap().is_none());
    }
}
