use std::collections::HashMap;
use std::fmt;

use rusqlite::{params, Connection};

use crate::error::MirrorError;
use crate::utils::Utils;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EventType {
    Add,
    Remove,
    ModifyAdd,
    ModifyRemove,
    /// Per-item failure (e.g. hash mismatch on download). The item snapshot
    /// records what was rejected.
    Failed,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Add => "add",
            EventType::Remove => "remove",
            EventType::ModifyAdd => "modify_add",
            EventType::ModifyRemove => "modify_remove",
            EventType::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "add" => Some(EventType::Add),
            "remove" => Some(EventType::Remove),
            "modify_add" => Some(EventType::ModifyAdd),
            "modify_remove" => Some(EventType::ModifyRemove),
            "failed" => Some(EventType::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Item state captured at event time. For remove/modify_remove events this
/// is the pre-change state; for add/modify_add the post-change state.
#[derive(Clone, Debug)]
pub struct ItemSnapshot {
    pub item_id: String,
    pub name: String,
    pub path: String,
    pub file_size: Option<i64>,
    pub file_blob_id: Option<i64>,
}

/// Append-only audit row.
#[derive(Clone, Debug)]
pub struct SyncEvent {
    id: i64,
    sync_run_id: i64,
    document_id: Option<i64>,
    event_type: EventType,
    item_id: String,
    name: String,
    path: String,
    file_size: Option<i64>,
    file_blob_id: Option<i64>,
    logged_at: String,
}

impl SyncEvent {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        let type_str: String = row.get(3)?;
        Ok(SyncEvent {
            id: row.get(0)?,
            sync_run_id: row.get(1)?,
            document_id: row.get(2)?,
            event_type: EventType::from_str(&type_str).unwrap_or(EventType::Failed),
            item_id: row.get(4)?,
            name: row.get(5)?,
            path: row.get(6)?,
            file_size: row.get(7)?,
            file_blob_id: row.get(8)?,
            logged_at: row.get(9)?,
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    #[allow(dead_code)]
    pub fn sync_run_id(&self) -> i64 {
        self.sync_run_id
    }

    #[allow(dead_code)]
    pub fn document_id(&self) -> Option<i64> {
        self.document_id
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    #[allow(dead_code)]
    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn file_size(&self) -> Option<i64> {
        self.file_size
    }

    pub fn file_blob_id(&self) -> Option<i64> {
        self.file_blob_id
    }

    #[allow(dead_code)]
    pub fn logged_at(&self) -> &str {
        &self.logged_at
    }

    pub fn log(
        conn: &Connection,
        sync_run_id: i64,
        document_id: Option<i64>,
        event_type: EventType,
        snapshot: &ItemSnapshot,
    ) -> Result<i64, MirrorError> {
        let id: i64 = conn.query_row(
            "INSERT INTO sync_event (
                sync_run_id, document_id, event_type, item_id,
                name, path, file_size, file_blob_id, logged_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING id",
            params![
                sync_run_id,
                document_id,
                event_type.as_str(),
                snapshot.item_id,
                snapshot.name,
                snapshot.path,
                snapshot.file_size,
                snapshot.file_blob_id,
                Utils::now_iso()
            ],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Events for a run in the order they were logged.
    pub fn get_by_run(conn: &Connection, sync_run_id: i64) -> Result<Vec<Self>, MirrorError> {
        let mut stmt = conn.prepare(
            "SELECT id, sync_run_id, document_id, event_type, item_id,
                    name, path, file_size, file_blob_id, logged_at
             FROM sync_event WHERE sync_run_id = ?
             ORDER BY id",
        )?;
        let rows = stmt.query_map([sync_run_id], Self::from_row)?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    pub fn count_by_type(
        conn: &Connection,
        sync_run_id: i64,
    ) -> Result<HashMap<String, i64>, MirrorError> {
        let mut stmt = conn.prepare(
            "SELECT event_type, COUNT(*) FROM sync_event
             WHERE sync_run_id = ? GROUP BY event_type",
        )?;
        let rows = stmt.query_map([sync_run_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = HashMap::new();
        for row in rows {
            let (event_type, count) = row?;
            counts.insert(event_type, count);
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::runs::SyncRun;

    fn snapshot(name: &str) -> ItemSnapshot {
        ItemSnapshot {
            item_id: "item-1".to_string(),
            name: name.to_string(),
            path: format!("/Docs/{name}"),
            file_size: Some(100),
            file_blob_id: None,
        }
    }

    #[test]
    fn test_event_type_round_trip() {
        for event_type in [
            EventType::Add,
            EventType::Remove,
            EventType::ModifyAdd,
            EventType::ModifyRemove,
            EventType::Failed,
        ] {
            assert_eq!(
                EventType::from_str(event_type.as_str()),
                Some(event_type),
                "Round trip failed for {event_type:?}"
            );
        }
        assert_eq!(EventType::from_str("bogus"), None);
    }

    #[test]
    fn test_log_preserves_order() {
        let db = Database::open_in_memory().unwrap();
        let run = SyncRun::start(&db, false).unwrap();

        let first = SyncEvent::log(
            db.conn(),
            run.id(),
            None,
            EventType::ModifyRemove,
            &snapshot("old.docx"),
        )
        .unwrap();
        let second = SyncEvent::log(
            db.conn(),
            run.id(),
            None,
            EventType::ModifyAdd,
            &snapshot("new.docx"),
        )
        .unwrap();
        assert!(second > first, "Event ids must be monotonic within a run");

        let events = SyncEvent::get_by_run(db.conn(), run.id()).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type(), EventType::ModifyRemove);
        assert_eq!(events[1].event_type(), EventType::ModifyAdd);
        assert_eq!(events[0].name(), "old.docx");
        assert_eq!(events[1].name(), "new.docx");
    }

    #[test]
    fn test_count_by_type() {
        let db = Database::open_in_memory().unwrap();
        let run = SyncRun::start(&db, false).unwrap();

        for _ in 0..3 {
            SyncEvent::log(db.conn(), run.id(), None, EventType::Add, &snapshot("a")).unwrap();
        }
        SyncEvent::log(db.conn(), run.id(), None, EventType::Remove, &snapshot("b")).unwrap();

        let counts = SyncEvent::count_by_type(db.conn(), run.id()).unwrap();
        assert_eq!(counts.get("add"), Some(&3));
        assert_eq!(counts.get("remove"), Some(&1));
        assert_eq!(counts.get("modify_add"), None);
    }

    #[test]
    fn test_events_scoped_to_run() {
        let db = Database::open_in_memory().unwrap();
        let first = SyncRun::start(&db, false).unwrap();
        SyncEvent::log(db.conn(), first.id(), None, EventType::Add, &snapshot("a")).unwrap();
        SyncRun::finish(&db, first.id(), None).unwrap();

        let second = SyncRun::start(&db, false).unwrap();
        assert!(SyncEvent::get_by_run(db.conn(), second.id())
            .unwrap()
            .is_empty());
    }
}
