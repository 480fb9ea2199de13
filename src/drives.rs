use rusqlite::{params, Connection, OptionalExtension};

use crate::error::MirrorError;
use crate::utils::Utils;

/// Document library lookup row, refreshed from the Graph drive listing on
/// every run.
#[derive(Clone, Debug)]
pub struct Drive {
    id: String,
    name: String,
    web_url: Option<String>,
    updated_at: String,
}

impl Drive {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn web_url(&self) -> Option<&str> {
        self.web_url.as_deref()
    }

    #[allow(dead_code)]
    pub fn updated_at(&self) -> &str {
        &self.updated_at
    }

    pub fn get_by_id(conn: &Connection, drive_id: &str) -> Result<Option<Self>, MirrorError> {
        conn.query_row(
            "SELECT id, name, web_url, updated_at FROM drive WHERE id = ?",
            [drive_id],
            |row| {
                Ok(Drive {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    web_url: row.get(2)?,
                    updated_at: row.get(3)?,
                })
            },
        )
        .optional()
        .map_err(MirrorError::Database)
    }

    pub fn upsert(
        conn: &Connection,
        drive_id: &str,
        name: &str,
        web_url: Option<&str>,
    ) -> Result<Self, MirrorError> {
        let now = Utils::now_iso();
        conn.execute(
            "INSERT INTO drive (id, name, web_url, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 web_url = excluded.web_url,
                 updated_at = excluded.updated_at",
            params![drive_id, name, web_url, now],
        )?;

        Ok(Drive {
            id: drive_id.to_string(),
            name: name.to_string(),
            web_url: web_url.map(|u| u.to_string()),
            updated_at: now,
        })
    }

    pub fn get_all(conn: &Connection) -> Result<Vec<Self>, MirrorError> {
        let mut stmt =
            conn.prepare("SELECT id, name, web_url, updated_at FROM drive ORDER BY name")?;
        let rows = stmt.query_map([], |row| {
            Ok(Drive {
                id: row.get(0)?,
                name: row.get(1)?,
                web_url: row.get(2)?,
                updated_at: row.get(3)?,
            })
        })?;

        let mut drives = Vec::new();
        for row in rows {
            drives.push(row?);
        }
        Ok(drives)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;

    #[test]
    fn test_upsert_inserts_then_updates() {
        let db = Database::open_in_memory().unwrap();

        let drive = Drive::upsert(db.conn(), "d1", "Documents", Some("https://x/d1")).unwrap();
        assert_eq!(drive.id(), "d1");
        assert_eq!(drive.name(), "Documents");

        let drive = Drive::upsert(db.conn(), "d1", "Renamed", None).unwrap();
        assert_eq!(drive.name(), "Renamed");

        let fetched = Drive::get_by_id(db.conn(), "d1").unwrap().unwrap();
        assert_eq!(fetched.name(), "Renamed");
        assert_eq!(fetched.web_url(), None);

        let all = Drive::get_all(db.conn()).unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn test_get_by_id_missing() {
        let db = Database::open_in_memory().unwrap();
        assert!(Drive::get_by_id(db.conn(), "nope").unwrap().is_none());
    }

    #[test]
    fn test_get_all_sorted_by_name() {
        let db = Database::open_in_memory().unwrap();
        Drive::upsert(db.conn(), "d2", "Zeta", None).unwrap();
        Drive::upsert(db.conn(), "d1", "Alpha", None).unwrap();

        let all = Drive::get_all(db.conn()).unwrap();
        assert_eq!(all[0].name(), "Alpha");
        assert_eq!(all[1].name(), "Zeta");
    }
}
