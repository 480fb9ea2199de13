use rusqlite::{params, Connection, OptionalExtension};

use crate::error::MirrorError;
use crate::utils::Utils;

const SQL_SELECT: &str = "SELECT id, item_id, drive_id, name, path,
        mime_type, file_size, web_url, created_by, last_modified_by,
        remote_created_at, remote_modified_at, quickxor_hash,
        blob_id, is_deleted, synced_at, created_at, updated_at
     FROM document";

/// What an upsert did to the row.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UpsertAction {
    Inserted,
    /// The blob reference changed.
    UpdatedContent,
    /// Some field other than the blob reference changed (or the row was
    /// resurrected from soft deletion).
    UpdatedMetadata,
    Unchanged,
}

/// Mutable metadata carried by an upsert. Remote keys travel separately.
#[derive(Clone, Debug, Default)]
pub struct DocumentFields {
    pub name: String,
    pub path: String,
    pub mime_type: Option<String>,
    pub file_size: Option<i64>,
    pub web_url: Option<String>,
    pub created_by: Option<String>,
    pub last_modified_by: Option<String>,
    pub remote_created_at: Option<String>,
    pub remote_modified_at: Option<String>,
    pub quickxor_hash: Option<String>,
}

/// A mirrored SharePoint item. `(item_id, drive_id)` is the stable remote
/// key; everything else is mutable metadata.
#[derive(Clone, Debug)]
pub struct Document {
    id: i64,
    item_id: String,
    drive_id: String,
    name: String,
    path: String,
    mime_type: Option<String>,
    file_size: Option<i64>,
    web_url: Option<String>,
    created_by: Option<String>,
    last_modified_by: Option<String>,
    remote_created_at: Option<String>,
    remote_modified_at: Option<String>,
    quickxor_hash: Option<String>,
    blob_id: Option<i64>,
    is_deleted: bool,
    synced_at: String,
    created_at: String,
    updated_at: String,
}

impl Document {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Document {
            id: row.get(0)?,
            item_id: row.get(1)?,
            drive_id: row.get(2)?,
            name: row.get(3)?,
            path: row.get(4)?,
            mime_type: row.get(5)?,
            file_size: row.get(6)?,
            web_url: row.get(7)?,
            created_by: row.get(8)?,
            last_modified_by: row.get(9)?,
            remote_created_at: row.get(10)?,
            remote_modified_at: row.get(11)?,
            quickxor_hash: row.get(12)?,
            blob_id: row.get(13)?,
            is_deleted: row.get(14)?,
            synced_at: row.get(15)?,
            created_at: row.get(16)?,
            updated_at: row.get(17)?,
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    pub fn drive_id(&self) -> &str {
        &self.drive_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    pub fn file_size(&self) -> Option<i64> {
        self.file_size
    }

    pub fn web_url(&self) -> Option<&str> {
        self.web_url.as_deref()
    }

    pub fn created_by(&self) -> Option<&str> {
        self.created_by.as_deref()
    }

    pub fn last_modified_by(&self) -> Option<&str> {
        self.last_modified_by.as_deref()
    }

    pub fn remote_created_at(&self) -> Option<&str> {
        self.remote_created_at.as_deref()
    }

    pub fn remote_modified_at(&self) -> Option<&str> {
        self.remote_modified_at.as_deref()
    }

    pub fn quickxor_hash(&self) -> Option<&str> {
        self.quickxor_hash.as_deref()
    }

    pub fn blob_id(&self) -> Option<i64> {
        self.blob_id
    }

    pub fn is_deleted(&self) -> bool {
        self.is_deleted
    }

    pub fn synced_at(&self) -> &str {
        &self.synced_at
    }

    pub fn get_by_id(conn: &Connection, doc_id: i64) -> Result<Option<Self>, MirrorError> {
        conn.query_row(&format!("{SQL_SELECT} WHERE id = ?"), [doc_id], Self::from_row)
            .optional()
            .map_err(MirrorError::Database)
    }

    pub fn get_by_remote(
        conn: &Connection,
        item_id: &str,
        drive_id: &str,
    ) -> Result<Option<Self>, MirrorError> {
        conn.query_row(
            &format!("{SQL_SELECT} WHERE item_id = ? AND drive_id = ?"),
            [item_id, drive_id],
            Self::from_row,
        )
        .optional()
        .map_err(MirrorError::Database)
    }

    /// Insert or update the row for `(item_id, drive_id)` and report what
    /// changed. `Unchanged` means every field matched, the blob reference
    /// matched, and the row was live; only `synced_at` is touched then.
    pub fn upsert(
        conn: &Connection,
        item_id: &str,
        drive_id: &str,
        fields: &DocumentFields,
        blob_id: Option<i64>,
    ) -> Result<(Self, UpsertAction), MirrorError> {
        let now = Utils::now_iso();

        let existing = Self::get_by_remote(conn, item_id, drive_id)?;
        let existing = match existing {
            None => {
                let id: i64 = conn.query_row(
                    "INSERT INTO document (
                        item_id, drive_id, name, path, mime_type, file_size,
                        web_url, created_by, last_modified_by,
                        remote_created_at, remote_modified_at, quickxor_hash,
                        blob_id, is_deleted, synced_at, created_at, updated_at
                     ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?)
                     RETURNING id",
                    params![
                        item_id,
                        drive_id,
                        fields.name,
                        fields.path,
                        fields.mime_type,
                        fields.file_size,
                        fields.web_url,
                        fields.created_by,
                        fields.last_modified_by,
                        fields.remote_created_at,
                        fields.remote_modified_at,
                        fields.quickxor_hash,
                        blob_id,
                        now,
                        now,
                        now
                    ],
                    |row| row.get(0),
                )?;
                let doc = Self::get_by_id(conn, id)?.ok_or_else(|| {
                    MirrorError::Error(format!("Document {id} vanished after insert"))
                })?;
                return Ok((doc, UpsertAction::Inserted));
            }
            Some(doc) => doc,
        };

        let content_changed = existing.blob_id != blob_id;
        let metadata_changed = existing.is_deleted
            || existing.name != fields.name
            || existing.path != fields.path
            || existing.mime_type != fields.mime_type
            || existing.file_size != fields.file_size
            || existing.web_url != fields.web_url
            || existing.created_by != fields.created_by
            || existing.last_modified_by != fields.last_modified_by
            || existing.remote_created_at != fields.remote_created_at
            || existing.remote_modified_at != fields.remote_modified_at
            || existing.quickxor_hash != fields.quickxor_hash;

        if !content_changed && !metadata_changed {
            conn.execute(
                "UPDATE document SET synced_at = ? WHERE id = ?",
                params![now, existing.id],
            )?;
            let doc = Self::get_by_id(conn, existing.id)?.ok_or_else(|| {
                MirrorError::Error(format!("Document {} vanished after touch", existing.id))
            })?;
            return Ok((doc, UpsertAction::Unchanged));
        }

        conn.execute(
            "UPDATE document SET
                name = ?, path = ?, mime_type = ?, file_size = ?, web_url = ?,
                created_by = ?, last_modified_by = ?,
                remote_created_at = ?, remote_modified_at = ?, quickxor_hash = ?,
                blob_id = ?, is_deleted = 0, synced_at = ?, updated_at = ?
             WHERE id = ?",
            params![
                fields.name,
                fields.path,
                fields.mime_type,
                fields.file_size,
                fields.web_url,
                fields.created_by,
                fields.last_modified_by,
                fields.remote_created_at,
                fields.remote_modified_at,
                fields.quickxor_hash,
                blob_id,
                now,
                now,
                existing.id
            ],
        )?;

        let action = if content_changed {
            UpsertAction::UpdatedContent
        } else {
            UpsertAction::UpdatedMetadata
        };
        let doc = Self::get_by_id(conn, existing.id)?.ok_or_else(|| {
            MirrorError::Error(format!("Document {} vanished after update", existing.id))
        })?;
        Ok((doc, action))
    }

    /// Mark the row deleted and detach its blob reference. Returns the
    /// pre-delete row (for event snapshots and blob release), or None if
    /// the item is unknown or already deleted.
    pub fn soft_delete(
        conn: &Connection,
        item_id: &str,
        drive_id: &str,
    ) -> Result<Option<Self>, MirrorError> {
        let existing = match Self::get_by_remote(conn, item_id, drive_id)? {
            Some(doc) if !doc.is_deleted => doc,
            _ => return Ok(None),
        };

        let now = Utils::now_iso();
        conn.execute(
            "UPDATE document SET blob_id = NULL, is_deleted = 1, synced_at = ?, updated_at = ?
             WHERE id = ?",
            params![now, now, existing.id],
        )?;

        Ok(Some(existing))
    }

    /// List documents, optionally restricted by an FTS query over name and
    /// path. Ordered by path.
    pub fn get_all(
        conn: &Connection,
        search: Option<&str>,
        limit: Option<i64>,
        include_deleted: bool,
    ) -> Result<Vec<Self>, MirrorError> {
        let deleted_clause = if include_deleted {
            ""
        } else {
            " AND d.is_deleted = 0"
        };

        let mut docs = Vec::new();
        match search {
            Some(query) => {
                let sql = format!(
                    "SELECT d.id, d.item_id, d.drive_id, d.name, d.path,
                            d.mime_type, d.file_size, d.web_url, d.created_by, d.last_modified_by,
                            d.remote_created_at, d.remote_modified_at, d.quickxor_hash,
                            d.blob_id, d.is_deleted, d.synced_at, d.created_at, d.updated_at
                     FROM document d
                     JOIN document_fts fts ON d.id = fts.rowid
                     WHERE document_fts MATCH ?{deleted_clause}
                     ORDER BY d.path
                     LIMIT ?"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![query, limit.unwrap_or(-1)], Self::from_row)?;
                for row in rows {
                    docs.push(row?);
                }
            }
            None => {
                let sql = format!(
                    "{SQL_SELECT} d WHERE 1=1{deleted_clause} ORDER BY d.path LIMIT ?"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![limit.unwrap_or(-1)], Self::from_row)?;
                for row in rows {
                    docs.push(row?);
                }
            }
        }
        Ok(docs)
    }

    pub fn count_all(conn: &Connection, include_deleted: bool) -> Result<i64, MirrorError> {
        let sql = if include_deleted {
            "SELECT COUNT(*) FROM document"
        } else {
            "SELECT COUNT(*) FROM document WHERE is_deleted = 0"
        };
        let count = conn.query_row(sql, [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn total_size(conn: &Connection) -> Result<i64, MirrorError> {
        let total = conn.query_row(
            "SELECT COALESCE(SUM(file_size), 0) FROM document WHERE is_deleted = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blobs::FileBlob;
    use crate::database::Database;

    fn fields(name: &str, path: &str, size: i64) -> DocumentFields {
        DocumentFields {
            name: name.to_string(),
            path: path.to_string(),
            mime_type: Some("application/pdf".to_string()),
            file_size: Some(size),
            remote_modified_at: Some("2026-01-01T00:00:00Z".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_upsert_inserts() {
        let db = Database::open_in_memory().unwrap();

        let (doc, action) = Document::upsert(
            db.conn(),
            "item-1",
            "drive-1",
            &fields("A.pdf", "/Docs/A.pdf", 100),
            None,
        )
        .unwrap();
        assert_eq!(action, UpsertAction::Inserted);
        assert_eq!(doc.name(), "A.pdf");
        assert!(!doc.is_deleted());
        assert_eq!(doc.blob_id(), None);
    }

    #[test]
    fn test_upsert_unchanged_touches_synced_at_only() {
        let db = Database::open_in_memory().unwrap();

        let f = fields("A.pdf", "/Docs/A.pdf", 100);
        Document::upsert(db.conn(), "item-1", "drive-1", &f, None).unwrap();
        let (doc, action) = Document::upsert(db.conn(), "item-1", "drive-1", &f, None).unwrap();
        assert_eq!(action, UpsertAction::Unchanged);
        assert_eq!(doc.name(), "A.pdf");
    }

    #[test]
    fn test_upsert_metadata_change() {
        let db = Database::open_in_memory().unwrap();

        Document::upsert(
            db.conn(),
            "item-1",
            "drive-1",
            &fields("A.pdf", "/Docs/A.pdf", 100),
            None,
        )
        .unwrap();
        let (doc, action) = Document::upsert(
            db.conn(),
            "item-1",
            "drive-1",
            &fields("A_v2.pdf", "/Docs/A_v2.pdf", 100),
            None,
        )
        .unwrap();
        assert_eq!(action, UpsertAction::UpdatedMetadata);
        assert_eq!(doc.name(), "A_v2.pdf");
    }

    #[test]
    fn test_upsert_content_change() {
        let db = Database::open_in_memory().unwrap();
        let f = fields("A.pdf", "/Docs/A.pdf", 100);

        let old_blob = FileBlob::acquire(db.conn(), &"a".repeat(64), 100, "application/pdf")
            .unwrap();
        let new_blob = FileBlob::acquire(db.conn(), &"b".repeat(64), 120, "application/pdf")
            .unwrap();

        Document::upsert(db.conn(), "item-1", "drive-1", &f, Some(old_blob.id())).unwrap();
        let (doc, action) =
            Document::upsert(db.conn(), "item-1", "drive-1", &f, Some(new_blob.id())).unwrap();
        assert_eq!(action, UpsertAction::UpdatedContent);
        assert_eq!(doc.blob_id(), Some(new_blob.id()));
    }

    #[test]
    fn test_remote_key_is_compound() {
        let db = Database::open_in_memory().unwrap();

        Document::upsert(
            db.conn(),
            "item-1",
            "drive-1",
            &fields("A.pdf", "/Docs/A.pdf", 100),
            None,
        )
        .unwrap();
        let (_, action) = Document::upsert(
            db.conn(),
            "item-1",
            "drive-2",
            &fields("A.pdf", "/Docs/A.pdf", 100),
            None,
        )
        .unwrap();
        assert_eq!(action, UpsertAction::Inserted);
        assert_eq!(Document::count_all(db.conn(), false).unwrap(), 2);
    }

    #[test]
    fn test_soft_delete_returns_old_row() {
        let db = Database::open_in_memory().unwrap();

        let blob = FileBlob::acquire(db.conn(), &"c".repeat(64), 50, "text/plain").unwrap();
        Document::upsert(
            db.conn(),
            "item-1",
            "drive-1",
            &fields("C.txt", "/Docs/C.txt", 50),
            Some(blob.id()),
        )
        .unwrap();

        let old = Document::soft_delete(db.conn(), "item-1", "drive-1")
            .unwrap()
            .expect("Live document should soft-delete");
        assert_eq!(old.blob_id(), Some(blob.id()));
        assert!(!old.is_deleted());

        let doc = Document::get_by_remote(db.conn(), "item-1", "drive-1")
            .unwrap()
            .unwrap();
        assert!(doc.is_deleted());
        assert_eq!(doc.blob_id(), None);

        // Second delete is a no-op
        assert!(Document::soft_delete(db.conn(), "item-1", "drive-1")
            .unwrap()
            .is_none());
        // Unknown item is a no-op
        assert!(Document::soft_delete(db.conn(), "nope", "drive-1")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_upsert_resurrects_soft_deleted_row() {
        let db = Database::open_in_memory().unwrap();
        let f = fields("C.txt", "/Docs/C.txt", 50);

        Document::upsert(db.conn(), "item-1", "drive-1", &f, None).unwrap();
        Document::soft_delete(db.conn(), "item-1", "drive-1").unwrap();

        let (doc, action) = Document::upsert(db.conn(), "item-1", "drive-1", &f, None).unwrap();
        assert_eq!(action, UpsertAction::UpdatedMetadata);
        assert!(!doc.is_deleted());
    }

    #[test]
    fn test_get_all_excludes_deleted_by_default() {
        let db = Database::open_in_memory().unwrap();

        Document::upsert(
            db.conn(),
            "item-1",
            "drive-1",
            &fields("A.pdf", "/Docs/A.pdf", 100),
            None,
        )
        .unwrap();
        Document::upsert(
            db.conn(),
            "item-2",
            "drive-1",
            &fields("B.docx", "/Docs/B.docx", 200),
            None,
        )
        .unwrap();
        Document::soft_delete(db.conn(), "item-2", "drive-1").unwrap();

        let live = Document::get_all(db.conn(), None, None, false).unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].name(), "A.pdf");

        let all = Document::get_all(db.conn(), None, None, true).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_fts_search() {
        let db = Database::open_in_memory().unwrap();

        Document::upsert(
            db.conn(),
            "item-1",
            "drive-1",
            &fields("quarterly_report.pdf", "/Finance/quarterly_report.pdf", 100),
            None,
        )
        .unwrap();
        Document::upsert(
            db.conn(),
            "item-2",
            "drive-1",
            &fields("notes.txt", "/Misc/notes.txt", 10),
            None,
        )
        .unwrap();

        let hits = Document::get_all(db.conn(), Some("quarterly"), None, false).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name(), "quarterly_report.pdf");

        let hits = Document::get_all(db.conn(), Some("finance"), None, false).unwrap();
        assert_eq!(hits.len(), 1, "Path tokens should be searchable");

        let none = Document::get_all(db.conn(), Some("zebra"), None, false).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_fts_tracks_renames() {
        let db = Database::open_in_memory().unwrap();

        Document::upsert(
            db.conn(),
            "item-1",
            "drive-1",
            &fields("draft.pdf", "/Docs/draft.pdf", 100),
            None,
        )
        .unwrap();
        Document::upsert(
            db.conn(),
            "item-1",
            "drive-1",
            &fields("final.pdf", "/Docs/final.pdf", 100),
            None,
        )
        .unwrap();

        assert!(Document::get_all(db.conn(), Some("draft"), None, false)
            .unwrap()
            .is_empty());
        assert_eq!(
            Document::get_all(db.conn(), Some("final"), None, false)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_counts_and_sizes() {
        let db = Database::open_in_memory().unwrap();

        Document::upsert(
            db.conn(),
            "item-1",
            "drive-1",
            &fields("A.pdf", "/Docs/A.pdf", 100),
            None,
        )
        .unwrap();
        Document::upsert(
            db.conn(),
            "item-2",
            "drive-1",
            &fields("B.docx", "/Docs/B.docx", 200),
            None,
        )
        .unwrap();
        Document::soft_delete(db.conn(), "item-2", "drive-1").unwrap();

        assert_eq!(Document::count_all(db.conn(), false).unwrap(), 1);
        assert_eq!(Document::count_all(db.conn(), true).unwrap(), 2);
        assert_eq!(Document::total_size(db.conn()).unwrap(), 100);
    }

    #[test]
    fn test_get_all_limit() {
        let db = Database::open_in_memory().unwrap();
        for i in 0..5 {
            Document::upsert(
                db.conn(),
                &format!("item-{i}"),
                "drive-1",
                &fields(&format!("f{i}.txt"), &format!("/Docs/f{i}.txt"), 10),
                None,
            )
            .unwrap();
        }

        let docs = Document::get_all(db.conn(), None, Some(3), false).unwrap();
        assert_eq!(docs.len(), 3);
    }
}
