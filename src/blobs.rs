use rusqlite::{params, Connection, OptionalExtension};

use crate::error::MirrorError;
use crate::utils::Utils;

const SQL_SELECT: &str =
    "SELECT id, sha256_hash, file_size, mime_type, reference_count, created_at FROM file_blob";

/// Catalog row for a deduplicated content body. The file itself lives in
/// the blob store; this row owns the reference count that decides when the
/// file may be removed.
#[derive(Clone, Debug)]
pub struct FileBlob {
    id: i64,
    sha256_hash: String,
    file_size: i64,
    mime_type: String,
    reference_count: i64,
    created_at: String,
}

impl FileBlob {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(FileBlob {
            id: row.get(0)?,
            sha256_hash: row.get(1)?,
            file_size: row.get(2)?,
            mime_type: row.get(3)?,
            reference_count: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn sha256_hash(&self) -> &str {
        &self.sha256_hash
    }

    pub fn file_size(&self) -> i64 {
        self.file_size
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn reference_count(&self) -> i64 {
        self.reference_count
    }

    #[allow(dead_code)]
    pub fn created_at(&self) -> &str {
        &self.created_at
    }

    pub fn get_by_id(conn: &Connection, blob_id: i64) -> Result<Option<Self>, MirrorError> {
        conn.query_row(
            &format!("{SQL_SELECT} WHERE id = ?"),
            [blob_id],
            Self::from_row,
        )
        .optional()
        .map_err(MirrorError::Database)
    }

    pub fn get_by_hash(conn: &Connection, sha256_hash: &str) -> Result<Option<Self>, MirrorError> {
        conn.query_row(
            &format!("{SQL_SELECT} WHERE sha256_hash = ?"),
            [sha256_hash],
            Self::from_row,
        )
        .optional()
        .map_err(MirrorError::Database)
    }

    /// Insert a new blob row with reference_count 1, or increment the
    /// count of the existing row for this hash. Must run inside the same
    /// transaction as the document mutation that adopts the blob.
    pub fn acquire(
        conn: &Connection,
        sha256_hash: &str,
        file_size: i64,
        mime_type: &str,
    ) -> Result<Self, MirrorError> {
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM file_blob WHERE sha256_hash = ?",
                [sha256_hash],
                |row| row.get(0),
            )
            .optional()?;

        let blob_id = match existing {
            Some(id) => {
                conn.execute(
                    "UPDATE file_blob SET reference_count = reference_count + 1 WHERE id = ?",
                    [id],
                )?;
                id
            }
            None => conn.query_row(
                "INSERT INTO file_blob (sha256_hash, file_size, mime_type, reference_count, created_at)
                 VALUES (?, ?, ?, 1, ?)
                 RETURNING id",
                params![sha256_hash, file_size, mime_type, Utils::now_iso()],
                |row| row.get(0),
            )?,
        };

        Self::get_by_id(conn, blob_id)?
            .ok_or_else(|| MirrorError::Error(format!("Blob {blob_id} vanished after acquire")))
    }

    /// Decrement the reference count. When it reaches zero the row is
    /// removed and the caller must delete the blob file after the enclosing
    /// transaction commits. Returns (remaining refcount, hash).
    pub fn release(conn: &Connection, blob_id: i64) -> Result<(i64, String), MirrorError> {
        let blob = Self::get_by_id(conn, blob_id)?
            .ok_or_else(|| MirrorError::Error(format!("Blob {blob_id} not found on release")))?;

        let remaining = blob.reference_count - 1;
        if remaining <= 0 {
            conn.execute("DELETE FROM file_blob WHERE id = ?", [blob_id])?;
        } else {
            conn.execute(
                "UPDATE file_blob SET reference_count = ? WHERE id = ?",
                params![remaining, blob_id],
            )?;
        }

        Ok((remaining.max(0), blob.sha256_hash))
    }

    pub fn get_all(conn: &Connection) -> Result<Vec<Self>, MirrorError> {
        let mut stmt = conn.prepare(&format!("{SQL_SELECT} ORDER BY id"))?;
        let rows = stmt.query_map([], Self::from_row)?;

        let mut blobs = Vec::new();
        for row in rows {
            blobs.push(row?);
        }
        Ok(blobs)
    }

    pub fn count_all(conn: &Connection) -> Result<i64, MirrorError> {
        let count = conn.query_row("SELECT COUNT(*) FROM file_blob", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn total_size(conn: &Connection) -> Result<i64, MirrorError> {
        let total = conn.query_row(
            "SELECT COALESCE(SUM(file_size), 0) FROM file_blob",
            [],
            |row| row.get(0),
        )?;
        Ok(total)
    }
}
