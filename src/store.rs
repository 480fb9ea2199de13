use std::fs::{self, File};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use hex::encode as hex_encode;
use log::{debug, warn};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::error::MirrorError;
use crate::quickxor::QuickXorHash;

const READ_BUF_SIZE: usize = 8192;
const SNIFF_LEN: usize = 512;

/// Outcome of streaming content into the store.
#[derive(Clone, Debug)]
pub struct StoredBlob {
    pub sha256_hash: String,
    pub file_size: i64,
    pub mime_type: String,
    /// Only computed when requested by the caller.
    pub quickxor_hash: Option<String>,
    /// False when a file with this hash was already on disk (idempotent put).
    pub created: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerifyOutcome {
    Ok,
    Missing,
    Corrupt { actual_hash: String, actual_size: i64 },
}

/// Content-addressed filesystem store. Files live at
/// `{root}/{hash[0:2]}/{hash[2:4]}/{hash}`; writes stream through a temp
/// file in the same tree and land with an atomic rename, so readers only
/// ever see complete files.
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, MirrorError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(BlobStore { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn blob_path(&self, sha256_hash: &str) -> PathBuf {
        self.root
            .join(&sha256_hash[0..2])
            .join(&sha256_hash[2..4])
            .join(sha256_hash)
    }

    /// Stream `reader` into the store, hashing incrementally. If the
    /// destination already exists the bytes are discarded and the existing
    /// file wins. The MIME type is `declared_mime` when given, otherwise
    /// sniffed from the leading bytes.
    pub fn put(
        &self,
        reader: &mut dyn Read,
        declared_mime: Option<&str>,
        compute_quickxor: bool,
    ) -> Result<StoredBlob, MirrorError> {
        let mut temp = NamedTempFile::new_in(&self.root)?;
        let mut sha256 = Sha256::new();
        let mut quickxor = compute_quickxor.then(QuickXorHash::new);
        let mut head: Vec<u8> = Vec::with_capacity(SNIFF_LEN);

        let mut buffer = [0u8; READ_BUF_SIZE];
        let mut file_size: i64 = 0;

        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            let chunk = &buffer[..bytes_read];

            sha256.update(chunk);
            if let Some(qx) = quickxor.as_mut() {
                qx.update(chunk);
            }
            if head.len() < SNIFF_LEN {
                let want = SNIFF_LEN - head.len();
                head.extend_from_slice(&chunk[..want.min(chunk.len())]);
            }

            temp.write_all(chunk)?;
            file_size += bytes_read as i64;
        }
        temp.flush()?;

        let sha256_hash = hex_encode(sha256.finalize());
        let quickxor_hash = quickxor.map(|qx| qx.base64());
        let mime_type = declared_mime
            .map(|m| m.to_string())
            .unwrap_or_else(|| sniff_mime(&head).to_string());

        let dest = self.blob_path(&sha256_hash);
        if dest.exists() {
            // Idempotent put: the temp file is dropped and unlinked.
            debug!("Blob {sha256_hash} already stored");
            return Ok(StoredBlob {
                sha256_hash,
                file_size,
                mime_type,
                quickxor_hash,
                created: false,
            });
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        temp.persist(&dest).map_err(|e| MirrorError::Io(e.error))?;
        debug!("Stored blob {sha256_hash} ({file_size} bytes)");

        Ok(StoredBlob {
            sha256_hash,
            file_size,
            mime_type,
            quickxor_hash,
            created: true,
        })
    }

    pub fn open(&self, sha256_hash: &str) -> Result<File, MirrorError> {
        let path = self.blob_path(sha256_hash);
        File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                MirrorError::NotFound(format!("blob {sha256_hash}"))
            } else {
                MirrorError::Io(e)
            }
        })
    }

    /// Remove a blob file. Callers must already have driven the catalog
    /// refcount to zero in the transaction that released the reference.
    /// Empty fan-out directories are pruned opportunistically.
    pub fn delete(&self, sha256_hash: &str) -> Result<(), MirrorError> {
        let path = self.blob_path(sha256_hash);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Blob file already missing: {sha256_hash}");
            }
            Err(e) => return Err(MirrorError::Io(e)),
        }

        if let Some(parent) = path.parent() {
            self.prune_empty_dirs(parent);
        }
        Ok(())
    }

    fn prune_empty_dirs(&self, start: &Path) {
        let mut dir = start.to_path_buf();
        while dir != self.root && dir.is_dir() {
            // rmdir only succeeds on empty directories
            if fs::remove_dir(&dir).is_err() {
                break;
            }
            match dir.parent() {
                Some(parent) => dir = parent.to_path_buf(),
                None => break,
            }
        }
    }

    /// Rehash the file on disk and compare against the expected identity.
    pub fn verify(
        &self,
        sha256_hash: &str,
        expected_size: i64,
    ) -> Result<VerifyOutcome, MirrorError> {
        let path = self.blob_path(sha256_hash);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(VerifyOutcome::Missing)
            }
            Err(e) => return Err(MirrorError::Io(e)),
        };

        let mut reader = BufReader::new(file);
        let mut hasher = Sha256::new();
        let mut buffer = [0u8; READ_BUF_SIZE];
        let mut actual_size: i64 = 0;

        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
            actual_size += bytes_read as i64;
        }

        let actual_hash = hex_encode(hasher.finalize());
        if actual_hash != sha256_hash || actual_size != expected_size {
            return Ok(VerifyOutcome::Corrupt {
                actual_hash,
                actual_size,
            });
        }
        Ok(VerifyOutcome::Ok)
    }

    /// All blob files currently on disk as (file name, path) pairs. Used by
    /// the orphan check in verify-storage.
    pub fn all_blob_files(&self) -> Result<Vec<(String, PathBuf)>, MirrorError> {
        let mut files = Vec::new();
        for level1 in read_dir_sorted(&self.root)? {
            if !level1.is_dir() {
                continue;
            }
            for level2 in read_dir_sorted(&level1)? {
                if !level2.is_dir() {
                    continue;
                }
                for blob in read_dir_sorted(&level2)? {
                    if blob.is_file() {
                        let name = blob
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_default();
                        files.push((name, blob));
                    }
                }
            }
        }
        Ok(files)
    }
}

fn read_dir_sorted(dir: &Path) -> Result<Vec<PathBuf>, MirrorError> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    entries.sort();
    Ok(entries)
}

/// Minimal signature-based MIME sniffing for when the server does not
/// report a content type.
fn sniff_mime(head: &[u8]) -> &'static str {
    if head.starts_with(b"%PDF-") {
        "application/pdf"
    } else if head.starts_with(b"\x89PNG\r\n\x1a\n") {
        "image/png"
    } else if head.starts_with(b"\xff\xd8\xff") {
        "image/jpeg"
    } else if head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a") {
        "image/gif"
    } else if head.starts_with(b"PK\x03\x04") {
        // Covers docx/xlsx/pptx as well; the catalog stores what the
        // server reports when it is more specific.
        "application/zip"
    } else if !head.is_empty() && head.iter().all(|&b| b == 9 || b == 10 || b == 13 || b >= 32) {
        "text/plain"
    } else {
        "application/octet-stream"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn store() -> (TempDir, BlobStore) {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let store = BlobStore::new(dir.path().join("blobs")).unwrap();
        (dir, store)
    }

    // SHA-256 of "hello world"
    const HELLO_SHA: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_put_stores_at_fanout_path() {
        let (_dir, store) = store();

        let stored = store
            .put(&mut Cursor::new(b"hello world".to_vec()), None, false)
            .unwrap();
        assert_eq!(stored.sha256_hash, HELLO_SHA);
        assert_eq!(stored.file_size, 11);
        assert!(stored.created);
        assert_eq!(stored.quickxor_hash, None);

        let path = store.blob_path(HELLO_SHA);
        assert!(path.ends_with(format!("b9/4d/{HELLO_SHA}")));
        assert_eq!(fs::read(path).unwrap(), b"hello world");
    }

    #[test]
    fn test_put_is_idempotent() {
        let (_dir, store) = store();

        let first = store
            .put(&mut Cursor::new(b"same bytes".to_vec()), None, false)
            .unwrap();
        assert!(first.created);

        let second = store
            .put(&mut Cursor::new(b"same bytes".to_vec()), None, false)
            .unwrap();
        assert!(!second.created);
        assert_eq!(second.sha256_hash, first.sha256_hash);

        // Exactly one file on disk
        assert_eq!(store.all_blob_files().unwrap().len(), 1);
    }

    #[test]
    fn test_put_computes_quickxor_on_request() {
        let (_dir, store) = store();

        let stored = store
            .put(&mut Cursor::new(b"hello world".to_vec()), None, true)
            .unwrap();
        let qx = stored.quickxor_hash.expect("QuickXorHash was requested");
        assert_eq!(qx, crate::quickxor::quickxorhash(b"hello world"));
    }

    #[test]
    fn test_put_mime_declared_wins() {
        let (_dir, store) = store();
        let stored = store
            .put(
                &mut Cursor::new(b"%PDF-1.7 ...".to_vec()),
                Some("application/x-custom"),
                false,
            )
            .unwrap();
        assert_eq!(stored.mime_type, "application/x-custom");
    }

    #[test]
    fn test_put_mime_sniffed() {
        let (_dir, store) = store();
        let stored = store
            .put(&mut Cursor::new(b"%PDF-1.7 ...".to_vec()), None, false)
            .unwrap();
        assert_eq!(stored.mime_type, "application/pdf");

        let stored = store
            .put(&mut Cursor::new(b"just some text".to_vec()), None, false)
            .unwrap();
        assert_eq!(stored.mime_type, "text/plain");

        let stored = store
            .put(&mut Cursor::new(vec![0u8, 1, 2, 3]), None, false)
            .unwrap();
        assert_eq!(stored.mime_type, "application/octet-stream");
    }

    #[test]
    fn test_open_missing_is_not_found() {
        let (_dir, store) = store();
        let err = store.open(&"0".repeat(64)).unwrap_err();
        assert!(matches!(err, MirrorError::NotFound(_)));
    }

    #[test]
    fn test_open_reads_back() {
        let (_dir, store) = store();
        store
            .put(&mut Cursor::new(b"hello world".to_vec()), None, false)
            .unwrap();

        let mut contents = Vec::new();
        store
            .open(HELLO_SHA)
            .unwrap()
            .read_to_end(&mut contents)
            .unwrap();
        assert_eq!(contents, b"hello world");
    }

    #[test]
    fn test_delete_prunes_empty_dirs() {
        let (_dir, store) = store();
        store
            .put(&mut Cursor::new(b"hello world".to_vec()), None, false)
            .unwrap();

        store.delete(HELLO_SHA).unwrap();
        assert!(!store.blob_path(HELLO_SHA).exists());
        // Fan-out directories removed once empty
        assert!(!store.root().join("b9").exists());
        // Root itself survives
        assert!(store.root().exists());
    }

    #[test]
    fn test_delete_missing_is_ok() {
        let (_dir, store) = store();
        store.delete(&"0".repeat(64)).unwrap();
    }

    #[test]
    fn test_verify_ok_missing_corrupt() {
        let (_dir, store) = store();
        store
            .put(&mut Cursor::new(b"hello world".to_vec()), None, false)
            .unwrap();

        assert_eq!(store.verify(HELLO_SHA, 11).unwrap(), VerifyOutcome::Ok);
        assert_eq!(
            store.verify(&"0".repeat(64), 11).unwrap(),
            VerifyOutcome::Missing
        );

        // Tamper with the file
        fs::write(store.blob_path(HELLO_SHA), b"tampered").unwrap();
        match store.verify(HELLO_SHA, 11).unwrap() {
            VerifyOutcome::Corrupt { actual_size, .. } => assert_eq!(actual_size, 8),
            other => panic!("Expected Corrupt, got {other:?}"),
        }
    }

    #[test]
    fn test_all_blob_files() {
        let (_dir, store) = store();
        store
            .put(&mut Cursor::new(b"one".to_vec()), None, false)
            .unwrap();
        store
            .put(&mut Cursor::new(b"two".to_vec()), None, false)
            .unwrap();

        let files = store.all_blob_files().unwrap();
        assert_eq!(files.len(), 2);
        for (name, path) in files {
            assert_eq!(name.len(), 64);
            assert!(path.is_file());
        }
    }
}
