use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indicatif::ProgressBar;
use log::{debug, info, warn};

use crate::blobs::FileBlob;
use crate::config::SyncConfig;
use crate::cursors::DeltaCursor;
use crate::database::Database;
use crate::documents::{Document, DocumentFields, UpsertAction};
use crate::drives::Drive;
use crate::error::MirrorError;
use crate::events::{EventType, ItemSnapshot, SyncEvent};
use crate::filter::{FilterDecision, SyncFilter};
use crate::graph::{ChangeItem, DeltaPage, DriveInfo, DriveSource};
use crate::runs::{RunCounters, SyncRun};
use crate::store::{BlobStore, StoredBlob, VerifyOutcome};

#[derive(Clone, Debug, Default)]
pub struct SyncOptions {
    /// Ignore stored delta cursors and enumerate every drive from scratch.
    /// Cursors are not cleared up front; each drive's cursor is replaced
    /// only when its traversal commits a new deltaLink, so an interrupted
    /// full run leaves the previous incremental state usable.
    pub full: bool,
    /// Traverse and evaluate but never touch the catalog or blob store.
    pub dry_run: bool,
    /// Restrict the run to a single library by name (overrides config).
    pub library: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct RunReport {
    /// None for dry runs, which never create a run row.
    pub run_id: Option<i64>,
    pub counters: RunCounters,
    pub errors: Vec<String>,
    /// Human-readable event preview, populated on dry runs.
    pub preview: Vec<String>,
    pub dry_run: bool,
}

#[derive(Debug)]
pub struct StatusReport {
    pub current_run: Option<SyncRun>,
    pub last_run: Option<SyncRun>,
    pub document_count: i64,
    pub document_bytes: i64,
    pub blob_count: i64,
    pub blob_bytes: i64,
}

#[derive(Debug, Default)]
pub struct VerifyReport {
    pub ok_count: i64,
    pub missing: Vec<String>,
    pub corrupt: Vec<String>,
    pub orphaned: Vec<String>,
}

/// A blob release observed inside a transaction. The file is removed only
/// after the transaction commits and only when the refcount hit zero.
type ReleasedBlob = Option<(i64, String)>;

/// Drives one sync run end to end: latch, drive enumeration, delta paging,
/// reconciliation of every change entry into catalog + blob mutations, and
/// cursor persistence.
pub struct SyncService<'a, S: DriveSource> {
    db: &'a Database,
    store: &'a BlobStore,
    source: &'a S,
    filter: SyncFilter,
    metadata_only: bool,
    verify_quickxor: bool,
    default_library: Option<String>,
    cancel: Arc<AtomicBool>,
    progress: Option<ProgressBar>,
}

impl<'a, S: DriveSource> SyncService<'a, S> {
    pub fn new(
        db: &'a Database,
        store: &'a BlobStore,
        source: &'a S,
        sync_config: &SyncConfig,
        default_library: Option<String>,
    ) -> Self {
        SyncService {
            db,
            store,
            source,
            filter: SyncFilter::from_config(sync_config),
            metadata_only: sync_config.metadata_only,
            verify_quickxor: sync_config.verify_quickxor_hash,
            default_library,
            cancel: Arc::new(AtomicBool::new(false)),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Token observed between pages and between entries. Setting it makes
    /// the run finalize as failed with error "cancelled"; mutations already
    /// committed stay committed and the interrupted page's cursor is not
    /// advanced.
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn run(&self, options: &SyncOptions) -> Result<RunReport, MirrorError> {
        let run = if options.dry_run {
            info!("Dry run - no changes will be made");
            None
        } else {
            Some(SyncRun::start(self.db, options.full)?)
        };

        let mut report = RunReport {
            run_id: run.as_ref().map(|r| r.id()),
            dry_run: options.dry_run,
            ..Default::default()
        };

        match self.run_inner(options, &mut report) {
            Ok(()) => {
                if let Some(run_id) = report.run_id {
                    SyncRun::finish(self.db, run_id, None)?;
                }
                let c = &report.counters;
                info!(
                    "Sync completed: added={}, modified={}, removed={}, unchanged={}, skipped={}",
                    c.added, c.modified, c.removed, c.unchanged, c.skipped
                );
                Ok(report)
            }
            Err(err) => {
                let message = match &err {
                    MirrorError::Cancelled => "cancelled".to_string(),
                    other => other.to_string(),
                };
                warn!("Sync failed: {message}");
                if let Some(run_id) = report.run_id {
                    // Finalizing must not mask the original failure
                    if let Err(finish_err) = SyncRun::finish(self.db, run_id, Some(&message)) {
                        warn!("Could not finalize run {run_id}: {finish_err}");
                    }
                }
                Err(err)
            }
        }
    }

    fn run_inner(
        &self,
        options: &SyncOptions,
        report: &mut RunReport,
    ) -> Result<(), MirrorError> {
        let drives = self.select_drives(options)?;
        info!("Syncing {} drive(s)", drives.len());

        for drive in &drives {
            if !options.dry_run {
                Drive::upsert(
                    self.db.conn(),
                    &drive.id,
                    &drive.name,
                    drive.web_url.as_deref(),
                )?;
            }
            self.sync_drive(drive, options, report)?;
        }
        Ok(())
    }

    fn select_drives(&self, options: &SyncOptions) -> Result<Vec<DriveInfo>, MirrorError> {
        let drives = self.source.list_drives()?;

        let wanted = options
            .library
            .as_deref()
            .or(self.default_library.as_deref());
        match wanted {
            Some(name) => {
                let drive = drives
                    .into_iter()
                    .find(|d| d.name.eq_ignore_ascii_case(name))
                    .ok_or_else(|| {
                        MirrorError::Error(format!("Document library not found: {name}"))
                    })?;
                Ok(vec![drive])
            }
            None => Ok(drives),
        }
    }

    fn sync_drive(
        &self,
        drive: &DriveInfo,
        options: &SyncOptions,
        report: &mut RunReport,
    ) -> Result<(), MirrorError> {
        info!("Syncing drive: {} ({})", drive.name, drive.id);
        if let Some(pb) = &self.progress {
            pb.set_message(format!("drive: {}", drive.name));
        }

        let mut link = if options.full {
            None
        } else {
            DeltaCursor::get(self.db.conn(), &drive.id)?
        };
        let mut restarted = false;

        loop {
            self.check_cancelled()?;

            let page = match self.source.next_delta_page(&drive.id, link.as_deref()) {
                Err(MirrorError::CursorGone) if !restarted => {
                    warn!(
                        "Delta cursor for drive '{}' expired, restarting from full enumeration",
                        drive.name
                    );
                    if !options.dry_run {
                        DeltaCursor::clear(self.db.conn(), &drive.id)?;
                    }
                    restarted = true;
                    link = None;
                    continue;
                }
                other => other?,
            };

            debug!("Processing {} change entries", page.items.len());
            for item in &page.items {
                self.check_cancelled()?;
                if let Some(pb) = &self.progress {
                    pb.set_message(format!("{}: {}", drive.name, item.path));
                    pb.tick();
                }

                if let Err(err) = self.process_entry(drive, item, options, report) {
                    match err {
                        MirrorError::NotFound(_) | MirrorError::HashMismatch { .. } => {
                            let message = format!("Error processing {}: {err}", item.path);
                            warn!("{message}");
                            report.errors.push(message);
                            self.bump(
                                options,
                                report,
                                RunCounters {
                                    skipped: 1,
                                    ..Default::default()
                                },
                            )?;
                        }
                        fatal => return Err(fatal),
                    }
                }
            }

            match page.next_link {
                Some(next) => link = Some(next),
                None => {
                    if let Some(delta_link) = page.delta_link {
                        if !options.dry_run {
                            DeltaCursor::set(self.db.conn(), &drive.id, &delta_link)?;
                        }
                    }
                    break;
                }
            }
        }

        Ok(())
    }

    fn process_entry(
        &self,
        drive: &DriveInfo,
        item: &ChangeItem,
        options: &SyncOptions,
        report: &mut RunReport,
    ) -> Result<(), MirrorError> {
        if item.is_deleted {
            return self.retract(drive, item, options, report, "remove");
        }
        if item.is_folder {
            return Ok(());
        }

        if let FilterDecision::Reject(reason) = self.filter.evaluate(&item.path, &item.name, item.size) {
            let existing = Document::get_by_remote(self.db.conn(), &item.id, &drive.id)?;
            let mirrored_live = existing.map(|d| !d.is_deleted()).unwrap_or(false);
            if mirrored_live {
                // A previously accepted item no longer passes the filter:
                // treat as a retraction rather than silently diverging.
                info!("Retracting {} ({reason})", item.path);
                return self.retract(drive, item, options, report, "remove");
            }
            debug!("Skipping {}: {reason}", item.path);
            return self.bump(
                options,
                report,
                RunCounters {
                    skipped: 1,
                    ..Default::default()
                },
            );
        }

        let existing = Document::get_by_remote(self.db.conn(), &item.id, &drive.id)?;

        // Remote timestamp short-circuit: nothing changed server-side.
        if let Some(doc) = &existing {
            if !doc.is_deleted()
                && doc.remote_modified_at().is_some()
                && doc.remote_modified_at() == item.modified_at.as_deref()
            {
                return self.bump(
                    options,
                    report,
                    RunCounters {
                        unchanged: 1,
                        ..Default::default()
                    },
                );
            }
        }

        if self.metadata_only {
            return self.apply_metadata_only(drive, item, existing, options, report);
        }

        // Reuse the stored blob when the server-advertised hash and size
        // match: a rename or metadata change needs no download.
        if let Some(doc) = &existing {
            if !doc.is_deleted() {
                if let Some(blob_id) = doc.blob_id() {
                    let blob = FileBlob::get_by_id(self.db.conn(), blob_id)?.ok_or_else(|| {
                        MirrorError::Error(format!("Blob {blob_id} missing for document"))
                    })?;
                    if self.matches_stored_content(item, doc, &blob) {
                        debug!("Unchanged content: {}", item.path);
                        let run_id = report.run_id;
                        if !options.dry_run {
                            self.db.immediate_transaction(|conn| {
                                let fields = document_fields(item);
                                Document::upsert(conn, &item.id, &drive.id, &fields, Some(blob_id))?;
                                if let Some(run_id) = run_id {
                                    SyncRun::add_counts(
                                        conn,
                                        run_id,
                                        &RunCounters {
                                            unchanged: 1,
                                            ..Default::default()
                                        },
                                    )?;
                                }
                                Ok(())
                            })?;
                            report.counters.unchanged += 1;
                            return Ok(());
                        }
                        return self.bump(
                            options,
                            report,
                            RunCounters {
                                unchanged: 1,
                                ..Default::default()
                            },
                        );
                    }
                }
            }
        }

        self.apply_content_change(drive, item, existing, options, report)
    }

    /// True when the stored blob demonstrably equals the server content.
    fn matches_stored_content(&self, item: &ChangeItem, doc: &Document, blob: &FileBlob) -> bool {
        if item.size != Some(blob.file_size()) {
            return false;
        }
        if let Some(server_sha) = &item.sha256_hash {
            return server_sha == blob.sha256_hash();
        }
        if let (Some(server_qx), Some(stored_qx)) = (&item.quickxor_hash, doc.quickxor_hash()) {
            return server_qx == stored_qx;
        }
        false
    }

    fn apply_metadata_only(
        &self,
        drive: &DriveInfo,
        item: &ChangeItem,
        existing: Option<Document>,
        options: &SyncOptions,
        report: &mut RunReport,
    ) -> Result<(), MirrorError> {
        let is_new = existing
            .as_ref()
            .map(|d| d.is_deleted())
            .unwrap_or(true);

        if options.dry_run {
            if is_new {
                report.preview.push(format!("add {}", item.path));
            }
            return self.bump(
                options,
                report,
                if is_new {
                    RunCounters {
                        added: 1,
                        ..Default::default()
                    }
                } else {
                    RunCounters {
                        unchanged: 1,
                        ..Default::default()
                    }
                },
            );
        }

        // An existing content reference is left alone; metadata-only mode
        // only ever creates placeholder rows.
        let keep_blob = existing.as_ref().and_then(|d| d.blob_id());
        let run_id = report.run_id;

        let delta = self.db.immediate_transaction(|conn| {
            let fields = document_fields(item);
            let (doc, action) = Document::upsert(conn, &item.id, &drive.id, &fields, keep_blob)?;

            // A resurrected soft-deleted row reports UpdatedMetadata but is
            // an addition from the mirror's point of view.
            let delta = if action == UpsertAction::Inserted || is_new {
                if let Some(run_id) = run_id {
                    SyncEvent::log(
                        conn,
                        run_id,
                        Some(doc.id()),
                        EventType::Add,
                        &snapshot_of(item, keep_blob),
                    )?;
                }
                info!("Adding (metadata only): {}", item.path);
                RunCounters {
                    added: 1,
                    ..Default::default()
                }
            } else {
                RunCounters {
                    unchanged: 1,
                    ..Default::default()
                }
            };

            if let Some(run_id) = run_id {
                SyncRun::add_counts(conn, run_id, &delta)?;
            }
            Ok(delta)
        })?;

        report.counters.absorb(&delta);
        Ok(())
    }

    fn apply_content_change(
        &self,
        drive: &DriveInfo,
        item: &ChangeItem,
        existing: Option<Document>,
        options: &SyncOptions,
        report: &mut RunReport,
    ) -> Result<(), MirrorError> {
        let replaces = existing
            .as_ref()
            .map(|d| !d.is_deleted())
            .unwrap_or(false);

        if options.dry_run {
            let (label, delta) = if replaces {
                (
                    "modify",
                    RunCounters {
                        modified: 1,
                        ..Default::default()
                    },
                )
            } else {
                (
                    "add",
                    RunCounters {
                        added: 1,
                        ..Default::default()
                    },
                )
            };
            report.preview.push(format!("{label} {}", item.path));
            return self.bump(options, report, delta);
        }

        let mut reader = self.source.download(&drive.id, item)?;
        let stored = self
            .store
            .put(&mut *reader, item.mime_type.as_deref(), self.verify_quickxor)?;
        drop(reader);

        if self.verify_quickxor {
            // On mismatch the blob is discarded and a failed event logged;
            // the HashMismatch propagates to the per-item handler, which
            // counts the item as skipped without failing the run.
            self.check_quickxor(item, &stored, report.run_id)?;
        }

        // Content can come back identical even when the server metadata
        // suggested otherwise (e.g. no advertised hashes). Keep the
        // existing reference instead of double-acquiring.
        if let Some(doc) = &existing {
            if !doc.is_deleted() {
                if let Some(blob_id) = doc.blob_id() {
                    let blob = FileBlob::get_by_id(self.db.conn(), blob_id)?;
                    if blob
                        .map(|b| b.sha256_hash() == stored.sha256_hash)
                        .unwrap_or(false)
                    {
                        let run_id = report.run_id;
                        self.db.immediate_transaction(|conn| {
                            let fields = document_fields(item);
                            Document::upsert(conn, &item.id, &drive.id, &fields, Some(blob_id))?;
                            if let Some(run_id) = run_id {
                                SyncRun::add_counts(
                                    conn,
                                    run_id,
                                    &RunCounters {
                                        unchanged: 1,
                                        ..Default::default()
                                    },
                                )?;
                            }
                            Ok(())
                        })?;
                        report.counters.unchanged += 1;
                        return Ok(());
                    }
                }
            }
        }

        let run_id = report.run_id;
        let old = existing.filter(|d| !d.is_deleted());

        let (delta, released): (RunCounters, ReleasedBlob) =
            self.db.immediate_transaction(|conn| {
                let blob = FileBlob::acquire(
                    conn,
                    &stored.sha256_hash,
                    stored.file_size,
                    &stored.mime_type,
                )?;

                let mut fields = document_fields(item);
                fields.file_size = Some(stored.file_size);
                fields.mime_type = Some(stored.mime_type.clone());

                let (doc, action) =
                    Document::upsert(conn, &item.id, &drive.id, &fields, Some(blob.id()))?;

                let mut released: ReleasedBlob = None;
                let delta = match (action, &old) {
                    (UpsertAction::Inserted, _) | (UpsertAction::UpdatedContent, None) => {
                        if let Some(run_id) = run_id {
                            SyncEvent::log(
                                conn,
                                run_id,
                                Some(doc.id()),
                                EventType::Add,
                                &snapshot_of(item, Some(blob.id())),
                            )?;
                        }
                        info!("Adding: {}", item.path);
                        RunCounters {
                            added: 1,
                            bytes_downloaded: if stored.created { stored.file_size } else { 0 },
                            ..Default::default()
                        }
                    }
                    (UpsertAction::UpdatedContent, Some(old)) => {
                        if let Some(run_id) = run_id {
                            SyncEvent::log(
                                conn,
                                run_id,
                                Some(old.id()),
                                EventType::ModifyRemove,
                                &snapshot_of_document(old),
                            )?;
                            SyncEvent::log(
                                conn,
                                run_id,
                                Some(doc.id()),
                                EventType::ModifyAdd,
                                &snapshot_of(item, Some(blob.id())),
                            )?;
                        }
                        if let Some(old_blob_id) = old.blob_id() {
                            released = Some(FileBlob::release(conn, old_blob_id)?);
                        }
                        info!("Modifying: {}", item.path);
                        RunCounters {
                            modified: 1,
                            bytes_downloaded: if stored.created { stored.file_size } else { 0 },
                            ..Default::default()
                        }
                    }
                    // Blob reference changed, so upsert cannot report
                    // metadata-only or unchanged here.
                    (action, _) => {
                        return Err(MirrorError::Error(format!(
                            "Unexpected upsert action {action:?} for content change on {}",
                            item.path
                        )))
                    }
                };

                if let Some(run_id) = run_id {
                    SyncRun::add_counts(conn, run_id, &delta)?;
                }
                Ok((delta, released))
            })?;

        report.counters.absorb(&delta);

        if let Some((refcount, sha256_hash)) = released {
            if refcount == 0 {
                self.store.delete(&sha256_hash)?;
            }
        }
        Ok(())
    }

    /// Compare the streamed QuickXorHash against the server's. On mismatch
    /// the blob file is discarded (when this put created it), a `failed`
    /// event is logged, and a `HashMismatch` error is returned for the
    /// per-item handler to count as skipped.
    fn check_quickxor(
        &self,
        item: &ChangeItem,
        stored: &StoredBlob,
        run_id: Option<i64>,
    ) -> Result<(), MirrorError> {
        let server_hash = match &item.quickxor_hash {
            Some(hash) => hash,
            None => {
                warn!(
                    "No server QuickXorHash for {}; accepting download unverified",
                    item.path
                );
                return Ok(());
            }
        };
        let actual = match &stored.quickxor_hash {
            Some(hash) => hash,
            None => return Ok(()),
        };

        if server_hash == actual {
            return Ok(());
        }

        if stored.created {
            // No catalog row references this hash yet (acquire happens
            // later in the same flow), so the file can go immediately.
            let referenced = FileBlob::get_by_hash(self.db.conn(), &stored.sha256_hash)?;
            if referenced.is_none() {
                self.store.delete(&stored.sha256_hash)?;
            }
        }

        if let Some(run_id) = run_id {
            self.db.immediate_transaction(|conn| {
                SyncEvent::log(
                    conn,
                    run_id,
                    None,
                    EventType::Failed,
                    &snapshot_of(item, None),
                )?;
                Ok(())
            })?;
        }

        Err(MirrorError::HashMismatch {
            path: item.path.clone(),
            expected: server_hash.clone(),
            actual: actual.clone(),
        })
    }

    /// Soft-delete + blob release + remove event for a deletion or filter
    /// retraction. Unknown or already-deleted items are ignored.
    fn retract(
        &self,
        drive: &DriveInfo,
        item: &ChangeItem,
        options: &SyncOptions,
        report: &mut RunReport,
        label: &str,
    ) -> Result<(), MirrorError> {
        if options.dry_run {
            let existing = Document::get_by_remote(self.db.conn(), &item.id, &drive.id)?;
            if existing.map(|d| !d.is_deleted()).unwrap_or(false) {
                report.preview.push(format!("{label} {}", item.path));
                return self.bump(
                    options,
                    report,
                    RunCounters {
                        removed: 1,
                        ..Default::default()
                    },
                );
            }
            return Ok(());
        }

        let run_id = report.run_id;
        // Outer None = unknown or already-deleted item (silently ignored);
        // inner ReleasedBlob carries the refcount outcome for blob GC.
        let removed: Option<ReleasedBlob> = self.db.immediate_transaction(|conn| {
            let old = match Document::soft_delete(conn, &item.id, &drive.id)? {
                Some(doc) => doc,
                None => return Ok(None),
            };

            let mut released: ReleasedBlob = None;
            if let Some(blob_id) = old.blob_id() {
                released = Some(FileBlob::release(conn, blob_id)?);
            }

            if let Some(run_id) = run_id {
                SyncEvent::log(
                    conn,
                    run_id,
                    Some(old.id()),
                    EventType::Remove,
                    &snapshot_of_document(&old),
                )?;
                SyncRun::add_counts(
                    conn,
                    run_id,
                    &RunCounters {
                        removed: 1,
                        ..Default::default()
                    },
                )?;
            }

            info!("Removing: {}", old.path());
            Ok(Some(released))
        })?;

        if let Some(released) = removed {
            report.counters.removed += 1;
            if let Some((refcount, sha256_hash)) = released {
                if refcount == 0 {
                    self.store.delete(&sha256_hash)?;
                }
            }
        }
        Ok(())
    }

    /// Advance counters for outcomes that mutate no rows (skips, unchanged
    /// shortcuts, dry-run accounting).
    fn bump(
        &self,
        options: &SyncOptions,
        report: &mut RunReport,
        delta: RunCounters,
    ) -> Result<(), MirrorError> {
        report.counters.absorb(&delta);
        if !options.dry_run {
            if let Some(run_id) = report.run_id {
                SyncRun::add_counts(self.db.conn(), run_id, &delta)?;
            }
        }
        Ok(())
    }

    fn check_cancelled(&self) -> Result<(), MirrorError> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(MirrorError::Cancelled);
        }
        Ok(())
    }
}

fn document_fields(item: &ChangeItem) -> DocumentFields {
    DocumentFields {
        name: item.name.clone(),
        path: item.path.clone(),
        mime_type: item.mime_type.clone(),
        file_size: item.size,
        web_url: item.web_url.clone(),
        created_by: item.created_by.clone(),
        last_modified_by: item.last_modified_by.clone(),
        remote_created_at: item.created_at.clone(),
        remote_modified_at: item.modified_at.clone(),
        quickxor_hash: item.quickxor_hash.clone(),
    }
}

fn snapshot_of(item: &ChangeItem, blob_id: Option<i64>) -> ItemSnapshot {
    ItemSnapshot {
        item_id: item.id.clone(),
        name: item.name.clone(),
        path: item.path.clone(),
        file_size: item.size,
        file_blob_id: blob_id,
    }
}

fn snapshot_of_document(doc: &Document) -> ItemSnapshot {
    ItemSnapshot {
        item_id: doc.item_id().to_string(),
        name: doc.name().to_string(),
        path: doc.path().to_string(),
        file_size: doc.file_size(),
        file_blob_id: doc.blob_id(),
    }
}

/// Current catalog totals plus the most recent run, for the status command.
pub fn status(db: &Database) -> Result<StatusReport, MirrorError> {
    let conn = db.conn();
    Ok(StatusReport {
        current_run: SyncRun::get_running(conn)?,
        last_run: SyncRun::get_latest_finished(conn)?,
        document_count: Document::count_all(conn, false)?,
        document_bytes: Document::total_size(conn)?,
        blob_count: FileBlob::count_all(conn)?,
        blob_bytes: FileBlob::total_size(conn)?,
    })
}

/// Rehash every cataloged blob and flag files on disk that no row claims.
pub fn verify_storage(db: &Database, store: &BlobStore) -> Result<VerifyReport, MirrorError> {
    let mut verify_report = VerifyReport::default();
    let blobs = FileBlob::get_all(db.conn())?;

    let mut known = std::collections::HashSet::new();
    for blob in &blobs {
        known.insert(blob.sha256_hash().to_string());
        match store.verify(blob.sha256_hash(), blob.file_size())? {
            VerifyOutcome::Ok => verify_report.ok_count += 1,
            VerifyOutcome::Missing => {
                verify_report.missing.push(blob.sha256_hash().to_string())
            }
            VerifyOutcome::Corrupt { .. } => {
                verify_report.corrupt.push(blob.sha256_hash().to_string())
            }
        }
    }

    for (name, _path) in store.all_blob_files()? {
        if !known.contains(&name) {
            verify_report.orphaned.push(name);
        }
    }

    Ok(verify_report)
}
