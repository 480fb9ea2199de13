use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use serde_json::json;

use crate::blobs::FileBlob;
use crate::config::Config;
use crate::database::Database;
use crate::documents::Document;
use crate::error::MirrorError;
use crate::graph::GraphClient;
use crate::store::BlobStore;
use crate::sync::{self, SyncOptions, SyncService};
use crate::utils::Utils;

/// CLI for spmirror: mirrors SharePoint document libraries into a local
/// content-addressed store.
#[derive(Parser)]
#[command(name = "spmirror", version, about = "SharePoint document mirror")]
pub struct Cli {
    /// Path to the configuration file
    #[arg(long, short = 'c', global = true, default_value = "config.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Synchronize documents from SharePoint
    Sync {
        /// Ignore delta cursors and enumerate everything
        #[arg(long)]
        full: bool,

        /// Preview changes without making them
        #[arg(long)]
        dry_run: bool,

        /// Sync a single document library by name
        #[arg(long, short = 'l')]
        library: Option<String>,

        /// Enable verbose logging
        #[arg(long, short = 'v')]
        verbose: bool,
    },

    /// Show sync status and statistics
    Status,

    /// List synchronized documents
    List {
        /// Full-text search over name and path
        #[arg(long, short = 's')]
        search: Option<String>,

        /// Maximum number of results
        #[arg(long, short = 'n', default_value_t = 50)]
        limit: i64,

        /// Include deleted documents
        #[arg(long)]
        deleted: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Export document metadata for downstream ingestion
    ExportMetadata {
        /// Output file (default: stdout)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,

        /// Output format
        #[arg(long, short = 'f', default_value = "json", value_parser = ["json", "jsonl"])]
        format: String,

        /// Include the local blob path and hash for each document
        #[arg(long)]
        include_blob_path: bool,
    },

    /// Test the SharePoint connection
    TestConnection,

    /// Clear all delta cursors, forcing a full sync on the next run
    ClearDeltaCursors,

    /// Verify integrity of the blob store
    VerifyStorage,
}

impl Cli {
    /// Whether verbose logging was requested; needed before dispatch so
    /// logging can be initialized first.
    pub fn verbose(&self) -> bool {
        matches!(self.command, Command::Sync { verbose: true, .. })
    }

    pub fn dispatch(self) -> Result<(), MirrorError> {
        let config = Config::load(&self.config)?;

        match self.command {
            Command::Sync {
                full,
                dry_run,
                library,
                ..
            } => Self::handle_sync(&config, full, dry_run, library),
            Command::Status => Self::handle_status(&config),
            Command::List {
                search,
                limit,
                deleted,
                json,
            } => Self::handle_list(&config, search, limit, deleted, json),
            Command::ExportMetadata {
                output,
                format,
                include_blob_path,
            } => Self::handle_export(&config, output, &format, include_blob_path),
            Command::TestConnection => Self::handle_test_connection(&config),
            Command::ClearDeltaCursors => Self::handle_clear_cursors(&config),
            Command::VerifyStorage => Self::handle_verify_storage(&config),
        }
    }

    fn open_catalog(config: &Config) -> Result<(Database, BlobStore), MirrorError> {
        let db = Database::open(&config.storage.database_path)?;
        let store = BlobStore::new(config.storage.blob_root.clone())?;
        Ok((db, store))
    }

    fn handle_sync(
        config: &Config,
        full: bool,
        dry_run: bool,
        library: Option<String>,
    ) -> Result<(), MirrorError> {
        let (db, store) = Self::open_catalog(config)?;
        let client = GraphClient::new(&config.sharepoint)?;

        if dry_run {
            println!("DRY RUN - no changes will be made");
            println!();
        }

        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .expect("static template is valid"),
        );
        spinner.enable_steady_tick(Duration::from_millis(100));

        let service = SyncService::new(
            &db,
            &store,
            &client,
            &config.sync,
            config.sharepoint.library_name.clone(),
        )
        .with_progress(spinner.clone());

        let options = SyncOptions {
            full,
            dry_run,
            library,
        };
        let result = service.run(&options);
        spinner.finish_and_clear();
        let report = result?;

        if dry_run && !report.preview.is_empty() {
            println!("Planned changes:");
            for line in &report.preview {
                println!("  {line}");
            }
            println!();
        }

        let c = &report.counters;
        println!("Sync completed:");
        println!("  Added:      {}", c.added);
        println!("  Modified:   {}", c.modified);
        println!("  Removed:    {}", c.removed);
        println!("  Unchanged:  {}", c.unchanged);
        println!("  Skipped:    {}", c.skipped);
        println!("  Downloaded: {}", Utils::format_size(Some(c.bytes_downloaded)));

        if !report.errors.is_empty() {
            println!();
            println!("{} item error(s):", report.errors.len());
            for error in &report.errors {
                println!("  {error}");
            }
        }

        Ok(())
    }

    fn handle_status(config: &Config) -> Result<(), MirrorError> {
        let (db, _store) = Self::open_catalog(config)?;
        let status = sync::status(&db)?;

        println!("SharePoint Mirror Status");
        println!("========================================");

        match &status.current_run {
            Some(run) => println!("Status: SYNC IN PROGRESS (started {})", run.started_at()),
            None => println!("Status: Idle"),
        }

        println!();
        println!("Documents:");
        println!("  Total files:  {}", status.document_count);
        println!("  Total size:   {}", Utils::format_size(Some(status.document_bytes)));

        println!();
        println!("Storage:");
        println!("  Unique blobs: {}", status.blob_count);
        println!("  Blobs size:   {}", Utils::format_size(Some(status.blob_bytes)));

        if let Some(run) = &status.last_run {
            println!();
            println!("Last Sync:");
            println!("  Status:     {}", run.status());
            println!("  Started:    {}", run.started_at());
            println!("  Completed:  {}", run.completed_at().unwrap_or("-"));
            println!("  Added:      {}", run.counters().added);
            println!("  Modified:   {}", run.counters().modified);
            println!("  Removed:    {}", run.counters().removed);
            if let Some(error) = run.error_message() {
                println!("  Error:      {error}");
            }
        }

        Ok(())
    }

    fn handle_list(
        config: &Config,
        search: Option<String>,
        limit: i64,
        deleted: bool,
        as_json: bool,
    ) -> Result<(), MirrorError> {
        let (db, _store) = Self::open_catalog(config)?;
        let docs = Document::get_all(db.conn(), search.as_deref(), Some(limit), deleted)?;

        if as_json {
            let records: Vec<_> = docs
                .iter()
                .map(|doc| {
                    json!({
                        "id": doc.id(),
                        "name": doc.name(),
                        "path": doc.path(),
                        "size": doc.file_size(),
                        "mime_type": doc.mime_type(),
                        "synced_at": doc.synced_at(),
                        "is_deleted": doc.is_deleted(),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&records).expect("JSON encoding"));
            return Ok(());
        }

        if docs.is_empty() {
            println!("No documents found.");
            return Ok(());
        }

        println!("{:<60} {:>10} {}", "Path", "Size", "Synced");
        println!("{}", "-".repeat(90));
        for doc in &docs {
            let size = Utils::format_size(doc.file_size());
            let synced = doc.synced_at().get(..10).unwrap_or("-");
            let mut path = doc.path().to_string();
            if path.len() > 58 {
                let mut cut = path.len() - 55;
                while !path.is_char_boundary(cut) {
                    cut += 1;
                }
                path = format!("...{}", &path[cut..]);
            }
            if doc.is_deleted() {
                path = format!("[DEL] {path}");
            }
            println!("{path:<60} {size:>10} {synced}");
        }
        println!();
        println!("Total: {} document(s)", docs.len());

        Ok(())
    }

    fn handle_export(
        config: &Config,
        output: Option<PathBuf>,
        format: &str,
        include_blob_path: bool,
    ) -> Result<(), MirrorError> {
        let (db, store) = Self::open_catalog(config)?;
        let docs = Document::get_all(db.conn(), None, None, false)?;

        let mut records = Vec::with_capacity(docs.len());
        for doc in &docs {
            let mut record = json!({
                "id": doc.id(),
                "item_id": doc.item_id(),
                "drive_id": doc.drive_id(),
                "name": doc.name(),
                "path": doc.path(),
                "mime_type": doc.mime_type(),
                "file_size": doc.file_size(),
                "web_url": doc.web_url(),
                "created_by": doc.created_by(),
                "last_modified_by": doc.last_modified_by(),
                "remote_created_at": doc.remote_created_at(),
                "remote_modified_at": doc.remote_modified_at(),
                "synced_at": doc.synced_at(),
            });

            if include_blob_path {
                if let Some(blob_id) = doc.blob_id() {
                    if let Some(blob) = FileBlob::get_by_id(db.conn(), blob_id)? {
                        record["blob_path"] = json!(store
                            .blob_path(blob.sha256_hash())
                            .to_string_lossy());
                        record["blob_hash"] = json!(blob.sha256_hash());
                    }
                }
            }
            records.push(record);
        }

        let content = if format == "json" {
            serde_json::to_string_pretty(&records).expect("JSON encoding")
        } else {
            records
                .iter()
                .map(|r| r.to_string())
                .collect::<Vec<_>>()
                .join("\n")
        };

        match output {
            Some(path) => {
                let mut file = fs::File::create(&path)?;
                file.write_all(content.as_bytes())?;
                println!("Exported {} document(s) to {}", records.len(), path.display());
            }
            None => println!("{content}"),
        }

        Ok(())
    }

    fn handle_test_connection(config: &Config) -> Result<(), MirrorError> {
        println!("Testing SharePoint connection...");
        let client = GraphClient::new(&config.sharepoint)?;
        let info = client.test_connection()?;

        println!();
        println!("Connection successful!");
        println!("  Site: {}", info.site_name.as_deref().unwrap_or("-"));
        println!("  URL:  {}", info.site_url.as_deref().unwrap_or("-"));
        println!();
        println!("Document Libraries:");
        for drive in &info.drives {
            println!("  - {} ({})", drive.name, drive.id);
        }

        Ok(())
    }

    fn handle_clear_cursors(config: &Config) -> Result<(), MirrorError> {
        let (db, _store) = Self::open_catalog(config)?;
        let cleared = crate::cursors::DeltaCursor::clear_all(db.conn())?;
        info!("Cleared {cleared} delta cursor(s)");
        println!("Delta cursors cleared. Next sync will be a full sync.");
        Ok(())
    }

    fn handle_verify_storage(config: &Config) -> Result<(), MirrorError> {
        let (db, store) = Self::open_catalog(config)?;

        println!("Verifying storage integrity...");
        let report = sync::verify_storage(&db, &store)?;

        if report.missing.is_empty() && report.corrupt.is_empty() && report.orphaned.is_empty() {
            println!("No issues found. {} blob(s) healthy.", report.ok_count);
            return Ok(());
        }

        println!("{} blob(s) healthy.", report.ok_count);
        for hash in &report.missing {
            println!("  [missing] database record exists but file missing: {hash}");
        }
        for hash in &report.corrupt {
            println!("  [corrupt] content does not match recorded hash: {hash}");
        }
        for hash in &report.orphaned {
            println!("  [orphaned] file exists but no database record: {hash}");
        }

        // Latent damage should fail scripts that chain on this command
        Err(MirrorError::Error(format!(
            "storage verification found {} issue(s)",
            report.missing.len() + report.corrupt.len() + report.orphaned.len()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sync_flags() {
        let cli = Cli::try_parse_from([
            "spmirror",
            "sync",
            "--full",
            "--dry-run",
            "--library",
            "Documents",
            "-v",
        ])
        .unwrap();

        assert!(cli.verbose());
        match cli.command {
            Command::Sync {
                full,
                dry_run,
                library,
                verbose,
            } => {
                assert!(full);
                assert!(dry_run);
                assert!(verbose);
                assert_eq!(library.as_deref(), Some("Documents"));
            }
            _ => panic!("Expected sync command"),
        }
    }

    #[test]
    fn test_parse_defaults() {
        let cli = Cli::try_parse_from(["spmirror", "status"]).unwrap();
        assert!(!cli.verbose());
        assert_eq!(cli.config, PathBuf::from("config.toml"));
    }

    #[test]
    fn test_parse_custom_config_path() {
        let cli =
            Cli::try_parse_from(["spmirror", "--config", "/etc/spmirror.toml", "status"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/spmirror.toml"));
    }

    #[test]
    fn test_parse_export_format_validation() {
        assert!(Cli::try_parse_from([
            "spmirror",
            "export-metadata",
            "--format",
            "xml"
        ])
        .is_err());

        let cli =
            Cli::try_parse_from(["spmirror", "export-metadata", "--format", "jsonl"]).unwrap();
        match cli.command {
            Command::ExportMetadata { format, .. } => assert_eq!(format, "jsonl"),
            _ => panic!("Expected export-metadata command"),
        }
    }

    #[test]
    fn test_parse_list_limit() {
        let cli = Cli::try_parse_from(["spmirror", "list", "-n", "10", "--deleted"]).unwrap();
        match cli.command {
            Command::List {
                limit, deleted, ..
            } => {
                assert_eq!(limit, 10);
                assert!(deleted);
            }
            _ => panic!("Expected list command"),
        }
    }
}
