use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;

use crate::error::MirrorError;

/// Application configuration.
///
/// Loaded from a TOML file merged with `SPMIRROR_`-prefixed environment
/// variables (double underscore separates section from key, e.g.
/// `SPMIRROR_SHAREPOINT__TENANT_ID`). Environment wins over file.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub sharepoint: SharePointConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SharePointConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    /// e.g. "contoso.sharepoint.com"
    pub site_hostname: String,
    /// e.g. "/sites/engineering"
    pub site_path: String,
    /// Restrict syncing to a single document library by name.
    #[serde(default)]
    pub library_name: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Files larger than this are skipped. 0 disables the size cap.
    pub max_file_size_mb: u64,
    pub include_extensions: Vec<String>,
    pub exclude_extensions: Vec<String>,
    pub include_paths: Vec<String>,
    pub path_patterns: Vec<String>,
    /// Mirror catalog rows only, never download content.
    pub metadata_only: bool,
    /// Compare streamed QuickXorHash against the server-advertised value.
    pub verify_quickxor_hash: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            max_file_size_mb: 100,
            include_extensions: Vec::new(),
            exclude_extensions: Vec::new(),
            include_paths: Vec::new(),
            path_patterns: Vec::new(),
            metadata_only: false,
            verify_quickxor_hash: false,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub blob_root: PathBuf,
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            blob_root: PathBuf::from("instance/blobs"),
            database_path: PathBuf::from("instance/spmirror.db"),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, MirrorError> {
        if !path.exists() {
            return Err(MirrorError::Config(format!(
                "config file '{}' not found",
                path.display()
            )));
        }

        let config: Config = Figment::from(Toml::file(path))
            .merge(Env::prefixed("SPMIRROR_").split("__"))
            .extract()
            .map_err(|e| MirrorError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), MirrorError> {
        let required = [
            ("sharepoint.tenant_id", &self.sharepoint.tenant_id),
            ("sharepoint.client_id", &self.sharepoint.client_id),
            ("sharepoint.client_secret", &self.sharepoint.client_secret),
            ("sharepoint.site_hostname", &self.sharepoint.site_hostname),
            ("sharepoint.site_path", &self.sharepoint.site_path),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(MirrorError::Config(format!("{key} must be set")));
            }
        }

        if !self.sharepoint.site_path.starts_with('/') {
            return Err(MirrorError::Config(
                "sharepoint.site_path must start with '/'".to_string(),
            ));
        }

        if self.storage.blob_root.as_os_str().is_empty() {
            return Err(MirrorError::Config(
                "storage.blob_root must not be empty".to_string(),
            ));
        }
        if self.storage.database_path.as_os_str().is_empty() {
            return Err(MirrorError::Config(
                "storage.database_path must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        fs::write(&path, body).expect("Failed to write config");
        path
    }

    const MINIMAL: &str = r#"
[sharepoint]
tenant_id = "tenant"
client_id = "client"
client_secret = "secret"
site_hostname = "contoso.sharepoint.com"
site_path = "/sites/eng"
"#;

    #[test]
    fn test_load_minimal() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, MINIMAL);

        let config = Config::load(&path).expect("minimal config should load");
        assert_eq!(config.sharepoint.tenant_id, "tenant");
        assert_eq!(config.sharepoint.library_name, None);
        assert_eq!(config.sync.max_file_size_mb, 100);
        assert!(!config.sync.metadata_only);
        assert_eq!(config.storage.blob_root, PathBuf::from("instance/blobs"));
        assert_eq!(
            config.storage.database_path,
            PathBuf::from("instance/spmirror.db")
        );
    }

    #[test]
    fn test_load_full() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[sharepoint]
tenant_id = "tenant"
client_id = "client"
client_secret = "secret"
site_hostname = "contoso.sharepoint.com"
site_path = "/sites/eng"
library_name = "Documents"

[sync]
max_file_size_mb = 50
include_extensions = ["pdf", "docx"]
exclude_extensions = ["tmp"]
include_paths = ["/Reports"]
path_patterns = ["!**/drafts/**", "**/*.pdf"]
metadata_only = true
verify_quickxor_hash = true

[storage]
blob_root = "/data/blobs"
database_path = "/data/mirror.db"
"#,
        );

        let config = Config::load(&path).expect("full config should load");
        assert_eq!(config.sharepoint.library_name.as_deref(), Some("Documents"));
        assert_eq!(config.sync.max_file_size_mb, 50);
        assert_eq!(config.sync.include_extensions, vec!["pdf", "docx"]);
        assert_eq!(config.sync.path_patterns.len(), 2);
        assert!(config.sync.metadata_only);
        assert!(config.sync.verify_quickxor_hash);
        assert_eq!(config.storage.blob_root, PathBuf::from("/data/blobs"));
    }

    #[test]
    fn test_missing_file() {
        let err = Config::load(Path::new("/nonexistent/config.toml")).unwrap_err();
        assert!(matches!(err, MirrorError::Config(_)));
    }

    #[test]
    fn test_missing_required_key() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[sharepoint]
tenant_id = ""
client_id = "client"
client_secret = "secret"
site_hostname = "contoso.sharepoint.com"
site_path = "/sites/eng"
"#,
        );

        let err = Config::load(&path).unwrap_err();
        match err {
            MirrorError::Config(msg) => assert!(msg.contains("tenant_id"), "{msg}"),
            other => panic!("Expected Config error, got {other:?}"),
        }
    }

    #[test]
    fn test_site_path_must_be_absolute() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[sharepoint]
tenant_id = "tenant"
client_id = "client"
client_secret = "secret"
site_hostname = "contoso.sharepoint.com"
site_path = "sites/eng"
"#,
        );

        let err = Config::load(&path).unwrap_err();
        match err {
            MirrorError::Config(msg) => assert!(msg.contains("site_path"), "{msg}"),
            other => panic!("Expected Config error, got {other:?}"),
        }
    }
}
