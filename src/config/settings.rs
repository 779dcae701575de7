//! Archiver settings for walkeeper
//!
//! One explicit configuration value covering the archive destination, object
//! store access, the compression and encryption stages, and WAL size limits.
//! Components receive the parts they need at construction.

use std::io::Write;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::paths::{ArchiveLayout, KeeperPaths};
use crate::crypto::KeyParams;
use crate::error::KeeperError;

/// 16 MiB, the default PostgreSQL segment size
pub const DEFAULT_MAX_WAL_SIZE: u64 = 16 * 1024 * 1024;

/// Anything smaller is a segment still being written or a stray file
pub const DEFAULT_MIN_ARCHIVE_SIZE: u64 = 100;

/// Where archived WAL files and base backups are stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveTarget {
    /// Local filesystem under `archivedir`
    #[default]
    File,
    /// S3-compatible object store
    S3,
}

/// How the compression stage runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMethod {
    /// zstd encoder inside the process
    #[default]
    Builtin,
    /// External `zstd` binary
    Command,
}

/// Compression stage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionSettings {
    #[serde(default)]
    pub method: CompressionMethod,
    /// zstd compression level
    #[serde(default = "default_compression_level")]
    pub level: i32,
    /// Program used when `method` is `command`
    #[serde(default = "default_zstd_command")]
    pub command: String,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            method: CompressionMethod::default(),
            level: default_compression_level(),
            command: default_zstd_command(),
        }
    }
}

/// How the encryption stage runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionMethod {
    /// External `gpg --encrypt` for the configured recipient
    #[default]
    Gpg,
    /// AES-256-GCM with an Argon2id-derived key
    Builtin,
}

/// Encryption stage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionSettings {
    #[serde(default)]
    pub method: EncryptionMethod,

    /// Program used for the gpg method
    #[serde(default = "default_gpg_command")]
    pub gpg_command: String,

    /// Key derivation parameters for the builtin method
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_params: Option<KeyParams>,

    /// Encrypted marker used to check the passphrase before archiving
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<String>,
}

impl Default for EncryptionSettings {
    fn default() -> Self {
        Self {
            method: EncryptionMethod::default(),
            gpg_command: default_gpg_command(),
            key_params: None,
            verification: None,
        }
    }
}

/// Settings for walkeeper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Schema version for migration support
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// Archive destination
    #[serde(default)]
    pub archive_to: ArchiveTarget,

    /// Root of the file-mode archive
    #[serde(default = "default_archivedir")]
    pub archivedir: PathBuf,

    /// Bucket receiving WAL objects
    #[serde(default = "default_bucket_wal")]
    pub s3_bucket_wal: String,

    /// Bucket holding base backups
    #[serde(default = "default_bucket_backup")]
    pub s3_bucket_backup: String,

    /// Region used when creating buckets
    #[serde(default = "default_location")]
    pub s3_location: String,

    /// Custom endpoint (MinIO, Ceph, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_access_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_secret_key: Option<String>,

    #[serde(default = "default_true")]
    pub s3_path_style: bool,

    #[serde(default)]
    pub compression: CompressionSettings,

    /// Encrypt archived WAL files
    #[serde(default)]
    pub encrypt: bool,

    /// Encryption target identity (gpg recipient)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,

    #[serde(default)]
    pub encryption: EncryptionSettings,

    #[serde(default = "default_min_archive_size")]
    pub min_archive_size: u64,

    #[serde(default = "default_max_wal_size")]
    pub max_wal_size: u64,

    /// Base backups smaller than this are insane
    #[serde(default = "default_min_backup_size")]
    pub min_backup_size: u64,
}

fn default_schema_version() -> u32 {
    1
}

fn default_archivedir() -> PathBuf {
    PathBuf::from("/var/lib/walkeeper")
}

fn default_bucket_wal() -> String {
    "walkeeper-wal".to_string()
}

fn default_bucket_backup() -> String {
    "walkeeper-basebackup".to_string()
}

fn default_location() -> String {
    "us-east-1".to_string()
}

fn default_true() -> bool {
    true
}

fn default_compression_level() -> i32 {
    3
}

fn default_zstd_command() -> String {
    "zstd".to_string()
}

fn default_gpg_command() -> String {
    "gpg".to_string()
}

fn default_min_archive_size() -> u64 {
    DEFAULT_MIN_ARCHIVE_SIZE
}

fn default_max_wal_size() -> u64 {
    DEFAULT_MAX_WAL_SIZE
}

fn default_min_backup_size() -> u64 {
    1
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            archive_to: ArchiveTarget::default(),
            archivedir: default_archivedir(),
            s3_bucket_wal: default_bucket_wal(),
            s3_bucket_backup: default_bucket_backup(),
            s3_location: default_location(),
            s3_endpoint: None,
            s3_access_key: None,
            s3_secret_key: None,
            s3_path_style: true,
            compression: CompressionSettings::default(),
            encrypt: false,
            recipient: None,
            encryption: EncryptionSettings::default(),
            min_archive_size: default_min_archive_size(),
            max_wal_size: default_max_wal_size(),
            min_backup_size: default_min_backup_size(),
        }
    }
}

impl Settings {
    /// Load settings from the default location, or defaults if absent
    pub fn load_or_create(paths: &KeeperPaths) -> Result<Self, KeeperError> {
        Self::load_from(&paths.settings_file())
    }

    /// Load settings from an explicit file, or defaults if it doesn't exist
    pub fn load_from(settings_path: &std::path::Path) -> Result<Self, KeeperError> {
        if !settings_path.exists() {
            return Ok(Settings::default());
        }

        let contents = std::fs::read_to_string(settings_path)
            .map_err(|e| KeeperError::Io(format!("Failed to read settings file: {}", e)))?;

        let settings: Settings = serde_json::from_str(&contents)
            .map_err(|e| KeeperError::Config(format!("Failed to parse settings file: {}", e)))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Save settings to the default location
    pub fn save(&self, paths: &KeeperPaths) -> Result<(), KeeperError> {
        paths.ensure_directories()?;
        self.save_to(&paths.settings_file())
    }

    /// Save settings to `settings_path` (write to temp, then rename)
    pub fn save_to(&self, settings_path: &std::path::Path) -> Result<(), KeeperError> {
        let dir = match settings_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => std::path::Path::new("."),
        };
        std::fs::create_dir_all(dir)
            .map_err(|e| KeeperError::Io(format!("Failed to create config directory: {}", e)))?;

        let mut file = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| KeeperError::Io(format!("Failed to create temp file: {}", e)))?;

        serde_json::to_writer_pretty(&mut file, self)
            .map_err(|e| KeeperError::Config(format!("Failed to serialize settings: {}", e)))?;
        file.flush()?;
        file.as_file().sync_all()?;

        file.persist(settings_path)
            .map_err(|e| KeeperError::Io(format!("Failed to write settings file: {}", e)))?;

        Ok(())
    }

    /// Reject combinations that would only fail later, mid-archive
    pub fn validate(&self) -> Result<(), KeeperError> {
        if self.min_archive_size > self.max_wal_size {
            return Err(KeeperError::Config(format!(
                "min_archive_size ({}) is larger than max_wal_size ({})",
                self.min_archive_size, self.max_wal_size
            )));
        }

        if self.encrypt {
            match self.encryption.method {
                EncryptionMethod::Gpg if self.recipient.is_none() => {
                    return Err(KeeperError::Config(
                        "encrypt is enabled but no recipient is configured".into(),
                    ));
                }
                EncryptionMethod::Builtin if self.encryption.key_params.is_none() => {
                    return Err(KeeperError::Config(
                        "builtin encryption is not set up, run 'walkeeper encryption enable'"
                            .into(),
                    ));
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// File-mode archive layout
    pub fn layout(&self) -> ArchiveLayout {
        ArchiveLayout::new(&self.archivedir)
    }
}
