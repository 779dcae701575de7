//! Custom error types for walkeeper
//!
//! This module defines the error hierarchy for the archiver using thiserror
//! for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for walkeeper operations
#[derive(Error, Debug)]
pub enum KeeperError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),

    /// Malformed names, identities and similar input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Entity not found errors
    #[error("{entity_type} not found: {identifier}")]
    NotFound {
        entity_type: &'static str,
        identifier: String,
    },

    /// WAL file is smaller than the configured minimum
    #[error("WAL file {} is too small: {size} bytes (minimum {min})", path.display())]
    WalTooSmall { path: PathBuf, size: u64, min: u64 },

    /// WAL file is larger than the configured maximum
    #[error("WAL file {} is too large: {size} bytes (maximum {max})", path.display())]
    WalTooLarge { path: PathBuf, size: u64, max: u64 },

    /// Destination already holds this WAL file
    #[error("WAL file is already in archive: {0}")]
    AlreadyArchived(String),

    /// A pipeline stage could not be started
    #[error("stage '{stage}' failed on startup: {reason}")]
    StageStart { stage: String, reason: String },

    /// A pipeline stage finished unsuccessfully
    #[error("stage '{stage}' failed after startup: {reason}")]
    StageFailed { stage: String, reason: String },

    /// Archive store errors (file or object store)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Object store protocol errors
    #[error("Object store error: {0}")]
    ObjectStore(String),

    /// Encryption errors
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Retention policy errors
    #[error("Retention error: {0}")]
    Retention(String),
}

impl KeeperError {
    /// Create a "not found" error for WAL files
    pub fn wal_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "WAL file",
            identifier: identifier.into(),
        }
    }

    /// Create a "not found" error for backups
    pub fn backup_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Backup",
            identifier: identifier.into(),
        }
    }

    /// Create a "not found" error for stored objects
    pub fn object_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Object",
            identifier: identifier.into(),
        }
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if the destination already held the file
    pub fn is_already_archived(&self) -> bool {
        matches!(self, Self::AlreadyArchived(_))
    }

    /// Check if the WAL file was rejected by the size check
    pub fn is_rejected_wal(&self) -> bool {
        matches!(self, Self::WalTooSmall { .. } | Self::WalTooLarge { .. })
    }
}

impl From<std::io::Error> for KeeperError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for KeeperError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<s3::error::S3Error> for KeeperError {
    fn from(err: s3::error::S3Error) -> Self {
        Self::ObjectStore(err.to_string())
    }
}

/// Result type alias for walkeeper operations
pub type KeeperResult<T> = Result<T, KeeperError>;
