//! Pre-archive sanity check for WAL files

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::config::Settings;
use crate::error::{KeeperError, KeeperResult};

/// Accepted size range for files handed to `archive`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalLimits {
    pub min_archive_size: u64,
    pub max_wal_size: u64,
}

impl WalLimits {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            min_archive_size: settings.min_archive_size,
            max_wal_size: settings.max_wal_size,
        }
    }

    pub fn accepts(&self, size: u64) -> bool {
        (self.min_archive_size..=self.max_wal_size).contains(&size)
    }
}

impl Default for WalLimits {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// A WAL file that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalSegment {
    pub path: PathBuf,
    /// File name as handed over by the database (`%f`)
    pub name: String,
    pub size: u64,
}

/// Check that `path` is a regular file whose size is within `limits`
pub fn validate(path: &Path, limits: &WalLimits) -> KeeperResult<WalSegment> {
    let metadata = fs::metadata(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => KeeperError::wal_not_found(path.display().to_string()),
        _ => KeeperError::Io(format!("Failed to stat {}: {}", path.display(), e)),
    })?;

    if !metadata.is_file() {
        return Err(KeeperError::Validation(format!(
            "{} is not a regular file",
            path.display()
        )));
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| KeeperError::Validation(format!("{} has no file name", path.display())))?;

    let size = metadata.len();
    if size < limits.min_archive_size {
        return Err(KeeperError::WalTooSmall {
            path: path.to_path_buf(),
            size,
            min: limits.min_archive_size,
        });
    }
    if size > limits.max_wal_size {
        return Err(KeeperError::WalTooLarge {
            path: path.to_path_buf(),
            size,
            max: limits.max_wal_size,
        });
    }

    Ok(WalSegment {
        path: path.to_path_buf(),
        name,
        size,
    })
}
