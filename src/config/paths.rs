//! Path management for walkeeper
//!
//! Provides XDG-compliant resolution of the configuration directory, and the
//! on-disk layout of a file-mode archive.
//!
//! ## Path Resolution Order
//!
//! 1. `WALKEEPER_CONFIG_DIR` environment variable (if set)
//! 2. Unix (Linux/macOS): `$XDG_CONFIG_HOME/walkeeper` or `~/.config/walkeeper`
//! 3. Windows: `%APPDATA%\walkeeper`

use std::path::{Path, PathBuf};

use crate::error::KeeperError;

/// Manages the configuration paths used by walkeeper
#[derive(Debug, Clone)]
pub struct KeeperPaths {
    /// Base directory for walkeeper configuration
    base_dir: PathBuf,
}

impl KeeperPaths {
    /// Create a new KeeperPaths instance
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn new() -> Result<Self, KeeperError> {
        let base_dir = if let Ok(custom) = std::env::var("WALKEEPER_CONFIG_DIR") {
            PathBuf::from(custom)
        } else {
            resolve_default_path()?
        };

        Ok(Self { base_dir })
    }

    /// Create KeeperPaths with a custom base directory (useful for testing)
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory (~/.config/walkeeper/ or equivalent)
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the path to the settings file
    pub fn settings_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Ensure the configuration directory exists
    pub fn ensure_directories(&self) -> Result<(), KeeperError> {
        std::fs::create_dir_all(&self.base_dir)
            .map_err(|e| KeeperError::Io(format!("Failed to create config directory: {}", e)))
    }
}

/// Directory layout of a file-mode archive
///
/// ```text
/// <archivedir>/
/// ├── wal/          archived WAL segments (<name>.zst[.gpg|.sealed])
/// └── basebackup/   base backups and their metadata
/// ```
#[derive(Debug, Clone)]
pub struct ArchiveLayout {
    root: PathBuf,
}

impl ArchiveLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding archived WAL segments
    pub fn wal_dir(&self) -> PathBuf {
        self.root.join("wal")
    }

    /// Directory holding base backups
    pub fn backup_dir(&self) -> PathBuf {
        self.root.join("basebackup")
    }

    /// Create the archive directories if missing
    pub fn ensure_directories(&self) -> Result<(), KeeperError> {
        std::fs::create_dir_all(self.wal_dir())
            .map_err(|e| KeeperError::Io(format!("Failed to create WAL directory: {}", e)))?;

        std::fs::create_dir_all(self.backup_dir())
            .map_err(|e| KeeperError::Io(format!("Failed to create backup directory: {}", e)))?;

        Ok(())
    }
}

/// Resolve the default config directory path based on platform
#[cfg(not(windows))]
fn resolve_default_path() -> Result<PathBuf, KeeperError> {
    let config_base = match std::env::var("XDG_CONFIG_HOME") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => {
            let home = std::env::var("HOME")
                .map_err(|_| KeeperError::Config("HOME environment variable not set".into()))?;
            PathBuf::from(home).join(".config")
        }
    };
    Ok(config_base.join("walkeeper"))
}

/// Resolve the default config directory path based on platform
#[cfg(windows)]
fn resolve_default_path() -> Result<PathBuf, KeeperError> {
    let appdata = std::env::var("APPDATA")
        .map_err(|_| KeeperError::Config("Could not determine APPDATA directory".into()))?;
    Ok(PathBuf::from(appdata).join("walkeeper"))
}
