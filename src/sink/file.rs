//! Local filesystem archive store
//!
//! Writes go to a temp file in the destination directory, are synced, and
//! then linked into place without clobbering, so readers only ever see
//! complete files and a concurrent writer for the same name loses cleanly.

use std::fs;
use std::io::{self, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use super::{ArchiveStore, PayloadKind, StoredObject};
use crate::error::{KeeperError, KeeperResult};

/// Temp files created by in-flight writes start with this
const TEMP_PREFIX: &str = ".tmp";

/// Archive store rooted at a local directory
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, name: &str) -> KeeperResult<PathBuf> {
        if name.is_empty() || name.contains('/') || name.contains('\\') || name.starts_with('.') {
            return Err(KeeperError::Validation(format!(
                "invalid archive object name: '{}'",
                name
            )));
        }
        Ok(self.root.join(name))
    }
}

impl ArchiveStore for FileStore {
    fn describe(&self) -> String {
        format!("file:{}", self.root.display())
    }

    fn object_name(&self, base: &str, kind: PayloadKind) -> String {
        format!("{}{}", base, kind.file_suffix())
    }

    fn exists(&self, name: &str) -> KeeperResult<bool> {
        let path = self.path_of(name)?;
        path.try_exists()
            .map_err(|e| KeeperError::Storage(format!("Failed to check {}: {}", path.display(), e)))
    }

    fn put(&self, name: &str, data: &mut dyn Read, _kind: PayloadKind) -> KeeperResult<u64> {
        let target = self.path_of(name)?;

        fs::create_dir_all(&self.root).map_err(|e| {
            KeeperError::Storage(format!(
                "Failed to create directory {}: {}",
                self.root.display(),
                e
            ))
        })?;

        let temp = NamedTempFile::new_in(&self.root)
            .map_err(|e| KeeperError::Storage(format!("Failed to create temp file: {}", e)))?;

        let mut writer = BufWriter::new(temp);
        let written = io::copy(data, &mut writer)
            .map_err(|e| KeeperError::Storage(format!("Failed to write {}: {}", name, e)))?;
        writer
            .flush()
            .map_err(|e| KeeperError::Storage(format!("Failed to flush {}: {}", name, e)))?;

        let temp = writer
            .into_inner()
            .map_err(|e| KeeperError::Storage(format!("Failed to flush {}: {}", name, e.error())))?;

        temp.as_file()
            .sync_all()
            .map_err(|e| KeeperError::Storage(format!("Failed to sync {}: {}", name, e)))?;

        // Dropping the temp file on error removes it; nothing partial stays visible.
        temp.persist_noclobber(&target).map_err(|e| {
            if e.error.kind() == ErrorKind::AlreadyExists {
                KeeperError::AlreadyArchived(target.display().to_string())
            } else {
                KeeperError::Storage(format!("Failed to persist {}: {}", target.display(), e.error))
            }
        })?;

        sync_dir(&self.root);
        debug!(path = %target.display(), bytes = written, "stored file");
        Ok(written)
    }

    fn list(&self) -> KeeperResult<Vec<StoredObject>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut objects = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(|e| {
            KeeperError::Storage(format!("Failed to read {}: {}", self.root.display(), e))
        })? {
            let entry = entry
                .map_err(|e| KeeperError::Storage(format!("Failed to read directory entry: {}", e)))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(TEMP_PREFIX) {
                continue;
            }

            let metadata = entry
                .metadata()
                .map_err(|e| KeeperError::Storage(format!("Failed to stat {}: {}", name, e)))?;
            if metadata.is_file() {
                objects.push(StoredObject {
                    name,
                    size: metadata.len(),
                });
            }
        }

        objects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(objects)
    }

    fn read(&self, name: &str) -> KeeperResult<Vec<u8>> {
        let path = self.path_of(name)?;
        fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => KeeperError::object_not_found(name),
            _ => KeeperError::Storage(format!("Failed to read {}: {}", path.display(), e)),
        })
    }

    fn remove(&self, name: &str) -> KeeperResult<()> {
        let path = self.path_of(name)?;
        fs::remove_file(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => KeeperError::object_not_found(name),
            _ => KeeperError::Storage(format!("Failed to delete {}: {}", path.display(), e)),
        })
    }
}

/// Persist the directory entry of a freshly linked file
#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Ok(handle) = fs::File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}
