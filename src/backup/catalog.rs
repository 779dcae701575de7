//! Read-only view of the base backups held in a store
//!
//! Each backup is two objects sharing a name: the data archive
//! `backup@<YYYY-MM-DDTHH:MM:SS>.tar.zst` and a small JSON metadata file
//! `backup@<...>.json` recording where its WAL stream starts.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{KeeperError, KeeperResult};
use crate::sink::ArchiveStore;
use crate::wal::WalName;

pub const BACKUP_PREFIX: &str = "backup@";
pub const DATA_SUFFIX: &str = ".tar.zst";
pub const METADATA_SUFFIX: &str = ".json";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Contents of a backup's metadata object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub label: String,
    pub created_at: DateTime<Utc>,
    /// First WAL segment needed to restore this backup
    pub start_wal: String,
}

/// One base backup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backup {
    /// `backup@<timestamp>`
    pub name: String,
    pub created_at: DateTime<Utc>,
    /// Size of the data object; 0 when it is missing
    pub size: u64,
    pub has_data: bool,
    pub has_metadata: bool,
    pub start_wal: Option<WalName>,
    /// Complete and restorable as far as the catalog can tell
    pub sane: bool,
}

impl Backup {
    pub fn data_object(&self) -> String {
        format!("{}{}", self.name, DATA_SUFFIX)
    }

    pub fn metadata_object(&self) -> String {
        format!("{}{}", self.name, METADATA_SUFFIX)
    }
}

impl fmt::Display for Backup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Backups ordered oldest first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupSet {
    backups: Vec<Backup>,
}

impl BackupSet {
    pub fn new(mut backups: Vec<Backup>) -> Self {
        backups.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
        Self { backups }
    }

    pub fn len(&self) -> usize {
        self.backups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backups.is_empty()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Backup> {
        self.backups.iter()
    }

    pub fn oldest(&self) -> Option<&Backup> {
        self.backups.first()
    }

    /// Only the sane backups
    pub fn sane(&self) -> BackupSet {
        Self {
            backups: self.backups.iter().filter(|b| b.sane).cloned().collect(),
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.backups.iter().map(|b| b.name.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.backups.iter().any(|b| b.name == name)
    }
}

impl fmt::Display for BackupSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.names().join(", "))
    }
}

impl IntoIterator for BackupSet {
    type Item = Backup;
    type IntoIter = std::vec::IntoIter<Backup>;

    fn into_iter(self) -> Self::IntoIter {
        self.backups.into_iter()
    }
}

impl FromIterator<Backup> for BackupSet {
    fn from_iter<I: IntoIterator<Item = Backup>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Source of truth for which backups exist
pub trait BackupCatalog {
    fn list(&self) -> KeeperResult<BackupSet>;

    fn delete(&self, backup: &Backup) -> KeeperResult<()>;

    /// First WAL segment `backup` needs
    fn start_wal_location(&self, backup: &Backup) -> KeeperResult<WalName>;
}

/// Backup catalog over an archive store
pub struct StoreCatalog<'a> {
    store: &'a dyn ArchiveStore,
    min_backup_size: u64,
}

#[derive(Default)]
struct Parts {
    data_size: Option<u64>,
    has_metadata: bool,
}

impl<'a> StoreCatalog<'a> {
    pub fn new(store: &'a dyn ArchiveStore, min_backup_size: u64) -> Self {
        Self {
            store,
            min_backup_size,
        }
    }

    fn read_metadata(&self, name: &str) -> KeeperResult<BackupMetadata> {
        let raw = self
            .store
            .read(&format!("{}{}", name, METADATA_SUFFIX))
            .map_err(|e| {
                if e.is_not_found() {
                    KeeperError::backup_not_found(format!("{} metadata", name))
                } else {
                    e
                }
            })?;
        serde_json::from_slice(&raw)
            .map_err(|e| KeeperError::Json(format!("Invalid metadata for {}: {}", name, e)))
    }
}

impl BackupCatalog for StoreCatalog<'_> {
    fn list(&self) -> KeeperResult<BackupSet> {
        let mut groups: BTreeMap<String, Parts> = BTreeMap::new();

        for object in self.store.list()? {
            if let Some(name) = object.name.strip_suffix(DATA_SUFFIX) {
                groups.entry(name.to_string()).or_default().data_size = Some(object.size);
            } else if let Some(name) = object.name.strip_suffix(METADATA_SUFFIX) {
                groups.entry(name.to_string()).or_default().has_metadata = true;
            }
        }

        let mut backups = Vec::with_capacity(groups.len());
        for (name, parts) in groups {
            let Some(created_at) = parse_backup_name(&name) else {
                debug!(object = %name, "ignoring object that is not a backup");
                continue;
            };

            let start_wal = if parts.has_metadata {
                match self.read_metadata(&name) {
                    Ok(meta) => match WalName::parse(&meta.start_wal) {
                        Ok(wal) => Some(wal),
                        Err(e) => {
                            warn!(backup = %name, error = %e, "backup metadata has a bad start WAL");
                            None
                        }
                    },
                    Err(e) => {
                        warn!(backup = %name, error = %e, "unreadable backup metadata");
                        None
                    }
                }
            } else {
                None
            };

            let size = parts.data_size.unwrap_or(0);
            let has_data = parts.data_size.is_some();
            let sane = has_data && size >= self.min_backup_size && start_wal.is_some();
            if !sane {
                warn!(backup = %name, has_data, size, "backup is not sane");
            }

            backups.push(Backup {
                name,
                created_at,
                size,
                has_data,
                has_metadata: parts.has_metadata,
                start_wal,
                sane,
            });
        }

        Ok(BackupSet::new(backups))
    }

    fn delete(&self, backup: &Backup) -> KeeperResult<()> {
        // Data first: a leftover metadata file keeps the backup visible as insane
        for object in [backup.data_object(), backup.metadata_object()] {
            match self.store.remove(&object) {
                Ok(()) => debug!(object = %object, "removed backup object"),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn start_wal_location(&self, backup: &Backup) -> KeeperResult<WalName> {
        if let Some(wal) = &backup.start_wal {
            return Ok(wal.clone());
        }

        let meta = self.read_metadata(&backup.name)?;
        WalName::parse(&meta.start_wal)
    }
}

/// Name of the backup created at `created_at`
pub fn backup_name(created_at: &DateTime<Utc>) -> String {
    format!("{}{}", BACKUP_PREFIX, created_at.format(TIMESTAMP_FORMAT))
}

/// Parse the creation time out of `backup@YYYY-MM-DDTHH:MM:SS`
pub fn parse_backup_name(name: &str) -> Option<DateTime<Utc>> {
    let timestamp = name.strip_prefix(BACKUP_PREFIX)?;
    let naive = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).ok()?;
    Some(DateTime::from_naive_utc_and_offset(naive, Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{FileStore, PayloadKind};
    use chrono::{Datelike, TimeZone, Timelike};
    use tempfile::TempDir;

    fn put(store: &FileStore, name: &str, body: &[u8]) {
        store
            .put(name, &mut &body[..], PayloadKind::Compressed)
            .unwrap();
    }

    fn seed_backup(store: &FileStore, name: &str, start_wal: &str, size: usize) {
        let created_at = parse_backup_name(name).unwrap();
        let meta = BackupMetadata {
            label: name.to_string(),
            created_at,
            start_wal: start_wal.to_string(),
        };
        put(store, &format!("{}{}", name, DATA_SUFFIX), &vec![1u8; size]);
        put(
            store,
            &format!("{}{}", name, METADATA_SUFFIX),
            &serde_json::to_vec(&meta).unwrap(),
        );
    }

    fn catalog_dir() -> (FileStore, TempDir) {
        let dir = TempDir::new().unwrap();
        (FileStore::new(dir.path().join("basebackup")), dir)
    }

    #[test]
    fn test_parse_backup_name() {
        let ts = parse_backup_name("backup@2024-03-05T14:30:22").unwrap();
        assert_eq!(ts.year(), 2024);
        assert_eq!(ts.month(), 3);
        assert_eq!(ts.hour(), 14);

        assert!(parse_backup_name("backup-2024-03-05").is_none());
        assert!(parse_backup_name("backup@yesterday").is_none());
    }

    #[test]
    fn test_backup_name_round_trip() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let name = backup_name(&ts);
        assert_eq!(name, "backup@2024-01-02T03:04:05");
        assert_eq!(parse_backup_name(&name).unwrap(), ts);
    }

    #[test]
    fn test_list_oldest_first_with_sanity() {
        let (store, _dir) = catalog_dir();
        seed_backup(&store, "backup@2024-01-03T00:00:00", "000000010000000000000005", 10);
        seed_backup(&store, "backup@2024-01-01T00:00:00", "000000010000000000000001", 10);
        // Data object only: no start WAL, so not sane
        put(&store, "backup@2024-01-02T00:00:00.tar.zst", b"data");
        put(&store, "README", b"not a backup");

        let catalog = StoreCatalog::new(&store, 1);
        let set = catalog.list().unwrap();

        assert_eq!(
            set.names(),
            vec![
                "backup@2024-01-01T00:00:00",
                "backup@2024-01-02T00:00:00",
                "backup@2024-01-03T00:00:00"
            ]
        );
        let flags: Vec<bool> = set.iter().map(|b| b.sane).collect();
        assert_eq!(flags, vec![true, false, true]);
        assert_eq!(set.sane().len(), 2);
    }

    #[test]
    fn test_small_backup_is_insane() {
        let (store, _dir) = catalog_dir();
        seed_backup(&store, "backup@2024-01-01T00:00:00", "000000010000000000000001", 3);

        let catalog = StoreCatalog::new(&store, 1024);
        let set = catalog.list().unwrap();
        assert!(!set.oldest().unwrap().sane);
    }

    #[test]
    fn test_bad_metadata_is_insane() {
        let (store, _dir) = catalog_dir();
        put(&store, "backup@2024-01-01T00:00:00.tar.zst", b"data");
        put(&store, "backup@2024-01-01T00:00:00.json", b"{not json");

        let catalog = StoreCatalog::new(&store, 1);
        let backup = catalog.list().unwrap().oldest().cloned().unwrap();
        assert!(!backup.sane);
        assert!(catalog.start_wal_location(&backup).is_err());
    }

    #[test]
    fn test_delete_removes_both_objects() {
        let (store, _dir) = catalog_dir();
        seed_backup(&store, "backup@2024-01-01T00:00:00", "000000010000000000000001", 10);
        seed_backup(&store, "backup@2024-01-02T00:00:00", "000000010000000000000003", 10);

        let catalog = StoreCatalog::new(&store, 1);
        let oldest = catalog.list().unwrap().oldest().cloned().unwrap();
        catalog.delete(&oldest).unwrap();

        let left = catalog.list().unwrap();
        assert_eq!(left.names(), vec!["backup@2024-01-02T00:00:00"]);
        assert_eq!(store.list().unwrap().len(), 2);
    }

    #[test]
    fn test_delete_tolerates_missing_data() {
        let (store, _dir) = catalog_dir();
        put(&store, "backup@2024-01-01T00:00:00.json", b"{}");

        let catalog = StoreCatalog::new(&store, 1);
        let backup = catalog.list().unwrap().oldest().cloned().unwrap();
        catalog.delete(&backup).unwrap();
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_start_wal_location() {
        let (store, _dir) = catalog_dir();
        seed_backup(&store, "backup@2024-01-01T00:00:00", "000000010000000000000007", 10);

        let catalog = StoreCatalog::new(&store, 1);
        let backup = catalog.list().unwrap().oldest().cloned().unwrap();
        assert_eq!(
            catalog.start_wal_location(&backup).unwrap().as_str(),
            "000000010000000000000007"
        );
    }
}
