//! The set of archived WAL objects in a store

use tracing::{debug, info, warn};

use super::{ArchivedWal, WalName};
use crate::error::KeeperResult;
use crate::sink::{ArchiveStore, StoredObject};

/// Result of pruning the WAL archive
#[derive(Debug, Default)]
pub struct WalCollection {
    /// Objects removed
    pub removed: Vec<String>,
    /// Objects left in place
    pub kept: usize,
    /// Objects that should have been removed but could not be
    pub failures: Vec<(String, String)>,
}

/// View over the WAL archive held by one store
pub struct WalArchive<'a> {
    store: &'a dyn ArchiveStore,
}

impl<'a> WalArchive<'a> {
    pub fn new(store: &'a dyn ArchiveStore) -> Self {
        Self { store }
    }

    /// Every object in the archive, classified
    pub fn list(&self) -> KeeperResult<Vec<(StoredObject, ArchivedWal)>> {
        Ok(self
            .store
            .list()?
            .into_iter()
            .map(|object| {
                let kind = ArchivedWal::classify(&object.name);
                (object, kind)
            })
            .collect())
    }

    /// Oldest archived segment, if any
    pub fn oldest_segment(&self) -> KeeperResult<Option<WalName>> {
        Ok(self
            .list()?
            .into_iter()
            .filter_map(|(_, kind)| match kind {
                ArchivedWal::Segment(name) => Some(name),
                _ => None,
            })
            .min())
    }

    /// Delete segments and backup labels strictly older than `horizon`
    ///
    /// Timeline history files and unrecognized objects are never touched.
    /// A failed delete is recorded and the sweep continues.
    pub fn delete_older_than(&self, horizon: &WalName) -> KeeperResult<WalCollection> {
        let mut collection = WalCollection::default();

        for (object, kind) in self.list()? {
            let expired = kind.segment().map_or(false, |segment| segment < horizon);
            if !expired {
                collection.kept += 1;
                continue;
            }

            match self.store.remove(&object.name) {
                Ok(()) => {
                    debug!(object = %object.name, "deleted old WAL object");
                    collection.removed.push(object.name);
                }
                Err(e) => {
                    warn!(object = %object.name, error = %e, "failed to delete WAL object");
                    collection.failures.push((object.name, e.to_string()));
                }
            }
        }

        info!(
            horizon = %horizon,
            removed = collection.removed.len(),
            kept = collection.kept,
            failed = collection.failures.len(),
            "pruned WAL archive"
        );
        Ok(collection)
    }
}
