//! Base backup catalog and retention
//!
//! walkeeper never takes base backups itself; it only reads what the backup
//! tooling left in the backup store and decides which backups to keep.
//!
//! # Backup Format
//!
//! Every backup is a pair of objects named after its creation time:
//! - `backup@<YYYY-MM-DDTHH:MM:SS>.tar.zst`: the compressed data archive
//! - `backup@<YYYY-MM-DDTHH:MM:SS>.json`: metadata with `label`,
//!   `created_at` and `start_wal`
//!
//! # Sanity
//!
//! A backup is sane when its data object exists, is at least
//! `min_backup_size` bytes, and its metadata names a valid start WAL.
//! Insane backups are listed and kept, but don't count toward retention.
//!
//! # Example
//!
//! ```rust,ignore
//! use walkeeper::backup::{classify, BackupCatalog, StoreCatalog};
//!
//! let catalog = StoreCatalog::new(stores.backups.as_ref(), settings.min_backup_size);
//! let decision = classify(&catalog.list()?, 7)?;
//! println!("discard: {}", decision.discard);
//! ```

mod catalog;
mod retention;

pub use catalog::{
    backup_name, parse_backup_name, Backup, BackupCatalog, BackupMetadata, BackupSet,
    StoreCatalog, BACKUP_PREFIX, DATA_SUFFIX, METADATA_SUFFIX,
};
pub use retention::{classify, RetentionDecision};
