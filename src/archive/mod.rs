//! WAL archival pipeline
//!
//! Archives one WAL file at a time: validate, check the destination,
//! stream the file through the stage chain into the store, then settle every
//! stage. Each file yields its own outcome; nothing is retried.
//!
//! # Example
//!
//! ```rust,ignore
//! use walkeeper::archive::{ArchivePipeline, BatchMode};
//!
//! let stores = Stores::from_settings(&settings)?;
//! let pipeline = ArchivePipeline::from_settings(stores.wal.as_ref(), &settings, None);
//! let report = pipeline.archive_all(&wal_files, BatchMode::StopOnError);
//! ```

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::crypto::ArchiveKey;
use crate::error::{KeeperError, KeeperResult};
use crate::sink::{ArchiveStore, PayloadKind};
use crate::stage::{ByteStream, StageChain};
use crate::wal::{validate, WalLimits};

/// Something worth knowing about an archive that still succeeded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveWarning {
    /// The store stopped reading before the last stage finished writing
    TrailingDataDiscarded { bytes: u64 },
}

/// Proof that one WAL file was archived
#[derive(Debug, Clone)]
pub struct ArchiveReceipt {
    pub wal_name: String,
    pub object_name: String,
    pub kind: PayloadKind,
    /// Size of the source WAL file
    pub bytes_in: u64,
    /// Bytes handed to the store
    pub bytes_written: u64,
    pub elapsed: Duration,
    pub warnings: Vec<ArchiveWarning>,
}

/// How a batch reacts to a failing file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchMode {
    /// Stop at the first failure; later files are not attempted
    #[default]
    StopOnError,
    /// Attempt every file
    KeepGoing,
}

/// Outcome of archiving several files
#[derive(Debug)]
pub struct BatchReport {
    pub outcomes: Vec<(PathBuf, KeeperResult<ArchiveReceipt>)>,
    /// Files never attempted because an earlier one failed
    pub skipped: Vec<PathBuf>,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn archived(&self) -> usize {
        self.outcomes.iter().filter(|(_, r)| r.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|(_, r)| r.is_err()).count()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0 && self.skipped.is_empty()
    }

    /// The first failure, if any
    pub fn first_error(&self) -> Option<(&Path, &KeeperError)> {
        self.outcomes
            .iter()
            .find_map(|(path, r)| r.as_ref().err().map(|e| (path.as_path(), e)))
    }
}

type ChainFactory<'a> = Box<dyn Fn() -> KeeperResult<StageChain> + 'a>;

/// Validator, stage chain and store wired together
pub struct ArchivePipeline<'a> {
    store: &'a dyn ArchiveStore,
    limits: WalLimits,
    chain: ChainFactory<'a>,
}

impl<'a> ArchivePipeline<'a> {
    /// Pipeline with a custom chain; `chain` is called once per file
    pub fn new<F>(store: &'a dyn ArchiveStore, limits: WalLimits, chain: F) -> Self
    where
        F: Fn() -> KeeperResult<StageChain> + 'a,
    {
        Self {
            store,
            limits,
            chain: Box::new(chain),
        }
    }

    /// Pipeline configured from `settings`
    ///
    /// `key` is only used for builtin encryption.
    pub fn from_settings(
        store: &'a dyn ArchiveStore,
        settings: &'a Settings,
        key: Option<ArchiveKey>,
    ) -> Self {
        Self::new(store, WalLimits::from_settings(settings), move || {
            StageChain::from_settings(settings, key.as_ref())
        })
    }

    /// Name of a copy of `base` already stored under any payload kind
    fn archived_copy(&self, base: &str) -> KeeperResult<Option<String>> {
        let mut names: Vec<String> = PayloadKind::ALL
            .iter()
            .map(|kind| self.store.object_name(base, *kind))
            .collect();
        names.dedup();

        for name in names {
            if self.store.exists(&name)? {
                return Ok(Some(name));
            }
        }
        Ok(None)
    }

    /// Archive one WAL file
    pub fn archive(&self, path: &Path) -> KeeperResult<ArchiveReceipt> {
        let started = Instant::now();

        let segment = validate(path, &self.limits)?;
        let chain = (self.chain)()?;
        let kind = chain.kind();
        let base = format!("{}.zst", segment.name);
        let object_name = self.store.object_name(&base, kind);

        if let Some(existing) = self.archived_copy(&base)? {
            return Err(KeeperError::AlreadyArchived(format!(
                "{}/{}",
                self.store.describe(),
                existing
            )));
        }

        let source = File::open(&segment.path)
            .map_err(|e| KeeperError::Io(format!("Failed to open {}: {}", path.display(), e)))?;
        let input: ByteStream = Box::new(source);

        debug!(
            wal = %segment.name,
            stages = ?chain.stage_names(),
            target = %self.store.describe(),
            "starting archive"
        );
        let mut running = chain.start(input)?;
        let stored = self.store.put(&object_name, &mut running, kind);
        let report = running.finish();

        let mut warnings = Vec::new();
        if report.trailing_bytes > 0 {
            warn!(
                wal = %segment.name,
                bytes = report.trailing_bytes,
                "TrailingDataDiscarded: store finished before the stage output ended"
            );
            warnings.push(ArchiveWarning::TrailingDataDiscarded {
                bytes: report.trailing_bytes,
            });
        }

        let bytes_written = match (stored, report.result) {
            (Ok(bytes), Ok(())) => bytes,
            (Ok(_), Err(stage_err)) => {
                // The store accepted output of a stage that then failed
                if let Err(e) = self.store.remove(&object_name) {
                    error!(object = %object_name, error = %e, "failed to remove incomplete archive");
                }
                return Err(stage_err);
            }
            (Err(store_err), Err(stage_err)) => {
                debug!(error = %store_err, "store failed after stage failure");
                return Err(stage_err);
            }
            (Err(store_err), Ok(())) => return Err(store_err),
        };

        let receipt = ArchiveReceipt {
            wal_name: segment.name,
            object_name,
            kind,
            bytes_in: segment.size,
            bytes_written,
            elapsed: started.elapsed(),
            warnings,
        };
        info!(
            wal = %receipt.wal_name,
            object = %receipt.object_name,
            bytes_in = receipt.bytes_in,
            bytes_written = receipt.bytes_written,
            elapsed_ms = receipt.elapsed.as_millis() as u64,
            "archived WAL file"
        );
        Ok(receipt)
    }

    /// Archive several files in order
    pub fn archive_all(&self, paths: &[PathBuf], mode: BatchMode) -> BatchReport {
        let started = Instant::now();
        let mut outcomes = Vec::with_capacity(paths.len());
        let mut skipped = Vec::new();

        for (index, path) in paths.iter().enumerate() {
            let outcome = self.archive(path);
            let failed = outcome.is_err();
            if let Err(e) = &outcome {
                error!(file = %path.display(), error = %e, "archive failed");
            }
            outcomes.push((path.clone(), outcome));

            if failed && mode == BatchMode::StopOnError {
                skipped.extend(paths[index + 1..].iter().cloned());
                break;
            }
        }

        let report = BatchReport {
            outcomes,
            skipped,
            elapsed: started.elapsed(),
        };
        info!(
            archived = report.archived(),
            failed = report.failed(),
            skipped = report.skipped.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "archive run finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{self, ArchiveKey, KeyParams};
    use crate::sink::{BucketStore, FileStore, MemoryObjectStore};
    use crate::stage::CodecStage;
    use std::cell::Cell;
    use std::io;
    use std::sync::Arc;
    use tempfile::TempDir;

    const WAL: &str = "000000010000000000000001";

    fn limits() -> WalLimits {
        WalLimits {
            min_archive_size: 100,
            max_wal_size: 64 * 1024,
        }
    }

    fn compress_only() -> KeeperResult<StageChain> {
        Ok(StageChain::new().then(CodecStage::zstd(3)))
    }

    fn write_wal(dir: &TempDir, name: &str, size: usize) -> PathBuf {
        let path = dir.path().join(name);
        let body: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_archive_to_file_store() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("archive/wal"));
        let wal = write_wal(&dir, WAL, 8192);
        let pipeline = ArchivePipeline::new(&store, limits(), compress_only);

        let receipt = pipeline.archive(&wal).unwrap();

        assert_eq!(receipt.object_name, format!("{}.zst", WAL));
        assert_eq!(receipt.bytes_in, 8192);
        assert!(receipt.warnings.is_empty());
        let stored = store.read(&receipt.object_name).unwrap();
        assert_eq!(stored.len() as u64, receipt.bytes_written);
        assert_eq!(
            zstd::stream::decode_all(&stored[..]).unwrap(),
            std::fs::read(&wal).unwrap()
        );
    }

    #[test]
    fn test_second_archive_is_rejected_and_first_copy_kept() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("wal"));
        let wal = write_wal(&dir, WAL, 4096);
        let pipeline = ArchivePipeline::new(&store, limits(), compress_only);

        pipeline.archive(&wal).unwrap();
        let first = store.read(&format!("{}.zst", WAL)).unwrap();

        std::fs::write(&wal, vec![9u8; 4096]).unwrap();
        let err = pipeline.archive(&wal).unwrap_err();

        assert!(err.is_already_archived());
        assert_eq!(store.read(&format!("{}.zst", WAL)).unwrap(), first);
    }

    #[test]
    fn test_empty_wal_rejected_before_any_stage() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("wal"));
        let wal = write_wal(&dir, WAL, 0);
        let chains_built = Cell::new(0);
        let pipeline = ArchivePipeline::new(&store, limits(), || {
            chains_built.set(chains_built.get() + 1);
            compress_only()
        });

        let err = pipeline.archive(&wal).unwrap_err();

        assert!(matches!(err, KeeperError::WalTooSmall { size: 0, .. }));
        assert_eq!(chains_built.get(), 0);
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_failing_stage_leaves_no_object() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("wal"));
        let wal = write_wal(&dir, WAL, 4096);
        let pipeline = ArchivePipeline::new(&store, limits(), || {
            Ok(StageChain::new().then(CodecStage::new("flaky", |input, output| {
                let mut head = [0u8; 512];
                input.read_exact(&mut head)?;
                output.write_all(&head)?;
                Err(io::Error::new(io::ErrorKind::Other, "encoder crashed"))
            })))
        });

        let err = pipeline.archive(&wal).unwrap_err();

        assert!(matches!(err, KeeperError::StageFailed { ref stage, .. } if stage == "flaky"));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_archive_to_bucket_with_content_type() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(MemoryObjectStore::new());
        let store = BucketStore::new(client.clone(), "pg-wal", "us-east-1");
        let wal = write_wal(&dir, WAL, 2048);
        let pipeline = ArchivePipeline::new(&store, limits(), compress_only);

        pipeline.archive(&wal).unwrap();

        let key = format!("{}.zst", WAL);
        assert_eq!(client.create_bucket_calls(), 1);
        assert_eq!(client.content_type("pg-wal", &key).unwrap(), "application/zstd");
        let body = client.object("pg-wal", &key).unwrap();
        assert_eq!(zstd::stream::decode_all(&body[..]).unwrap().len(), 2048);
    }

    #[test]
    fn test_sealed_archive_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("wal"));
        let wal = write_wal(&dir, WAL, 10_000);
        let key = ArchiveKey::derive("correct horse", &KeyParams::fast()).unwrap();
        let chain_key = key.clone();
        let pipeline = ArchivePipeline::new(&store, limits(), move || {
            Ok(StageChain::new()
                .then(CodecStage::zstd(3))
                .then(CodecStage::seal(chain_key.clone()))
                .producing(PayloadKind::Sealed))
        });

        let receipt = pipeline.archive(&wal).unwrap();
        assert_eq!(receipt.object_name, format!("{}.zst.sealed", WAL));

        let sealed = store.read(&receipt.object_name).unwrap();
        let mut compressed = Vec::new();
        crypto::open(&mut &sealed[..], &mut compressed, &key).unwrap();
        assert_eq!(
            zstd::stream::decode_all(&compressed[..]).unwrap(),
            std::fs::read(&wal).unwrap()
        );
    }

    #[test]
    fn test_plain_copy_blocks_encrypted_rearchive() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("wal"));
        let wal = write_wal(&dir, WAL, 4096);
        ArchivePipeline::new(&store, limits(), compress_only)
            .archive(&wal)
            .unwrap();

        let key = ArchiveKey::derive("correct horse", &KeyParams::fast()).unwrap();
        let sealing = ArchivePipeline::new(&store, limits(), move || {
            Ok(StageChain::new()
                .then(CodecStage::zstd(3))
                .then(CodecStage::seal(key.clone()))
                .producing(PayloadKind::Sealed))
        });
        let err = sealing.archive(&wal).unwrap_err();

        assert!(err.is_already_archived());
        assert!(err.to_string().ends_with(&format!("{}.zst", WAL)));
        assert!(!store.exists(&format!("{}.zst.sealed", WAL)).unwrap());
    }

    #[test]
    fn test_batch_stops_at_first_failure() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("wal"));
        let good = write_wal(&dir, "000000010000000000000001", 1000);
        let bad = write_wal(&dir, "000000010000000000000002", 10);
        let later = write_wal(&dir, "000000010000000000000003", 1000);
        let pipeline = ArchivePipeline::new(&store, limits(), compress_only);

        let report = pipeline.archive_all(
            &[good.clone(), bad.clone(), later.clone()],
            BatchMode::StopOnError,
        );

        assert_eq!(report.archived(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.skipped, vec![later]);
        assert!(!report.is_success());
        assert_eq!(report.first_error().unwrap().0, bad.as_path());
    }

    #[test]
    fn test_batch_keep_going_attempts_everything() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("wal"));
        let paths = vec![
            write_wal(&dir, "000000010000000000000001", 1000),
            write_wal(&dir, "000000010000000000000002", 10),
            write_wal(&dir, "000000010000000000000003", 1000),
        ];
        let pipeline = ArchivePipeline::new(&store, limits(), compress_only);

        let report = pipeline.archive_all(&paths, BatchMode::KeepGoing);

        assert_eq!(report.archived(), 2);
        assert_eq!(report.failed(), 1);
        assert!(report.skipped.is_empty());
        assert_eq!(store.list().unwrap().len(), 2);
    }
}
