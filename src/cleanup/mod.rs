//! Retention-driven cleanup of backups and WAL segments
//!
//! One run walks the phases
//! `Classify → Confirm → DeleteBackups → RecomputeHorizon → DeleteWal → Done`.
//! Nothing is deleted before confirmation. Once deletion starts, individual
//! failures are collected and reported instead of aborting the run; nothing
//! is rolled back.
//!
//! WAL deletion is conservative: without a remaining backup whose start WAL
//! can be resolved, no segment is touched.

use std::fmt;
use std::io::{self, BufRead, Write};

use tracing::{debug, error, info, warn};

use crate::backup::{classify, BackupCatalog, RetentionDecision};
use crate::error::KeeperResult;
use crate::sink::ArchiveStore;
use crate::wal::{WalArchive, WalName};

/// Phase of a cleanup run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupPhase {
    Classify,
    Confirm,
    DeleteBackups,
    RecomputeHorizon,
    DeleteWal,
    Done,
}

impl fmt::Display for CleanupPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Classify => "classify",
            Self::Confirm => "confirm",
            Self::DeleteBackups => "delete-backups",
            Self::RecomputeHorizon => "recompute-horizon",
            Self::DeleteWal => "delete-wal",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Asks the operator whether to go ahead with deletion
pub trait Confirmer {
    fn confirm(&mut self, decision: &RetentionDecision) -> KeeperResult<bool>;
}

/// Prompt on a writer, answer on a reader; only the literal `yes` confirms
pub struct PromptConfirmer<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> PromptConfirmer<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl PromptConfirmer<io::StdinLock<'static>, io::Stderr> {
    /// Prompt on stderr, read the answer from stdin
    pub fn stdin() -> Self {
        Self::new(io::stdin().lock(), io::stderr())
    }
}

impl<R: BufRead, W: Write> Confirmer for PromptConfirmer<R, W> {
    fn confirm(&mut self, decision: &RetentionDecision) -> KeeperResult<bool> {
        writeln!(self.output, "The following backups will be DELETED: {}", decision.discard)?;
        write!(
            self.output,
            "If you want to continue please type \"yes\" (Ctrl-C to end): "
        )?;
        self.output.flush()?;

        let mut answer = String::new();
        self.input.read_line(&mut answer)?;
        Ok(answer.trim() == "yes")
    }
}

/// Parameters of one cleanup run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupOptions {
    /// Number of sane backups to keep, must be > 0
    pub retain: usize,
    /// Skip the confirmation prompt
    pub force: bool,
}

/// Why a run stopped before deleting anything
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The discard set was empty
    NothingToDelete,
    /// The operator did not answer `yes`
    Declined,
}

/// What a completed run did
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub kept_backups: Vec<String>,
    pub removed_backups: Vec<String>,
    pub backup_failures: Vec<(String, String)>,
    /// Oldest WAL segment still needed
    pub horizon: Option<WalName>,
    /// Set when WAL deletion was skipped
    pub wal_skipped: Option<String>,
    pub removed_wal: Vec<String>,
    pub wal_failures: Vec<(String, String)>,
    /// Sane backups fewer than requested
    pub shortfall: usize,
}

impl CleanupReport {
    pub fn has_failures(&self) -> bool {
        !self.backup_failures.is_empty() || !self.wal_failures.is_empty()
    }
}

/// How a run ended
#[derive(Debug)]
pub enum CleanupOutcome {
    Done(CleanupReport),
    Aborted {
        reason: AbortReason,
        decision: RetentionDecision,
    },
}

/// Drives a cleanup run against a backup catalog and the WAL archive
pub struct CleanupEngine<'a> {
    catalog: &'a dyn BackupCatalog,
    wal: WalArchive<'a>,
}

impl<'a> CleanupEngine<'a> {
    pub fn new(catalog: &'a dyn BackupCatalog, wal_store: &'a dyn ArchiveStore) -> Self {
        Self {
            catalog,
            wal: WalArchive::new(wal_store),
        }
    }

    pub fn run(
        &self,
        options: CleanupOptions,
        confirmer: &mut dyn Confirmer,
    ) -> KeeperResult<CleanupOutcome> {
        enter(CleanupPhase::Classify);
        let backups = self.catalog.list()?;
        let decision = classify(&backups, options.retain)?;

        if decision.keep.is_empty() {
            info!("No backups will be left!");
        } else {
            info!(backups = %decision.keep, "Keep the following backups");
        }
        if decision.discard.is_empty() {
            info!("No backups will be removed!");
            return Ok(CleanupOutcome::Aborted {
                reason: AbortReason::NothingToDelete,
                decision,
            });
        }
        info!(backups = %decision.discard, "DELETE the following backups");

        enter(CleanupPhase::Confirm);
        if !options.force && !confirmer.confirm(&decision)? {
            warn!("Deletion was not confirmed, ending now.");
            return Ok(CleanupOutcome::Aborted {
                reason: AbortReason::Declined,
                decision,
            });
        }

        let mut report = CleanupReport {
            kept_backups: decision.keep.names().iter().map(|n| n.to_string()).collect(),
            shortfall: decision.shortfall(),
            ..CleanupReport::default()
        };

        enter(CleanupPhase::DeleteBackups);
        for backup in decision.discard.iter() {
            match self.catalog.delete(backup) {
                Ok(()) => {
                    info!(backup = %backup.name, "removed backup");
                    report.removed_backups.push(backup.name.clone());
                }
                Err(e) => {
                    error!(backup = %backup.name, error = %e, "failed to remove backup");
                    report.backup_failures.push((backup.name.clone(), e.to_string()));
                }
            }
        }

        enter(CleanupPhase::RecomputeHorizon);
        match self.horizon() {
            Ok(horizon) => {
                info!(horizon = %horizon, "oldest needed WAL");
                enter(CleanupPhase::DeleteWal);
                let collection = self.wal.delete_older_than(&horizon)?;
                report.removed_wal = collection.removed;
                report.wal_failures = collection.failures;
                report.horizon = Some(horizon);
            }
            Err(reason) => {
                warn!(reason = %reason, "skipping WAL deletion");
                report.wal_skipped = Some(reason);
            }
        }

        enter(CleanupPhase::Done);
        info!(
            backups = report.removed_backups.len(),
            wal = report.removed_wal.len(),
            failures = report.backup_failures.len() + report.wal_failures.len(),
            "cleanup finished"
        );
        Ok(CleanupOutcome::Done(report))
    }

    /// Start WAL of the oldest remaining backup, or why there is none
    fn horizon(&self) -> Result<WalName, String> {
        let remaining = self
            .catalog
            .list()
            .map_err(|e| format!("cannot list backups: {}", e))?;
        info!(backups = %remaining, "Backups left");

        let oldest = remaining
            .oldest()
            .ok_or_else(|| "no backup is left".to_string())?;
        self.catalog
            .start_wal_location(oldest)
            .map_err(|e| format!("start WAL of {} is unknown: {}", oldest.name, e))
    }
}

fn enter(phase: CleanupPhase) {
    debug!(phase = %phase, "cleanup phase");
}
