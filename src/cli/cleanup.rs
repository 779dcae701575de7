//! Cleanup CLI command
//!
//! Removes base backups beyond the retention count, then the WAL they were
//! the last to need.

use std::process::ExitCode;

use clap::Args;

use crate::backup::StoreCatalog;
use crate::cleanup::{
    AbortReason, CleanupEngine, CleanupOptions, CleanupOutcome, CleanupReport, PromptConfirmer,
};
use crate::config::Settings;
use crate::error::KeeperResult;
use crate::sink::Stores;

/// Arguments of `walkeeper cleanup`
#[derive(Args, Debug)]
pub struct CleanupArgs {
    /// Number of sane base backups to keep
    #[arg(long, value_name = "N")]
    pub retain: usize,

    /// Delete without asking for confirmation
    #[arg(long)]
    pub force_delete: bool,
}

/// Run one cleanup; a declined confirmation exits with 1
pub fn handle_cleanup_command(settings: &Settings, args: CleanupArgs) -> KeeperResult<ExitCode> {
    let stores = Stores::from_settings(settings)?;
    let catalog = StoreCatalog::new(stores.backups.as_ref(), settings.min_backup_size);
    let engine = CleanupEngine::new(&catalog, stores.wal.as_ref());

    let options = CleanupOptions {
        retain: args.retain,
        force: args.force_delete,
    };
    let mut confirmer = PromptConfirmer::stdin();

    match engine.run(options, &mut confirmer)? {
        CleanupOutcome::Aborted {
            reason: AbortReason::NothingToDelete,
            decision,
        } => {
            println!("Keep the following backups: {}", decision.keep);
            println!("No backups will be removed!");
            Ok(ExitCode::SUCCESS)
        }
        CleanupOutcome::Aborted {
            reason: AbortReason::Declined,
            ..
        } => {
            println!("Deletion was not confirmed, ending now.");
            Ok(ExitCode::from(1))
        }
        CleanupOutcome::Done(report) => {
            print_report(&report);
            if report.has_failures() {
                Ok(ExitCode::FAILURE)
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
    }
}

fn print_report(report: &CleanupReport) {
    println!("Cleanup Summary");
    println!("===============");
    println!("Kept backups:    {}", report.kept_backups.join(", "));
    println!("Removed backups: {}", report.removed_backups.len());
    for name in &report.removed_backups {
        println!("  - {}", name);
    }
    if report.shortfall > 0 {
        println!(
            "Not enough backups for retention policy! ({} sane backup(s) short)",
            report.shortfall
        );
    }

    match (&report.horizon, &report.wal_skipped) {
        (Some(horizon), _) => {
            println!("Oldest needed WAL: {}", horizon);
            println!("Removed WAL files: {}", report.removed_wal.len());
        }
        (None, Some(reason)) => println!("WAL files kept: {}", reason),
        (None, None) => {}
    }

    let failures = report.backup_failures.iter().chain(&report.wal_failures);
    for (name, error) in failures {
        println!("Failed to remove {}: {}", name, error);
    }
}
