//! Archive CLI command
//!
//! Entry point for the database's `archive_command`, e.g.
//! `archive_command = 'walkeeper archive %p'`.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;
use tracing::{error, warn};

use super::encryption::archive_key;
use super::format_size;
use crate::archive::{ArchivePipeline, ArchiveWarning, BatchMode};
use crate::config::Settings;
use crate::error::KeeperResult;
use crate::sink::Stores;

/// Arguments of `walkeeper archive`
#[derive(Args, Debug)]
pub struct ArchiveArgs {
    /// WAL files to archive
    #[arg(value_name = "WAL_FILE", required = true)]
    pub files: Vec<PathBuf>,

    /// Keep archiving after a file fails
    #[arg(long)]
    pub keep_going: bool,

    /// Passphrase for builtin encryption
    #[arg(long, env = "WALKEEPER_PASSPHRASE", hide_env_values = true)]
    pub passphrase: Option<String>,
}

/// Archive every file in `args`, reporting failure through the exit code
pub fn handle_archive_command(settings: &Settings, args: ArchiveArgs) -> KeeperResult<ExitCode> {
    let stores = Stores::from_settings(settings)?;
    let key = archive_key(settings, args.passphrase.as_deref())?;
    let pipeline = ArchivePipeline::from_settings(stores.wal.as_ref(), settings, key);

    let mode = if args.keep_going {
        BatchMode::KeepGoing
    } else {
        BatchMode::StopOnError
    };
    let report = pipeline.archive_all(&args.files, mode);

    for (path, outcome) in &report.outcomes {
        match outcome {
            Ok(receipt) => {
                println!(
                    "{} -> {} ({} -> {})",
                    receipt.wal_name,
                    receipt.object_name,
                    format_size(receipt.bytes_in),
                    format_size(receipt.bytes_written),
                );
                for warning in &receipt.warnings {
                    match warning {
                        ArchiveWarning::TrailingDataDiscarded { bytes } => {
                            println!("  warning: {} trailing bytes discarded", bytes);
                        }
                    }
                }
            }
            Err(e) => {
                error!(file = %path.display(), error = %e, "archive failed");
                eprintln!("Failed to archive {}: {}", path.display(), e);
            }
        }
    }

    for path in &report.skipped {
        warn!(file = %path.display(), "not attempted after earlier failure");
    }

    if report.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!(
            "{} archived, {} failed, {} skipped",
            report.archived(),
            report.failed(),
            report.skipped.len()
        );
        Ok(ExitCode::FAILURE)
    }
}
