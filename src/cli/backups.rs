//! Backup listing CLI command

use clap::Args;

use super::format_size;
use crate::backup::{BackupCatalog, StoreCatalog};
use crate::config::Settings;
use crate::error::KeeperResult;
use crate::sink::Stores;

/// Arguments of `walkeeper backups`
#[derive(Args, Debug)]
pub struct BackupsArgs {
    /// Show detailed information
    #[arg(short, long)]
    pub verbose: bool,
}

/// List the base backups in the backup store, oldest first
pub fn handle_backups_command(settings: &Settings, args: BackupsArgs) -> KeeperResult<()> {
    let stores = Stores::from_settings(settings)?;
    let catalog = StoreCatalog::new(stores.backups.as_ref(), settings.min_backup_size);
    let backups = catalog.list()?;

    if backups.is_empty() {
        println!("No backups found in {}", stores.backups.describe());
        return Ok(());
    }

    println!("Base Backups");
    println!("============");
    println!();

    for (i, backup) in backups.iter().enumerate() {
        let start_wal = backup
            .start_wal
            .as_ref()
            .map(|w| w.to_string())
            .unwrap_or_else(|| "-".to_string());
        let status = if backup.sane { "" } else { " [insane]" };

        if args.verbose {
            println!(
                "{}. {}{}\n   Created: {}\n   Size: {}\n   Start WAL: {}\n   Data: {}  Metadata: {}\n",
                i + 1,
                backup.name,
                status,
                backup.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
                format_size(backup.size),
                start_wal,
                if backup.has_data { "yes" } else { "no" },
                if backup.has_metadata { "yes" } else { "no" },
            );
        } else {
            println!(
                "  {}. {} ({}, start {}){}",
                i + 1,
                backup.name,
                format_size(backup.size),
                start_wal,
                status,
            );
        }
    }

    println!();
    println!(
        "Total: {} backup(s), {} sane",
        backups.len(),
        backups.sane().len()
    );
    Ok(())
}
