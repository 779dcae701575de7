//! Configuration CLI commands

use std::path::Path;

use clap::Subcommand;

use crate::config::{ArchiveTarget, Settings};
use crate::error::KeeperResult;

/// Configuration commands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the resolved settings
    Show,

    /// Write the resolved settings to the config file
    Init {
        /// Overwrite an existing config file
        #[arg(short, long)]
        force: bool,
    },
}

/// Handle configuration commands
pub fn handle_config_command(
    settings_path: &Path,
    settings: &Settings,
    cmd: ConfigCommands,
) -> KeeperResult<()> {
    match cmd {
        ConfigCommands::Show => show_config(settings_path, settings),
        ConfigCommands::Init { force } => {
            if settings_path.exists() && !force {
                println!("Config file already exists: {}", settings_path.display());
                println!("Run again with --force to overwrite it.");
                return Ok(());
            }
            settings.save_to(settings_path)?;
            println!("Wrote {}", settings_path.display());

            if settings.archive_to == ArchiveTarget::File {
                let layout = settings.layout();
                layout.ensure_directories()?;
                println!("Archive directory: {}", layout.root().display());
            }
            Ok(())
        }
    }
}

fn show_config(settings_path: &Path, settings: &Settings) -> KeeperResult<()> {
    println!("walkeeper Configuration");
    println!("=======================");
    println!("Config file: {}", settings_path.display());
    println!();

    match settings.archive_to {
        ArchiveTarget::File => {
            let layout = settings.layout();
            println!("Archive target: file");
            println!("  WAL directory:    {}", layout.wal_dir().display());
            println!("  Backup directory: {}", layout.backup_dir().display());
        }
        ArchiveTarget::S3 => {
            println!("Archive target: s3");
            println!("  WAL bucket:    {}", settings.s3_bucket_wal);
            println!("  Backup bucket: {}", settings.s3_bucket_backup);
            println!("  Location:      {}", settings.s3_location);
            if let Some(ref endpoint) = settings.s3_endpoint {
                println!("  Endpoint:      {}", endpoint);
            }
        }
    }
    println!();

    println!("Settings:");
    println!("{}", serde_json::to_string_pretty(&redacted(settings))?);
    Ok(())
}

/// Copy of `settings` safe to print
fn redacted(settings: &Settings) -> Settings {
    let mut shown = settings.clone();
    if shown.s3_secret_key.is_some() {
        shown.s3_secret_key = Some("********".to_string());
    }
    shown
}
