use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use walkeeper::cli::{
    handle_archive_command, handle_backups_command, handle_cleanup_command,
    handle_config_command, handle_encryption_command, ArchiveArgs, BackupsArgs, CleanupArgs,
    ConfigCommands, EncryptionCommands,
};
use walkeeper::config::{ArchiveTarget, KeeperPaths, Settings};

#[derive(Parser)]
#[command(
    name = "walkeeper",
    version,
    about = "WAL archiving and retention for PostgreSQL",
    long_about = "walkeeper archives completed WAL segments (compressed, optionally \
                  encrypted) to a local directory or an S3-compatible bucket, and \
                  removes base backups and WAL beyond a retention count."
)]
struct Cli {
    /// Config file (default: config.json in the walkeeper config directory)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the archive destination
    #[arg(long, global = true, value_enum)]
    archive_to: Option<ArchiveTarget>,

    /// Override the root of the file-mode archive
    #[arg(long, global = true, value_name = "DIR")]
    archivedir: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Archive WAL files (use as archive_command = 'walkeeper archive %p')
    Archive(ArchiveArgs),

    /// Remove base backups and WAL beyond the retention count
    Cleanup(CleanupArgs),

    /// List base backups
    Backups(BackupsArgs),

    /// Configuration commands
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Builtin encryption commands
    #[command(subcommand, alias = "encrypt")]
    Encryption(EncryptionCommands),
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let settings_path = match cli.config {
        Some(path) => path,
        None => KeeperPaths::new()?.settings_file(),
    };
    let mut settings = Settings::load_from(&settings_path)
        .with_context(|| format!("Failed to load {}", settings_path.display()))?;

    if let Some(target) = cli.archive_to {
        settings.archive_to = target;
    }
    if let Some(dir) = cli.archivedir {
        settings.archivedir = dir;
    }
    settings.validate()?;

    let code = match cli.command {
        Commands::Archive(args) => handle_archive_command(&settings, args)?,
        Commands::Cleanup(args) => handle_cleanup_command(&settings, args)?,
        Commands::Backups(args) => {
            handle_backups_command(&settings, args)?;
            ExitCode::SUCCESS
        }
        Commands::Config(cmd) => {
            handle_config_command(&settings_path, &settings, cmd)?;
            ExitCode::SUCCESS
        }
        Commands::Encryption(cmd) => {
            handle_encryption_command(&settings_path, &mut settings, cmd)?;
            ExitCode::SUCCESS
        }
    };

    Ok(code)
}

/// Log to stderr; RUST_LOG wins over the command-line verbosity
fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
