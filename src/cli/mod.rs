//! CLI command handlers
//!
//! This module contains the implementation of CLI commands,
//! bridging the clap argument parsing with the archive and cleanup engines.

pub mod archive;
pub mod backups;
pub mod cleanup;
pub mod config;
pub mod encryption;

pub use archive::{handle_archive_command, ArchiveArgs};
pub use backups::{handle_backups_command, BackupsArgs};
pub use cleanup::{handle_cleanup_command, CleanupArgs};
pub use config::{handle_config_command, ConfigCommands};
pub use encryption::{archive_key, handle_encryption_command, EncryptionCommands};

/// Format a byte count in human-readable form
pub(crate) fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
