//! Encryption CLI commands
//!
//! Sets up and inspects the builtin (in-process) encryption stage. The gpg
//! stage needs no setup here beyond `encrypt` and `recipient` in the config.

use std::path::Path;

use clap::Subcommand;

use crate::config::settings::{EncryptionMethod, Settings};
use crate::crypto::{ArchiveKey, KeyParams};
use crate::error::{KeeperError, KeeperResult};

/// Encryption management commands
#[derive(Subcommand, Debug)]
pub enum EncryptionCommands {
    /// Switch archiving to builtin encryption with a new passphrase
    Enable,

    /// Show encryption status
    Status,
}

/// Handle encryption commands
pub fn handle_encryption_command(
    settings_path: &Path,
    settings: &mut Settings,
    cmd: EncryptionCommands,
) -> KeeperResult<()> {
    match cmd {
        EncryptionCommands::Enable => enable_encryption(settings_path, settings),
        EncryptionCommands::Status => show_status(settings),
    }
}

fn enable_encryption(settings_path: &Path, settings: &mut Settings) -> KeeperResult<()> {
    if settings.encrypt
        && settings.encryption.method == EncryptionMethod::Builtin
        && settings.encryption.key_params.is_some()
    {
        println!("Builtin encryption is already enabled.");
        return Ok(());
    }

    println!("Enable Encryption");
    println!("=================");
    println!();
    println!("WAL files will be sealed with AES-256-GCM before they are stored.");
    println!("Archiving reads the passphrase from WALKEEPER_PASSPHRASE.");
    println!();
    println!("IMPORTANT: archived WAL cannot be restored without the passphrase!");
    println!();

    let passphrase = prompt_new_passphrase()?;
    let key_params = KeyParams::generate();

    println!("Deriving encryption key...");
    let key = ArchiveKey::derive(&passphrase, &key_params)?;

    settings.encrypt = true;
    settings.encryption.method = EncryptionMethod::Builtin;
    settings.encryption.verification = Some(key.verification_token()?);
    settings.encryption.key_params = Some(key_params);
    settings.save_to(settings_path)?;

    println!();
    println!("Encryption enabled. Settings saved to {}", settings_path.display());
    Ok(())
}

fn show_status(settings: &Settings) -> KeeperResult<()> {
    println!("Encryption Status");
    println!("=================");
    println!();

    if !settings.encrypt {
        println!("Status: DISABLED");
        println!();
        println!("WAL files are stored compressed only.");
        println!("Run 'walkeeper encryption enable' for builtin encryption,");
        println!("or set 'encrypt' and 'recipient' to use gpg.");
        return Ok(());
    }

    println!("Status: ENABLED");
    match settings.encryption.method {
        EncryptionMethod::Gpg => {
            println!("Method: gpg ({})", settings.encryption.gpg_command);
            println!(
                "Recipient: {}",
                settings.recipient.as_deref().unwrap_or("(not set)")
            );
        }
        EncryptionMethod::Builtin => {
            println!("Method: builtin (AES-256-GCM)");
            if let Some(ref params) = settings.encryption.key_params {
                println!();
                println!("Key Derivation Parameters:");
                println!("  Algorithm: Argon2id");
                println!("  Memory Cost: {} KiB", params.memory_kib);
                println!("  Iterations: {}", params.iterations);
                println!("  Lanes: {}", params.lanes);
            }
        }
    }

    Ok(())
}

/// Key for the builtin encryption stage, if `settings` calls for one
///
/// Returns `None` unless builtin encryption is enabled. The passphrase is
/// checked against the stored verification marker before any file is touched.
pub fn archive_key(settings: &Settings, passphrase: Option<&str>) -> KeeperResult<Option<ArchiveKey>> {
    if !settings.encrypt || settings.encryption.method != EncryptionMethod::Builtin {
        return Ok(None);
    }

    let key_params = settings.encryption.key_params.as_ref().ok_or_else(|| {
        KeeperError::Config("builtin encryption is not set up, run 'walkeeper encryption enable'".into())
    })?;
    let passphrase = passphrase.ok_or_else(|| {
        KeeperError::Encryption("WALKEEPER_PASSPHRASE is not set".to_string())
    })?;

    let key = ArchiveKey::derive(passphrase, key_params)?;
    if let Some(ref token) = settings.encryption.verification {
        key.verify(token)?;
    }

    Ok(Some(key))
}

/// Prompt for a new passphrase with confirmation
fn prompt_new_passphrase() -> KeeperResult<String> {
    loop {
        let pass1 = prompt_passphrase("Enter new passphrase: ")?;

        if pass1.len() < 8 {
            println!("Passphrase must be at least 8 characters. Please try again.");
            continue;
        }

        let pass2 = prompt_passphrase("Confirm passphrase: ")?;

        if pass1 != pass2 {
            println!("Passphrases do not match. Please try again.");
            continue;
        }

        return Ok(pass1);
    }
}

/// Prompt for a passphrase (hidden input)
fn prompt_passphrase(prompt: &str) -> KeeperResult<String> {
    rpassword::prompt_password(prompt)
        .map_err(|e| KeeperError::Encryption(format!("Failed to read passphrase: {}", e)))
}
