//! Archive key: Argon2id over the operator's passphrase
//!
//! The settings carry only the derivation parameters and a verification
//! token (a tiny sealed stream). The passphrase itself is never stored.

use std::fmt;

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::OsRng;
use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::stream::{open, seal};
use crate::error::{KeeperError, KeeperResult};

const SALT_LEN: usize = 16;
const KEY_LEN: usize = 32;

/// Plaintext of the verification token
const TOKEN_MARKER: &[u8] = b"walkeeper archive key";

/// Argon2id parameters stored in the settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyParams {
    /// Random salt, base64
    pub salt: String,
    /// Memory cost in KiB
    #[serde(default = "default_memory_kib")]
    pub memory_kib: u32,
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    #[serde(default = "default_lanes")]
    pub lanes: u32,
}

fn default_memory_kib() -> u32 {
    64 * 1024
}

fn default_iterations() -> u32 {
    3
}

fn default_lanes() -> u32 {
    4
}

impl KeyParams {
    /// Default costs with a fresh random salt
    pub fn generate() -> Self {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        Self {
            salt: STANDARD.encode(salt),
            memory_kib: default_memory_kib(),
            iterations: default_iterations(),
            lanes: default_lanes(),
        }
    }

    /// Cheap parameters for tests
    #[cfg(test)]
    pub(crate) fn fast() -> Self {
        Self {
            memory_kib: 256,
            iterations: 1,
            lanes: 1,
            ..Self::generate()
        }
    }
}

/// AES-256 key for the sealing stage, wiped on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ArchiveKey([u8; KEY_LEN]);

impl ArchiveKey {
    /// Derive the key for `passphrase` under `params`
    pub fn derive(passphrase: &str, params: &KeyParams) -> KeeperResult<Self> {
        let salt = STANDARD
            .decode(&params.salt)
            .map_err(|e| KeeperError::Encryption(format!("Invalid salt: {}", e)))?;
        let argon_params = Params::new(params.memory_kib, params.iterations, params.lanes, Some(KEY_LEN))
            .map_err(|e| KeeperError::Encryption(format!("Invalid Argon2 parameters: {}", e)))?;

        let mut key = [0u8; KEY_LEN];
        Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params)
            .hash_password_into(passphrase.as_bytes(), &salt, &mut key)
            .map_err(|e| KeeperError::Encryption(format!("Key derivation failed: {}", e)))?;

        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Token proving a later passphrase derives this same key
    pub fn verification_token(&self) -> KeeperResult<String> {
        let mut sealed = Vec::new();
        seal(&mut &TOKEN_MARKER[..], &mut sealed, self)?;
        Ok(STANDARD.encode(sealed))
    }

    /// Check this key against a token from [`ArchiveKey::verification_token`]
    pub fn verify(&self, token: &str) -> KeeperResult<()> {
        let sealed = STANDARD
            .decode(token)
            .map_err(|e| KeeperError::Encryption(format!("Invalid verification token: {}", e)))?;

        let mut marker = Vec::new();
        match open(&mut sealed.as_slice(), &mut marker, self) {
            Ok(_) if marker == TOKEN_MARKER => Ok(()),
            _ => Err(KeeperError::Encryption("Incorrect passphrase".to_string())),
        }
    }
}

impl fmt::Debug for ArchiveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ArchiveKey([REDACTED])")
    }
}
