//! In-process encryption for walkeeper
//!
//! An Argon2id-derived key seals the compressed WAL stream in AES-256-GCM
//! frames. The gpg stage lives in `stage::command`.

pub mod key;
pub mod stream;

pub use key::{ArchiveKey, KeyParams};
pub use stream::{open, seal};
