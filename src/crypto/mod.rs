//! Cryptographic primitives for Lockbox.
//!
//! This module provides:
//! - AES-256-GCM encryption and decryption (`encryption`)
//! - Argon2id password-based key derivation (`kdf`)
//! - The zeroizing `MasterKey` and HKDF sub-keys (`keys`)

pub mod encryption;
pub mod kdf;
pub mod keys;

// Re-export the most commonly used items so callers can write:
//   use crate::crypto::{encrypt, decrypt, derive_key, ...};
pub use encryption::{decrypt, decrypt_with_aad, encrypt, encrypt_with_aad};
pub use kdf::{derive_key, derive_key_blocking, KdfParams, Salt, SALT_LEN};
pub use keys::{derive_credential_key, MasterKey, KEY_LEN};
