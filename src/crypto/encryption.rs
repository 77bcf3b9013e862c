//! AES-256-GCM authenticated encryption.
//!
//! Each call to `encrypt` draws a fresh random 12-byte nonce and
//! prepends it to the ciphertext, so the caller only stores one blob.
//! With random 96-bit nonces a single key stays well inside the safe
//! message budget for a personal vault.
//!
//! Layout of the returned byte buffer:
//!   [ 12-byte nonce | ciphertext | 16-byte auth tag ]
//!
//! `decrypt` fails closed: a short blob, a wrong key, a flipped bit or
//! mismatched associated data all collapse into one `AuthFailure` and no
//! plaintext is released.

use aes_gcm::aead::{Aead, KeyInit, OsRng, Payload};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};

use crate::errors::{LockboxError, Result};

/// Size of the AES-256-GCM nonce in bytes.
pub const NONCE_LEN: usize = 12;

/// Size of the GCM authentication tag in bytes.
pub const TAG_LEN: usize = 16;

/// Encrypt `plaintext` with a 32-byte `key`.
///
/// Returns the nonce prepended to the ciphertext (nonce || ciphertext || tag).
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    encrypt_with_aad(key, plaintext, &[])
}

/// Decrypt a blob produced by `encrypt`.
pub fn decrypt(key: &[u8], blob: &[u8]) -> Result<Vec<u8>> {
    decrypt_with_aad(key, blob, &[])
}

/// Encrypt `plaintext` and bind it to `aad`.
///
/// The associated data is authenticated but not stored; the same bytes
/// must be supplied again to `decrypt_with_aad`.
pub fn encrypt_with_aad(key: &[u8], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| LockboxError::EncryptionFailed(format!("invalid key length: {e}")))?;

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| LockboxError::EncryptionFailed(format!("encryption error: {e}")))?;

    let mut output = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    output.extend_from_slice(&nonce);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

/// Decrypt a blob produced by `encrypt_with_aad` with the same `aad`.
pub fn decrypt_with_aad(key: &[u8], blob: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    // Anything shorter than nonce + tag cannot be a valid blob.
    if blob.len() < NONCE_LEN + TAG_LEN {
        return Err(LockboxError::AuthFailure);
    }

    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
    let nonce = Nonce::from_slice(nonce_bytes);

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| LockboxError::AuthFailure)?;

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| LockboxError::AuthFailure)
}
