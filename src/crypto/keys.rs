//! Key material held in memory and HKDF sub-key derivation.
//!
//! The master key only ever lives in a `MasterKey`, which zeroes its bytes
//! on drop.  HKDF-SHA256 (RFC 5869) derives the sealing key that protects a
//! cached biometric credential, bound to the platform's enrollment state.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, Zeroizing};

use crate::errors::{LockboxError, Result};

/// Length of symmetric keys (256 bits).
pub const KEY_LEN: usize = 32;

/// A wrapper around a 32-byte key that automatically zeroes its memory
/// when dropped.
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct MasterKey {
    bytes: [u8; KEY_LEN],
}

impl MasterKey {
    /// Create a new `MasterKey` from raw bytes.
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// Access the raw key bytes (e.g. to pass to the cipher).
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derive the key that seals a cached credential.
///
/// `seed` is random per credential; `enrollment` is the platform's opaque
/// identifier of the enrolled biometric set (empty when it has none), so
/// a changed enrollment yields a different key.
pub fn derive_credential_key(seed: &[u8], enrollment: &[u8]) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let mut info = Vec::with_capacity(20 + enrollment.len());
    info.extend_from_slice(b"lockbox-credential:");
    info.extend_from_slice(enrollment);
    hkdf_derive(seed, &info)
}

/// Internal helper: run HKDF-SHA256 expand with the given `info`.
fn hkdf_derive(ikm: &[u8], info: &[u8]) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let hk = Hkdf::<Sha256>::new(None, ikm);

    let mut okm = Zeroizing::new([0u8; KEY_LEN]);
    hk.expand(info, &mut okm[..])
        .map_err(|e| LockboxError::KeyDerivationFailed(format!("HKDF expand failed: {e}")))?;

    Ok(okm)
}
