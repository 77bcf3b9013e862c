//! Password-based key derivation using Argon2id.
//!
//! Argon2id is a memory-hard KDF that protects against brute-force and
//! GPU-based attacks.  The cost is tunable through `KdfParams` (loaded from
//! `lockbox.toml` or sensible defaults) and the params chosen at vault
//! creation are stored in the vault header.

use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use super::keys::{MasterKey, KEY_LEN};
use crate::errors::{LockboxError, Result};

/// Length of the salt in bytes (256 bits).
pub const SALT_LEN: usize = 32;

/// Minimum safe memory cost in KiB (8 MB).
const MIN_MEMORY_KIB: u32 = 8_192;

/// Configurable Argon2id parameters.
///
/// These map 1:1 to the fields in `Settings` and are persisted in the
/// vault header so unlocking always reuses the creation-time cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB (default: 65 536 = 64 MB).
    pub memory_kib: u32,
    /// Number of iterations (default: 3).
    pub iterations: u32,
    /// Parallelism lanes (default: 4).
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 65_536,
            iterations: 3,
            parallelism: 4,
        }
    }
}

impl KdfParams {
    /// Reject parameters below the enforced minimums.
    pub fn validate(&self) -> Result<()> {
        if self.memory_kib < MIN_MEMORY_KIB {
            return Err(LockboxError::KeyDerivationFailed(format!(
                "Argon2 memory_kib must be at least {MIN_MEMORY_KIB} (got {})",
                self.memory_kib
            )));
        }
        if self.iterations < 1 {
            return Err(LockboxError::KeyDerivationFailed(
                "Argon2 iterations must be at least 1".into(),
            ));
        }
        if self.parallelism < 1 {
            return Err(LockboxError::KeyDerivationFailed(
                "Argon2 parallelism must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// A per-vault random salt of exactly `SALT_LEN` bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct Salt([u8; SALT_LEN]);

impl Salt {
    /// Generate a cryptographically random salt.
    pub fn generate() -> Self {
        let mut salt = [0u8; SALT_LEN];
        rand::rng().fill_bytes(&mut salt);
        Self(salt)
    }

    /// Wrap raw bytes, rejecting anything that is not `SALT_LEN` long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; SALT_LEN] = bytes.try_into().map_err(|_| {
            LockboxError::Validation(format!(
                "salt must be exactly {SALT_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; SALT_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for Salt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Salt(..)")
    }
}

/// Derive the 32-byte master key from a password and salt using Argon2id.
///
/// The same password + salt + params always produce the same key.
pub fn derive_key(password: &[u8], salt: &Salt, params: &KdfParams) -> Result<MasterKey> {
    params.validate()?;

    let argon2_params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(KEY_LEN),
    )
    .map_err(|e| LockboxError::KeyDerivationFailed(format!("invalid Argon2 params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key = [0u8; KEY_LEN];
    let hashed = argon2.hash_password_into(password, salt.as_bytes(), &mut key);
    let master = MasterKey::new(key);
    key.zeroize();

    hashed.map_err(|e| LockboxError::KeyDerivationFailed(format!("Argon2id hashing failed: {e}")))?;
    Ok(master)
}

/// Run `derive_key` on the blocking thread pool.
///
/// Argon2 is deliberately slow; keeping it off the async workers lets
/// timers and other tasks make progress while a vault unlocks.
pub async fn derive_key_blocking(
    password: zeroize::Zeroizing<Vec<u8>>,
    salt: Salt,
    params: KdfParams,
) -> Result<MasterKey> {
    tokio::task::spawn_blocking(move || derive_key(&password, &salt, &params))
        .await
        .map_err(|e| LockboxError::KeyDerivationFailed(format!("derivation task failed: {e}")))?
}
