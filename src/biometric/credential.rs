//! Sealed master-password blobs and the stores that hold them.
//!
//! A `CachedCredential` keeps the password encrypted with AES-256-GCM
//! under a key derived (HKDF-SHA256) from a random sealing seed and the
//! platform's biometric enrollment token.  The SHA-256 digest of that token
//! is stored alongside, so a changed enrollment is detected before any
//! unsealing.
//!
//! The seed is never part of the blob.  It is handed back by `seal` and
//! belongs in a platform-protected store (the OS keyring), read only after
//! a successful biometric challenge.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;
use zeroize::Zeroizing;

use crate::crypto::{decrypt_with_aad, derive_credential_key, encrypt_with_aad};
use crate::errors::{LockboxError, Result};
use crate::serde_util::{base64_decode, base64_encode};
use crate::storage::file::write_atomic;

/// Current credential blob version.
pub const CREDENTIAL_VERSION: u8 = 1;

const SEED_LEN: usize = 32;
const CREDENTIAL_AAD: &[u8] = b"lockbox:cached-credential";

// ---------------------------------------------------------------------------
// CachedCredential
// ---------------------------------------------------------------------------

/// The persisted form of a biometric-gated password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CachedCredential {
    pub version: u8,
    /// Base64 SHA-256 of the enrollment token at save time.
    pub enrollment_digest: String,
    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub sealed: Vec<u8>,
}

/// Digest identifying an enrollment set; `None` hashes as empty.
pub fn enrollment_digest(token: Option<&[u8]>) -> String {
    BASE64.encode(Sha256::digest(token.unwrap_or_default()))
}

impl CachedCredential {
    /// Seal `password` for the given enrollment.
    ///
    /// Returns the credential and the fresh sealing seed, which must be
    /// stored apart from it.
    pub fn seal(password: &str, enrollment: Option<&[u8]>) -> Result<(Self, Zeroizing<Vec<u8>>)> {
        let mut seed = Zeroizing::new(vec![0u8; SEED_LEN]);
        rand::rng().fill_bytes(&mut seed);

        let key = derive_credential_key(&seed, enrollment.unwrap_or_default())?;
        let sealed = encrypt_with_aad(&key[..], password.as_bytes(), CREDENTIAL_AAD)?;

        let credential = Self {
            version: CREDENTIAL_VERSION,
            enrollment_digest: enrollment_digest(enrollment),
            sealed,
        };
        Ok((credential, seed))
    }

    /// Whether this credential was sealed for `enrollment`.
    pub fn matches_enrollment(&self, enrollment: Option<&[u8]>) -> bool {
        self.enrollment_digest == enrollment_digest(enrollment)
    }

    /// Recover the password with the sealing `seed`.  Any failure is
    /// `AuthFailure`.
    pub fn unseal(&self, seed: &[u8], enrollment: Option<&[u8]>) -> Result<Zeroizing<String>> {
        let key = derive_credential_key(seed, enrollment.unwrap_or_default())
            .map_err(|_| LockboxError::AuthFailure)?;
        let plain = decrypt_with_aad(&key[..], &self.sealed, CREDENTIAL_AAD)?;
        String::from_utf8(plain)
            .map(Zeroizing::new)
            .map_err(|e| {
                let _wipe = Zeroizing::new(e.into_bytes());
                LockboxError::AuthFailure
            })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| LockboxError::CredentialStore(format!("credential serialization: {e}")))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let cred: Self = serde_json::from_slice(bytes)
            .map_err(|e| LockboxError::CredentialStore(format!("malformed credential: {e}")))?;
        if cred.version != CREDENTIAL_VERSION {
            return Err(LockboxError::CredentialStore(format!(
                "unsupported credential version {}",
                cred.version
            )));
        }
        Ok(cred)
    }
}

// ---------------------------------------------------------------------------
// Stores
// ---------------------------------------------------------------------------

/// Platform-protected storage for one credential blob.
pub trait CredentialStore: Send + Sync {
    /// Save `blob`, replacing any previous one.
    fn store(&self, blob: &[u8]) -> Result<()>;

    /// The saved blob, `None` when nothing is saved.
    fn load(&self) -> Result<Option<Vec<u8>>>;

    /// Erase the blob.  Succeeds when nothing is saved.
    fn remove(&self) -> Result<()>;
}

/// Process-local credential store.
///
/// Not platform protected; for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    blob: Mutex<Option<Vec<u8>>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn store(&self, blob: &[u8]) -> Result<()> {
        *self.blob.lock().unwrap_or_else(|p| p.into_inner()) = Some(blob.to_vec());
        Ok(())
    }

    fn load(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.blob.lock().unwrap_or_else(|p| p.into_inner()).clone())
    }

    fn remove(&self) -> Result<()> {
        self.blob.lock().unwrap_or_else(|p| p.into_inner()).take();
        Ok(())
    }
}

/// Blob kept in an owner-only file.
///
/// File permissions are the only protection, so this store suits the
/// sealed credential but not its sealing seed.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn store(&self, blob: &[u8]) -> Result<()> {
        write_atomic(&self.path, blob).map_err(|e| {
            LockboxError::CredentialStore(format!("failed to write {}: {e}", self.path.display()))
        })?;
        debug!(path = %self.path.display(), "credential saved");
        Ok(())
    }

    fn load(&self) -> Result<Option<Vec<u8>>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LockboxError::CredentialStore(format!(
                "failed to read {}: {e}",
                self.path.display()
            ))),
        }
    }

    fn remove(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LockboxError::CredentialStore(format!(
                "failed to remove {}: {e}",
                self.path.display()
            ))),
        }
    }
}
