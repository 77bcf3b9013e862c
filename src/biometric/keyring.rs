//! OS keyring credential store.
//!
//! Keeps the sealed credential in the operating system's secure store:
//! - macOS: Keychain
//! - Windows: Credential Manager
//! - Linux: Secret Service (GNOME Keyring / KDE Wallet)
//!
//! Keyring APIs store strings, so the blob is base64-encoded.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use keyring::Entry;

use super::credential::CredentialStore;
use crate::errors::{LockboxError, Result};

/// Service name used in the OS keyring.
const SERVICE_NAME: &str = "lockbox";

/// A `CredentialStore` backed by one keyring entry.
#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    account: String,
}

impl KeyringCredentialStore {
    /// Use the entry for `vault_id` (e.g. the canonical vault path).
    pub fn new(vault_id: &str) -> Self {
        Self {
            account: format!("vault:{vault_id}"),
        }
    }

    /// The entry holding the sealing seed of `vault_id`'s cached credential.
    pub fn sealing_key(vault_id: &str) -> Self {
        Self {
            account: format!("vault:{vault_id}:sealing-key"),
        }
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(SERVICE_NAME, &self.account).map_err(|e| {
            LockboxError::CredentialStore(format!("failed to create keyring entry: {e}"))
        })
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn store(&self, blob: &[u8]) -> Result<()> {
        self.entry()?
            .set_password(&BASE64.encode(blob))
            .map_err(|e| {
                LockboxError::CredentialStore(format!("failed to store credential in keyring: {e}"))
            })
    }

    /// Returns `None` if nothing is stored (rather than an error).
    fn load(&self) -> Result<Option<Vec<u8>>> {
        match self.entry()?.get_password() {
            Ok(encoded) => BASE64.decode(encoded).map(Some).map_err(|e| {
                LockboxError::CredentialStore(format!("keyring entry is not base64: {e}"))
            }),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(LockboxError::CredentialStore(format!(
                "failed to read from keyring: {e}"
            ))),
        }
    }

    fn remove(&self) -> Result<()> {
        match self.entry()?.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()), // Already gone, that's fine.
            Err(e) => Err(LockboxError::CredentialStore(format!(
                "failed to delete from keyring: {e}"
            ))),
        }
    }
}
