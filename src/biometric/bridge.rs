//! Biometric unlock on top of a `Vault`.
//!
//! The bridge never touches vault key material.  It caches the master
//! password sealed in one `CredentialStore` and keeps the sealing seed in
//! a second, platform-protected one (the OS keyring).  The seed is read
//! only after a successful biometric challenge; the unsealed password is
//! then fed into `Vault::unlock`.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::credential::{CachedCredential, CredentialStore};
use super::BiometricProvider;
use crate::config::Settings;
use crate::errors::{LockboxError, Result};
use crate::vault::Vault;

pub struct BiometricBridge {
    provider: Arc<dyn BiometricProvider>,
    /// Holds the sealed credential.
    store: Arc<dyn CredentialStore>,
    /// Holds the sealing seed; released only after a passed challenge.
    key_store: Arc<dyn CredentialStore>,
    reason: String,
    timeout: Duration,
}

impl std::fmt::Debug for BiometricBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BiometricBridge")
            .field("capability", &self.provider.type_name())
            .field("reason", &self.reason)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl BiometricBridge {
    /// A bridge using the default prompt text and challenge timeout.
    pub fn new(
        provider: Arc<dyn BiometricProvider>,
        store: Arc<dyn CredentialStore>,
        key_store: Arc<dyn CredentialStore>,
    ) -> Self {
        Self::with_settings(provider, store, key_store, &Settings::default())
    }

    pub fn with_settings(
        provider: Arc<dyn BiometricProvider>,
        store: Arc<dyn CredentialStore>,
        key_store: Arc<dyn CredentialStore>,
        settings: &Settings,
    ) -> Self {
        Self {
            provider,
            store,
            key_store,
            reason: settings.biometric_reason.clone(),
            timeout: settings.biometric_timeout(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_available(&self) -> bool {
        self.provider.is_available()
    }

    pub fn capability_name(&self) -> String {
        self.provider.type_name()
    }

    /// Whether a credential is currently cached.
    pub fn has_credential(&self) -> Result<bool> {
        Ok(self.store.load()?.is_some())
    }

    /// Cache `password`, replacing any earlier credential.
    pub fn save(&self, password: &str) -> Result<()> {
        if !self.provider.is_available() {
            return Err(LockboxError::BiometricUnavailable(format!(
                "{} is not available",
                self.provider.type_name()
            )));
        }

        let enrollment = self.provider.enrollment_token();
        let (credential, seed) = CachedCredential::seal(password, enrollment.as_deref())?;
        self.key_store.store(&seed)?;
        self.store.store(&credential.to_bytes()?)?;

        info!(capability = %self.provider.type_name(), "biometric credential saved");
        Ok(())
    }

    /// Challenge the user and return the cached password on success.
    ///
    /// Nothing about the password is revealed on any failure path.  A
    /// credential whose enrollment no longer matches, or that fails to
    /// unseal, is revoked.
    pub async fn load(&self) -> Result<Zeroizing<String>> {
        // 1. Capability
        if !self.provider.is_available() {
            return Err(LockboxError::BiometricUnavailable(format!(
                "{} is not available",
                self.provider.type_name()
            )));
        }

        // 2. Cached credential
        let Some(blob) = self.store.load()? else {
            return Err(LockboxError::BiometricFailed(
                "no biometric credential saved".into(),
            ));
        };
        let credential = match CachedCredential::from_bytes(&blob) {
            Ok(credential) => credential,
            Err(e) => {
                warn!(error = %e, "cached credential unreadable, revoking");
                self.revoke()?;
                return Err(LockboxError::BiometricFailed(
                    "saved credential is unreadable".into(),
                ));
            }
        };

        // 3. Enrollment
        let enrollment = self.provider.enrollment_token();
        if !credential.matches_enrollment(enrollment.as_deref()) {
            warn!("biometric enrollment changed since save, revoking credential");
            self.revoke()?;
            return Err(LockboxError::BiometricFailed(
                "biometric enrollment changed".into(),
            ));
        }

        // 4. Challenge
        match tokio::time::timeout(self.timeout, self.provider.challenge(&self.reason)).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("biometric challenge rejected");
                return Err(LockboxError::BiometricFailed(
                    "challenge was not approved".into(),
                ));
            }
            Err(_) => {
                debug!(timeout = ?self.timeout, "biometric challenge timed out");
                return Err(LockboxError::BiometricFailed("challenge timed out".into()));
            }
        }

        // 5. Sealing seed
        let Some(seed) = self.key_store.load()?.map(Zeroizing::new) else {
            warn!("sealing key missing, revoking credential");
            self.revoke()?;
            return Err(LockboxError::BiometricFailed(
                "saved credential is incomplete".into(),
            ));
        };

        // 6. Unseal
        match credential.unseal(&seed, enrollment.as_deref()) {
            Ok(password) => Ok(password),
            Err(_) => {
                warn!("cached credential failed to unseal, revoking");
                self.revoke()?;
                Err(LockboxError::BiometricFailed(
                    "saved credential is damaged".into(),
                ))
            }
        }
    }

    /// Erase the cached credential and its sealing seed.  Idempotent.
    pub fn remove(&self) -> Result<()> {
        self.revoke()?;
        debug!("biometric credential removed");
        Ok(())
    }

    fn revoke(&self) -> Result<()> {
        self.store.remove()?;
        self.key_store.remove()
    }

    /// Turn on biometric unlock after checking `password` against `vault`.
    pub async fn enable(&self, vault: &Vault, password: &str) -> Result<()> {
        if !self.provider.is_available() {
            return Err(LockboxError::BiometricUnavailable(format!(
                "{} is not available",
                self.provider.type_name()
            )));
        }
        if !vault.verify_password(password).await? {
            return Err(LockboxError::InvalidPassword);
        }
        self.save(password)
    }

    pub fn disable(&self) -> Result<()> {
        self.remove()
    }

    /// `load` then `vault.unlock`.  A failed `load` never reaches the vault.
    pub async fn unlock_vault(&self, vault: &Vault) -> Result<()> {
        let password = self.load().await?;
        vault.unlock(&password).await
    }
}
