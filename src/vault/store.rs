//! The vault state machine and secret CRUD.
//!
//! `Vault` owns the lifecycle `NotInitialized -> Unlocked <-> Locked`, with
//! any storage fault moving it to the terminal `Error` state.  The master
//! key lives only inside the `Unlocked` slot and is zeroized when the slot
//! is replaced.
//!
//! Lifecycle operations (`initialize`, `unlock`, `lock`) take the write
//! half of the slot lock; CRUD takes the read half, so a lock can never
//! race a `get` into a freed key while CRUD calls still run side by side.

use std::sync::Arc;

use subtle::ConstantTimeEq;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::filter::ListFilter;
use super::record::{normalize_tags, SecretMetadata, SecretPath, SecretRecord, SetOptions};
use super::state::VaultState;
use crate::autolock::{self, AutoLockPolicy, LockCallback, LockTicket};
use crate::clock::{Clock, SystemClock};
use crate::config::Settings;
use crate::crypto::{decrypt_with_aad, derive_key_blocking, encrypt_with_aad, KdfParams, MasterKey, Salt};
use crate::errors::{LockboxError, Result};
use crate::storage::{VaultHeader, VaultStorage, HEADER_VERSION};

/// Known plaintext sealed at initialization and checked on unlock.
const SENTINEL: &[u8] = b"lockbox-verification-token";

/// Associated data binding the sentinel to its role.
const VERIFICATION_AAD: &[u8] = b"lockbox:verification";

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Collaborators injected into a `Vault`.
#[derive(Clone)]
pub struct VaultOptions {
    /// Argon2 cost used when a new vault is initialized.
    pub kdf: KdfParams,
    /// Stamps `created_at` / `updated_at`.
    pub clock: Arc<dyn Clock>,
    /// Started on unlock, stopped on lock.
    pub auto_lock: Option<AutoLockPolicy>,
}

impl Default for VaultOptions {
    fn default() -> Self {
        Self {
            kdf: KdfParams::default(),
            clock: Arc::new(SystemClock),
            auto_lock: None,
        }
    }
}

impl VaultOptions {
    /// KDF cost and auto-lock policy taken from `lockbox.toml` settings.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self {
            kdf: settings.kdf_params(),
            clock: Arc::new(SystemClock),
            auto_lock: Some(AutoLockPolicy::from_settings(settings)?),
        })
    }

    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_auto_lock(mut self, policy: AutoLockPolicy) -> Self {
        self.auto_lock = Some(policy);
        self
    }
}

// ---------------------------------------------------------------------------
// Vault
// ---------------------------------------------------------------------------

enum Slot {
    NotInitialized,
    Locked,
    Unlocked(MasterKey),
    Error(String),
}

impl Slot {
    fn state(&self) -> VaultState {
        match self {
            Self::NotInitialized => VaultState::NotInitialized,
            Self::Locked => VaultState::Locked,
            Self::Unlocked(_) => VaultState::Unlocked,
            Self::Error(msg) => VaultState::Error(msg.clone()),
        }
    }

    /// The key, or `VaultLocked` for every other state.
    fn key(&self) -> Result<&MasterKey> {
        match self {
            Self::Unlocked(key) => Ok(key),
            _ => Err(LockboxError::VaultLocked),
        }
    }
}

struct VaultInner {
    storage: Arc<dyn VaultStorage>,
    kdf: KdfParams,
    clock: Arc<dyn Clock>,
    auto_lock: Option<AutoLockPolicy>,
    slot: RwLock<Slot>,
    state_tx: watch::Sender<VaultState>,
}

impl Drop for VaultInner {
    fn drop(&mut self) {
        if let Some(policy) = &self.auto_lock {
            policy.stop();
        }
    }
}

/// A handle to one vault.  Clones share the same state and key.
#[derive(Clone)]
pub struct Vault {
    inner: Arc<VaultInner>,
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("state", &self.state())
            .field("master_key", &"[REDACTED]")
            .finish()
    }
}

/// Fold any storage-layer error into the fatal `Storage` variant.
fn storage_fault(e: LockboxError) -> LockboxError {
    match e {
        LockboxError::Storage(_) => e,
        other => LockboxError::Storage(other.to_string()),
    }
}

fn sentinel_matches(key: &MasterKey, verification: &[u8]) -> bool {
    match decrypt_with_aad(key.as_bytes(), verification, VERIFICATION_AAD) {
        Ok(plain) => {
            let plain = Zeroizing::new(plain);
            bool::from(plain.as_slice().ct_eq(SENTINEL))
        }
        Err(_) => false,
    }
}

impl Vault {
    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// Open a vault over `storage`, probing it for an existing header.
    ///
    /// A probe failure does not return an error; the vault starts in the
    /// `Error` state instead.
    pub fn open(storage: Arc<dyn VaultStorage>, options: VaultOptions) -> Self {
        let slot = match storage.load_header() {
            Ok(Some(_)) => Slot::Locked,
            Ok(None) => Slot::NotInitialized,
            Err(e) => {
                let msg = storage_fault(e).to_string();
                warn!(error = %msg, "vault storage probe failed");
                Slot::Error(msg)
            }
        };
        debug!(state = %slot.state(), "vault opened");

        let (state_tx, _) = watch::channel(slot.state());
        Self {
            inner: Arc::new(VaultInner {
                storage,
                kdf: options.kdf,
                clock: options.clock,
                auto_lock: options.auto_lock,
                slot: RwLock::new(slot),
                state_tx,
            }),
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Create a new vault protected by `password` and leave it unlocked.
    ///
    /// 1. Generate a random salt.
    /// 2. Derive the master key.
    /// 3. Seal the sentinel under it.
    /// 4. Persist salt, sentinel and KDF params in one atomic header write.
    pub async fn initialize(&self, password: &str) -> Result<()> {
        let mut slot = self.inner.slot.write().await;
        match &*slot {
            Slot::NotInitialized => {}
            Slot::Locked | Slot::Unlocked(_) => return Err(LockboxError::AlreadyInitialized),
            Slot::Error(msg) => return Err(LockboxError::Storage(msg.clone())),
        }
        if password.is_empty() {
            return Err(LockboxError::Validation(
                "master password must not be empty".into(),
            ));
        }

        // 1. Salt
        let salt = Salt::generate();

        // 2. Key
        let password = Zeroizing::new(password.as_bytes().to_vec());
        let key = derive_key_blocking(password, salt.clone(), self.inner.kdf).await?;

        // 3. Verification token
        let verification = encrypt_with_aad(key.as_bytes(), SENTINEL, VERIFICATION_AAD)?;

        // 4. Header
        let header = VaultHeader {
            version: HEADER_VERSION,
            salt: salt.as_bytes().to_vec(),
            verification,
            kdf: self.inner.kdf,
            created_at: self.inner.clock.now(),
        };
        match self.inner.storage.create_header(&header) {
            Ok(()) => {}
            Err(LockboxError::AlreadyInitialized) => {
                // Created behind our back since the probe.
                self.transition(&mut slot, Slot::Locked);
                return Err(LockboxError::AlreadyInitialized);
            }
            Err(e) => return Err(self.fail(&mut slot, e)),
        }

        self.transition(&mut slot, Slot::Unlocked(key));
        // Started under the write lock so a lock request from the previous
        // run cannot slip in between.
        self.start_auto_lock();
        drop(slot);
        info!("vault initialized");
        Ok(())
    }

    /// Unlock with `password`.
    ///
    /// A wrong password, a failed derivation and a sentinel mismatch are
    /// all reported as `InvalidPassword` and leave the state unchanged.
    pub async fn unlock(&self, password: &str) -> Result<()> {
        let mut slot = self.inner.slot.write().await;
        match &*slot {
            Slot::NotInitialized => return Err(LockboxError::NotInitialized),
            Slot::Error(msg) => return Err(LockboxError::Storage(msg.clone())),
            Slot::Locked | Slot::Unlocked(_) => {}
        }

        let header = match self.load_header() {
            Ok(header) => header,
            Err(e) => return Err(self.fail(&mut slot, e)),
        };
        let salt = match Salt::from_slice(&header.salt) {
            Ok(salt) => salt,
            Err(e) => {
                let e = LockboxError::Storage(format!("persisted salt is corrupt: {e}"));
                return Err(self.fail(&mut slot, e));
            }
        };

        let password = Zeroizing::new(password.as_bytes().to_vec());
        let key = match derive_key_blocking(password, salt, header.kdf).await {
            Ok(key) => key,
            Err(e) => {
                debug!(error = %e, "key derivation failed during unlock");
                return Err(LockboxError::InvalidPassword);
            }
        };

        if !sentinel_matches(&key, &header.verification) {
            info!("unlock rejected");
            return Err(LockboxError::InvalidPassword);
        }

        self.transition(&mut slot, Slot::Unlocked(key));
        self.start_auto_lock();
        drop(slot);
        info!("vault unlocked");
        Ok(())
    }

    /// Check `password` without changing state.
    pub async fn verify_password(&self, password: &str) -> Result<bool> {
        let result = {
            let slot = self.inner.slot.read().await;
            match &*slot {
                Slot::NotInitialized => return Err(LockboxError::NotInitialized),
                Slot::Error(msg) => return Err(LockboxError::Storage(msg.clone())),
                Slot::Locked | Slot::Unlocked(_) => {}
            }
            self.load_header()
        };
        let header = match result {
            Ok(header) => header,
            Err(e) => return Err(self.escalate(e).await),
        };

        let Ok(salt) = Salt::from_slice(&header.salt) else {
            let e = LockboxError::Storage("persisted salt is corrupt".into());
            return Err(self.escalate(e).await);
        };

        let password = Zeroizing::new(password.as_bytes().to_vec());
        Ok(match derive_key_blocking(password, salt, header.kdf).await {
            Ok(key) => sentinel_matches(&key, &header.verification),
            Err(_) => false,
        })
    }

    /// Drop the key and return to `Locked`.  Idempotent.
    pub async fn lock(&self) {
        let mut slot = self.inner.slot.write().await;
        self.lock_slot(&mut slot);
    }

    /// Lock on behalf of the auto-lock run that issued `ticket`.
    ///
    /// Skipped when the policy was restarted or stopped after the ticket
    /// was issued, e.g. by an unlock that held the write lock meanwhile.
    async fn lock_for(&self, ticket: LockTicket) {
        let mut slot = self.inner.slot.write().await;
        if !ticket.is_current() {
            debug!("stale auto-lock request ignored");
            return;
        }
        self.lock_slot(&mut slot);
    }

    // ------------------------------------------------------------------
    // Secrets
    // ------------------------------------------------------------------

    /// Decrypt and return the value stored at `path`.
    pub async fn get(&self, path: &str) -> Result<Zeroizing<String>> {
        let path = SecretPath::new(path)?;

        let result = {
            let slot = self.inner.slot.read().await;
            let key = slot.key()?;
            self.touch();
            self.read_secret(key, &path)
        };

        match result {
            Ok(value) => {
                debug!(path = %path, "secret read");
                Ok(value)
            }
            Err(e) => Err(self.escalate(e).await),
        }
    }

    /// Encrypt `value` and store it at `path`, replacing any existing value.
    ///
    /// An existing record keeps its `created_at`.
    pub async fn set(&self, path: &str, value: &str, options: SetOptions) -> Result<()> {
        let path = SecretPath::new(path)?;
        let tags = normalize_tags(&options.tags)?;

        let result = {
            let slot = self.inner.slot.read().await;
            let key = slot.key()?;
            self.touch();

            let ciphertext = encrypt_with_aad(key.as_bytes(), value.as_bytes(), &path.aad())?;
            let now = self.inner.clock.now();
            let record = SecretRecord {
                path: path.clone(),
                ciphertext,
                access: options.access,
                tags,
                note: options.note,
                created_at: now,
                updated_at: now,
            };
            self.inner
                .storage
                .upsert_record(&record)
                .map_err(storage_fault)
        };

        match result {
            Ok(()) => {
                debug!(path = %path, "secret stored");
                Ok(())
            }
            Err(e) => Err(self.escalate(e).await),
        }
    }

    /// Remove the secret at `path`, returning whether it existed.
    pub async fn delete(&self, path: &str) -> Result<bool> {
        let path = SecretPath::new(path)?;

        let result = {
            let slot = self.inner.slot.read().await;
            slot.key()?;
            self.touch();
            self.inner
                .storage
                .delete_record(&path)
                .map_err(storage_fault)
        };

        match result {
            Ok(existed) => {
                debug!(path = %path, existed, "secret deleted");
                Ok(existed)
            }
            Err(e) => Err(self.escalate(e).await),
        }
    }

    /// Metadata of every secret matching `filter`, ordered by path.
    ///
    /// No value is decrypted.
    pub async fn list(&self, filter: &ListFilter) -> Result<Vec<SecretMetadata>> {
        let result = {
            let slot = self.inner.slot.read().await;
            slot.key()?;
            self.touch();
            self.inner.storage.list_metadata().map_err(storage_fault)
        };

        match result {
            Ok(all) => {
                let mut matched: Vec<SecretMetadata> =
                    all.into_iter().filter(|m| filter.matches(m)).collect();
                matched.sort_by(|a, b| a.path.cmp(&b.path));
                Ok(matched)
            }
            Err(e) => Err(self.escalate(e).await),
        }
    }

    /// Whether a secret exists at `path`, without decrypting it.
    pub async fn contains(&self, path: &str) -> Result<bool> {
        let path = SecretPath::new(path)?;

        let result = {
            let slot = self.inner.slot.read().await;
            slot.key()?;
            self.touch();
            self.inner.storage.get_record(&path).map_err(storage_fault)
        };

        match result {
            Ok(record) => Ok(record.is_some()),
            Err(e) => Err(self.escalate(e).await),
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn state(&self) -> VaultState {
        self.inner.state_tx.borrow().clone()
    }

    /// Receive every state change, e.g. to clear decrypted caches on lock.
    pub fn watch_state(&self) -> watch::Receiver<VaultState> {
        self.inner.state_tx.subscribe()
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.state(), VaultState::Locked | VaultState::Unlocked)
    }

    pub fn is_unlocked(&self) -> bool {
        self.state().is_unlocked()
    }

    pub fn auto_lock(&self) -> Option<&AutoLockPolicy> {
        self.inner.auto_lock.as_ref()
    }

    /// A callback that locks this vault, for use with `AutoLockPolicy`.
    ///
    /// It holds only a weak reference, so it never keeps the vault alive.
    pub fn lock_callback(&self) -> LockCallback {
        let weak = Arc::downgrade(&self.inner);
        autolock::callback(move |ticket| {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    Vault { inner }.lock_for(ticket).await;
                }
            }
        })
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn load_header(&self) -> Result<VaultHeader> {
        self.inner
            .storage
            .load_header()
            .map_err(storage_fault)?
            .ok_or_else(|| LockboxError::Storage("vault header disappeared from storage".into()))
    }

    fn read_secret(&self, key: &MasterKey, path: &SecretPath) -> Result<Zeroizing<String>> {
        let record = self
            .inner
            .storage
            .get_record(path)
            .map_err(storage_fault)?
            .ok_or_else(|| LockboxError::NotFound(path.to_string()))?;

        // Only the correct key can be held while unlocked, so a failure
        // here means the stored record is damaged.
        let plain = decrypt_with_aad(key.as_bytes(), &record.ciphertext, &path.aad())
            .map_err(|_| LockboxError::Storage(format!("secret '{path}' failed authentication")))?;

        String::from_utf8(plain).map(Zeroizing::new).map_err(|e| {
            let _wipe = Zeroizing::new(e.into_bytes());
            LockboxError::Storage(format!("secret '{path}' is not valid UTF-8"))
        })
    }

    fn lock_slot(&self, slot: &mut Slot) {
        if matches!(slot, Slot::Unlocked(_)) {
            // Replacing the slot drops the key, which zeroizes it.
            self.transition(slot, Slot::Locked);
            info!("vault locked");
        }
        if let Some(policy) = &self.inner.auto_lock {
            policy.stop();
        }
    }

    fn touch(&self) {
        if let Some(policy) = &self.inner.auto_lock {
            policy.record_activity();
        }
    }

    fn start_auto_lock(&self) {
        if let Some(policy) = &self.inner.auto_lock {
            policy.start(self.lock_callback());
        }
    }

    fn transition(&self, slot: &mut Slot, next: Slot) {
        *slot = next;
        self.inner.state_tx.send_replace(slot.state());
    }

    /// Enter the terminal `Error` state for a fatal `err`.
    fn fail(&self, slot: &mut Slot, err: LockboxError) -> LockboxError {
        let err = storage_fault(err);
        if !matches!(slot, Slot::Error(_)) {
            warn!(error = %err, "storage fault, vault entering error state");
            self.transition(slot, Slot::Error(err.to_string()));
            if let Some(policy) = &self.inner.auto_lock {
                policy.stop();
            }
        }
        err
    }

    /// Like `fail`, for callers that only held the read half.
    async fn escalate(&self, err: LockboxError) -> LockboxError {
        if !err.is_fatal() {
            return err;
        }
        let mut slot = self.inner.slot.write().await;
        self.fail(&mut slot, err)
    }
}
