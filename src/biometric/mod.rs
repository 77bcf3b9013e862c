//! Biometric-gated credential cache.
//!
//! A platform biometric check can stand in for typing the master
//! password.  The pieces:
//! - `BiometricProvider`: the platform capability (`available`,
//!   `type_name`, `challenge`), with `NoBiometrics` and `MockBiometrics`
//! - `CredentialStore`: where the sealed password blob and, separately,
//!   its sealing seed live (`credential`, `keyring`)
//! - `BiometricBridge`: save / load / remove and vault unlock (`bridge`)

pub mod bridge;
pub mod credential;
#[cfg(feature = "keyring-store")]
pub mod keyring;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

pub use bridge::BiometricBridge;
pub use credential::{CachedCredential, CredentialStore};
#[cfg(feature = "keyring-store")]
pub use self::keyring::KeyringCredentialStore;

/// Platform biometric capability.
#[async_trait]
pub trait BiometricProvider: Send + Sync {
    /// Whether a biometric challenge can be issued right now.
    fn is_available(&self) -> bool;

    /// Human-readable name such as "Touch ID" or "Windows Hello".
    fn type_name(&self) -> String;

    /// Opaque identifier of the currently enrolled biometric set.
    ///
    /// It changes when fingers or faces are added or removed.  `None` when
    /// the platform does not expose one.
    fn enrollment_token(&self) -> Option<Vec<u8>>;

    /// Prompt the user; `true` only on a successful match.
    ///
    /// Cancellation by the user is `false`.
    async fn challenge(&self, reason: &str) -> bool;
}

/// The provider for hosts without biometric hardware.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBiometrics;

#[async_trait]
impl BiometricProvider for NoBiometrics {
    fn is_available(&self) -> bool {
        false
    }

    fn type_name(&self) -> String {
        "none".to_string()
    }

    fn enrollment_token(&self) -> Option<Vec<u8>> {
        None
    }

    async fn challenge(&self, _reason: &str) -> bool {
        false
    }
}

/// What a `MockBiometrics` challenge does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOutcome {
    Approve,
    Deny,
    /// Never resolves, like a prompt the user walked away from.
    Hang,
}

/// Scriptable provider for tests and headless environments.
///
/// Challenges consume queued outcomes first and then fall back to the
/// default outcome.
#[derive(Debug)]
pub struct MockBiometrics {
    available: AtomicBool,
    type_name: String,
    enrollment: Mutex<Option<Vec<u8>>>,
    queued: Mutex<VecDeque<MockOutcome>>,
    default_outcome: Mutex<MockOutcome>,
    challenges: AtomicUsize,
}

impl MockBiometrics {
    /// An available provider that approves every challenge.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            available: AtomicBool::new(true),
            type_name: type_name.into(),
            enrollment: Mutex::new(Some(b"enrollment-1".to_vec())),
            queued: Mutex::new(VecDeque::new()),
            default_outcome: Mutex::new(MockOutcome::Approve),
            challenges: AtomicUsize::new(0),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Simulate the user changing their enrolled biometrics.
    pub fn set_enrollment(&self, token: Option<Vec<u8>>) {
        *self.enrollment.lock().unwrap_or_else(|p| p.into_inner()) = token;
    }

    /// Queue the outcome of the next challenge.
    pub fn push_outcome(&self, outcome: MockOutcome) {
        self.queued
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(outcome);
    }

    pub fn set_default_outcome(&self, outcome: MockOutcome) {
        *self.default_outcome.lock().unwrap_or_else(|p| p.into_inner()) = outcome;
    }

    /// How many challenges have been issued.
    pub fn challenge_count(&self) -> usize {
        self.challenges.load(Ordering::SeqCst)
    }

    fn next_outcome(&self) -> MockOutcome {
        let queued = self
            .queued
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front();
        queued.unwrap_or_else(|| *self.default_outcome.lock().unwrap_or_else(|p| p.into_inner()))
    }
}

#[async_trait]
impl BiometricProvider for MockBiometrics {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn type_name(&self) -> String {
        self.type_name.clone()
    }

    fn enrollment_token(&self) -> Option<Vec<u8>> {
        self.enrollment
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    async fn challenge(&self, _reason: &str) -> bool {
        self.challenges.fetch_add(1, Ordering::SeqCst);
        match self.next_outcome() {
            MockOutcome::Approve => true,
            MockOutcome::Deny => false,
            MockOutcome::Hang => futures::future::pending().await,
        }
    }
}
