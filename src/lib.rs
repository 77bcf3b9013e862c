//! Lockbox: a local, single-user encrypted secret vault.
//!
//! Secrets are sealed with AES-256-GCM under a key derived from the master
//! password with Argon2id.  A `Vault` gates every operation behind its
//! lock state, an `AutoLockPolicy` can lock it after inactivity or on an
//! external signal, and a `BiometricBridge` lets a platform biometric check
//! stand in for typing the password.

pub mod autolock;
pub mod biometric;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod storage;
pub mod vault;

mod serde_util;

pub use autolock::{AutoLockConfig, AutoLockPolicy, LockSignal, LockTicket};
pub use biometric::{BiometricBridge, BiometricProvider};
pub use errors::{LockboxError, Result};
pub use vault::{AccessLevel, ListFilter, SetOptions, Vault, VaultOptions, VaultState};
