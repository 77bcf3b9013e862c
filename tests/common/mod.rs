//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use lockbox::crypto::KdfParams;
use lockbox::storage::{MemoryStorage, VaultStorage};
use lockbox::{Vault, VaultOptions};

/// Cheapest Argon2 params the KDF still accepts.
pub fn fast_kdf() -> KdfParams {
    KdfParams {
        memory_kib: 8_192,
        iterations: 1,
        parallelism: 1,
    }
}

pub fn fast_options() -> VaultOptions {
    VaultOptions::default().with_kdf(fast_kdf())
}

/// A vault over fresh in-memory storage.
pub fn memory_vault() -> (Arc<MemoryStorage>, Vault) {
    let storage = Arc::new(MemoryStorage::new());
    let vault = Vault::open(storage.clone() as Arc<dyn VaultStorage>, fast_options());
    (storage, vault)
}

/// Route `tracing` output to the test harness when `RUST_LOG` is set.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
