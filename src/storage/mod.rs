//! Persistence substrates for a vault.
//!
//! The vault core never touches disk itself; it talks to a `VaultStorage`
//! implementation that keeps the singleton header (salt, verification
//! token, KDF params) and the collection of `SecretRecord`s keyed by path.
//!
//! This module provides:
//! - The `VaultStorage` trait and `VaultHeader` type
//! - An in-process backend (`memory`)
//! - A single structured file backend (`file`)
//! - An SQLite backend (`sqlite`, behind the `sqlite` feature)

pub mod file;
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::KdfParams;
use crate::errors::Result;
use crate::vault::record::{SecretMetadata, SecretPath, SecretRecord};

use crate::serde_util::{base64_decode, base64_encode};

pub use file::FileStorage;
pub use memory::MemoryStorage;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;

/// Current header format version.
pub const HEADER_VERSION: u8 = 1;

/// The singleton blobs that make a vault exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultHeader {
    /// Format version.
    pub version: u8,

    /// The salt used for Argon2id key derivation (base64 in JSON).
    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub salt: Vec<u8>,

    /// Sentinel sealed under the master key (base64 in JSON).
    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub verification: Vec<u8>,

    /// Argon2 params used at vault creation.
    pub kdf: KdfParams,

    /// When this vault was first created.
    pub created_at: DateTime<Utc>,
}

/// Storage collaborator used by `Vault`.
///
/// Backends report their own faults as `LockboxError::Storage`; the vault
/// treats every error other than `AlreadyInitialized` from
/// `create_header` as fatal.
pub trait VaultStorage: Send + Sync {
    /// Read the header, `None` when no vault has been created.
    fn load_header(&self) -> Result<Option<VaultHeader>>;

    /// Persist the header atomically.
    ///
    /// Fails with `AlreadyInitialized` if a header already exists.
    fn create_header(&self, header: &VaultHeader) -> Result<()>;

    fn get_record(&self, path: &SecretPath) -> Result<Option<SecretRecord>>;

    /// Insert or replace the record at `record.path`.
    ///
    /// When a record already exists its stored `created_at` wins over the
    /// one passed in.
    fn upsert_record(&self, record: &SecretRecord) -> Result<()>;

    /// Remove a record, returning whether it existed.
    fn delete_record(&self, path: &SecretPath) -> Result<bool>;

    /// Metadata for every record, ordered by path.
    fn list_metadata(&self) -> Result<Vec<SecretMetadata>>;
}
