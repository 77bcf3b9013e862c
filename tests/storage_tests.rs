//! Integration tests for the storage backends.
//!
//! Every backend runs the same behavioural checks; the file and SQLite
//! backends are additionally reopened to prove durability.

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use lockbox::storage::{FileStorage, MemoryStorage, VaultHeader, VaultStorage};
use lockbox::vault::{AccessLevel, SecretPath, SecretRecord};
use lockbox::{LockboxError, SetOptions, Vault, VaultState};
use tempfile::TempDir;

use common::{fast_kdf, fast_options};

fn header() -> VaultHeader {
    VaultHeader {
        version: 1,
        salt: vec![7u8; 32],
        verification: vec![9u8; 44],
        kdf: fast_kdf(),
        created_at: Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap(),
    }
}

fn record(path: &str, byte: u8, minute: i64) -> SecretRecord {
    let at = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap() + Duration::minutes(minute);
    SecretRecord {
        path: SecretPath::new(path).unwrap(),
        ciphertext: vec![byte; 30],
        access: AccessLevel::Sensitive,
        tags: BTreeSet::from(["ci".to_string()]),
        note: Some(format!("note for {path}")),
        created_at: at,
        updated_at: at,
    }
}

/// Shared behaviour every backend must show.
fn exercise_backend(storage: &dyn VaultStorage) {
    // Header
    assert!(storage.load_header().unwrap().is_none());
    storage.create_header(&header()).unwrap();
    assert_eq!(storage.load_header().unwrap(), Some(header()));
    assert!(matches!(
        storage.create_header(&header()),
        Err(LockboxError::AlreadyInitialized)
    ));

    // Upsert preserves created_at
    storage.upsert_record(&record("b/two", 2, 0)).unwrap();
    storage.upsert_record(&record("a/one", 1, 0)).unwrap();
    storage.upsert_record(&record("b/two", 3, 10)).unwrap();

    let path = SecretPath::new("b/two").unwrap();
    let stored = storage.get_record(&path).unwrap().unwrap();
    assert_eq!(stored.ciphertext, vec![3u8; 30]);
    assert_eq!(stored.created_at, record("b/two", 0, 0).created_at);
    assert_eq!(stored.updated_at, record("b/two", 0, 10).updated_at);
    assert_eq!(stored.note.as_deref(), Some("note for b/two"));
    assert!(stored.tags.contains("ci"));

    // Listing is path ordered
    let listed: Vec<String> = storage
        .list_metadata()
        .unwrap()
        .into_iter()
        .map(|m| m.path.to_string())
        .collect();
    assert_eq!(listed, vec!["a/one", "b/two"]);

    // Delete reports existence
    assert!(storage.delete_record(&path).unwrap());
    assert!(!storage.delete_record(&path).unwrap());
    assert!(storage.get_record(&path).unwrap().is_none());
}

#[test]
fn memory_backend_behaviour() {
    exercise_backend(&MemoryStorage::new());
}

#[test]
fn file_backend_behaviour() {
    let dir = TempDir::new().unwrap();
    exercise_backend(&FileStorage::new(dir.path().join("vault.lbox")));
}

#[cfg(feature = "sqlite")]
#[test]
fn sqlite_backend_behaviour() {
    exercise_backend(&lockbox::storage::SqliteStorage::open_in_memory().unwrap());
}

#[test]
fn file_backend_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("vault.lbox");

    {
        let storage = FileStorage::new(&path);
        storage.create_header(&header()).unwrap();
        storage.upsert_record(&record("k", 5, 1)).unwrap();
    }

    let reopened = FileStorage::new(&path);
    assert_eq!(reopened.load_header().unwrap(), Some(header()));
    let rec = reopened
        .get_record(&SecretPath::new("k").unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(rec, record("k", 5, 1));
}

#[test]
fn truncated_vault_file_is_a_storage_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("vault.lbox");
    std::fs::write(&path, b"LB").unwrap();

    assert!(matches!(
        FileStorage::new(&path).load_header(),
        Err(LockboxError::Storage(_))
    ));
}

#[tokio::test]
async fn vault_over_file_storage_roundtrip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("vault.lbox");

    {
        let vault = Vault::open(Arc::new(FileStorage::new(&path)), fast_options());
        vault.initialize("file-pw").await.unwrap();
        vault
            .set("svc/password", "p@ss", SetOptions::default())
            .await
            .unwrap();
    }

    let vault = Vault::open(Arc::new(FileStorage::new(&path)), fast_options());
    assert_eq!(vault.state(), VaultState::Locked);
    vault.unlock("file-pw").await.unwrap();
    assert_eq!(vault.get("svc/password").await.unwrap().as_str(), "p@ss");
}

#[test]
fn corrupted_vault_file_opens_in_error_state() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("vault.lbox");
    std::fs::write(&path, b"LBOX\x01{not json").unwrap();

    let vault = Vault::open(Arc::new(FileStorage::new(&path)), fast_options());
    assert!(vault.state().is_error());
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn vault_over_sqlite_roundtrip() {
    use lockbox::storage::SqliteStorage;

    let dir = TempDir::new().unwrap();
    let db = dir.path().join("vault.db");

    {
        let storage = Arc::new(SqliteStorage::open(&db).unwrap());
        let vault = Vault::open(storage, fast_options());
        vault.initialize("sql-pw").await.unwrap();
        vault
            .set("db/url", "postgres://x", SetOptions::new().tag("prod"))
            .await
            .unwrap();
    }

    let vault = Vault::open(Arc::new(SqliteStorage::open(&db).unwrap()), fast_options());
    assert_eq!(vault.state(), VaultState::Locked);
    assert!(vault.unlock("wrong").await.is_err());
    vault.unlock("sql-pw").await.unwrap();
    assert_eq!(vault.get("db/url").await.unwrap().as_str(), "postgres://x");
}

#[cfg(all(unix, feature = "sqlite"))]
#[test]
fn sqlite_database_has_restrictive_permissions() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    let db = dir.path().join("vault.db");
    let _storage = lockbox::storage::SqliteStorage::open(&db).unwrap();

    let mode = std::fs::metadata(&db).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600, "database should be owner-only");
}
