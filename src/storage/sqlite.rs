//! SQLite-backed vault storage.
//!
//! Two tables: `vault_meta` holds the header blobs as key/value rows and
//! `secrets` holds one row per record.  Timestamps are stored as RFC 3339
//! text; tags as a JSON array.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::debug;

use super::{VaultHeader, VaultStorage};
use crate::crypto::KdfParams;
use crate::errors::{LockboxError, Result};
use crate::vault::record::{AccessLevel, SecretMetadata, SecretPath, SecretRecord};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS vault_meta (
        key   TEXT PRIMARY KEY,
        value BLOB NOT NULL
    );

    CREATE TABLE IF NOT EXISTS secrets (
        path            TEXT PRIMARY KEY,
        encrypted_value BLOB NOT NULL,
        access_level    TEXT NOT NULL DEFAULT 'normal',
        tags            TEXT NOT NULL DEFAULT '[]',
        note            TEXT,
        created_at      TEXT NOT NULL,
        updated_at      TEXT NOT NULL
    );
";

fn db_err(context: &str, e: rusqlite::Error) -> LockboxError {
    LockboxError::Storage(format!("{context}: {e}"))
}

/// A `VaultStorage` backed by an SQLite database.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Open (or create) the database at `path` with owner-only permissions.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| db_err("open database", e))?;
        let storage = Self::with_connection(conn)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(storage)
    }

    /// A throwaway database that disappears with the handle.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| db_err("open database", e))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| db_err("create schema", e))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| LockboxError::Storage("database mutex poisoned".into()))
    }
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

/// Columns as read from a `secrets` row, before validation.
struct RawRow {
    path: String,
    ciphertext: Option<Vec<u8>>,
    access: String,
    tags: String,
    note: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RawRow {
    fn into_metadata(self) -> Result<SecretMetadata> {
        let path = SecretPath::new(self.path.as_str()).map_err(|e| {
            LockboxError::Storage(format!("stored path '{}' is invalid: {e}", self.path))
        })?;
        let access: AccessLevel = self.access.parse().map_err(|e| {
            LockboxError::Storage(format!("record '{path}' has a bad access level: {e}"))
        })?;
        let tags = serde_json::from_str(&self.tags).map_err(|e| {
            LockboxError::Storage(format!("record '{path}' has malformed tags: {e}"))
        })?;

        Ok(SecretMetadata {
            created_at: parse_time(&self.created_at)?,
            updated_at: parse_time(&self.updated_at)?,
            path,
            access,
            tags,
            note: self.note,
        })
    }

    fn into_record(mut self) -> Result<SecretRecord> {
        let ciphertext = self.ciphertext.take().unwrap_or_default();
        let meta = self.into_metadata()?;
        Ok(SecretRecord {
            path: meta.path,
            ciphertext,
            access: meta.access,
            tags: meta.tags,
            note: meta.note,
            created_at: meta.created_at,
            updated_at: meta.updated_at,
        })
    }
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| LockboxError::Storage(format!("bad timestamp '{s}': {e}")))
}

fn meta_value(rows: &[(String, Vec<u8>)], key: &str) -> Option<Vec<u8>> {
    rows.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
}

fn meta_text(rows: &[(String, Vec<u8>)], key: &str) -> Result<String> {
    let bytes = meta_value(rows, key)
        .ok_or_else(|| LockboxError::Storage(format!("vault_meta is missing '{key}'")))?;
    String::from_utf8(bytes)
        .map_err(|_| LockboxError::Storage(format!("vault_meta '{key}' is not UTF-8")))
}

// ---------------------------------------------------------------------------
// VaultStorage
// ---------------------------------------------------------------------------

impl VaultStorage for SqliteStorage {
    fn load_header(&self) -> Result<Option<VaultHeader>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT key, value FROM vault_meta")
            .map_err(|e| db_err("query prepare", e))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?)))
            .map_err(|e| db_err("query exec", e))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| db_err("row parse", e))?;

        let Some(salt) = meta_value(&rows, "salt") else {
            return Ok(None);
        };
        let verification = meta_value(&rows, "verification")
            .ok_or_else(|| LockboxError::Storage("vault_meta has a salt but no verification token".into()))?;

        let version: u8 = meta_text(&rows, "version")?
            .parse()
            .map_err(|e| LockboxError::Storage(format!("bad header version: {e}")))?;
        let kdf: KdfParams = serde_json::from_str(&meta_text(&rows, "kdf")?)
            .map_err(|e| LockboxError::Storage(format!("bad KDF params: {e}")))?;
        let created_at = parse_time(&meta_text(&rows, "created_at")?)?;

        Ok(Some(VaultHeader {
            version,
            salt,
            verification,
            kdf,
            created_at,
        }))
    }

    fn create_header(&self, header: &VaultHeader) -> Result<()> {
        let kdf_json = serde_json::to_string(&header.kdf)
            .map_err(|e| LockboxError::Storage(format!("KDF params serialization: {e}")))?;

        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| db_err("begin transaction", e))?;

        let exists: Option<i64> = tx
            .query_row("SELECT 1 FROM vault_meta WHERE key = 'salt'", [], |row| row.get(0))
            .optional()
            .map_err(|e| db_err("probe header", e))?;
        if exists.is_some() {
            return Err(LockboxError::AlreadyInitialized);
        }

        let rows: [(&str, Vec<u8>); 5] = [
            ("version", header.version.to_string().into_bytes()),
            ("salt", header.salt.clone()),
            ("verification", header.verification.clone()),
            ("kdf", kdf_json.into_bytes()),
            ("created_at", header.created_at.to_rfc3339().into_bytes()),
        ];
        for (key, value) in rows {
            tx.execute(
                "INSERT INTO vault_meta (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .map_err(|e| db_err("write header", e))?;
        }

        tx.commit().map_err(|e| db_err("commit header", e))?;
        debug!("vault header written to sqlite");
        Ok(())
    }

    fn get_record(&self, path: &SecretPath) -> Result<Option<SecretRecord>> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                "SELECT path, encrypted_value, access_level, tags, note, created_at, updated_at
                 FROM secrets WHERE path = ?1",
                params![path.as_str()],
                |row| {
                    Ok(RawRow {
                        path: row.get(0)?,
                        ciphertext: Some(row.get(1)?),
                        access: row.get(2)?,
                        tags: row.get(3)?,
                        note: row.get(4)?,
                        created_at: row.get(5)?,
                        updated_at: row.get(6)?,
                    })
                },
            )
            .optional()
            .map_err(|e| db_err("read secret", e))?;

        raw.map(RawRow::into_record).transpose()
    }

    fn upsert_record(&self, record: &SecretRecord) -> Result<()> {
        let tags_json = serde_json::to_string(&record.tags)
            .map_err(|e| LockboxError::Storage(format!("tag serialization: {e}")))?;

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO secrets (path, encrypted_value, access_level, tags, note, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(path) DO UPDATE SET
                encrypted_value = excluded.encrypted_value,
                access_level = excluded.access_level,
                tags = excluded.tags,
                note = excluded.note,
                updated_at = excluded.updated_at",
            params![
                record.path.as_str(),
                record.ciphertext,
                record.access.as_str(),
                tags_json,
                record.note,
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| db_err("write secret", e))?;
        Ok(())
    }

    fn delete_record(&self, path: &SecretPath) -> Result<bool> {
        let conn = self.conn()?;
        let removed = conn
            .execute("DELETE FROM secrets WHERE path = ?1", params![path.as_str()])
            .map_err(|e| db_err("delete secret", e))?;
        Ok(removed > 0)
    }

    fn list_metadata(&self) -> Result<Vec<SecretMetadata>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT path, access_level, tags, note, created_at, updated_at
                 FROM secrets ORDER BY path",
            )
            .map_err(|e| db_err("query prepare", e))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(RawRow {
                    path: row.get(0)?,
                    ciphertext: None,
                    access: row.get(1)?,
                    tags: row.get(2)?,
                    note: row.get(3)?,
                    created_at: row.get(4)?,
                    updated_at: row.get(5)?,
                })
            })
            .map_err(|e| db_err("query exec", e))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| db_err("row parse", e))?.into_metadata()?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupted_tags_surface_as_storage_errors() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage
            .conn()
            .unwrap()
            .execute(
                "INSERT INTO secrets (path, encrypted_value, tags, created_at, updated_at)
                 VALUES ('a/b', x'00', 'not json', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
                [],
            )
            .unwrap();

        assert!(matches!(
            storage.list_metadata(),
            Err(LockboxError::Storage(_))
        ));
    }

    #[test]
    fn unknown_access_level_is_a_storage_error() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage
            .conn()
            .unwrap()
            .execute(
                "INSERT INTO secrets (path, encrypted_value, access_level, created_at, updated_at)
                 VALUES ('a/b', x'00', 'root', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
                [],
            )
            .unwrap();

        let path = SecretPath::new("a/b").unwrap();
        assert!(matches!(
            storage.get_record(&path),
            Err(LockboxError::Storage(_))
        ));
    }

    #[test]
    fn empty_database_has_no_header() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        assert!(storage.load_header().unwrap().is_none());
    }
}
