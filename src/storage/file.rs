//! Single-file vault storage.
//!
//! A vault file has this layout:
//!
//! ```text
//! [LBOX: 4 bytes][version: 1 byte][document JSON]
//! ```
//!
//! - **Magic** (`LBOX`): identifies the file as a Lockbox vault.
//! - **Version**: file layout version (currently `1`).
//! - **Document JSON**: the `VaultHeader` (absent until initialized) and
//!   every `SecretRecord`, sorted by path.
//!
//! Every mutation re-reads the file, applies the change and writes the
//! whole document back atomically, so readers never see a half-written
//! vault.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{VaultHeader, VaultStorage};
use crate::errors::{LockboxError, Result};
use crate::vault::record::{SecretMetadata, SecretPath, SecretRecord};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic bytes at the start of every vault file.
const MAGIC: &[u8; 4] = b"LBOX";

/// Current file layout version.
pub const FILE_VERSION: u8 = 1;

/// Fixed-size prefix: 4 (magic) + 1 (version).
const PREFIX_LEN: usize = 5;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    header: Option<VaultHeader>,
    #[serde(default)]
    secrets: Vec<SecretRecord>,
}

impl Document {
    fn position(&self, path: &SecretPath) -> std::result::Result<usize, usize> {
        self.secrets.binary_search_by(|r| r.path.cmp(path))
    }
}

// ---------------------------------------------------------------------------
// FileStorage
// ---------------------------------------------------------------------------

/// A `VaultStorage` backed by one file on disk.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    guard: Mutex<()>,
}

impl FileStorage {
    /// Use `path` as the vault file.  The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.guard
            .lock()
            .map_err(|_| LockboxError::Storage("vault file mutex poisoned".into()))
    }

    fn read(&self) -> Result<Document> {
        if !self.path.exists() {
            return Ok(Document::default());
        }

        let data = fs::read(&self.path).map_err(|e| {
            LockboxError::Storage(format!("failed to read {}: {e}", self.path.display()))
        })?;

        if data.len() < PREFIX_LEN {
            return Err(LockboxError::Storage(
                "file too small to be a valid vault".into(),
            ));
        }
        if &data[0..4] != MAGIC {
            return Err(LockboxError::Storage("missing LBOX magic bytes".into()));
        }
        let version = data[4];
        if version != FILE_VERSION {
            return Err(LockboxError::Storage(format!(
                "unsupported version {version}, expected {FILE_VERSION}"
            )));
        }

        let mut doc: Document = serde_json::from_slice(&data[PREFIX_LEN..])
            .map_err(|e| LockboxError::Storage(format!("vault JSON: {e}")))?;
        doc.secrets.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(doc)
    }

    fn write(&self, doc: &Document) -> Result<()> {
        let json = serde_json::to_vec(doc)
            .map_err(|e| LockboxError::Storage(format!("vault serialization: {e}")))?;

        let mut buf = Vec::with_capacity(PREFIX_LEN + json.len());
        buf.extend_from_slice(MAGIC);
        buf.push(FILE_VERSION);
        buf.extend_from_slice(&json);

        write_atomic(&self.path, &buf)
            .map_err(|e| LockboxError::Storage(format!("failed to write {}: {e}", self.path.display())))
    }
}

impl VaultStorage for FileStorage {
    fn load_header(&self) -> Result<Option<VaultHeader>> {
        let _guard = self.lock()?;
        Ok(self.read()?.header)
    }

    fn create_header(&self, header: &VaultHeader) -> Result<()> {
        let _guard = self.lock()?;
        let mut doc = self.read()?;
        if doc.header.is_some() {
            return Err(LockboxError::AlreadyInitialized);
        }
        doc.header = Some(header.clone());
        self.write(&doc)?;
        debug!(path = %self.path.display(), "vault file created");
        Ok(())
    }

    fn get_record(&self, path: &SecretPath) -> Result<Option<SecretRecord>> {
        let _guard = self.lock()?;
        let doc = self.read()?;
        Ok(doc.position(path).ok().map(|i| doc.secrets[i].clone()))
    }

    fn upsert_record(&self, record: &SecretRecord) -> Result<()> {
        let _guard = self.lock()?;
        let mut doc = self.read()?;
        match doc.position(&record.path) {
            Ok(i) => {
                let created_at = doc.secrets[i].created_at;
                doc.secrets[i] = SecretRecord {
                    created_at,
                    ..record.clone()
                };
            }
            Err(i) => doc.secrets.insert(i, record.clone()),
        }
        self.write(&doc)
    }

    fn delete_record(&self, path: &SecretPath) -> Result<bool> {
        let _guard = self.lock()?;
        let mut doc = self.read()?;
        match doc.position(path) {
            Ok(i) => {
                doc.secrets.remove(i);
                self.write(&doc)?;
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    fn list_metadata(&self) -> Result<Vec<SecretMetadata>> {
        let _guard = self.lock()?;
        Ok(self
            .read()?
            .secrets
            .iter()
            .map(SecretRecord::metadata)
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Atomic writes
// ---------------------------------------------------------------------------

/// Write `bytes` to `path` atomically with owner-only permissions.
///
/// 1. Write to a temp file in the same directory.
/// 2. Restrict its permissions (Unix).
/// 3. Rename the temp file over the target path.
///
/// The temp file is in the same directory so the rename stays on one
/// filesystem.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let tmp_path = parent.join(format!(
        ".{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy()
    ));

    fs::write(&tmp_path, bytes)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o600))?;
    }

    fs::rename(&tmp_path, path)
}
