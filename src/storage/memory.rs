//! In-process storage for tests and ephemeral vaults.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use super::{VaultHeader, VaultStorage};
use crate::errors::{LockboxError, Result};
use crate::vault::record::{SecretMetadata, SecretPath, SecretRecord};

#[derive(Debug, Default)]
struct Contents {
    header: Option<VaultHeader>,
    records: BTreeMap<SecretPath, SecretRecord>,
}

/// A `VaultStorage` that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    contents: Mutex<Contents>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently stored.
    pub fn len(&self) -> usize {
        self.lock().map(|c| c.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, Contents>> {
        self.contents
            .lock()
            .map_err(|_| LockboxError::Storage("memory storage mutex poisoned".into()))
    }
}

impl VaultStorage for MemoryStorage {
    fn load_header(&self) -> Result<Option<VaultHeader>> {
        Ok(self.lock()?.header.clone())
    }

    fn create_header(&self, header: &VaultHeader) -> Result<()> {
        let mut contents = self.lock()?;
        if contents.header.is_some() {
            return Err(LockboxError::AlreadyInitialized);
        }
        contents.header = Some(header.clone());
        Ok(())
    }

    fn get_record(&self, path: &SecretPath) -> Result<Option<SecretRecord>> {
        Ok(self.lock()?.records.get(path).cloned())
    }

    fn upsert_record(&self, record: &SecretRecord) -> Result<()> {
        let mut contents = self.lock()?;
        let mut record = record.clone();
        if let Some(existing) = contents.records.get(&record.path) {
            record.created_at = existing.created_at;
        }
        contents.records.insert(record.path.clone(), record);
        Ok(())
    }

    fn delete_record(&self, path: &SecretPath) -> Result<bool> {
        Ok(self.lock()?.records.remove(path).is_some())
    }

    fn list_metadata(&self) -> Result<Vec<SecretMetadata>> {
        Ok(self
            .lock()?
            .records
            .values()
            .map(SecretRecord::metadata)
            .collect())
    }
}
