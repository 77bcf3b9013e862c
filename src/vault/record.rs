//! Secret records and the metadata exposed without decryption.
//!
//! A `SecretRecord` is what storage persists: the validated path, the
//! ciphertext (nonce + value + tag) and plaintext metadata.  The
//! ciphertext serializes as base64 so structured-file backends stay
//! readable.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{LockboxError, Result};
use crate::serde_util::{base64_decode, base64_encode};

/// Longest accepted path, in bytes.
pub const MAX_PATH_LEN: usize = 1024;

// ---------------------------------------------------------------------------
// SecretPath
// ---------------------------------------------------------------------------

/// A validated, `/`-segmented secret path such as `github/token`.
///
/// Construction is the only way to get one, so any `SecretPath` that
/// reaches storage is already known to be well-formed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SecretPath(String);

impl SecretPath {
    /// Validate `path` and wrap it.
    ///
    /// Rejected: the empty string, a leading `/`, embedded NUL bytes,
    /// `.` or `..` segments, empty segments (`a//b`, trailing `/`) and
    /// anything longer than `MAX_PATH_LEN` bytes.
    pub fn new(path: impl Into<String>) -> Result<Self> {
        let path = path.into();

        if path.is_empty() {
            return Err(invalid("path must not be empty"));
        }
        if path.len() > MAX_PATH_LEN {
            return Err(invalid(&format!(
                "path is {} bytes, the limit is {MAX_PATH_LEN}",
                path.len()
            )));
        }
        if path.contains('\0') {
            return Err(invalid("path must not contain null bytes"));
        }
        if path.starts_with('/') {
            return Err(invalid("path must be relative (no leading '/')"));
        }
        for segment in path.split('/') {
            match segment {
                "" => return Err(invalid("path must not contain empty segments")),
                "." | ".." => {
                    return Err(invalid("path must not contain '.' or '..' segments"))
                }
                _ => {}
            }
        }

        Ok(Self(path))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterate over the `/`-separated segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Bytes used as associated data when sealing this record's value.
    pub(crate) fn aad(&self) -> Vec<u8> {
        let mut aad = Vec::with_capacity(7 + self.0.len());
        aad.extend_from_slice(b"secret:");
        aad.extend_from_slice(self.0.as_bytes());
        aad
    }
}

fn invalid(msg: &str) -> LockboxError {
    LockboxError::Validation(msg.to_string())
}

impl TryFrom<String> for SecretPath {
    type Error = LockboxError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<&str> for SecretPath {
    type Error = LockboxError;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl FromStr for SecretPath {
    type Err = LockboxError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl From<SecretPath> for String {
    fn from(path: SecretPath) -> Self {
        path.0
    }
}

impl AsRef<str> for SecretPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SecretPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// AccessLevel
// ---------------------------------------------------------------------------

/// Sensitivity tier attached to a secret.
///
/// Stored and returned as-is; enforcing it is left to the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Public,
    #[default]
    Normal,
    Sensitive,
    Critical,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Normal => "normal",
            Self::Sensitive => "sensitive",
            Self::Critical => "critical",
        }
    }
}

impl FromStr for AccessLevel {
    type Err = LockboxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "public" => Ok(Self::Public),
            "normal" => Ok(Self::Normal),
            "sensitive" => Ok(Self::Sensitive),
            "critical" => Ok(Self::Critical),
            other => Err(LockboxError::Validation(format!(
                "unknown access level '{other}' (expected public, normal, sensitive or critical)"
            ))),
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// SetOptions
// ---------------------------------------------------------------------------

/// Metadata supplied alongside a value on `set`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetOptions {
    pub access: AccessLevel,
    pub tags: Vec<String>,
    pub note: Option<String>,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn access(mut self, access: AccessLevel) -> Self {
        self.access = access;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Trim tags, reject blank ones and collapse duplicates.
pub fn normalize_tags<I, S>(tags: I) -> Result<BTreeSet<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = BTreeSet::new();
    for tag in tags {
        let tag = tag.as_ref().trim();
        if tag.is_empty() {
            return Err(LockboxError::Validation("tags must not be blank".into()));
        }
        if tag.contains('\0') {
            return Err(LockboxError::Validation(
                "tags must not contain null bytes".into(),
            ));
        }
        out.insert(tag.to_string());
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A single encrypted secret as persisted by storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRecord {
    pub path: SecretPath,

    /// nonce + ciphertext + tag, base64 in JSON.
    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub ciphertext: Vec<u8>,

    #[serde(default)]
    pub access: AccessLevel,

    #[serde(default)]
    pub tags: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SecretRecord {
    /// Everything about the record except its ciphertext.
    pub fn metadata(&self) -> SecretMetadata {
        SecretMetadata {
            path: self.path.clone(),
            access: self.access,
            tags: self.tags.clone(),
            note: self.note.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Lightweight metadata about a secret (no encrypted value).
///
/// Returned by `Vault::list` so callers can display paths, tags and
/// timestamps without touching any ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecretMetadata {
    pub path: SecretPath,
    pub access: AccessLevel,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
