//! Predicates applied to secret metadata by `Vault::list`.

use std::collections::BTreeSet;

use super::record::{AccessLevel, SecretMetadata};

/// Selects which records `list` returns.  The default matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    /// Keep paths starting with this string.
    pub prefix: Option<String>,
    /// Keep records carrying every one of these tags.
    pub tags: BTreeSet<String>,
    /// Keep records at exactly this access level.
    pub access: Option<AccessLevel>,
}

impl ListFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn access(mut self, access: AccessLevel) -> Self {
        self.access = Some(access);
        self
    }

    /// Pure predicate over metadata; never touches ciphertext.
    pub fn matches(&self, meta: &SecretMetadata) -> bool {
        if let Some(prefix) = &self.prefix {
            if !meta.path.as_str().starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(access) = self.access {
            if meta.access != access {
                return false;
            }
        }
        self.tags.iter().all(|t| meta.tags.contains(t))
    }
}
