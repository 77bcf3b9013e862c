//! Typed JSON schema for secret listings exchanged with other tools.
//!
//! A listing is a versioned document of `SecretMetadata` entries.
//! Parsing is strict: unknown fields, a wrong version, invalid paths
//! and duplicate paths are all `Validation` errors instead of entries
//! being skipped.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::record::SecretMetadata;
use crate::errors::{LockboxError, Result};

/// Current listing schema version.
pub const LISTING_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ListingDocument {
    version: u32,
    secrets: Vec<SecretMetadata>,
}

/// Serialize metadata into a listing document.
pub fn to_listing_json(entries: &[SecretMetadata]) -> Result<String> {
    let doc = ListingDocument {
        version: LISTING_VERSION,
        secrets: entries.to_vec(),
    };
    serde_json::to_string_pretty(&doc)
        .map_err(|e| LockboxError::Validation(format!("listing serialization failed: {e}")))
}

/// Parse a listing document, rejecting anything off-schema.
pub fn parse_listing(json: &str) -> Result<Vec<SecretMetadata>> {
    let doc: ListingDocument = serde_json::from_str(json)
        .map_err(|e| LockboxError::Validation(format!("malformed listing: {e}")))?;

    if doc.version != LISTING_VERSION {
        return Err(LockboxError::Validation(format!(
            "unsupported listing version {}, expected {LISTING_VERSION}",
            doc.version
        )));
    }

    let mut seen = BTreeSet::new();
    for entry in &doc.secrets {
        if !seen.insert(entry.path.as_str()) {
            return Err(LockboxError::Validation(format!(
                "duplicate path '{}' in listing",
                entry.path
            )));
        }
    }

    Ok(doc.secrets)
}
