//! Vault module: the lock state machine and encrypted secret CRUD.
//!
//! This module provides:
//! - `SecretPath`, `AccessLevel`, `SetOptions` and record types (`record`)
//! - Metadata predicates for listing (`filter`)
//! - The typed listing interchange schema (`listing`)
//! - `VaultState` (`state`)
//! - The `Vault` handle itself (`store`)

pub mod filter;
pub mod listing;
pub mod record;
pub mod state;
pub mod store;

// Re-export the most commonly used items.
pub use filter::ListFilter;
pub use listing::{parse_listing, to_listing_json};
pub use record::{AccessLevel, SecretMetadata, SecretPath, SecretRecord, SetOptions};
pub use state::VaultState;
pub use store::{Vault, VaultOptions};
