use std::fmt;

use serde::Serialize;

/// Lifecycle state of a vault, as seen by callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum VaultState {
    /// No vault exists in storage yet.
    NotInitialized,
    /// A vault exists but no key is held.
    Locked,
    /// The master key is in memory.
    Unlocked,
    /// A storage fault occurred; terminal until the vault is reopened.
    Error(String),
}

impl VaultState {
    pub fn is_unlocked(&self) -> bool {
        matches!(self, Self::Unlocked)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

impl fmt::Display for VaultState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInitialized => f.write_str("not initialized"),
            Self::Locked => f.write_str("locked"),
            Self::Unlocked => f.write_str("unlocked"),
            Self::Error(msg) => write!(f, "error: {msg}"),
        }
    }
}
