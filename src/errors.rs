use thiserror::Error;

/// All errors that can occur in Lockbox.
#[derive(Debug, Error)]
pub enum LockboxError {
    // --- Lifecycle errors ---
    #[error("Vault has not been initialized")]
    NotInitialized,

    #[error("Vault is already initialized")]
    AlreadyInitialized,

    #[error("Invalid master password")]
    InvalidPassword,

    #[error("Vault is locked")]
    VaultLocked,

    // --- Secret errors ---
    #[error("Secret '{0}' not found")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    // --- Crypto errors ---
    #[error("Authentication failed: data is corrupted or was sealed under another key")]
    AuthFailure,

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    // --- Biometric errors ---
    #[error("Biometric authentication unavailable: {0}")]
    BiometricUnavailable(String),

    #[error("Biometric authentication failed: {0}")]
    BiometricFailed(String),

    #[error("Credential store error: {0}")]
    CredentialStore(String),

    // --- Storage errors ---
    #[error("Storage error: {0}")]
    Storage(String),

    // --- Config errors ---
    #[error("Config file error: {0}")]
    ConfigError(String),

    // --- IO errors ---
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LockboxError {
    /// Returns `true` for faults that push the vault into its terminal
    /// `Error` state.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

/// Convenience type alias for Lockbox results.
pub type Result<T> = std::result::Result<T, LockboxError>;
