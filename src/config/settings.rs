use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::autolock::AutoLockConfig;
use crate::crypto::KdfParams;
use crate::errors::{LockboxError, Result};

/// Vault-level configuration, loaded from `lockbox.toml`.
///
/// Every field has a sensible default so a vault works out-of-the-box
/// without any config file at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Argon2 memory cost in KiB (default: 64 MB).
    #[serde(default = "default_argon2_memory_kib")]
    pub argon2_memory_kib: u32,

    /// Argon2 iteration count (default: 3).
    #[serde(default = "default_argon2_iterations")]
    pub argon2_iterations: u32,

    /// Argon2 parallelism degree (default: 4).
    #[serde(default = "default_argon2_parallelism")]
    pub argon2_parallelism: u32,

    /// Initial auto-lock mode (default: lock after 30 idle minutes).
    #[serde(default)]
    pub auto_lock: AutoLockConfig,

    /// How often the idle check runs, in milliseconds.
    #[serde(default = "default_auto_lock_check_ms")]
    pub auto_lock_check_ms: u64,

    /// Text shown by the platform biometric prompt.
    #[serde(default = "default_biometric_reason")]
    pub biometric_reason: String,

    /// Upper bound on how long a biometric challenge may take.
    #[serde(default = "default_biometric_timeout_secs")]
    pub biometric_timeout_secs: u64,
}

// ── Serde default helpers ────────────────────────────────────────────

fn default_argon2_memory_kib() -> u32 {
    65_536 // 64 MB
}

fn default_argon2_iterations() -> u32 {
    3
}

fn default_argon2_parallelism() -> u32 {
    4
}

fn default_auto_lock_check_ms() -> u64 {
    1_000
}

fn default_biometric_reason() -> String {
    "Unlock your Lockbox vault".to_string()
}

fn default_biometric_timeout_secs() -> u64 {
    60
}

// ── Implementation ───────────────────────────────────────────────────

impl Default for Settings {
    fn default() -> Self {
        Self {
            argon2_memory_kib: default_argon2_memory_kib(),
            argon2_iterations: default_argon2_iterations(),
            argon2_parallelism: default_argon2_parallelism(),
            auto_lock: AutoLockConfig::default(),
            auto_lock_check_ms: default_auto_lock_check_ms(),
            biometric_reason: default_biometric_reason(),
            biometric_timeout_secs: default_biometric_timeout_secs(),
        }
    }
}

impl Settings {
    /// Name of the config file we look for in the vault directory.
    pub const FILE_NAME: &'static str = "lockbox.toml";

    /// Load settings from `<dir>/lockbox.toml`.
    ///
    /// If the file does not exist, sensible defaults are returned.
    /// If the file exists but cannot be parsed, an error is returned.
    pub fn load(dir: &Path) -> Result<Self> {
        let config_path = dir.join(Self::FILE_NAME);

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&config_path)?;

        let settings: Settings = toml::from_str(&contents).map_err(|e| {
            LockboxError::ConfigError(format!("Failed to parse {}: {e}", config_path.display()))
        })?;

        if settings.auto_lock_check_ms == 0 {
            return Err(LockboxError::ConfigError(
                "auto_lock_check_ms must be greater than zero".into(),
            ));
        }
        settings.auto_lock.validate()?;

        Ok(settings)
    }

    /// Convert the Argon2 settings into crypto-layer params.
    pub fn kdf_params(&self) -> KdfParams {
        KdfParams {
            memory_kib: self.argon2_memory_kib,
            iterations: self.argon2_iterations,
            parallelism: self.argon2_parallelism,
        }
    }

    pub fn auto_lock_check_interval(&self) -> Duration {
        Duration::from_millis(self.auto_lock_check_ms.max(1))
    }

    pub fn biometric_timeout(&self) -> Duration {
        Duration::from_secs(self.biometric_timeout_secs)
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn default_settings_are_sensible() {
        let s = Settings::default();
        assert_eq!(s.argon2_memory_kib, 65_536);
        assert_eq!(s.argon2_iterations, 3);
        assert_eq!(s.argon2_parallelism, 4);
        assert_eq!(s.auto_lock, AutoLockConfig::fixed(Duration::from_secs(1_800)));
        assert_eq!(s.auto_lock_check_interval(), Duration::from_secs(1));
        assert_eq!(s.biometric_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn load_returns_defaults_when_no_config_file() {
        let tmp = TempDir::new().unwrap();
        let settings = Settings::load(tmp.path()).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn load_parses_toml_file() {
        let tmp = TempDir::new().unwrap();
        let config = r#"
argon2_memory_kib = 131072
argon2_iterations = 5
argon2_parallelism = 8
auto_lock_check_ms = 250
biometric_reason = "Open secrets"

[auto_lock]
mode = "fixed_interval"
interval_ms = 300000
"#;
        fs::write(tmp.path().join(Settings::FILE_NAME), config).unwrap();

        let settings = Settings::load(tmp.path()).unwrap();
        assert_eq!(
            settings.kdf_params(),
            KdfParams {
                memory_kib: 131_072,
                iterations: 5,
                parallelism: 8,
            }
        );
        assert_eq!(settings.auto_lock, AutoLockConfig::fixed(Duration::from_secs(300)));
        assert_eq!(settings.auto_lock_check_interval(), Duration::from_millis(250));
        assert_eq!(settings.biometric_reason, "Open secrets");
    }

    #[test]
    fn load_accepts_unit_auto_lock_modes() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join(Settings::FILE_NAME),
            "[auto_lock]\nmode = \"on_external_lock_signal\"\n",
        )
        .unwrap();

        let settings = Settings::load(tmp.path()).unwrap();
        assert_eq!(settings.auto_lock, AutoLockConfig::OnExternalLockSignal);
        // Rest should be defaults
        assert_eq!(settings.argon2_iterations, 3);
    }

    #[test]
    fn load_errors_on_invalid_toml() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(Settings::FILE_NAME), "not valid {{toml").unwrap();

        let result = Settings::load(tmp.path());
        assert!(matches!(result, Err(LockboxError::ConfigError(_))));
    }

    #[test]
    fn load_rejects_zero_check_interval() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(Settings::FILE_NAME), "auto_lock_check_ms = 0\n").unwrap();

        assert!(Settings::load(tmp.path()).is_err());
    }

    #[test]
    fn load_keeps_sub_second_auto_lock_intervals() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join(Settings::FILE_NAME),
            "[auto_lock]\nmode = \"fixed_interval\"\ninterval_ms = 1500\n",
        )
        .unwrap();

        let settings = Settings::load(tmp.path()).unwrap();
        assert_eq!(settings.auto_lock.interval(), Some(Duration::from_millis(1_500)));
    }

    #[test]
    fn load_rejects_zero_auto_lock_interval() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join(Settings::FILE_NAME),
            "[auto_lock]\nmode = \"fixed_interval\"\ninterval_ms = 0\n",
        )
        .unwrap();

        assert!(matches!(
            Settings::load(tmp.path()),
            Err(LockboxError::ConfigError(_))
        ));
    }
}
