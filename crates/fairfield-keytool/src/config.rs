//! Keytool configuration, parsed from TOML file + environment variable overrides.
//!
//! Priority: environment variables > config file > defaults.

use anyhow::{Context, Result};
use fairfield_identity::session::{
    SessionPolicy, ACTIVITY_THROTTLE, POLL_INTERVAL, SESSION_TIMEOUT, WARNING_LEAD,
};
use fairfield_identity::vault::PBKDF2_ITERATIONS;
use fairfield_identity::{IdentitySettings, KdfParams};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level keytool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeytoolConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub storage: StorageSection,

    #[serde(default)]
    pub vault: VaultSection,

    #[serde(default)]
    pub session: SessionSection,
}

impl Default for KeytoolConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            storage: StorageSection::default(),
            vault: VaultSection::default(),
            session: SessionSection::default(),
        }
    }
}

/// Where the identity store lives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Store file name inside `data_dir`
    #[serde(default = "default_store_file")]
    pub file: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            file: default_store_file(),
        }
    }
}

/// Key vault parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultSection {
    /// PBKDF2-SHA256 rounds. Changing this makes existing tokens unreadable.
    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: u32,
}

impl Default for VaultSection {
    fn default() -> Self {
        Self {
            kdf_iterations: default_kdf_iterations(),
        }
    }
}

/// Inactivity timing, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSection {
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_warning")]
    pub warning_secs: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_throttle")]
    pub activity_throttle_secs: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            warning_secs: default_warning(),
            poll_interval_secs: default_poll_interval(),
            activity_throttle_secs: default_throttle(),
        }
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_data_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join(".fairfield"))
        .unwrap_or_else(|| PathBuf::from(".fairfield"))
}

fn default_store_file() -> String {
    "identity.json".to_string()
}

fn default_kdf_iterations() -> u32 {
    PBKDF2_ITERATIONS
}

fn default_timeout() -> u64 {
    SESSION_TIMEOUT.as_secs()
}

fn default_warning() -> u64 {
    WARNING_LEAD.as_secs()
}

fn default_poll_interval() -> u64 {
    POLL_INTERVAL.as_secs()
}

fn default_throttle() -> u64 {
    ACTIVITY_THROTTLE.as_secs()
}

// ============================================================================
// Loading & environment override
// ============================================================================

impl KeytoolConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: KeytoolConfig =
            toml::from_str(&contents).with_context(|| "Failed to parse TOML config")?;
        Ok(config)
    }

    /// Load from `path` when given, else from `<default data dir>/keytool.toml`
    /// if it exists, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let implicit = default_data_dir().join("keytool.toml");
                if implicit.exists() {
                    Self::from_file(&implicit)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Apply environment variable overrides.
    ///
    /// Supported env vars:
    /// - `FAIRFIELD_DATA_DIR`
    /// - `FAIRFIELD_LOG_LEVEL`
    /// - `FAIRFIELD_KDF_ITERATIONS`
    /// - `FAIRFIELD_SESSION_TIMEOUT` (seconds)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("FAIRFIELD_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("FAIRFIELD_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Ok(v) = std::env::var("FAIRFIELD_KDF_ITERATIONS") {
            if let Ok(rounds) = v.parse::<u32>() {
                self.vault.kdf_iterations = rounds;
            }
        }
        if let Ok(v) = std::env::var("FAIRFIELD_SESSION_TIMEOUT") {
            if let Ok(secs) = v.parse::<u64>() {
                self.session.timeout_secs = secs;
            }
        }
    }

    /// Validate that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.vault.kdf_iterations >= PBKDF2_ITERATIONS,
            "vault.kdf_iterations must be >= {}",
            PBKDF2_ITERATIONS
        );

        anyhow::ensure!(
            self.session.warning_secs < self.session.timeout_secs,
            "session.warning_secs must be < session.timeout_secs"
        );

        anyhow::ensure!(
            self.session.poll_interval_secs >= 1,
            "session.poll_interval_secs must be >= 1"
        );
        anyhow::ensure!(
            self.session.poll_interval_secs < self.session.warning_secs,
            "session.poll_interval_secs must be < session.warning_secs"
        );

        anyhow::ensure!(
            self.session.activity_throttle_secs >= 1,
            "session.activity_throttle_secs must be >= 1"
        );

        anyhow::ensure!(
            !self.storage.file.is_empty(),
            "storage.file must not be empty"
        );

        Ok(())
    }

    /// Full path of the identity store
    pub fn store_path(&self) -> PathBuf {
        self.storage.data_dir.join(&self.storage.file)
    }

    pub fn session_policy(&self) -> SessionPolicy {
        SessionPolicy {
            timeout: Duration::from_secs(self.session.timeout_secs),
            warning_lead: Duration::from_secs(self.session.warning_secs),
            poll_interval: Duration::from_secs(self.session.poll_interval_secs),
            activity_throttle: Duration::from_secs(self.session.activity_throttle_secs),
        }
    }

    pub fn settings(&self) -> IdentitySettings {
        IdentitySettings {
            kdf: KdfParams::new(self.vault.kdf_iterations),
            session: self.session_policy(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn full_toml() -> &'static str {
        r#"
log_level = "debug"

[storage]
data_dir = "/custom/data"
file = "keys.json"

[vault]
kdf_iterations = 1000000

[session]
timeout_secs = 900
warning_secs = 60
poll_interval_secs = 15
activity_throttle_secs = 5
"#
    }

    #[test]
    fn test_parse_empty_config() {
        let file = NamedTempFile::new().unwrap();
        let config = KeytoolConfig::from_file(file.path()).unwrap();

        assert_eq!(config.log_level, "warn");
        assert_eq!(config.storage.file, "identity.json");
        assert_eq!(config.vault.kdf_iterations, 600_000);
        assert_eq!(config.session_policy(), SessionPolicy::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", full_toml()).unwrap();

        let config = KeytoolConfig::from_file(file.path()).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.store_path(), PathBuf::from("/custom/data/keys.json"));
        assert_eq!(config.vault.kdf_iterations, 1_000_000);

        let policy = config.session_policy();
        assert_eq!(policy.timeout, Duration::from_secs(900));
        assert_eq!(policy.warning_lead, Duration::from_secs(60));
        assert_eq!(policy.poll_interval, Duration::from_secs(15));
        assert_eq!(policy.activity_throttle, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = KeytoolConfig::default();

        std::env::set_var("FAIRFIELD_DATA_DIR", "/env/data");
        std::env::set_var("FAIRFIELD_KDF_ITERATIONS", "700000");
        std::env::set_var("FAIRFIELD_SESSION_TIMEOUT", "600");

        config.apply_env_overrides();

        assert_eq!(config.storage.data_dir, PathBuf::from("/env/data"));
        assert_eq!(config.vault.kdf_iterations, 700_000);
        assert_eq!(config.session.timeout_secs, 600);

        std::env::remove_var("FAIRFIELD_DATA_DIR");
        std::env::remove_var("FAIRFIELD_KDF_ITERATIONS");
        std::env::remove_var("FAIRFIELD_SESSION_TIMEOUT");
    }

    #[test]
    fn test_validation_weak_kdf() {
        let mut config = KeytoolConfig::default();
        config.vault.kdf_iterations = 100_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_warning_not_before_timeout() {
        let mut config = KeytoolConfig::default();
        config.session.warning_secs = config.session.timeout_secs;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_poll_interval() {
        let mut config = KeytoolConfig::default();
        config.session.poll_interval_secs = 0;
        assert!(config.validate().is_err());

        config.session.poll_interval_secs = config.session.warning_secs;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_throttle() {
        let mut config = KeytoolConfig::default();
        config.session.activity_throttle_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_field_type_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "[vault]\nkdf_iterations = \"many\"\n").unwrap();
        assert!(KeytoolConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_serde_roundtrip() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", full_toml()).unwrap();

        let config = KeytoolConfig::from_file(file.path()).unwrap();
        let serialized = toml::to_string_pretty(&config).unwrap();

        let reparsed: KeytoolConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(reparsed.session_policy(), config.session_policy());
        assert_eq!(reparsed.store_path(), config.store_path());
    }
}
