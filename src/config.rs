//! Ledger configuration, loaded from TOML with environment overrides.

use log::info;
use serde::Deserialize;
use thiserror::Error;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::blockchain::admission::{AcceptAll, AdmissionPolicy, VerifiedAdmission};
use crate::blockchain::chain::{DEFAULT_DIFFICULTY, DEFAULT_MINING_REWARD};

/// Hex digits in a SHA-256 digest; no hash can carry more leading zeros.
pub const MAX_DIFFICULTY: usize = 64;

pub const DIFFICULTY_ENV: &str = "POWLEDGER_DIFFICULTY";
pub const MINING_REWARD_ENV: &str = "POWLEDGER_MINING_REWARD";

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// How the ledger screens transactions before staging them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdmissionMode {
    /// Stage everything unchecked
    #[default]
    Open,
    /// Require a valid signature and sufficient balance
    Verified,
}

impl AdmissionMode {
    pub fn policy(&self) -> Arc<dyn AdmissionPolicy> {
        match self {
            AdmissionMode::Open => Arc::new(AcceptAll),
            AdmissionMode::Verified => Arc::new(VerifiedAdmission),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub difficulty: usize,
    pub mining_reward: u64,
    pub admission: AdmissionMode,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            difficulty: DEFAULT_DIFFICULTY,
            mining_reward: DEFAULT_MINING_REWARD,
            admission: AdmissionMode::default(),
        }
    }
}

impl LedgerConfig {
    /// Reads `path`, falling back to defaults when the file does not exist
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let config = if path.exists() {
            let config_str = fs::read_to_string(path)?;
            toml::from_str(&config_str)?
        } else {
            info!("No config at {}, using defaults", path.display());
            LedgerConfig::default()
        };

        config.validate()
    }

    /// Applies `POWLEDGER_*` environment overrides
    pub fn from_env(self) -> Result<Self, ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(DIFFICULTY_ENV) {
            self.difficulty = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("{} must be an integer, got {:?}", DIFFICULTY_ENV, value)))?;
        }

        if let Some(value) = lookup(MINING_REWARD_ENV) {
            self.mining_reward = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("{} must be an integer, got {:?}", MINING_REWARD_ENV, value)))?;
        }

        self.validate()
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.difficulty > MAX_DIFFICULTY {
            return Err(ConfigError::Invalid(format!(
                "difficulty must be at most {}, got {}",
                MAX_DIFFICULTY, self.difficulty
            )));
        }

        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = LedgerConfig::load(dir.path().join("absent.toml")).unwrap();

        assert_eq!(config, LedgerConfig::default());
        assert_eq!(config.difficulty, 2);
        assert_eq!(config.mining_reward, 100);
        assert_eq!(config.admission, AdmissionMode::Open);
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "difficulty = 3").unwrap();
        writeln!(file, "admission = \"verified\"").unwrap();

        let config = LedgerConfig::load(file.path()).unwrap();

        assert_eq!(config.difficulty, 3);
        assert_eq!(config.mining_reward, DEFAULT_MINING_REWARD);
        assert_eq!(config.admission, AdmissionMode::Verified);
    }

    #[test]
    fn test_rejects_bad_files() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "difficulty = \"two\"").unwrap();
        assert!(matches!(
            LedgerConfig::load(file.path()),
            Err(ConfigError::Parse(_))
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "difficulty = 65").unwrap();
        assert!(matches!(
            LedgerConfig::load(file.path()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [(DIFFICULTY_ENV, "4"), (MINING_REWARD_ENV, " 25 ")].into();

        let config = LedgerConfig::default()
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.difficulty, 4);
        assert_eq!(config.mining_reward, 25);
    }

    #[test]
    fn test_invalid_override() {
        let result = LedgerConfig::default().apply_overrides(|key| {
            (key == DIFFICULTY_ENV).then(|| "lots".to_string())
        });

        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
