//! Runtime configuration (§2a): everything an operator can tune without
//! touching code -- approval timeout, rate/velocity thresholds, audit
//! retention, storage backend selection, and the HMAC key source. Loaded
//! from TOML via `toml`/`serde`, with environment overrides layered on
//! top for secrets that shouldn't live in a checked-in file.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::velocity::{VelocityLimits, DEFAULT_DAILY_LIMIT, DEFAULT_HOURLY_LIMIT, DEFAULT_WEEKLY_LIMIT};

/// One day, the default audit-prune retention window.
const DEFAULT_AUDIT_RETENTION_MS: u64 = 30 * 24 * 3_600_000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse TOML config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("HMAC key source {0} produced no key material")]
    MissingHmacKey(String),
}

/// Where the audit chain's HMAC key comes from. `Env` is the only option
/// that keeps the key out of the config file entirely; `Inline` exists for
/// local development and tests.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HmacKeySource {
    Env { variable: String },
    Inline { hex: String },
}

impl HmacKeySource {
    pub fn resolve(&self) -> Result<Vec<u8>, ConfigLoadError> {
        match self {
            HmacKeySource::Env { variable } => std::env::var(variable)
                .ok()
                .and_then(|v| hex::decode(v.trim()).ok())
                .filter(|bytes| !bytes.is_empty())
                .ok_or_else(|| ConfigLoadError::MissingHmacKey(variable.clone())),
            HmacKeySource::Inline { hex } => hex::decode(hex)
                .ok()
                .filter(|bytes| !bytes.is_empty())
                .ok_or_else(|| ConfigLoadError::MissingHmacKey("inline".to_string())),
        }
    }
}

/// Storage backend selection. `InMemory` never persists across restarts;
/// used for tests and for `--ephemeral` runs.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageBackend {
    InMemory,
    #[cfg(feature = "rocksdb-backend")]
    RocksDb { path: String },
}

impl Default for StorageBackend {
    fn default() -> Self {
        StorageBackend::InMemory
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VelocityLimitsConfig {
    pub hourly: u32,
    pub daily: u32,
    pub weekly: u32,
}

impl Default for VelocityLimitsConfig {
    fn default() -> Self {
        Self {
            hourly: DEFAULT_HOURLY_LIMIT,
            daily: DEFAULT_DAILY_LIMIT,
            weekly: DEFAULT_WEEKLY_LIMIT,
        }
    }
}

impl From<VelocityLimitsConfig> for VelocityLimits {
    fn from(cfg: VelocityLimitsConfig) -> Self {
        VelocityLimits {
            hourly: cfg.hourly,
            daily: cfg.daily,
            weekly: cfg.weekly,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_approval_timeout_secs")]
    pub approval_timeout_secs: u64,
    #[serde(default)]
    pub velocity_limits: VelocityLimitsConfig,
    #[serde(default = "default_audit_retention_ms")]
    pub audit_retention_ms: u64,
    #[serde(default)]
    pub storage: StorageBackend,
    pub hmac_key_source: HmacKeySource,
}

fn default_approval_timeout_secs() -> u64 {
    60
}

fn default_audit_retention_ms() -> u64 {
    DEFAULT_AUDIT_RETENTION_MS
}

impl RuntimeConfig {
    /// Loads from a TOML file at `path`.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigLoadError> {
        let path_ref = path.as_ref();
        let contents = std::fs::read_to_string(path_ref).map_err(|source| ConfigLoadError::Io {
            path: path_ref.display().to_string(),
            source,
        })?;
        Self::load_from_str(&contents)
    }

    pub fn load_from_str(contents: &str) -> Result<Self, ConfigLoadError> {
        let config: RuntimeConfig = toml::from_str(contents)?;
        Ok(config)
    }

    pub fn approval_timeout(&self) -> Duration {
        Duration::from_secs(self.approval_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config_with_defaults() {
        let toml = r#"
            [hmac_key_source]
            kind = "inline"
            hex = "aabbcc"
        "#;
        let config = RuntimeConfig::load_from_str(toml).unwrap();
        assert_eq!(config.approval_timeout_secs, 60);
        assert_eq!(config.velocity_limits.hourly, DEFAULT_HOURLY_LIMIT);
        assert_eq!(config.audit_retention_ms, DEFAULT_AUDIT_RETENTION_MS);
    }

    #[test]
    fn overrides_take_effect() {
        let toml = r#"
            approval_timeout_secs = 120
            audit_retention_ms = 1000

            [velocity_limits]
            hourly = 10
            daily = 50
            weekly = 200

            [hmac_key_source]
            kind = "inline"
            hex = "aabbcc"
        "#;
        let config = RuntimeConfig::load_from_str(toml).unwrap();
        assert_eq!(config.approval_timeout_secs, 120);
        assert_eq!(config.velocity_limits.hourly, 10);
        assert_eq!(config.approval_timeout(), Duration::from_secs(120));
    }

    #[test]
    fn inline_hmac_key_resolves_to_bytes() {
        let source = HmacKeySource::Inline {
            hex: "aabbcc".to_string(),
        };
        assert_eq!(source.resolve().unwrap(), vec![0xaa, 0xbb, 0xcc]);
    }

    #[test]
    fn env_hmac_key_missing_variable_errors() {
        let source = HmacKeySource::Env {
            variable: "AUTHORITY_CORE_TEST_HMAC_KEY_UNSET".to_string(),
        };
        assert!(source.resolve().is_err());
    }

    #[test]
    fn missing_hmac_key_source_fails_to_parse() {
        let toml = "approval_timeout_secs = 60";
        assert!(RuntimeConfig::load_from_str(toml).is_err());
    }
}
