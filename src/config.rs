//! Interception configuration - file-based and environment-based
//!
//! - YAML configuration files ([`InterceptConfig::from_file`])
//! - Environment variables, optionally layered over a YAML file
//!   ([`InterceptConfig::from_env`])

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::mitm::cert_cache::DEFAULT_CACHE_SIZE;
use crate::mitm::certificate_authority::{LeafKeyAlgorithm, LeafProfile};
use crate::mitm::interceptor::{GenerationLock, InterceptMode};
use crate::mitm::tls_config::TlsVersion;

const ENV_PREFIX: &str = "EGRESS_INTERCEPT_";

/// Upper bound for `leaf_validity_hours` (825 days)
pub const MAX_LEAF_VALIDITY_HOURS: u64 = 825 * 24;

/// Upper bound for `clock_skew_secs` (7 days)
pub const MAX_CLOCK_SKEW_SECS: u64 = 7 * 24 * 3600;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Statically supplied certificate for one domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreconfiguredEntry {
    pub domain: String,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// TLS interception engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InterceptConfig {
    /// Global interception switch
    pub enabled: bool,

    pub mode: InterceptMode,

    /// CA certificate (PEM), required in MITM mode
    pub ca_cert_path: PathBuf,

    /// CA private key (PEM, PKCS#1 or PKCS#8 RSA), required in MITM mode
    pub ca_key_path: PathBuf,

    /// Certificate cache capacity; 0 means the default
    pub cert_cache_size: usize,

    pub domain_overrides: HashMap<String, bool>,

    pub ip_overrides: HashMap<String, bool>,

    pub preconfigured: Vec<PreconfiguredEntry>,

    pub leaf_key_algorithm: LeafKeyAlgorithm,

    pub leaf_validity_hours: u64,

    /// How far `not_before` is backdated
    pub clock_skew_secs: u64,

    /// Cached certificates older than this are regenerated. Off by default.
    pub max_certificate_age_secs: Option<u64>,

    pub generation_lock: GenerationLock,

    pub tls_version: TlsVersion,
}

impl Default for InterceptConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: InterceptMode::Mitm,
            ca_cert_path: PathBuf::from("ca.crt"),
            ca_key_path: PathBuf::from("ca.key"),
            cert_cache_size: DEFAULT_CACHE_SIZE,
            domain_overrides: HashMap::new(),
            ip_overrides: HashMap::new(),
            preconfigured: Vec::new(),
            leaf_key_algorithm: LeafKeyAlgorithm::default(),
            leaf_validity_hours: 24,
            clock_skew_secs: 3600,
            max_certificate_age_secs: None,
            generation_lock: GenerationLock::default(),
            tls_version: TlsVersion::default(),
        }
    }
}

impl InterceptConfig {
    /// Load configuration from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileReadError(e.to_string()))?;

        Self::from_yaml(&content)
    }

    /// Parse and validate YAML text
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `EGRESS_INTERCEPT_*` environment variables.
    ///
    /// `EGRESS_INTERCEPT_CONFIG` names a YAML file used as the base; every
    /// other variable overrides the matching field.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok(); // Load .env file if present

        let mut config = match env_var("CONFIG") {
            Some(path) => Self::from_file(&path)
                .with_context(|| format!("Invalid {ENV_PREFIX}CONFIG ({path})"))?,
            None => Self::default(),
        };

        if let Some(val) = env_var("ENABLED") {
            config.enabled = val.parse().context("Invalid EGRESS_INTERCEPT_ENABLED")?;
        }
        if let Some(val) = env_var("MODE") {
            config.mode = parse_named(&val).context("Invalid EGRESS_INTERCEPT_MODE")?;
        }
        if let Some(val) = env_var("CA_CERT_PATH") {
            config.ca_cert_path = PathBuf::from(val);
        }
        if let Some(val) = env_var("CA_KEY_PATH") {
            config.ca_key_path = PathBuf::from(val);
        }
        if let Some(val) = env_var("CERT_CACHE_SIZE") {
            config.cert_cache_size = val
                .parse()
                .context("Invalid EGRESS_INTERCEPT_CERT_CACHE_SIZE")?;
        }
        if let Some(val) = env_var("LEAF_KEY_ALGORITHM") {
            config.leaf_key_algorithm =
                parse_named(&val).context("Invalid EGRESS_INTERCEPT_LEAF_KEY_ALGORITHM")?;
        }
        if let Some(val) = env_var("LEAF_VALIDITY_HOURS") {
            config.leaf_validity_hours = val
                .parse()
                .context("Invalid EGRESS_INTERCEPT_LEAF_VALIDITY_HOURS")?;
        }
        if let Some(val) = env_var("CLOCK_SKEW_SECS") {
            config.clock_skew_secs = val
                .parse()
                .context("Invalid EGRESS_INTERCEPT_CLOCK_SKEW_SECS")?;
        }
        if let Some(val) = env_var("MAX_CERTIFICATE_AGE_SECS") {
            config.max_certificate_age_secs = Some(
                val.parse()
                    .context("Invalid EGRESS_INTERCEPT_MAX_CERTIFICATE_AGE_SECS")?,
            );
        }
        if let Some(val) = env_var("GENERATION_LOCK") {
            config.generation_lock =
                parse_named(&val).context("Invalid EGRESS_INTERCEPT_GENERATION_LOCK")?;
        }
        if let Some(val) = env_var("TLS_VERSION") {
            config.tls_version = parse_named(&val).context("Invalid EGRESS_INTERCEPT_TLS_VERSION")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.leaf_validity_hours == 0 || self.leaf_validity_hours > MAX_LEAF_VALIDITY_HOURS {
            return Err(ConfigError::ValidationError(format!(
                "leaf_validity_hours must be between 1 and {MAX_LEAF_VALIDITY_HOURS}"
            )));
        }

        if self.clock_skew_secs > MAX_CLOCK_SKEW_SECS {
            return Err(ConfigError::ValidationError(format!(
                "clock_skew_secs must be at most {MAX_CLOCK_SKEW_SECS}"
            )));
        }

        if self.mode == InterceptMode::Mitm {
            if self.ca_cert_path.as_os_str().is_empty() {
                return Err(ConfigError::ValidationError(
                    "ca_cert_path is required in mitm mode".to_string(),
                ));
            }
            if self.ca_key_path.as_os_str().is_empty() {
                return Err(ConfigError::ValidationError(
                    "ca_key_path is required in mitm mode".to_string(),
                ));
            }
        }

        if let Some(max_age) = self.max_certificate_age_secs {
            let validity_secs = self.leaf_validity_secs();
            if max_age == 0 || max_age >= validity_secs {
                return Err(ConfigError::ValidationError(format!(
                    "max_certificate_age_secs must be between 1 and {} (leaf validity)",
                    validity_secs - 1
                )));
            }
        }

        for entry in &self.preconfigured {
            if entry.domain.is_empty() {
                return Err(ConfigError::ValidationError(
                    "preconfigured entry with empty domain".to_string(),
                ));
            }
            if entry.cert_path.as_os_str().is_empty() || entry.key_path.as_os_str().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "preconfigured entry for {} is missing cert_path or key_path",
                    entry.domain
                )));
            }
        }

        Ok(())
    }

    /// Generated-leaf shape derived from this configuration
    pub fn leaf_profile(&self) -> LeafProfile {
        LeafProfile {
            key_algorithm: self.leaf_key_algorithm,
            validity: Duration::from_secs(self.leaf_validity_secs()),
            clock_skew: Duration::from_secs(self.clock_skew_secs),
        }
    }

    fn leaf_validity_secs(&self) -> u64 {
        self.leaf_validity_hours.saturating_mul(3600)
    }

    pub fn max_certificate_age(&self) -> Option<Duration> {
        self.max_certificate_age_secs.map(Duration::from_secs)
    }
}

fn env_var(suffix: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}{suffix}")).ok()
}

/// Parse a bare enum name ("per-name", "tls13-only") with its serde spelling
fn parse_named<T: DeserializeOwned>(value: &str) -> Result<T> {
    serde_yaml::from_str(value.trim()).map_err(|e| anyhow::anyhow!("{value:?}: {e}"))
}
