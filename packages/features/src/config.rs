//! Upstream source configuration.
//!
//! Defaults live in `config/sources.toml`, embedded at compile time. At
//! startup [`FeaturesConfig::from_env`] layers two kinds of override on top:
//!
//! - `SMALLBIZ_MAP_CONFIG`: path to a complete replacement TOML file.
//! - `SMALLBIZ_MAP_<SOURCE>_<FIELD>`: single-field overrides, where
//!   `<SOURCE>` is `CENSUS_GEO`, `CENSUS_ACS`, `POI` or `CRIME` and
//!   `<FIELD>` is one of `BASE_URL`, `TIMEOUT_SECS`, `CACHE_CAPACITY`,
//!   `MAX_RETRIES`, `RATE_LIMIT_CALLS`, `RATE_LIMIT_PERIOD_MS`.
//!
//! The merged configuration is validated before any limiter or cache is
//! built from it.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use smallbiz_map_features_models::SourceName;

use crate::http::RetryPolicy;
use crate::rate_limit::RateLimitPolicy;

/// Embedded default configuration.
const DEFAULT_CONFIG_TOML: &str = include_str!("../config/sources.toml");

/// Environment variable naming a replacement configuration file.
pub const CONFIG_PATH_ENV: &str = "SMALLBIZ_MAP_CONFIG";

/// Prefix for per-field environment overrides.
pub const ENV_PREFIX: &str = "SMALLBIZ_MAP";

/// Longest accepted per-request timeout.
pub const MAX_TIMEOUT_SECS: u64 = 3_600;

/// Longest accepted rate-limit window (one day).
pub const MAX_RATE_LIMIT_PERIOD_MS: u64 = 86_400_000;

/// Errors from loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The override file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// TOML parsing failed.
    #[error("invalid config TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// An environment override could not be parsed.
    #[error("invalid value {value:?} for {key}")]
    InvalidEnv {
        /// Variable name.
        key: String,
        /// Rejected value.
        value: String,
    },

    /// A source policy is unusable (zero capacity, zero window, ...).
    #[error("invalid {source_name} policy: {message}")]
    InvalidPolicy {
        /// Source whose policy was rejected.
        source_name: SourceName,
        /// What was wrong.
        message: String,
    },

    /// The shared HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Settings shared by every upstream source.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourcePolicy {
    /// Endpoint base URL.
    pub base_url: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Maximum cached results before LRU eviction.
    pub cache_capacity: usize,
    /// Retries for transient failures. `0` means fail fast.
    #[serde(default)]
    pub max_retries: u32,
    /// Sliding-window limit on calls to this source.
    pub rate_limit: RateLimitPolicy,
}

impl SourcePolicy {
    /// Per-request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Retry behaviour for this source.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries)
    }

    /// Cache capacity as a non-zero count, if valid.
    #[must_use]
    pub const fn cache_capacity(&self) -> Option<NonZeroUsize> {
        NonZeroUsize::new(self.cache_capacity)
    }

    fn validate(&self, source_name: SourceName) -> Result<(), ConfigError> {
        let invalid = |message: &str| ConfigError::InvalidPolicy {
            source_name,
            message: message.to_string(),
        };
        if self.base_url.trim().is_empty() {
            return Err(invalid("base_url is empty"));
        }
        if self.timeout_secs == 0 {
            return Err(invalid("timeout_secs must be positive"));
        }
        if self.timeout_secs > MAX_TIMEOUT_SECS {
            return Err(invalid(&format!(
                "timeout_secs must be at most {MAX_TIMEOUT_SECS}"
            )));
        }
        if self.cache_capacity == 0 {
            return Err(invalid("cache_capacity must be positive"));
        }
        if self.rate_limit.calls == 0 {
            return Err(invalid("rate_limit.calls must be positive"));
        }
        if self.rate_limit.period_ms == 0 {
            return Err(invalid("rate_limit.period_ms must be positive"));
        }
        if self.rate_limit.period_ms > MAX_RATE_LIMIT_PERIOD_MS {
            return Err(invalid(&format!(
                "rate_limit.period_ms must be at most {MAX_RATE_LIMIT_PERIOD_MS}"
            )));
        }
        Ok(())
    }

    fn apply_env<F>(&mut self, source_name: SourceName, lookup: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let prefix = format!("{ENV_PREFIX}_{}", source_name.as_ref().to_uppercase());

        if let Some(value) = lookup(&format!("{prefix}_BASE_URL")) {
            self.base_url = value;
        }
        override_parsed(lookup, &format!("{prefix}_TIMEOUT_SECS"), &mut self.timeout_secs)?;
        override_parsed(
            lookup,
            &format!("{prefix}_CACHE_CAPACITY"),
            &mut self.cache_capacity,
        )?;
        override_parsed(lookup, &format!("{prefix}_MAX_RETRIES"), &mut self.max_retries)?;
        override_parsed(
            lookup,
            &format!("{prefix}_RATE_LIMIT_CALLS"),
            &mut self.rate_limit.calls,
        )?;
        override_parsed(
            lookup,
            &format!("{prefix}_RATE_LIMIT_PERIOD_MS"),
            &mut self.rate_limit.period_ms,
        )?;
        Ok(())
    }
}

/// Census geographies (coordinate → tract) settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CensusGeoConfig {
    /// Shared source settings.
    #[serde(flatten)]
    pub policy: SourcePolicy,
    /// Address-range benchmark, e.g. `Public_AR_Current`.
    pub benchmark: String,
    /// Geography vintage, e.g. `Current_Current`.
    pub vintage: String,
}

/// ACS 5-year estimates settings. The survey year is part of `base_url`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CensusAcsConfig {
    /// Shared source settings.
    #[serde(flatten)]
    pub policy: SourcePolicy,
}

/// Overpass API settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OverpassConfig {
    /// Shared source settings.
    #[serde(flatten)]
    pub policy: SourcePolicy,
    /// Server-side query timeout passed in the Overpass QL header.
    pub query_timeout_secs: u32,
}

/// `ArcGIS` crime `FeatureServer` settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ArcGisCrimeConfig {
    /// Shared source settings.
    #[serde(flatten)]
    pub policy: SourcePolicy,
    /// Attribute holding the crime-type label.
    pub type_field: String,
    /// Attribute counted for per-type statistics.
    pub id_field: String,
}

/// Configuration for every upstream source.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FeaturesConfig {
    /// `User-Agent` sent with every upstream request.
    pub user_agent: String,
    /// Census geographies lookup.
    pub census_geo: CensusGeoConfig,
    /// ACS demographics lookup.
    pub census_acs: CensusAcsConfig,
    /// Overpass POI counts.
    pub poi: OverpassConfig,
    /// `ArcGIS` crime statistics.
    pub crime: ArcGisCrimeConfig,
}

impl FeaturesConfig {
    /// The embedded defaults, validated.
    ///
    /// # Panics
    ///
    /// Panics if the embedded TOML is malformed, which the test suite rules
    /// out.
    #[must_use]
    pub fn embedded() -> Self {
        Self::parse(DEFAULT_CONFIG_TOML)
            .unwrap_or_else(|e| panic!("Failed to parse embedded source config: {e}"))
    }

    /// Parses and validates a complete configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the TOML is malformed or a policy is
    /// invalid.
    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::de::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or is invalid.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents)
    }

    /// Loads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the override file or any override value
    /// is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Loads configuration using `lookup` to read variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the override file or any override value
    /// is invalid.
    pub fn load_with<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup(CONFIG_PATH_ENV) {
            Some(path) => {
                log::info!("Loading source config from {path}");
                Self::from_file(Path::new(&path))?
            }
            None => Self::embedded(),
        };

        config.census_geo.policy.apply_env(SourceName::CensusGeo, &lookup)?;
        config.census_acs.policy.apply_env(SourceName::CensusAcs, &lookup)?;
        config.poi.policy.apply_env(SourceName::Poi, &lookup)?;
        config.crime.policy.apply_env(SourceName::Crime, &lookup)?;

        config.validate()?;
        Ok(config)
    }

    /// Shared settings per upstream source.
    #[must_use]
    pub const fn policies(&self) -> [(SourceName, &SourcePolicy); 4] {
        [
            (SourceName::CensusGeo, &self.census_geo.policy),
            (SourceName::CensusAcs, &self.census_acs.policy),
            (SourceName::Poi, &self.poi.policy),
            (SourceName::Crime, &self.crime.policy),
        ]
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (source_name, policy) in self.policies() {
            policy.validate(source_name)?;
        }
        Ok(())
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, target: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(value) = lookup(key) {
        *target = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
            key: key.to_string(),
            value,
        })?;
    }
    Ok(())
}
