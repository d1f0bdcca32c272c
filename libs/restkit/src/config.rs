//! Typed configuration for the query and submission pipeline.
//!
//! Layering (later wins): built-in defaults, an optional YAML file, then
//! `RESTKIT_`-prefixed environment variables with `__` as the section
//! separator (e.g. `RESTKIT_BATCH__DEPENDENCY_MARKER`).

use std::path::Path;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};

pub const ENV_PREFIX: &str = "RESTKIT_";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("invalid restkit configuration: {0}")]
    Invalid(#[from] Box<figment::Error>),

    #[error("batch.dependency_marker must not be empty")]
    EmptyDependencyMarker,

    #[error("query.max_top must be greater than zero")]
    ZeroMaxTop,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RestkitConfig {
    pub query: QueryConfig,
    pub batch: BatchConfig,
    pub conventions: ConventionConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueryConfig {
    /// Upper bound applied to `$top`; larger requests are clamped.
    pub max_top: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchConfig {
    /// Text whose presence in any sub-request body (case-insensitive) forces serial dispatch.
    pub dependency_marker: String,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            dependency_marker: "$".to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConventionConfig {
    /// Register the convention-based authorizers, filters and query processors.
    pub enabled: bool,
    /// Warn when a hook is missing but a near-miss name (type name instead of set name) exists.
    pub report_near_misses: bool,
}

impl Default for ConventionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            report_near_misses: true,
        }
    }
}

impl RestkitConfig {
    /// Loads defaults, then `path` (if any), then environment overrides.
    ///
    /// # Errors
    /// Returns `ConfigError` if a layer cannot be parsed or the result is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(RestkitConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::from_figment(&figment)
    }

    /// Extracts and validates the configuration from an existing figment.
    ///
    /// # Errors
    /// Returns `ConfigError` if extraction fails or the values are invalid.
    pub fn from_figment(figment: &Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch.dependency_marker.is_empty() {
            return Err(ConfigError::EmptyDependencyMarker);
        }
        if self.query.max_top == Some(0) {
            return Err(ConfigError::ZeroMaxTop);
        }
        Ok(())
    }
}
