use crate::config::{parse_flag, ConfigError, ConfigSource, ConfigValidator, RangeValidator};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::Path;

pub const MAX_RESOLUTION_DEPTH_VAR: &str = "POD_MAX_RESOLUTION_DEPTH";
pub const DETECT_CYCLES_VAR: &str = "POD_DETECT_CYCLES";
pub const WARN_UNKNOWN_INVALIDATION_VAR: &str = "POD_WARN_UNKNOWN_INVALIDATION";

const DEFAULT_MAX_RESOLUTION_DEPTH: usize = 100;

/// Engine configuration shared by a registry and every child context created from it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// How many producer calls may be nested before resolution is aborted
    pub max_resolution_depth: usize,
    /// Fail with a circular-dependency error when a key re-enters its own resolution
    pub detect_cycles: bool,
    /// Log a warning when `invalidate` is called for a key the registry does not know
    pub warn_unknown_invalidation: bool,
}

impl ContainerConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self {
            max_resolution_depth: DEFAULT_MAX_RESOLUTION_DEPTH,
            detect_cycles: true,
            warn_unknown_invalidation: true,
        }
    }

    /// Load configuration from process environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new();

        if let Some(depth) = lookup(MAX_RESOLUTION_DEPTH_VAR) {
            config.max_resolution_depth =
                depth.trim().parse().map_err(|_| ConfigError::InvalidValue {
                    field: "max_resolution_depth".to_string(),
                    value: depth.clone(),
                    expected: "positive integer".to_string(),
                })?;
        }

        if let Some(flag) = lookup(DETECT_CYCLES_VAR) {
            config.detect_cycles = parse_flag("detect_cycles", &flag)?;
        }

        if let Some(flag) = lookup(WARN_UNKNOWN_INVALIDATION_VAR) {
            config.warn_unknown_invalidation = parse_flag("warn_unknown_invalidation", &flag)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML document
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        RangeValidator { min: 1, max: 10_000 }
            .validate("max_resolution_depth", &self.max_resolution_depth)
    }

    /// Get configuration source information for debugging
    pub fn config_sources(&self) -> HashMap<String, ConfigSource> {
        let source_of = |var: &str, default: String| {
            if env::var(var).is_ok() {
                ConfigSource::EnvVar(var.to_string())
            } else {
                ConfigSource::Default(default)
            }
        };

        let mut sources = HashMap::new();
        sources.insert(
            "max_resolution_depth".to_string(),
            source_of(MAX_RESOLUTION_DEPTH_VAR, DEFAULT_MAX_RESOLUTION_DEPTH.to_string()),
        );
        sources.insert(
            "detect_cycles".to_string(),
            source_of(DETECT_CYCLES_VAR, "true".to_string()),
        );
        sources.insert(
            "warn_unknown_invalidation".to_string(),
            source_of(WARN_UNKNOWN_INVALIDATION_VAR, "true".to_string()),
        );
        sources
    }
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ContainerConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, ContainerConfig::default());
        assert_eq!(config.max_resolution_depth, 100);
        assert!(config.detect_cycles);
    }

    #[test]
    fn test_lookup_overrides() {
        let config = ContainerConfig::from_lookup(lookup_from(&[
            (MAX_RESOLUTION_DEPTH_VAR, "12"),
            (DETECT_CYCLES_VAR, "false"),
        ]))
        .unwrap();

        assert_eq!(config.max_resolution_depth, 12);
        assert!(!config.detect_cycles);
        assert!(config.warn_unknown_invalidation);
    }

    #[test]
    fn test_invalid_depth_is_rejected() {
        let err = ContainerConfig::from_lookup(lookup_from(&[(MAX_RESOLUTION_DEPTH_VAR, "lots")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = ContainerConfig::from_lookup(lookup_from(&[(MAX_RESOLUTION_DEPTH_VAR, "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    #[serial_test::serial]
    fn test_config_sources() {
        env::set_var(DETECT_CYCLES_VAR, "false");
        let sources = ContainerConfig::from_env().unwrap().config_sources();
        env::remove_var(DETECT_CYCLES_VAR);

        assert_eq!(
            sources["detect_cycles"],
            ConfigSource::EnvVar(DETECT_CYCLES_VAR.to_string())
        );
        assert!(sources["max_resolution_depth"].is_default());
        assert_eq!(sources["max_resolution_depth"].to_string(), "default (100)");
    }

    #[test]
    fn test_yaml() {
        let config = ContainerConfig::from_yaml_str("max_resolution_depth: 8\n").unwrap();
        assert_eq!(config.max_resolution_depth, 8);
        assert!(config.detect_cycles);

        assert!(ContainerConfig::from_yaml_str("max_resolution_depth: [1]").is_err());
    }
}
