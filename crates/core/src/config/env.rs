//! Environment-backed services
//!
//! The process environment is captured once into an [`EnvSnapshot`] service.
//! Each variable is then exposed as its own `String` service that reads the
//! snapshot through the registry, so replacing the snapshot invalidates every
//! variable derived from it.

use std::collections::HashMap;
use std::sync::Arc;

use crate::container::{Handle, Invocation, Producer, Registry, ServiceDescriptor, ServiceKey};
use crate::errors::CoreResult;

/// Immutable copy of a set of environment variables
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    /// Snapshot the current process environment
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Key of the [`EnvSnapshot`] service
pub fn env_key() -> ServiceKey {
    ServiceKey::named("env")
}

fn variable_key(name: &str) -> ServiceKey {
    ServiceKey::named(format!("env/{}", name))
}

/// Register the process environment snapshot, keeping an existing registration
pub fn register_env(registry: &Registry) -> CoreResult<Arc<ServiceDescriptor>> {
    let key = env_key();
    if let Some(existing) = registry.descriptor(&key) {
        if !matches!(existing.producer(), Producer::Empty) {
            return Ok(existing);
        }
    }
    let descriptor = registry
        .register_factory(&key, |_: &Invocation<'_>| Ok(EnvSnapshot::from_process()))?;
    descriptor.with_description("process environment snapshot");
    Ok(descriptor)
}

fn variable_producer(name: &str, default: Option<String>) -> Producer {
    let name = name.to_string();
    Producer::optional_factory(move |invocation: &Invocation<'_>| {
        let snapshot = invocation.registry()?.resolve::<EnvSnapshot>(&env_key())?;
        Ok(snapshot
            .get(&name)
            .map(str::to_string)
            .or_else(|| default.clone()))
    })
}

/// Handle to the environment variable `name`
///
/// Without a default the service is optional: an unset variable reads as
/// nothing rather than failing.
pub fn env(registry: &Registry, name: &str, default: Option<&str>) -> CoreResult<Handle<String>> {
    register_env(registry)?;
    let key = variable_key(name);
    let descriptor = registry.register_with(
        &key,
        variable_producer(name, default.map(str::to_string)),
        Vec::new(),
    )?;
    descriptor
        .with_optional(true)
        .with_description(format!("environment variable {}", name));
    registry.handle(&key)
}

/// Handle to an environment variable that must be set when it is read
pub fn env_required(registry: &Registry, name: &str) -> CoreResult<Handle<String>> {
    register_env(registry)?;
    let key = variable_key(name);
    let descriptor = registry.register_with(&key, variable_producer(name, None), Vec::new())?;
    descriptor
        .with_optional(false)
        .with_description(format!("required environment variable {}", name));
    registry.handle(&key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn registry_with(pairs: &[(&str, &str)]) -> Registry {
        let registry = Registry::new();
        registry
            .register_value(&env_key(), EnvSnapshot::from_pairs(pairs.iter().copied()))
            .unwrap();
        registry
    }

    #[test]
    fn test_env_reads_snapshot_and_default() {
        let registry = registry_with(&[("POD_HOST", "localhost")]);

        let host = env(&registry, "POD_HOST", None).unwrap();
        assert_eq!(host.get().unwrap().as_str(), "localhost");

        let port = env(&registry, "POD_PORT", Some("8080")).unwrap();
        assert_eq!(port.get().unwrap().as_str(), "8080");

        let missing = env(&registry, "POD_MISSING", None).unwrap();
        assert!(missing.get_optional().unwrap().is_none());
    }

    #[test]
    fn test_env_required_fails_when_unset() {
        let registry = registry_with(&[]);
        let token = env_required(&registry, "POD_TOKEN").unwrap();
        assert!(token.get().unwrap_err().is_configuration());
    }

    #[test]
    fn test_replacing_snapshot_invalidates_variables() {
        let registry = registry_with(&[("POD_MODE", "dev")]);
        let mode = env(&registry, "POD_MODE", None).unwrap();
        assert_eq!(mode.get().unwrap().as_str(), "dev");

        registry
            .register_value(&env_key(), EnvSnapshot::from_pairs([("POD_MODE", "prod")]))
            .unwrap();
        assert!(mode.descriptor().is_dirty());
        assert_eq!(mode.get().unwrap().as_str(), "prod");
    }

    #[test]
    #[serial]
    fn test_process_environment() {
        std::env::set_var("POD_ENV_TEST_VALUE", "42");
        let registry = Registry::new();
        let value = env_required(&registry, "POD_ENV_TEST_VALUE").unwrap();
        assert_eq!(value.get().unwrap().as_str(), "42");
        std::env::remove_var("POD_ENV_TEST_VALUE");
    }
}
