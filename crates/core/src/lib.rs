pub mod config;
pub mod container;
pub mod errors;

// Re-export key types for convenience
pub use config::{env, env_required, path_of, ConfigError, ConfigSource, ContainerConfig, EnvSnapshot};
pub use container::{
    AnyHandle, Arg, Handle, Injectable, Invocation, Pending, Producer, Registry, ServiceDescriptor,
    ServiceKey, ServiceList, ServiceState, ServiceToken, TypedKey, VisitAction,
};
pub use errors::{CoreError, CoreResult};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Framework information
pub const FRAMEWORK_NAME: &str = "pod";

/// Get framework version
pub fn version() -> &'static str {
    VERSION
}

/// Get framework name
pub fn name() -> &'static str {
    FRAMEWORK_NAME
}
