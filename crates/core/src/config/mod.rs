pub mod container_config;
pub mod env;
pub mod path;
pub mod sources;
pub mod validation;

pub use container_config::{
    ContainerConfig, DETECT_CYCLES_VAR, MAX_RESOLUTION_DEPTH_VAR, WARN_UNKNOWN_INVALIDATION_VAR,
};
pub use env::{env, env_key, env_required, register_env, EnvSnapshot};
pub use path::{lookup_path, path_of};
pub use sources::ConfigSource;
pub use validation::{parse_flag, ConfigError, ConfigValidator, RangeValidator};
