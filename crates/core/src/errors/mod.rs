pub mod core;

pub use self::core::CoreError;

/// Result alias used throughout the engine
pub type CoreResult<T> = Result<T, CoreError>;
