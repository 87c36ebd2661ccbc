use std::sync::Arc;
use thiserror::Error;

use crate::config::ConfigError;

/// Core error type for the pod engine
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Scope not found for '{service}': {message}")]
    ScopeNotFound { service: String, message: String },

    #[error("Circular dependency detected: {path} (cycle at: {cycle_service})")]
    CircularDependency { path: String, cycle_service: String },

    #[error("Service '{service}' does not hold a value of type '{expected}'")]
    TypeMismatch {
        service: String,
        expected: &'static str,
    },

    #[error("Service '{service}' is optional and currently resolves to nothing")]
    EmptyService { service: String },

    #[error("Lock error on resource: {resource}")]
    LockError { resource: String },

    #[error("Service '{service}' failed: {source}")]
    Service {
        service: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Pending service '{service}' settled with an error: {source}")]
    Pending {
        service: String,
        source: Arc<CoreError>,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl CoreError {
    /// Create a new configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a new scope-not-found error
    pub fn scope_not_found(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ScopeNotFound {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Wrap an arbitrary error raised by a producer
    pub fn service<E>(service: impl Into<String>, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Service {
            service: service.into(),
            source: source.into(),
        }
    }

    /// Check if the error is a configuration error
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }

    /// Check if the error is a scope-not-found error
    pub fn is_scope_not_found(&self) -> bool {
        matches!(self, Self::ScopeNotFound { .. })
    }

    /// Check if the error reports a dependency cycle
    pub fn is_circular(&self) -> bool {
        matches!(self, Self::CircularDependency { .. })
    }

    /// Check if the error was raised by a producer
    pub fn is_service(&self) -> bool {
        matches!(self, Self::Service { .. })
    }

    /// The error an async producer actually raised
    ///
    /// A settled [`CoreError::Pending`] is shared between readers and has to
    /// hold its source behind an `Arc`; this unwraps it. Every other error is
    /// returned as is.
    pub fn producer_error(&self) -> &CoreError {
        match self {
            Self::Pending { source, .. } => source.producer_error(),
            other => other,
        }
    }
}
