use serde::{Deserialize, Serialize};

use crate::errors::CoreError;

/// Lifecycle state of a service descriptor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    /// Registered but never produced
    #[default]
    Uninvoked,
    /// Produced; a cacheable descriptor holds the value
    Invoked,
    /// Was produced, then invalidated; the next access recomputes
    Invalid,
}

impl ServiceState {
    /// Check if the service currently counts as resolved
    pub fn is_invoked(&self) -> bool {
        matches!(self, ServiceState::Invoked)
    }

    /// Check if the service was invalidated since its last invocation
    pub fn is_invalid(&self) -> bool {
        matches!(self, ServiceState::Invalid)
    }

    /// Get the state name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Uninvoked => "uninvoked",
            ServiceState::Invoked => "invoked",
            ServiceState::Invalid => "invalid",
        }
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ServiceState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "uninvoked" => Ok(ServiceState::Uninvoked),
            "invoked" => Ok(ServiceState::Invoked),
            "invalid" => Ok(ServiceState::Invalid),
            _ => Err(CoreError::configuration(format!(
                "unknown service state '{}'",
                s
            ))),
        }
    }
}
