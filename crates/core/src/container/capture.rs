//! Dependency capture during resolution
//!
//! Each producer call runs inside a capture frame pushed on a per-thread
//! resolution stack. Acquiring or reading a handle while a frame is open records
//! the handle's key in the innermost frame; when the producer returns, the frame's
//! keys become dependencies of the descriptor that was being built.
//!
//! `invoke()` never suspends while a frame is open, so the stack always belongs to
//! exactly one synchronous call chain, regardless of how many threads the async
//! runtime uses.

use std::cell::RefCell;

use crate::config::ContainerConfig;
use crate::container::key::ServiceKey;
use crate::errors::CoreError;

struct CaptureFrame {
    key: ServiceKey,
    captured: Vec<ServiceKey>,
}

thread_local! {
    static RESOLUTION_STACK: RefCell<Vec<CaptureFrame>> = const { RefCell::new(Vec::new()) };
}

/// Snapshot of the keys currently under construction, outermost first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionPath {
    pub services: Vec<ServiceKey>,
}

impl ResolutionPath {
    /// Capture the current thread's resolution path
    pub fn current() -> Self {
        RESOLUTION_STACK.with(|stack| Self {
            services: stack.borrow().iter().map(|f| f.key.clone()).collect(),
        })
    }

    /// Check if the path contains a service (for cycle detection)
    pub fn contains(&self, key: &ServiceKey) -> bool {
        self.services.contains(key)
    }

    /// Number of nested producer calls
    pub fn depth(&self) -> usize {
        self.services.len()
    }

    /// Get the path as a string for error messages
    pub fn path_string(&self) -> String {
        self.services
            .iter()
            .map(ServiceKey::label)
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

/// Record `key` as a dependency of the descriptor currently under construction
///
/// Outside of any producer call this does nothing.
pub fn record(key: &ServiceKey) {
    RESOLUTION_STACK.with(|stack| {
        if let Some(frame) = stack.borrow_mut().last_mut() {
            if frame.key != *key && !frame.captured.contains(key) {
                frame.captured.push(key.clone());
            }
        }
    });
}

/// Whether any producer call is in progress on this thread
pub fn is_capturing() -> bool {
    RESOLUTION_STACK.with(|stack| !stack.borrow().is_empty())
}

/// Open frame for one producer call; pops itself when finished or dropped
pub(crate) struct CaptureGuard {
    depth: usize,
    finished: bool,
}

impl CaptureGuard {
    /// Push a frame for `key`, refusing cycles and runaway nesting
    pub(crate) fn enter(key: &ServiceKey, config: &ContainerConfig) -> Result<Self, CoreError> {
        RESOLUTION_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();

            if config.detect_cycles && stack.iter().any(|frame| frame.key == *key) {
                let mut path: Vec<String> = stack.iter().map(|f| f.key.label()).collect();
                path.push(key.label());
                return Err(CoreError::CircularDependency {
                    path: path.join(" -> "),
                    cycle_service: key.label(),
                });
            }

            if stack.len() >= config.max_resolution_depth {
                return Err(CoreError::configuration(format!(
                    "resolution of '{}' exceeds the maximum depth of {}",
                    key, config.max_resolution_depth
                )));
            }

            stack.push(CaptureFrame {
                key: key.clone(),
                captured: Vec::new(),
            });
            Ok(Self {
                depth: stack.len(),
                finished: false,
            })
        })
    }

    /// Pop the frame and hand back everything it captured
    pub(crate) fn finish(mut self) -> Vec<ServiceKey> {
        self.finished = true;
        RESOLUTION_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            let captured = if stack.len() == self.depth {
                stack.pop().map(|frame| frame.captured).unwrap_or_default()
            } else {
                Vec::new()
            };
            stack.truncate(self.depth.saturating_sub(1));
            captured
        })
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        if !self.finished {
            RESOLUTION_STACK.with(|stack| {
                stack.borrow_mut().truncate(self.depth.saturating_sub(1));
            });
        }
    }
}
