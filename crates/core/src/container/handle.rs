//! Lazy handles
//!
//! A handle is what callers receive instead of an instance. It is bound to one
//! descriptor for its whole life and does nothing until it is read; reading it
//! invokes the descriptor (or returns the cached value) and, if another producer
//! is running on this thread, records the handle's key as that producer's
//! dependency. Every handle for a descriptor is an equivalent view of it, so
//! cloning or re-acquiring handles is free.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::container::capture;
use crate::container::descriptor::{Instance, ServiceDescriptor};
use crate::container::key::ServiceKey;
use crate::errors::{CoreError, CoreResult};

/// Untyped handle, used for arguments and lists
#[derive(Clone)]
pub struct AnyHandle {
    descriptor: Arc<ServiceDescriptor>,
}

impl AnyHandle {
    pub(crate) fn bind(descriptor: Arc<ServiceDescriptor>) -> Self {
        Self { descriptor }
    }

    pub fn key(&self) -> &ServiceKey {
        self.descriptor.key()
    }

    pub fn descriptor(&self) -> &Arc<ServiceDescriptor> {
        &self.descriptor
    }

    /// Read the current value; failures surface here, never at acquisition
    pub fn resolve(&self) -> CoreResult<Option<Instance>> {
        capture::record(self.descriptor.key());
        self.descriptor.invoke()
    }

    /// View this handle as a `Handle<T>`; the type is checked on read
    pub fn downcast<T>(self) -> Handle<T> {
        Handle {
            inner: self,
            _marker: PhantomData,
        }
    }

    /// Whether both handles are bound to the same descriptor
    pub fn ptr_eq(&self, other: &AnyHandle) -> bool {
        Arc::ptr_eq(&self.descriptor, &other.descriptor)
    }
}

impl fmt::Debug for AnyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyHandle")
            .field("key", self.key())
            .field("state", &self.descriptor.state())
            .finish()
    }
}

/// Typed lazy handle to a service
pub struct Handle<T> {
    inner: AnyHandle,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> Handle<T> {
    pub fn key(&self) -> &ServiceKey {
        self.inner.key()
    }

    pub fn descriptor(&self) -> &Arc<ServiceDescriptor> {
        self.inner.descriptor()
    }

    /// Drop the type parameter
    pub fn erase(&self) -> AnyHandle {
        self.inner.clone()
    }

    pub fn ptr_eq(&self, other: &Handle<T>) -> bool {
        self.inner.ptr_eq(&other.inner)
    }
}

impl<T: Send + Sync + 'static> Handle<T> {
    /// Resolve the service; an empty value is an error
    pub fn get(&self) -> CoreResult<Arc<T>> {
        self.get_optional()?.ok_or_else(|| CoreError::EmptyService {
            service: self.key().label(),
        })
    }

    /// Resolve the service, mapping an empty optional value to `None`
    pub fn get_optional(&self) -> CoreResult<Option<Arc<T>>> {
        match self.inner.resolve()? {
            None => Ok(None),
            Some(instance) => instance
                .downcast::<T>()
                .map(Some)
                .map_err(|_| CoreError::TypeMismatch {
                    service: self.key().label(),
                    expected: std::any::type_name::<T>(),
                }),
        }
    }

    /// Run `f` against the resolved value
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> CoreResult<R> {
        let value = self.get()?;
        Ok(f(&value))
    }

    /// Whether the service currently resolves to nothing
    pub fn is_nullish(&self) -> CoreResult<bool> {
        Ok(self.inner.resolve()?.is_none())
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("key", self.key())
            .field("type", &std::any::type_name::<T>())
            .field("state", &self.descriptor().state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::descriptor::Producer;
    use crate::container::lifecycle::ServiceState;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_handle_is_lazy() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let descriptor = ServiceDescriptor::detached(
            ServiceKey::token("lazy"),
            Producer::factory(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(vec![1, 2, 3])
            }),
            vec![],
        );

        let handle = descriptor.handle::<Vec<i32>>();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(descriptor.state(), ServiceState::Uninvoked);

        assert_eq!(handle.with(|v| v.len()).unwrap(), 3);
        assert_eq!(handle.get().unwrap()[1], 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failure_surfaces_on_access() {
        let descriptor = ServiceDescriptor::detached(
            ServiceKey::token("broken"),
            Producer::factory(|_| -> CoreResult<u8> { Err(CoreError::service("broken", "nope")) }),
            vec![],
        );
        let handle = descriptor.handle::<u8>();
        assert!(handle.get().unwrap_err().is_service());
        assert!(handle.get().unwrap_err().is_service());
    }

    #[test]
    fn test_optional_empty_degrades() {
        let descriptor = ServiceDescriptor::detached(
            ServiceKey::token("maybe"),
            Producer::Value(None),
            vec![],
        );
        let handle = descriptor.handle::<String>();
        assert!(handle.is_nullish().unwrap());
        assert!(handle.get_optional().unwrap().is_none());
        assert!(matches!(
            handle.get().unwrap_err(),
            CoreError::EmptyService { .. }
        ));
    }

    #[test]
    fn test_wrong_type_is_reported() {
        let descriptor = ServiceDescriptor::detached(
            ServiceKey::token("number"),
            Producer::value(5u64),
            vec![],
        );
        let err = descriptor.handle::<String>().get().unwrap_err();
        assert!(matches!(err, CoreError::TypeMismatch { .. }));
    }

    #[test]
    fn test_handles_share_descriptor() {
        let descriptor =
            ServiceDescriptor::detached(ServiceKey::token("shared"), Producer::value(1u8), vec![]);
        let a = descriptor.handle::<u8>();
        let b = descriptor.handle::<u8>();
        assert!(a.ptr_eq(&b));
        assert!(a.erase().ptr_eq(&b.clone().erase()));
    }
}
