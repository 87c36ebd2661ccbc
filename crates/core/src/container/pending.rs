//! Single-flight asynchronous services
//!
//! An async producer is stored as a [`Pending`] value: the descriptor caches the
//! shared in-flight future itself, so overlapping readers all await the same
//! computation and observe the same outcome once it settles. A failed computation
//! invalidates the descriptor, and the next read starts a new one.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};

use crate::container::descriptor::{Invocation, Producer, ServiceDescriptor};
use crate::container::key::ServiceKey;
use crate::container::registry::Registry;
use crate::errors::{CoreError, CoreResult};

type Settled<T> = Result<Arc<T>, Arc<CoreError>>;

/// Shared handle to an in-flight or settled async service value
pub struct Pending<T> {
    key: ServiceKey,
    shared: Shared<BoxFuture<'static, Settled<T>>>,
}

impl<T> Clone for Pending<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> Pending<T> {
    fn new<Fut>(key: ServiceKey, descriptor: &Arc<ServiceDescriptor>, future: Fut) -> Self
    where
        Fut: Future<Output = CoreResult<T>> + Send + 'static,
    {
        let descriptor = Arc::downgrade(descriptor);
        let label = key.clone();
        let shared = async move {
            match future.await {
                Ok(value) => Ok(Arc::new(value)),
                Err(error) => {
                    tracing::debug!(service = %label, %error, "async service failed");
                    if let Some(descriptor) = descriptor.upgrade() {
                        descriptor.invalidate_and_propagate();
                    }
                    Err(Arc::new(error))
                }
            }
        }
        .boxed()
        .shared();
        Self { key, shared }
    }

    pub fn key(&self) -> &ServiceKey {
        &self.key
    }

    /// Await the shared result
    pub async fn wait(&self) -> CoreResult<Arc<T>> {
        self.shared
            .clone()
            .await
            .map_err(|source| CoreError::Pending {
                service: self.key.label(),
                source,
            })
    }

    /// Whether the computation has finished
    pub fn is_settled(&self) -> bool {
        self.shared.peek().is_some()
    }

    /// The settled value, without waiting
    pub fn peek(&self) -> Option<Arc<T>> {
        match self.shared.peek() {
            Some(Ok(value)) => Some(value.clone()),
            _ => None,
        }
    }
}

impl<T> fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending")
            .field("key", &self.key)
            .field("settled", &self.shared.peek().is_some())
            .finish()
    }
}

impl Registry {
    /// Register an async factory whose in-flight future is shared by all readers
    ///
    /// The factory itself runs synchronously inside the resolution, so handles it
    /// reads before building its future are recorded as dependencies; reads
    /// performed inside the future are not.
    pub fn register_async<T, F, Fut>(&self, key: &ServiceKey, factory: F) -> CoreResult<Arc<ServiceDescriptor>>
    where
        T: Send + Sync + 'static,
        F: Fn(&Invocation<'_>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CoreResult<T>> + Send + 'static,
    {
        self.register_with(
            key,
            Producer::factory(move |invocation: &Invocation<'_>| {
                let future = factory(invocation);
                Ok(Pending::new(
                    invocation.key().clone(),
                    invocation.descriptor(),
                    future,
                ))
            }),
            Vec::new(),
        )
    }

    /// Resolve an async service registered with [`Registry::register_async`]
    ///
    /// Unlike synchronous resolution, a failure of the future comes back as
    /// [`CoreError::Pending`], because every reader shares one settled result.
    /// [`CoreError::producer_error`] returns the error the future raised.
    pub async fn resolve_async<T: Send + Sync + 'static>(&self, key: &ServiceKey) -> CoreResult<Arc<T>> {
        let pending = self.resolve::<Pending<T>>(key)?;
        pending.wait().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_overlapping_readers_share_one_flight() {
        let registry = Registry::new();
        let key = ServiceKey::token("slow");
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        registry
            .register_async(&key, move |_| {
                let counter = counter.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(counter.fetch_add(1, Ordering::SeqCst))
                }
            })
            .unwrap();

        let (a, b) = tokio::join!(
            registry.resolve_async::<usize>(&key),
            registry.resolve_async::<usize>(&key)
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let pending = registry.resolve::<Pending<usize>>(&key).unwrap();
        assert!(pending.is_settled());
        assert_eq!(pending.peek().map(|v| *v), Some(0));
    }

    #[tokio::test]
    async fn test_failure_is_shared_then_retried() {
        let registry = Registry::new();
        let key = ServiceKey::token("flaky");
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        registry
            .register_async(&key, move |_| {
                let attempt = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 0 {
                        Err(CoreError::service("flaky", "cold start"))
                    } else {
                        Ok("warm")
                    }
                }
            })
            .unwrap();

        let err = registry.resolve_async::<&str>(&key).await.unwrap_err();
        match &err {
            CoreError::Pending { source, .. } => assert!(source.is_service()),
            other => panic!("unexpected error: {}", other),
        }
        assert!(err.producer_error().is_service());

        assert_eq!(*registry.resolve_async::<&str>(&key).await.unwrap(), "warm");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
