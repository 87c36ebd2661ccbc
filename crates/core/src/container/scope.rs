//! Per-task scoped bindings
//!
//! `Registry::scoped(key)` turns the registry's descriptor for `key` into a
//! redirect. Entering the returned [`ScopeEntry`] runs a future inside a task-local
//! frame that binds `key` to a fresh, non-cacheable descriptor; resolving `key`
//! anywhere inside that future, including in tasks started with [`spawn`], reaches
//! that binding. Frames are immutable and entering copies the enclosing frame, so
//! concurrently running tasks never observe each other's bindings.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use uuid::Uuid;

use crate::container::descriptor::{Arg, Instance, Invocation, Producer, ServiceDescriptor};
use crate::container::key::ServiceKey;
use crate::container::registry::Registry;
use crate::errors::{CoreError, CoreResult};

tokio::task_local! {
    static SCOPE_FRAME: ScopeFrame;
}

/// Bindings visible to the current task
#[derive(Clone, Default)]
pub struct ScopeFrame {
    bindings: Arc<HashMap<ServiceKey, Arc<ServiceDescriptor>>>,
}

impl ScopeFrame {
    /// Frame of the current task, if it runs inside any scope
    pub fn current() -> Option<ScopeFrame> {
        SCOPE_FRAME.try_with(|frame| frame.clone()).ok()
    }

    /// Copy of this frame with `key` bound to `descriptor`
    fn with_binding(&self, key: ServiceKey, descriptor: Arc<ServiceDescriptor>) -> ScopeFrame {
        let mut bindings = (*self.bindings).clone();
        bindings.insert(key, descriptor);
        ScopeFrame {
            bindings: Arc::new(bindings),
        }
    }

    pub fn get(&self, key: &ServiceKey) -> Option<Arc<ServiceDescriptor>> {
        self.bindings.get(key).cloned()
    }

    pub fn contains(&self, key: &ServiceKey) -> bool {
        self.bindings.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Run `future` with this frame installed
    pub fn scope<F: Future>(self, future: F) -> impl Future<Output = F::Output> {
        SCOPE_FRAME.scope(self, future)
    }
}

impl fmt::Debug for ScopeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.bindings.keys()).finish()
    }
}

/// Producer installed on a scoped key; delegates to the active binding
#[derive(Debug, Clone)]
pub struct ScopeRedirect {
    scope_id: Uuid,
}

impl ScopeRedirect {
    pub fn scope_id(&self) -> Uuid {
        self.scope_id
    }

    pub(crate) fn invoke(&self, key: &ServiceKey) -> CoreResult<Option<Instance>> {
        let binding = SCOPE_FRAME
            .try_with(|frame| frame.get(key))
            .ok()
            .flatten()
            .ok_or_else(|| {
                CoreError::scope_not_found(
                    key.label(),
                    format!(
                        "no binding in the current task for scope {}, resolve it inside ScopeEntry::enter",
                        self.scope_id
                    ),
                )
            })?;
        binding.invoke()
    }
}

impl From<ScopeRedirect> for Producer {
    fn from(redirect: ScopeRedirect) -> Self {
        Producer::Scoped(redirect)
    }
}

/// Operation entering a scope for one key
#[derive(Debug, Clone)]
pub struct ScopeEntry {
    id: Uuid,
    key: ServiceKey,
    owner: Registry,
}

impl ScopeEntry {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn key(&self) -> &ServiceKey {
        &self.key
    }

    fn bind(&self, producer: Producer, args: Vec<Arg>) -> ScopeFrame {
        let descriptor =
            ServiceDescriptor::branch(self.key.clone(), producer, args, self.owner.downgrade());
        tracing::trace!(service = %self.key, scope = %self.id, "entering scope");
        ScopeFrame::current()
            .unwrap_or_default()
            .with_binding(self.key.clone(), descriptor)
    }

    /// Run `future` with the key bound to `producer`
    ///
    /// The binding is fixed when this is called, not when the future is first
    /// polled. A nested entry for the same key overrides the outer one for its
    /// own future only.
    pub fn enter<F: Future>(
        &self,
        producer: Producer,
        args: Vec<Arg>,
        future: F,
    ) -> impl Future<Output = F::Output> {
        self.bind(producer, args).scope(future)
    }

    /// Run `future` with the key bound to `value`
    pub fn enter_value<T, F>(&self, value: T, future: F) -> impl Future<Output = F::Output>
    where
        T: Send + Sync + 'static,
        F: Future,
    {
        self.enter(Producer::value(value), Vec::new(), future)
    }

    /// Run `future` with the key bound to `factory`, called on every read
    pub fn enter_factory<T, P, F>(&self, factory: P, future: F) -> impl Future<Output = F::Output>
    where
        T: Send + Sync + 'static,
        P: Fn(&Invocation<'_>) -> CoreResult<T> + Send + Sync + 'static,
        F: Future,
    {
        self.enter(Producer::factory(factory), Vec::new(), future)
    }

    /// Run a synchronous closure with the key bound to `producer`
    pub fn enter_sync<R>(&self, producer: Producer, args: Vec<Arg>, f: impl FnOnce() -> R) -> R {
        SCOPE_FRAME.sync_scope(self.bind(producer, args), f)
    }
}

impl Registry {
    /// Make `key` resolve to whatever the current task's scope binds it to
    ///
    /// The local descriptor for `key` becomes a redirect; resolving it outside
    /// any entered scope fails with `ScopeNotFound`. A key can be scoped once.
    pub fn scoped(&self, key: &ServiceKey) -> CoreResult<ScopeEntry> {
        let descriptor = self.register_local(key)?;
        let id = Uuid::new_v4();
        descriptor.install_redirect(ScopeRedirect { scope_id: id })?;
        tracing::debug!(service = %key, scope = %id, "registered scoped service");
        Ok(ScopeEntry {
            id,
            key: key.clone(),
            owner: self.clone(),
        })
    }
}

/// Spawn a task that inherits the current scope frame
///
/// `tokio::spawn` does not carry task-locals into the new task.
pub fn spawn<F>(future: F) -> tokio::task::JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match ScopeFrame::current() {
        Some(frame) => tokio::spawn(SCOPE_FRAME.scope(frame, future)),
        None => tokio::spawn(future),
    }
}
