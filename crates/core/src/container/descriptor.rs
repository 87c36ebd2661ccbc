use std::any::{Any, TypeId};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use chrono::{DateTime, Utc};

use crate::config::ContainerConfig;
use crate::container::autowiring::Injectable;
use crate::container::capture::CaptureGuard;
use crate::container::handle::{AnyHandle, Handle};
use crate::container::key::ServiceKey;
use crate::container::lifecycle::ServiceState;
use crate::container::registry::{Registry, RegistryInner};
use crate::container::scope::ScopeRedirect;
use crate::errors::{CoreError, CoreResult};

/// A resolved service value
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Type-erased producer body; `Ok(None)` is the null/empty result
pub type ProducerFn = Arc<dyn Fn(&Invocation<'_>) -> CoreResult<Option<Instance>> + Send + Sync>;

/// Wraps every invocation of a descriptor; call `next.run()` to continue the chain
pub type Interceptor =
    Arc<dyn Fn(&ServiceDescriptor, Next<'_>) -> CoreResult<Option<Instance>> + Send + Sync>;

/// Continuation handed to an interceptor
pub struct Next<'a> {
    call: &'a dyn Fn() -> CoreResult<Option<Instance>>,
}

impl Next<'_> {
    /// Run the rest of the chain (remaining interceptors, then the producer)
    pub fn run(self) -> CoreResult<Option<Instance>> {
        (self.call)()
    }
}

/// A callable producer together with the identities used by `list_of`
#[derive(Clone)]
pub struct Callable {
    identity: TypeId,
    identity_name: &'static str,
    output: Option<TypeId>,
    call: ProducerFn,
}

impl Callable {
    /// Identity of the constructor type or factory closure
    pub fn identity(&self) -> TypeId {
        self.identity
    }

    /// Type of the value this callable produces, when known statically
    pub fn output(&self) -> Option<TypeId> {
        self.output
    }

    pub fn name(&self) -> &'static str {
        self.identity_name
    }
}

/// How a descriptor obtains its value; fixed at registration time
#[derive(Clone)]
pub enum Producer {
    /// Constructor of a type implementing [`Injectable`]
    Constructor(Callable),
    /// Factory closure or function
    Factory(Callable),
    /// Plain value, returned verbatim and never invoked
    Value(Option<Instance>),
    /// Redirect to the binding of the active scope branch
    Scoped(ScopeRedirect),
    /// Nothing registered yet
    Empty,
}

impl Producer {
    /// Constructor-style producer for `T`
    pub fn constructor<T: Injectable>() -> Self {
        Producer::Constructor(Callable {
            identity: TypeId::of::<T>(),
            identity_name: std::any::type_name::<T>(),
            output: Some(TypeId::of::<T>()),
            call: Arc::new(|invocation: &Invocation<'_>| {
                T::create(invocation).map(|value| Some(Arc::new(value) as Instance))
            }),
        })
    }

    /// Factory producing a `T`
    pub fn factory<T, F>(factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Invocation<'_>) -> CoreResult<T> + Send + Sync + 'static,
    {
        Producer::Factory(Callable {
            identity: TypeId::of::<F>(),
            identity_name: std::any::type_name::<F>(),
            output: Some(TypeId::of::<T>()),
            call: Arc::new(move |invocation: &Invocation<'_>| {
                factory(invocation).map(|value| Some(Arc::new(value) as Instance))
            }),
        })
    }

    /// Factory that may produce nothing
    pub fn optional_factory<T, F>(factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Invocation<'_>) -> CoreResult<Option<T>> + Send + Sync + 'static,
    {
        Producer::Factory(Callable {
            identity: TypeId::of::<F>(),
            identity_name: std::any::type_name::<F>(),
            output: Some(TypeId::of::<T>()),
            call: Arc::new(move |invocation: &Invocation<'_>| {
                factory(invocation).map(|value| value.map(|v| Arc::new(v) as Instance))
            }),
        })
    }

    /// Factory working directly on type-erased instances
    pub fn raw<F>(factory: F) -> Self
    where
        F: Fn(&Invocation<'_>) -> CoreResult<Option<Instance>> + Send + Sync + 'static,
    {
        Producer::Factory(Callable {
            identity: TypeId::of::<F>(),
            identity_name: std::any::type_name::<F>(),
            output: None,
            call: Arc::new(factory),
        })
    }

    /// Plain value
    pub fn value<T: Send + Sync + 'static>(value: T) -> Self {
        Producer::Value(Some(Arc::new(value)))
    }

    /// Plain, already type-erased value
    pub fn instance(instance: Instance) -> Self {
        Producer::Value(Some(instance))
    }

    /// Whether invoking this producer calls code
    pub fn is_invokable(&self) -> bool {
        matches!(
            self,
            Producer::Constructor(_) | Producer::Factory(_) | Producer::Scoped(_)
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Producer::Constructor(_) => "constructor",
            Producer::Factory(_) => "factory",
            Producer::Value(_) => "value",
            Producer::Scoped(_) => "scoped",
            Producer::Empty => "empty",
        }
    }

    /// Identity of the callable, if any
    pub fn callable(&self) -> Option<&Callable> {
        match self {
            Producer::Constructor(callable) | Producer::Factory(callable) => Some(callable),
            _ => None,
        }
    }

    /// Type of the produced value, when it can be known without invoking
    pub fn output_type(&self) -> Option<TypeId> {
        match self {
            Producer::Constructor(callable) | Producer::Factory(callable) => callable.output,
            Producer::Value(Some(instance)) => Some(Any::type_id(&**instance)),
            _ => None,
        }
    }
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Producer::Constructor(callable) => write!(f, "Constructor({})", callable.name()),
            Producer::Factory(callable) => write!(f, "Factory({})", callable.name()),
            Producer::Value(Some(_)) => write!(f, "Value(<instance>)"),
            Producer::Value(None) => write!(f, "Value(<empty>)"),
            Producer::Scoped(redirect) => write!(f, "Scoped({})", redirect.scope_id()),
            Producer::Empty => write!(f, "Empty"),
        }
    }
}

/// One positional argument handed to a producer
#[derive(Clone)]
pub enum Arg {
    /// A concrete value
    Value(Instance),
    /// A lazy handle, resolved when the producer reads it
    Handle(AnyHandle),
}

impl Arg {
    pub fn value<T: Send + Sync + 'static>(value: T) -> Self {
        Arg::Value(Arc::new(value))
    }

    pub fn handle<T>(handle: &Handle<T>) -> Self {
        Arg::Handle(handle.erase())
    }
}

impl<T> From<Handle<T>> for Arg {
    fn from(handle: Handle<T>) -> Self {
        Arg::Handle(handle.erase())
    }
}

impl From<AnyHandle> for Arg {
    fn from(handle: AnyHandle) -> Self {
        Arg::Handle(handle)
    }
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Value(_) => write!(f, "Value(<instance>)"),
            Arg::Handle(handle) => write!(f, "Handle({})", handle.key()),
        }
    }
}

/// Ordered producer arguments
#[derive(Debug, Clone, Default)]
pub struct Args(Vec<Arg>);

impl Args {
    pub fn new(args: Vec<Arg>) -> Self {
        Self(args)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Arg> {
        self.0.iter()
    }

    /// Keys of every handle argument
    pub fn handle_keys(&self) -> Vec<ServiceKey> {
        self.0
            .iter()
            .filter_map(|arg| match arg {
                Arg::Handle(handle) => Some(handle.key().clone()),
                Arg::Value(_) => None,
            })
            .collect()
    }

    /// Read argument `index`, resolving it first if it is a handle
    pub fn get_any(&self, index: usize) -> CoreResult<Option<Instance>> {
        match self.0.get(index) {
            Some(Arg::Value(value)) => Ok(Some(value.clone())),
            Some(Arg::Handle(handle)) => handle.resolve(),
            None => Err(CoreError::configuration(format!(
                "argument {} was not supplied (got {})",
                index,
                self.0.len()
            ))),
        }
    }

    /// Read argument `index` as a `T`
    pub fn get<T: Send + Sync + 'static>(&self, index: usize) -> CoreResult<Arc<T>> {
        let instance = self.get_any(index)?.ok_or_else(|| CoreError::EmptyService {
            service: format!("argument {}", index),
        })?;
        instance
            .downcast::<T>()
            .map_err(|_| CoreError::TypeMismatch {
                service: format!("argument {}", index),
                expected: std::any::type_name::<T>(),
            })
    }
}

impl From<Vec<Arg>> for Args {
    fn from(args: Vec<Arg>) -> Self {
        Self(args)
    }
}

/// Everything a producer can see while it runs
pub struct Invocation<'a> {
    descriptor: &'a Arc<ServiceDescriptor>,
    args: &'a Args,
}

impl<'a> Invocation<'a> {
    /// Key of the service being produced
    pub fn key(&self) -> &ServiceKey {
        &self.descriptor.key
    }

    pub fn descriptor(&self) -> &Arc<ServiceDescriptor> {
        self.descriptor
    }

    pub fn args(&self) -> &Args {
        self.args
    }

    /// Shorthand for `args().get(index)`
    pub fn arg<T: Send + Sync + 'static>(&self, index: usize) -> CoreResult<Arc<T>> {
        self.args.get(index)
    }

    /// The registry owning the descriptor, if it is still alive
    pub fn registry(&self) -> CoreResult<Registry> {
        self.descriptor.registry().ok_or_else(|| {
            CoreError::configuration(format!(
                "registry owning '{}' is no longer available",
                self.descriptor.key
            ))
        })
    }

    /// Acquire a handle from the owning registry; the key is recorded as a dependency
    pub fn handle<T: Send + Sync + 'static>(&self, key: &ServiceKey) -> CoreResult<Handle<T>> {
        self.registry()?.handle(key)
    }
}

struct DescriptorState {
    producer: Producer,
    args: Args,
    cacheable: bool,
    optional: bool,
    tags: Vec<ServiceKey>,
    dependencies: Vec<ServiceKey>,
    resolved: bool,
    dirty: bool,
    instance: Option<Instance>,
    interceptors: Vec<Interceptor>,
    description: Option<String>,
    name: Option<String>,
    resolved_at: Option<DateTime<Utc>>,
    generation: u64,
}

impl DescriptorState {
    fn add_dependencies<I: IntoIterator<Item = ServiceKey>>(&mut self, keys: I) {
        for key in keys {
            if !self.dependencies.contains(&key) {
                self.dependencies.push(key);
            }
        }
    }

    /// Returns true when a cached value was actually dropped
    fn invalidate(&mut self) -> bool {
        self.generation += 1;
        if !self.resolved {
            return false;
        }
        self.resolved = false;
        self.dirty = true;
        self.instance = None;
        true
    }
}

/// The mutable registration record of one service
pub struct ServiceDescriptor {
    key: ServiceKey,
    owner: Weak<RegistryInner>,
    state: RwLock<DescriptorState>,
}

impl fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read();
        f.debug_struct("ServiceDescriptor")
            .field("key", &self.key)
            .field("producer", &state.producer)
            .field("args", &state.args)
            .field("cacheable", &state.cacheable)
            .field("optional", &state.optional)
            .field("tags", &state.tags)
            .field("dependencies", &state.dependencies)
            .field("resolved", &state.resolved)
            .field("dirty", &state.dirty)
            .field("interceptors", &state.interceptors.len())
            .finish()
    }
}

impl ServiceDescriptor {
    pub(crate) fn new(
        key: ServiceKey,
        producer: Producer,
        args: Vec<Arg>,
        owner: Weak<RegistryInner>,
    ) -> Arc<Self> {
        let args = Args::new(args);
        let dependencies = args.handle_keys();
        Arc::new(Self {
            key,
            owner,
            state: RwLock::new(DescriptorState {
                producer,
                args,
                cacheable: true,
                optional: false,
                tags: Vec::new(),
                dependencies,
                resolved: false,
                dirty: false,
                instance: None,
                interceptors: Vec::new(),
                description: None,
                name: None,
                resolved_at: None,
                generation: 0,
            }),
        })
    }

    /// Standalone descriptor not owned by any registry
    pub fn detached(key: ServiceKey, producer: Producer, args: Vec<Arg>) -> Arc<Self> {
        Self::new(key, producer, args, Weak::new())
    }

    // Producers never run while the lock is held, so a poisoned lock still guards
    // consistent state.
    fn read(&self) -> RwLockReadGuard<'_, DescriptorState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, DescriptorState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn key(&self) -> &ServiceKey {
        &self.key
    }

    /// Display name: explicit name if set, otherwise the key label
    pub fn name(&self) -> String {
        self.read().name.clone().unwrap_or_else(|| self.key.label())
    }

    pub fn description(&self) -> Option<String> {
        self.read().description.clone()
    }

    pub(crate) fn registry(&self) -> Option<Registry> {
        self.owner.upgrade().map(Registry::from_inner)
    }

    pub(crate) fn owner(&self) -> Weak<RegistryInner> {
        self.owner.clone()
    }

    fn config(&self) -> ContainerConfig {
        self.owner
            .upgrade()
            .map(|inner| inner.config().clone())
            .unwrap_or_default()
    }

    /// Handle bound to this descriptor
    pub fn handle<T>(self: &Arc<Self>) -> Handle<T> {
        AnyHandle::bind(self.clone()).downcast()
    }

    pub fn producer(&self) -> Producer {
        self.read().producer.clone()
    }

    pub fn args(&self) -> Args {
        self.read().args.clone()
    }

    pub fn is_invokable(&self) -> bool {
        self.read().producer.is_invokable()
    }

    pub fn is_cacheable(&self) -> bool {
        self.read().cacheable
    }

    pub fn is_optional(&self) -> bool {
        self.read().optional
    }

    pub fn is_resolved(&self) -> bool {
        self.read().resolved
    }

    pub fn is_dirty(&self) -> bool {
        self.read().dirty
    }

    pub fn is_scoped(&self) -> bool {
        matches!(self.read().producer, Producer::Scoped(_))
    }

    pub fn state(&self) -> ServiceState {
        let state = self.read();
        if state.resolved {
            ServiceState::Invoked
        } else if state.dirty {
            ServiceState::Invalid
        } else {
            ServiceState::Uninvoked
        }
    }

    pub fn tags(&self) -> Vec<ServiceKey> {
        self.read().tags.clone()
    }

    pub fn has_tag(&self, tag: &ServiceKey) -> bool {
        self.read().tags.contains(tag)
    }

    /// Dependencies discovered so far, in discovery order
    pub fn dependencies(&self) -> Vec<ServiceKey> {
        self.read().dependencies.clone()
    }

    pub fn has_dependency(&self, key: &ServiceKey) -> bool {
        self.read().dependencies.contains(key)
    }

    /// Cached instance, if the descriptor currently holds one
    pub fn cached_instance(&self) -> Option<Instance> {
        self.read().instance.clone()
    }

    pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
        self.read().resolved_at
    }

    /// Idempotent union into the dependency set
    pub fn add_dependency<I: IntoIterator<Item = ServiceKey>>(&self, keys: I) -> &Self {
        self.write().add_dependencies(keys);
        self
    }

    /// Drop the cached value; a no-op if the descriptor was never invoked
    pub fn invalidate(&self) -> bool {
        let dropped = self.write().invalidate();
        if dropped {
            tracing::debug!(service = %self.key, "invalidated service");
        }
        dropped
    }

    /// Invalidate this descriptor and everything that depends on it
    pub(crate) fn invalidate_and_propagate(&self) {
        self.invalidate();
        if let Some(registry) = self.registry() {
            if let Err(error) = registry.invalidate_dependents(&self.key) {
                tracing::warn!(service = %self.key, %error, "failed to propagate invalidation");
            }
        }
    }

    /// Clear the cached value and resolved flag without marking it dirty
    pub(crate) fn destroy(&self) {
        let mut state = self.write();
        state.generation += 1;
        state.instance = None;
        state.resolved = false;
    }

    /// Overwrite the cached value
    pub(crate) fn replace_instance(&self, instance: Instance) {
        let mut state = self.write();
        state.generation += 1;
        state.instance = Some(instance);
        state.resolved = true;
        state.dirty = false;
    }

    /// Per-branch binding created when a scope is entered; never cached
    pub(crate) fn branch(
        key: ServiceKey,
        producer: Producer,
        args: Vec<Arg>,
        owner: Weak<RegistryInner>,
    ) -> Arc<Self> {
        let description = format!("scoped binding for '{}'", key);
        let descriptor = Self::new(key, producer, args, owner);
        {
            let mut state = descriptor.write();
            state.cacheable = false;
            state.description = Some(description);
        }
        descriptor
    }

    /// Turn this descriptor into a redirect to the active scope binding
    pub(crate) fn install_redirect(&self, redirect: ScopeRedirect) -> CoreResult<()> {
        {
            let mut state = self.write();
            if let Producer::Scoped(existing) = &state.producer {
                return Err(CoreError::configuration(format!(
                    "key '{}' is already bound to scope {}, a key can not be registered into more than one scope",
                    self.key,
                    existing.scope_id()
                )));
            }
            state.producer = redirect.into();
            state.cacheable = false;
        }
        self.invalidate_and_propagate();
        Ok(())
    }

    pub(crate) fn replace(&self, producer: Producer, args: Vec<Arg>) {
        {
            let mut state = self.write();
            let args = Args::new(args);
            state.add_dependencies(args.handle_keys());
            state.args = args;
            state.producer = producer;
        }
        self.invalidate_and_propagate();
    }

    /// Replace the producer arguments
    pub fn with_args(&self, args: Vec<Arg>) -> &Self {
        {
            let mut state = self.write();
            let args = Args::new(args);
            state.add_dependencies(args.handle_keys());
            state.args = args;
        }
        self.invalidate_and_propagate();
        self
    }

    /// Replace the producer
    pub fn with_service(&self, producer: Producer) -> &Self {
        self.write().producer = producer;
        self.invalidate_and_propagate();
        self
    }

    /// Store a plain value; it is returned verbatim and never invoked
    pub fn with_value<T: Send + Sync + 'static>(&self, value: T) -> &Self {
        self.with_service(Producer::value(value))
    }

    pub fn with_cacheable(&self, cacheable: bool) -> &Self {
        let changed = {
            let mut state = self.write();
            let changed = state.cacheable != cacheable;
            state.cacheable = cacheable;
            changed
        };
        if changed {
            self.invalidate_and_propagate();
        }
        self
    }

    pub fn with_optional(&self, optional: bool) -> &Self {
        self.write().optional = optional;
        self.invalidate_and_propagate();
        self
    }

    /// Replace the tag set used by `list_of`
    pub fn with_tags<I: IntoIterator<Item = ServiceKey>>(&self, tags: I) -> &Self {
        {
            let mut state = self.write();
            state.tags.clear();
            for tag in tags {
                if !state.tags.contains(&tag) {
                    state.tags.push(tag);
                }
            }
        }
        self.invalidate_and_propagate();
        self
    }

    /// Append interceptors; the first one registered runs outermost
    pub fn with_interceptors<I: IntoIterator<Item = Interceptor>>(&self, interceptors: I) -> &Self {
        self.write().interceptors.extend(interceptors);
        self.invalidate_and_propagate();
        self
    }

    pub fn with_interceptor<F>(&self, interceptor: F) -> &Self
    where
        F: Fn(&ServiceDescriptor, Next<'_>) -> CoreResult<Option<Instance>> + Send + Sync + 'static,
    {
        self.with_interceptors([Arc::new(interceptor) as Interceptor])
    }

    pub fn with_description(&self, description: impl Into<String>) -> &Self {
        self.write().description = Some(description.into());
        self
    }

    pub fn with_name(&self, name: impl Into<String>) -> &Self {
        self.write().name = Some(name.into());
        self
    }

    /// Produce the service value, running interceptors around the producer
    pub fn invoke(self: &Arc<Self>) -> CoreResult<Option<Instance>> {
        let interceptors = self.read().interceptors.clone();
        if interceptors.is_empty() {
            return self.invoke_producer();
        }
        self.run_chain(&interceptors)
    }

    fn run_chain(self: &Arc<Self>, chain: &[Interceptor]) -> CoreResult<Option<Instance>> {
        match chain.split_first() {
            None => self.invoke_producer(),
            Some((interceptor, rest)) => {
                let next = || self.run_chain(rest);
                interceptor(&**self, Next { call: &next })
            }
        }
    }

    fn invoke_producer(self: &Arc<Self>) -> CoreResult<Option<Instance>> {
        let (producer, args, generation) = {
            let state = self.read();
            match &state.producer {
                Producer::Value(value) => return Ok(value.clone()),
                Producer::Empty => {
                    return Err(CoreError::configuration(format!(
                        "service '{}' is not registered and can not be resolved without a producer",
                        self.key
                    )))
                }
                _ => {}
            }
            if state.resolved && !state.dirty && state.cacheable {
                return Ok(state.instance.clone());
            }
            (state.producer.clone(), state.args.clone(), state.generation)
        };

        let callable = match producer {
            Producer::Scoped(redirect) => return redirect.invoke(&self.key),
            Producer::Constructor(callable) | Producer::Factory(callable) => callable,
            Producer::Value(_) | Producer::Empty => {
                return Err(CoreError::configuration(format!(
                    "service '{}' changed while it was being resolved",
                    self.key
                )))
            }
        };

        tracing::trace!(service = %self.key, producer = callable.name(), "invoking producer");
        let guard = CaptureGuard::enter(&self.key, &self.config())?;
        let invocation = Invocation {
            descriptor: self,
            args: &args,
        };
        let result = (callable.call)(&invocation);
        let captured = guard.finish();

        let mut state = self.write();
        let value = match result {
            Ok(value) => value,
            Err(error) => {
                state.resolved = false;
                state.instance = None;
                return Err(error);
            }
        };

        state.add_dependencies(captured);
        if value.is_none() && !state.optional {
            state.resolved = false;
            state.instance = None;
            return Err(CoreError::configuration(format!(
                "service '{}' is not optional and produced no value",
                self.key
            )));
        }

        // A concurrent reconfiguration wins over the value computed from the old one.
        if state.generation == generation {
            state.resolved = true;
            state.dirty = false;
            state.resolved_at = Some(Utc::now());
            if state.cacheable {
                state.instance = value.clone();
            }
        }
        Ok(value)
    }
}
