use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use crate::config::ContainerConfig;
use crate::container::autowiring::Injectable;
use crate::container::capture;
use crate::container::descriptor::{Arg, Instance, Invocation, Producer, ServiceDescriptor};
use crate::container::handle::Handle;
use crate::container::key::{ServiceKey, ServiceToken, TypedKey};
use crate::errors::{CoreError, CoreResult};

/// Callback fired once for every newly created descriptor, with its label
pub type ServiceAddedListener = Arc<dyn Fn(&Arc<ServiceDescriptor>, &str) + Send + Sync>;

/// Descriptors in registration order
#[derive(Default)]
pub(crate) struct DescriptorMap {
    by_key: HashMap<ServiceKey, Arc<ServiceDescriptor>>,
    order: Vec<ServiceKey>,
}

impl DescriptorMap {
    pub(crate) fn get(&self, key: &ServiceKey) -> Option<&Arc<ServiceDescriptor>> {
        self.by_key.get(key)
    }

    fn insert(&mut self, descriptor: Arc<ServiceDescriptor>) {
        let key = descriptor.key().clone();
        if self.by_key.insert(key.clone(), descriptor).is_none() {
            self.order.push(key);
        }
    }

    pub(crate) fn remove(&mut self, key: &ServiceKey) -> Option<Arc<ServiceDescriptor>> {
        let removed = self.by_key.remove(key)?;
        self.order.retain(|k| k != key);
        Some(removed)
    }

    pub(crate) fn keys(&self) -> &[ServiceKey] {
        &self.order
    }

    /// Descriptors in registration order
    pub(crate) fn values(&self) -> impl Iterator<Item = &Arc<ServiceDescriptor>> {
        self.order.iter().filter_map(|key| self.by_key.get(key))
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

pub(crate) struct RegistryInner {
    descriptors: RwLock<DescriptorMap>,
    listeners: RwLock<Vec<ServiceAddedListener>>,
    parent: Option<Registry>,
    config: ContainerConfig,
}

impl RegistryInner {
    pub(crate) fn config(&self) -> &ContainerConfig {
        &self.config
    }
}

/// Owns the descriptors of one context; cheap to clone
///
/// A registry may have a parent: lookups that miss locally fall through to the
/// parent chain, while every write lands in the registry it was made on, so a
/// child context can shadow a parent's registration without affecting it.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    /// Create a new root registry with default configuration
    pub fn new() -> Self {
        Self::with_config(ContainerConfig::default())
    }

    /// Create a new root registry
    pub fn with_config(config: ContainerConfig) -> Self {
        Self::build(config, None)
    }

    /// Create a root registry configured from the process environment
    pub fn from_env() -> CoreResult<Self> {
        Ok(Self::with_config(ContainerConfig::from_env()?))
    }

    fn build(config: ContainerConfig, parent: Option<Registry>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                descriptors: RwLock::new(DescriptorMap::default()),
                listeners: RwLock::new(Vec::new()),
                parent,
                config,
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<RegistryInner>) -> Self {
        Self { inner }
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.inner.config
    }

    pub fn parent(&self) -> Option<&Registry> {
        self.inner.parent.as_ref()
    }

    /// Child context reading through to this registry on miss
    pub fn new_context(&self) -> Registry {
        Self::build(self.inner.config.clone(), Some(self.clone()))
    }

    /// Whether both values refer to the same registry
    pub fn ptr_eq(&self, other: &Registry) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn read_map(&self) -> CoreResult<RwLockReadGuard<'_, DescriptorMap>> {
        self.inner
            .descriptors
            .read()
            .map_err(|_| CoreError::LockError {
                resource: "service_descriptors".to_string(),
            })
    }

    pub(crate) fn write_map(&self) -> CoreResult<RwLockWriteGuard<'_, DescriptorMap>> {
        self.inner
            .descriptors
            .write()
            .map_err(|_| CoreError::LockError {
                resource: "service_descriptors".to_string(),
            })
    }

    /// Descriptor registered directly on this registry
    pub fn local_descriptor(&self, key: &ServiceKey) -> Option<Arc<ServiceDescriptor>> {
        self.read_map().ok()?.get(key).cloned()
    }

    /// Descriptor for `key` here or in the nearest ancestor that has one
    pub fn descriptor(&self, key: &ServiceKey) -> Option<Arc<ServiceDescriptor>> {
        self.local_descriptor(key)
            .or_else(|| self.parent().and_then(|parent| parent.descriptor(key)))
    }

    /// Check if a key is registered here or in an ancestor
    pub fn contains(&self, key: &ServiceKey) -> bool {
        self.descriptor(key).is_some()
    }

    /// Keys registered directly on this registry, in registration order
    pub fn keys(&self) -> Vec<ServiceKey> {
        self.read_map()
            .map(|map| map.keys().to_vec())
            .unwrap_or_default()
    }

    /// Number of descriptors registered directly on this registry
    pub fn len(&self) -> usize {
        self.read_map().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribe to descriptor creation in this registry and its child contexts
    pub fn on_service_added<F>(&self, listener: F) -> CoreResult<()>
    where
        F: Fn(&Arc<ServiceDescriptor>, &str) + Send + Sync + 'static,
    {
        self.inner
            .listeners
            .write()
            .map_err(|_| CoreError::LockError {
                resource: "service_listeners".to_string(),
            })?
            .push(Arc::new(listener));
        Ok(())
    }

    fn listener_chain(&self) -> Vec<ServiceAddedListener> {
        let mut listeners = self
            .inner
            .listeners
            .read()
            .map(|listeners| listeners.clone())
            .unwrap_or_default();
        if let Some(parent) = self.parent() {
            listeners.extend(parent.listener_chain());
        }
        listeners
    }

    /// Insert a fresh local descriptor
    ///
    /// If another thread inserted `key` first, a configured `producer` is
    /// installed on that descriptor instead of being dropped.
    fn insert_new(
        &self,
        key: &ServiceKey,
        producer: Producer,
        args: Vec<Arg>,
    ) -> CoreResult<Arc<ServiceDescriptor>> {
        let descriptor = {
            let mut map = self.write_map()?;
            if let Some(existing) = map.get(key).cloned() {
                drop(map);
                if !matches!(producer, Producer::Empty) {
                    tracing::debug!(service = %key, "replacing concurrently registered producer");
                    existing.replace(producer, args);
                }
                return Ok(existing);
            }
            let descriptor =
                ServiceDescriptor::new(key.clone(), producer, args, self.downgrade());
            map.insert(descriptor.clone());
            descriptor
        };

        tracing::debug!(
            service = %key,
            producer = descriptor.producer().kind(),
            "registered service"
        );
        let label = descriptor.name();
        for listener in self.listener_chain() {
            listener(&descriptor, &label);
        }
        Ok(descriptor)
    }

    /// Local descriptor for `key`, shadowing any ancestor's
    pub(crate) fn register_local(&self, key: &ServiceKey) -> CoreResult<Arc<ServiceDescriptor>> {
        match self.local_descriptor(key) {
            Some(descriptor) => Ok(descriptor),
            None => self.insert_new(key, Producer::Empty, Vec::new()),
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<RegistryInner> {
        Arc::downgrade(&self.inner)
    }

    /// Local descriptor for `key`, creating an unconfigured one if absent
    ///
    /// Only this registry's own map is consulted. On a child context this
    /// shadows an ancestor's registration, so mutators applied to the result
    /// never reach the parent.
    pub fn register(&self, key: &ServiceKey) -> CoreResult<Arc<ServiceDescriptor>> {
        self.register_local(key)
    }

    /// Descriptor for `key` here or in an ancestor, registering locally if absent
    fn lookup_or_register(&self, key: &ServiceKey) -> CoreResult<Arc<ServiceDescriptor>> {
        match self.descriptor(key) {
            Some(descriptor) => Ok(descriptor),
            None => self.insert_new(key, Producer::Empty, Vec::new()),
        }
    }

    /// Register `producer` under `key` on this registry
    ///
    /// An existing local descriptor is reconfigured in place, which invalidates it
    /// and everything depending on it. A descriptor found only in an ancestor is
    /// shadowed, never modified.
    pub fn register_with(
        &self,
        key: &ServiceKey,
        producer: Producer,
        args: Vec<Arg>,
    ) -> CoreResult<Arc<ServiceDescriptor>> {
        if let Some(existing) = self.local_descriptor(key) {
            tracing::debug!(service = %key, "replacing service producer");
            existing.replace(producer, args);
            return Ok(existing);
        }
        self.insert_new(key, producer, args)
    }

    /// Register a plain value
    pub fn register_value<T: Send + Sync + 'static>(
        &self,
        key: &ServiceKey,
        value: T,
    ) -> CoreResult<Arc<ServiceDescriptor>> {
        self.register_with(key, Producer::value(value), Vec::new())
    }

    /// Register a factory under `key`
    pub fn register_factory<T, F>(&self, key: &ServiceKey, factory: F) -> CoreResult<Arc<ServiceDescriptor>>
    where
        T: Send + Sync + 'static,
        F: Fn(&Invocation<'_>) -> CoreResult<T> + Send + Sync + 'static,
    {
        self.register_with(key, Producer::factory(factory), Vec::new())
    }

    /// Register a constructor-style service keyed by its own type
    ///
    /// Without arguments an existing registration is returned unchanged; with
    /// arguments the constructor is (re)installed with them.
    pub fn register_type<T: Injectable>(&self, args: Vec<Arg>) -> CoreResult<Arc<ServiceDescriptor>> {
        let key = ServiceKey::of::<T>();
        if args.is_empty() {
            if let Some(existing) = self.local_descriptor(&key) {
                return Ok(existing);
            }
        }
        self.register_with(&key, Producer::constructor::<T>(), args)
    }

    /// Register a factory keyed by its own identity
    pub fn register_fn<T, F>(&self, factory: F, args: Vec<Arg>) -> CoreResult<Arc<ServiceDescriptor>>
    where
        T: Send + Sync + 'static,
        F: Fn(&Invocation<'_>) -> CoreResult<T> + Send + Sync + 'static,
    {
        let key = ServiceKey::function(&factory);
        if args.is_empty() {
            if let Some(existing) = self.local_descriptor(&key) {
                return Ok(existing);
            }
        }
        self.register_with(&key, Producer::factory(factory), args)
    }

    /// Register the factory behind a [`ServiceToken`]
    pub fn register_token<Tk, F>(&self, factory: F) -> CoreResult<Arc<ServiceDescriptor>>
    where
        Tk: ServiceToken,
        F: Fn(&Invocation<'_>) -> CoreResult<Tk::Service> + Send + Sync + 'static,
    {
        self.register_with(&Tk::key(), Producer::factory(factory), Vec::new())
    }

    /// Lazy handle to `key`, registering an unconfigured descriptor if absent
    ///
    /// Acquiring a handle inside a producer records `key` as a dependency.
    pub fn handle<T: Send + Sync + 'static>(&self, key: &ServiceKey) -> CoreResult<Handle<T>> {
        let descriptor = self.lookup_or_register(key)?;
        capture::record(key);
        Ok(descriptor.handle())
    }

    /// Lazy handle to a constructor-style service
    pub fn handle_type<T: Injectable>(&self) -> CoreResult<Handle<T>> {
        let descriptor = match self.descriptor(&ServiceKey::of::<T>()) {
            Some(descriptor) => descriptor,
            None => self.register_type::<T>(Vec::new())?,
        };
        capture::record(descriptor.key());
        Ok(descriptor.handle())
    }

    /// Resolve `key`, failing on an empty value
    pub fn resolve<T: Send + Sync + 'static>(&self, key: &ServiceKey) -> CoreResult<Arc<T>> {
        self.handle::<T>(key)?.get()
    }

    /// Resolve a typed key
    pub fn get<T: Send + Sync + 'static>(&self, key: &TypedKey<T>) -> CoreResult<Arc<T>> {
        self.resolve(key.key())
    }

    /// Resolve `key` without a type, `None` being the empty value
    pub fn resolve_any(&self, key: &ServiceKey) -> CoreResult<Option<Instance>> {
        let descriptor = self.lookup_or_register(key)?;
        capture::record(key);
        descriptor.invoke()
    }

    /// Resolve `key`, mapping an empty value to `None`
    pub fn resolve_optional<T: Send + Sync + 'static>(
        &self,
        key: &ServiceKey,
    ) -> CoreResult<Option<Arc<T>>> {
        self.handle::<T>(key)?.get_optional()
    }

    /// Register `producer` under `key` and resolve it
    pub fn resolve_with<T: Send + Sync + 'static>(
        &self,
        key: &ServiceKey,
        producer: Producer,
        args: Vec<Arg>,
    ) -> CoreResult<Arc<T>> {
        self.register_with(key, producer, args)?;
        self.resolve(key)
    }

    /// Resolve a constructor-style service, registering it on first use
    pub fn resolve_type<T: Injectable>(&self) -> CoreResult<Arc<T>> {
        self.handle_type::<T>()?.get()
    }

    /// Resolve the service behind a [`ServiceToken`]
    pub fn resolve_token<Tk: ServiceToken>(&self) -> CoreResult<Arc<Tk::Service>> {
        self.resolve(&Tk::key())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("services", &self.keys())
            .field("has_parent", &self.parent().is_some())
            .field("config", &self.inner.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[test]
    fn test_register_is_find_or_create() {
        let registry = Registry::new();
        let key = ServiceKey::token("port");

        let first = registry.register(&key).unwrap();
        let second = registry.register(&key).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unconfigured_key_fails_to_resolve() {
        let registry = Registry::new();
        let err = registry
            .resolve::<String>(&ServiceKey::token("missing"))
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_register_with_replaces_producer() {
        let registry = Registry::new();
        let key = ServiceKey::token("mode");

        registry.register_value(&key, "dev".to_string()).unwrap();
        assert_eq!(*registry.resolve::<String>(&key).unwrap(), "dev");

        registry.register_value(&key, "prod".to_string()).unwrap();
        assert_eq!(*registry.resolve::<String>(&key).unwrap(), "prod");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_child_context_shadows_parent() {
        let parent = Registry::new();
        let key = ServiceKey::token("greeting");
        parent.register_value(&key, "parent".to_string()).unwrap();

        let child = parent.new_context();
        assert_eq!(*child.resolve::<String>(&key).unwrap(), "parent");
        assert!(child.keys().is_empty(), "reads never copy into the child");

        child.register_value(&key, "child".to_string()).unwrap();
        assert_eq!(*child.resolve::<String>(&key).unwrap(), "child");
        assert_eq!(*parent.resolve::<String>(&key).unwrap(), "parent");
    }

    #[test]
    fn test_child_register_never_mutates_parent() {
        let parent = Registry::new();
        let key = ServiceKey::token("mode");
        parent.register_value(&key, "parent".to_string()).unwrap();
        let cached = parent.resolve::<String>(&key).unwrap();

        let child = parent.new_context();
        let local = child.register(&key).unwrap();
        assert!(!Arc::ptr_eq(&local, &parent.descriptor(&key).unwrap()));
        local.with_value("child".to_string()).with_cacheable(false);

        assert_eq!(*child.resolve::<String>(&key).unwrap(), "child");
        assert_eq!(*parent.resolve::<String>(&key).unwrap(), "parent");
        assert!(parent.descriptor(&key).unwrap().is_cacheable());
        assert!(Arc::ptr_eq(&cached, &parent.resolve::<String>(&key).unwrap()));
    }

    #[test]
    fn test_late_insert_installs_producer_on_existing_descriptor() {
        let registry = Registry::new();
        let key = ServiceKey::named("pool-size");
        let first = registry.register_value(&key, 4usize).unwrap();

        // Same path taken when another thread wins the insert race.
        let second = registry
            .insert_new(&key, Producer::value(8usize), Vec::new())
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*registry.resolve::<usize>(&key).unwrap(), 8);

        registry
            .insert_new(&key, Producer::Empty, Vec::new())
            .unwrap();
        assert_eq!(*registry.resolve::<usize>(&key).unwrap(), 8);
    }

    #[test]
    fn test_concurrent_registration_keeps_one_descriptor() {
        let registry = Registry::new();
        let key = ServiceKey::named("shared");
        let threads: Vec<_> = (0..8usize)
            .map(|n| {
                let (registry, key) = (registry.clone(), key.clone());
                std::thread::spawn(move || registry.register_value(&key, n).unwrap())
            })
            .collect();
        let descriptors: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();

        assert_eq!(registry.len(), 1);
        assert!(descriptors.iter().all(|d| Arc::ptr_eq(d, &descriptors[0])));
        assert!(*registry.resolve::<usize>(&key).unwrap() < 8);
    }

    #[test]
    fn test_keys_keep_registration_order() {
        let registry = Registry::new();
        let keys: Vec<_> = (0..5).map(|i| ServiceKey::named(format!("k{}", i))).collect();
        for key in &keys {
            registry.register(key).unwrap();
        }
        assert_eq!(registry.keys(), keys);
    }

    #[test]
    fn test_listeners_fire_once_per_new_descriptor() {
        let parent = Registry::new();
        let labels = Arc::new(Mutex::new(Vec::new()));
        let seen = labels.clone();
        parent
            .on_service_added(move |_, label| seen.lock().unwrap().push(label.to_string()))
            .unwrap();

        let key = ServiceKey::named("db");
        parent.register_value(&key, 1u8).unwrap();
        parent.register_value(&key, 2u8).unwrap();
        parent.register(&key).unwrap();

        let child = parent.new_context();
        child.register_value(&ServiceKey::named("cache"), 3u8).unwrap();

        assert_eq!(*labels.lock().unwrap(), vec!["db", "cache"]);
    }

    #[test]
    fn test_register_fn_keys_by_factory_identity() {
        let registry = Registry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let factory = move |_: &Invocation<'_>| -> CoreResult<usize> {
            Ok(counter.fetch_add(1, Ordering::SeqCst))
        };

        let key = ServiceKey::function(&factory);
        let descriptor = registry.register_fn(factory, vec![]).unwrap();
        assert_eq!(descriptor.key(), &key);
        assert_eq!(*registry.resolve::<usize>(&key).unwrap(), 0);
        assert_eq!(*registry.resolve::<usize>(&key).unwrap(), 0);
    }
}
