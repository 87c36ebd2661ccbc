//! Invalidation and dependency-graph traversal
//!
//! Edges are stored forward only, on the consumer. Reverse edges are found by
//! scanning the registry's descriptors, which keeps registration cheap and makes
//! invalidation O(n) per changed key.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::container::descriptor::{Instance, Producer, ServiceDescriptor};
use crate::container::key::ServiceKey;
use crate::container::registry::Registry;
use crate::errors::CoreResult;

/// What a visitor wants done with the node it was shown
pub enum VisitAction {
    /// Leave the node as it is
    Keep,
    /// Overwrite the cached instance
    ///
    /// Only nodes built by a constructor or factory keep a cache. On any other
    /// node the replacement is ignored and the producer keeps answering.
    Replace(Instance),
    /// Drop the cached instance so the next read re-invokes the producer
    Destroy,
    /// Delete the descriptor; the next registration of the key starts fresh
    Remove,
}

impl fmt::Debug for VisitAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VisitAction::Keep => write!(f, "Keep"),
            VisitAction::Replace(_) => write!(f, "Replace(<instance>)"),
            VisitAction::Destroy => write!(f, "Destroy"),
            VisitAction::Remove => write!(f, "Remove"),
        }
    }
}

impl Registry {
    /// Invalidate `key` and, transitively, everything in this registry depending on it
    pub fn invalidate(&self, key: &ServiceKey) -> CoreResult<()> {
        let mut seen = HashSet::new();
        self.invalidate_from(key, &mut seen)
    }

    /// Invalidate the dependents of `key`, which has already been invalidated
    pub(crate) fn invalidate_dependents(&self, key: &ServiceKey) -> CoreResult<()> {
        let mut seen = HashSet::from([key.clone()]);
        self.invalidate_scan(key, &mut seen)
    }

    fn invalidate_from(&self, key: &ServiceKey, seen: &mut HashSet<ServiceKey>) -> CoreResult<()> {
        if !seen.insert(key.clone()) {
            return Ok(());
        }

        let Some(descriptor) = self.descriptor(key) else {
            if self.config().warn_unknown_invalidation {
                tracing::warn!(service = %key, "invalidate called on unknown key");
            }
            return Ok(());
        };

        descriptor.invalidate();
        self.invalidate_scan(key, seen)
    }

    fn invalidate_scan(&self, key: &ServiceKey, seen: &mut HashSet<ServiceKey>) -> CoreResult<()> {
        let dependents: Vec<ServiceKey> = self
            .read_map()?
            .values()
            .filter(|descriptor| descriptor.has_dependency(key))
            .map(|descriptor| descriptor.key().clone())
            .collect();

        for dependent in dependents {
            self.invalidate_from(&dependent, seen)?;
        }
        Ok(())
    }

    /// Depth-first walk from `key`, dependencies before dependents, each node once
    pub fn visit<F>(&self, key: &ServiceKey, mut visitor: F) -> CoreResult<()>
    where
        F: FnMut(&Arc<ServiceDescriptor>) -> VisitAction,
    {
        let mut seen = HashSet::new();
        self.visit_from(key, &mut visitor, &mut seen)
    }

    /// Walk every key registered on this registry, sharing one seen-set
    pub fn visit_all<F>(&self, mut visitor: F) -> CoreResult<()>
    where
        F: FnMut(&Arc<ServiceDescriptor>) -> VisitAction,
    {
        let mut seen = HashSet::new();
        for key in self.keys() {
            self.visit_from(&key, &mut visitor, &mut seen)?;
        }
        Ok(())
    }

    fn visit_from<F>(
        &self,
        key: &ServiceKey,
        visitor: &mut F,
        seen: &mut HashSet<ServiceKey>,
    ) -> CoreResult<()>
    where
        F: FnMut(&Arc<ServiceDescriptor>) -> VisitAction,
    {
        if !seen.insert(key.clone()) {
            return Ok(());
        }
        let Some(descriptor) = self.descriptor(key) else {
            return Ok(());
        };

        for dependency in descriptor.dependencies() {
            self.visit_from(&dependency, visitor, seen)?;
        }

        let action = visitor(&descriptor);
        self.apply(&descriptor, action)
    }

    fn apply(&self, descriptor: &Arc<ServiceDescriptor>, action: VisitAction) -> CoreResult<()> {
        match action {
            VisitAction::Keep => {}
            VisitAction::Replace(instance) => match descriptor.producer() {
                Producer::Constructor(_) | Producer::Factory(_) => {
                    descriptor.replace_instance(instance)
                }
                producer => tracing::debug!(
                    service = %descriptor.key(),
                    producer = producer.kind(),
                    "ignored replacement of an uncached service"
                ),
            },
            VisitAction::Destroy => {
                tracing::debug!(service = %descriptor.key(), "destroyed service instance");
                descriptor.destroy();
            }
            VisitAction::Remove => {
                // Only the local map is touched; an ancestor's registration survives.
                if self.write_map()?.remove(descriptor.key()).is_some() {
                    descriptor.destroy();
                    tracing::debug!(service = %descriptor.key(), "removed service");
                }
            }
        }
        Ok(())
    }

    /// Drop the cached instances of `key` and all of its dependencies
    pub fn destroy(&self, key: &ServiceKey) -> CoreResult<()> {
        self.visit(key, |_| VisitAction::Destroy)
    }

    /// Remove `key` and all of its dependencies from this registry
    pub fn remove(&self, key: &ServiceKey) -> CoreResult<()> {
        self.visit(key, |_| VisitAction::Remove)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::lifecycle::ServiceState;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn chain(registry: &Registry) -> (ServiceKey, ServiceKey, ServiceKey) {
        let a = ServiceKey::named("a");
        let b = ServiceKey::named("b");
        let c = ServiceKey::named("c");
        registry.register_value(&a, 1u32).unwrap();
        let dep = a.clone();
        registry
            .register_factory(&b, move |inv| Ok(*inv.registry()?.resolve::<u32>(&dep)? + 1))
            .unwrap();
        let dep = b.clone();
        registry
            .register_factory(&c, move |inv| Ok(*inv.registry()?.resolve::<u32>(&dep)? + 1))
            .unwrap();
        (a, b, c)
    }

    #[test]
    fn test_invalidate_walks_dependents() {
        let registry = Registry::new();
        let (a, b, c) = chain(&registry);
        assert_eq!(*registry.resolve::<u32>(&c).unwrap(), 3);

        let b_desc = registry.descriptor(&b).unwrap();
        let c_desc = registry.descriptor(&c).unwrap();
        assert!(b_desc.is_resolved() && c_desc.is_resolved());

        registry.invalidate(&a).unwrap();
        assert!(!b_desc.is_resolved());
        assert!(!c_desc.is_resolved());
    }

    #[test]
    fn test_invalidate_unknown_key_is_noop() {
        let registry = Registry::new();
        registry.invalidate(&ServiceKey::named("ghost")).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_invalidate_survives_cycles() {
        let registry = Registry::new();
        let x = ServiceKey::named("x");
        let y = ServiceKey::named("y");
        registry.register_value(&x, 0u8).unwrap().add_dependency([y.clone()]);
        registry.register_value(&y, 0u8).unwrap().add_dependency([x.clone()]);
        registry.invalidate(&x).unwrap();
    }

    #[test]
    fn test_visit_order_and_once() {
        let registry = Registry::new();
        let (a, b, c) = chain(&registry);
        registry.resolve::<u32>(&c).unwrap();
        registry.descriptor(&c).unwrap().add_dependency([a.clone()]);

        let mut order = Vec::new();
        registry
            .visit(&c, |descriptor| {
                order.push(descriptor.key().clone());
                VisitAction::Keep
            })
            .unwrap();
        assert_eq!(order, vec![a, b, c]);
    }

    #[test]
    fn test_visit_all_shares_seen_set() {
        let registry = Registry::new();
        chain(&registry);
        let c = ServiceKey::named("c");
        registry.resolve::<u32>(&c).unwrap();

        let mut visits = 0;
        registry
            .visit_all(|_| {
                visits += 1;
                VisitAction::Keep
            })
            .unwrap();
        assert_eq!(visits, 3);
    }

    #[test]
    fn test_replace_overwrites_cache() {
        let registry = Registry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let key = ServiceKey::named("n");
        registry
            .register_factory(&key, move |_| Ok(counter.fetch_add(1, Ordering::SeqCst)))
            .unwrap();
        registry.resolve::<usize>(&key).unwrap();

        registry
            .visit(&key, |_| VisitAction::Replace(Arc::new(99usize)))
            .unwrap();
        assert_eq!(*registry.resolve::<usize>(&key).unwrap(), 99);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_replace_leaves_value_services_alone() {
        let registry = Registry::new();
        let key = ServiceKey::named("fixed");
        registry.register_value(&key, 7usize).unwrap();

        registry
            .visit(&key, |_| VisitAction::Replace(Arc::new(99usize)))
            .unwrap();
        assert_eq!(*registry.resolve::<usize>(&key).unwrap(), 7);
        assert_eq!(
            registry.descriptor(&key).unwrap().state(),
            ServiceState::Uninvoked
        );
    }

    #[test]
    fn test_remove_only_touches_local_map() {
        let parent = Registry::new();
        let key = ServiceKey::named("shared");
        parent.register_value(&key, 1u8).unwrap();

        let child = parent.new_context();
        child.remove(&key).unwrap();
        assert!(parent.contains(&key));

        parent.remove(&key).unwrap();
        assert!(!parent.contains(&key));
        assert!(!child.contains(&key));
    }
}
