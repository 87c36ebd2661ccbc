use std::collections::HashSet;
use std::sync::Arc;

use crate::container::capture;
use crate::container::descriptor::{Producer, ServiceDescriptor};
use crate::container::handle::{AnyHandle, Handle};
use crate::container::key::ServiceKey;
use crate::container::registry::Registry;
use crate::errors::CoreResult;

/// Handles to every service matching a `list_of` query, nearest context first
#[derive(Debug, Clone, Default)]
pub struct ServiceList {
    members: Vec<AnyHandle>,
}

impl ServiceList {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn handles(&self) -> &[AnyHandle] {
        &self.members
    }

    pub fn keys(&self) -> Vec<ServiceKey> {
        self.members.iter().map(|h| h.key().clone()).collect()
    }

    /// Resolve every member as a `T`; the first failure aborts
    pub fn resolve_all<T: Send + Sync + 'static>(&self) -> CoreResult<Vec<Arc<T>>> {
        self.members
            .iter()
            .map(|member| member.clone().downcast::<T>().get())
            .collect()
    }
}

/// Whether `descriptor` answers a `list_of(target)` query
fn matches(descriptor: &ServiceDescriptor, target: &ServiceKey) -> bool {
    if descriptor.key().is_list() {
        return false;
    }
    if descriptor.has_tag(target) {
        return true;
    }

    let producer = descriptor.producer();
    if let Some(function) = target.function_id() {
        return producer
            .callable()
            .is_some_and(|callable| callable.identity() == function);
    }
    if let Some(type_id) = target.type_id() {
        return match producer {
            Producer::Constructor(_) | Producer::Factory(_) | Producer::Value(_) => {
                producer.output_type() == Some(type_id)
            }
            Producer::Scoped(_) | Producer::Empty => false,
        };
    }
    false
}

impl Registry {
    /// Handle to the services tagged with, produced by, or producing `key`
    ///
    /// The list is registered once per key, is never cached, and is recomputed on
    /// every read, so it always reflects the current registrations of this registry
    /// and its ancestors.
    pub fn list_of(&self, key: &ServiceKey) -> CoreResult<Handle<ServiceList>> {
        let list_key = ServiceKey::list_of(key);
        let descriptor = match self.local_descriptor(&list_key) {
            Some(existing) => existing,
            None => {
                let target = key.clone();
                let descriptor = self.register_with(
                    &list_key,
                    Producer::factory(move |invocation| {
                        let registry = invocation.registry()?;
                        Ok(registry.collect_members(&target))
                    }),
                    Vec::new(),
                )?;
                descriptor
                    .with_cacheable(false)
                    .with_description(format!("services matching {}", key));
                descriptor
            }
        };
        capture::record(&list_key);
        Ok(descriptor.handle())
    }

    fn collect_members(&self, target: &ServiceKey) -> ServiceList {
        let mut seen = HashSet::new();
        let mut members = Vec::new();
        let mut current = Some(self);

        while let Some(registry) = current {
            if let Ok(map) = registry.read_map() {
                for descriptor in map.values() {
                    if seen.insert(descriptor.key().clone()) && matches(descriptor, target) {
                        members.push(AnyHandle::bind(descriptor.clone()));
                    }
                }
            }
            current = registry.parent();
        }

        for member in &members {
            capture::record(member.key());
        }
        ServiceList { members }
    }
}
