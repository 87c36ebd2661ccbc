use std::sync::Arc;

use crate::container::descriptor::{Arg, Invocation};
use crate::container::handle::Handle;
use crate::errors::{CoreError, CoreResult};

/// Trait for types that can be built by the engine from their registered arguments
///
/// Registering a type with [`Registry::register_type`](crate::container::Registry::register_type)
/// makes `ServiceKey::of::<T>()` resolve to `T::create(...)`. Arguments supplied at
/// registration are read positionally; handles among them are resolved lazily and
/// recorded as dependencies.
pub trait Injectable: Send + Sync + Sized + 'static {
    /// Create an instance of this service
    fn create(invocation: &Invocation<'_>) -> CoreResult<Self>;
}

/// Helper trait for extracting constructor parameters
pub trait ConstructorParameter: Sized {
    /// Read the parameter at `index` of the invocation's arguments
    fn resolve(invocation: &Invocation<'_>, index: usize) -> CoreResult<Self>;
}

/// Implementation for Arc<T> parameters
impl<T: Send + Sync + 'static> ConstructorParameter for Arc<T> {
    fn resolve(invocation: &Invocation<'_>, index: usize) -> CoreResult<Self> {
        invocation.arg::<T>(index)
    }
}

/// Implementation for Option<Arc<T>> parameters (optional dependencies)
impl<T: Send + Sync + 'static> ConstructorParameter for Option<Arc<T>> {
    fn resolve(invocation: &Invocation<'_>, index: usize) -> CoreResult<Self> {
        match invocation.arg::<T>(index) {
            Ok(value) => Ok(Some(value)),
            Err(CoreError::EmptyService { .. }) => Ok(None),
            Err(error) => Err(error),
        }
    }
}

/// Implementation for lazy handle parameters; the handle is kept unresolved
impl<T: Send + Sync + 'static> ConstructorParameter for Handle<T> {
    fn resolve(invocation: &Invocation<'_>, index: usize) -> CoreResult<Self> {
        match invocation.args().iter().nth(index) {
            Some(Arg::Handle(handle)) => Ok(handle.clone().downcast()),
            Some(Arg::Value(_)) => Err(CoreError::configuration(format!(
                "argument {} of '{}' is a value, expected a handle",
                index,
                invocation.key()
            ))),
            None => Err(CoreError::configuration(format!(
                "argument {} of '{}' was not supplied",
                index,
                invocation.key()
            ))),
        }
    }
}

/// Read a constructor parameter; shorthand used inside `Injectable::create`
pub fn parameter<P: ConstructorParameter>(invocation: &Invocation<'_>, index: usize) -> CoreResult<P> {
    P::resolve(invocation, index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{Producer, Registry, ServiceKey};

    struct Database {
        url: Arc<String>,
    }

    impl Injectable for Database {
        fn create(invocation: &Invocation<'_>) -> CoreResult<Self> {
            Ok(Self {
                url: parameter(invocation, 0)?,
            })
        }
    }

    struct Repository {
        database: Handle<Database>,
        cache: Option<Arc<u32>>,
    }

    impl Injectable for Repository {
        fn create(invocation: &Invocation<'_>) -> CoreResult<Self> {
            Ok(Self {
                database: parameter(invocation, 0)?,
                cache: parameter(invocation, 1)?,
            })
        }
    }

    #[test]
    fn test_constructor_reads_positional_args() {
        let registry = Registry::new();
        registry
            .register_type::<Database>(vec![Arg::value("sqlite::memory:".to_string())])
            .unwrap();

        let database = registry.resolve_type::<Database>().unwrap();
        assert_eq!(*database.url, "sqlite::memory:");
    }

    #[test]
    fn test_handle_and_optional_parameters() {
        let registry = Registry::new();
        registry
            .register_type::<Database>(vec![Arg::value("postgres://".to_string())])
            .unwrap();
        let cache_key = ServiceKey::token("cache");
        registry
            .register_with(&cache_key, Producer::Value(None), vec![])
            .unwrap();

        let database = registry.handle_type::<Database>().unwrap();
        let cache = registry.handle::<u32>(&cache_key).unwrap();
        registry
            .register_type::<Repository>(vec![database.into(), cache.into()])
            .unwrap();

        let repository = registry.resolve_type::<Repository>().unwrap();
        assert!(repository.cache.is_none());
        assert_eq!(*repository.database.get().unwrap().url, "postgres://");

        let descriptor = registry.descriptor(&ServiceKey::of::<Repository>()).unwrap();
        assert!(descriptor.has_dependency(&ServiceKey::of::<Database>()));
        assert!(descriptor.has_dependency(&cache_key));
    }
}
