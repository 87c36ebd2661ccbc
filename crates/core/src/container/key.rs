//! Service key identity
//!
//! Every registration is addressed by a [`ServiceKey`]. A key is one of:
//!
//! - a **type** identity (`ServiceKey::of::<T>()`), used for constructor-style
//!   services implementing [`Injectable`](crate::container::Injectable),
//! - a **function** identity (`ServiceKey::function(&f)`), the concrete Rust type
//!   of a factory closure or fn item,
//! - an opaque **token** (`ServiceKey::token("label")`) allocated from a process-wide
//!   counter,
//! - a **named** key (`ServiceKey::named("env/PORT")`), interned by name so every
//!   caller spelling the same name reaches the same registration.
//!
//! Keys compare by identity. Labels are diagnostic only and may collide:
//!
//! ```rust
//! use pod_core::container::ServiceKey;
//!
//! let a = ServiceKey::token("database");
//! let b = ServiceKey::token("database");
//! assert_ne!(a, b);
//! assert_eq!(a.label(), b.label());
//! assert_eq!(ServiceKey::named("port"), ServiceKey::named("port"));
//! ```

use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_TOKEN_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone)]
enum KeyKind {
    Type {
        type_id: TypeId,
        type_name: &'static str,
    },
    Function {
        type_id: TypeId,
        type_name: &'static str,
    },
    Token {
        id: u64,
        label: Arc<str>,
    },
    Named(Arc<str>),
    ListOf(Arc<ServiceKey>),
}

/// Canonical, comparable identity of a registration
#[derive(Clone)]
pub struct ServiceKey {
    kind: KeyKind,
}

impl ServiceKey {
    /// Key for a type identity
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            kind: KeyKind::Type {
                type_id: TypeId::of::<T>(),
                type_name: std::any::type_name::<T>(),
            },
        }
    }

    /// Key for the identity of a factory function or closure
    ///
    /// Identity is the factory's type. Every closure produced by the same
    /// expression shares one type, so a helper that returns a closure, or a
    /// closure built in a loop, yields the same key each time. Use
    /// [`ServiceKey::token`] when each instance needs its own key.
    pub fn function<F: 'static>(_factory: &F) -> Self {
        Self::function_of::<F>()
    }

    /// Key for a factory identity given only its type
    pub fn function_of<F: 'static>() -> Self {
        Self {
            kind: KeyKind::Function {
                type_id: TypeId::of::<F>(),
                type_name: std::any::type_name::<F>(),
            },
        }
    }

    /// Allocate a fresh opaque token
    pub fn token(label: impl Into<String>) -> Self {
        let label: String = label.into();
        Self {
            kind: KeyKind::Token {
                id: NEXT_TOKEN_ID.fetch_add(1, Ordering::Relaxed),
                label: Arc::from(label),
            },
        }
    }

    /// Key interned by name
    pub fn named(name: impl Into<String>) -> Self {
        let name: String = name.into();
        Self {
            kind: KeyKind::Named(Arc::from(name)),
        }
    }

    /// Derived key under which `list_of(key)` results are registered
    pub fn list_of(key: &ServiceKey) -> Self {
        Self {
            kind: KeyKind::ListOf(Arc::new(key.clone())),
        }
    }

    /// Diagnostic label; not part of the identity for types, functions and tokens
    pub fn label(&self) -> String {
        match &self.kind {
            KeyKind::Type { type_name, .. } | KeyKind::Function { type_name, .. } => {
                type_name.to_string()
            }
            KeyKind::Token { label, .. } => label.to_string(),
            KeyKind::Named(name) => name.to_string(),
            KeyKind::ListOf(inner) => format!("list-of({})", inner.label()),
        }
    }

    /// The type identity behind a type key
    pub fn type_id(&self) -> Option<TypeId> {
        match &self.kind {
            KeyKind::Type { type_id, .. } => Some(*type_id),
            _ => None,
        }
    }

    /// The factory identity behind a function key
    pub fn function_id(&self) -> Option<TypeId> {
        match &self.kind {
            KeyKind::Function { type_id, .. } => Some(*type_id),
            _ => None,
        }
    }

    pub fn is_type(&self) -> bool {
        matches!(self.kind, KeyKind::Type { .. })
    }

    pub fn is_function(&self) -> bool {
        matches!(self.kind, KeyKind::Function { .. })
    }

    pub fn is_token(&self) -> bool {
        matches!(self.kind, KeyKind::Token { .. })
    }

    pub fn is_list(&self) -> bool {
        matches!(self.kind, KeyKind::ListOf(_))
    }

    fn kind_name(&self) -> &'static str {
        match &self.kind {
            KeyKind::Type { .. } => "type",
            KeyKind::Function { .. } => "fn",
            KeyKind::Token { .. } => "token",
            KeyKind::Named(_) => "named",
            KeyKind::ListOf(_) => "list",
        }
    }
}

impl PartialEq for ServiceKey {
    fn eq(&self, other: &Self) -> bool {
        match (&self.kind, &other.kind) {
            (KeyKind::Type { type_id: a, .. }, KeyKind::Type { type_id: b, .. }) => a == b,
            (KeyKind::Function { type_id: a, .. }, KeyKind::Function { type_id: b, .. }) => {
                a == b
            }
            (KeyKind::Token { id: a, .. }, KeyKind::Token { id: b, .. }) => a == b,
            (KeyKind::Named(a), KeyKind::Named(b)) => a == b,
            (KeyKind::ListOf(a), KeyKind::ListOf(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ServiceKey {}

impl Hash for ServiceKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(&self.kind).hash(state);
        match &self.kind {
            KeyKind::Type { type_id, .. } | KeyKind::Function { type_id, .. } => {
                type_id.hash(state)
            }
            KeyKind::Token { id, .. } => id.hash(state),
            KeyKind::Named(name) => name.hash(state),
            KeyKind::ListOf(inner) => inner.hash(state),
        }
    }
}

impl fmt::Debug for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            KeyKind::Token { id, label } => write!(f, "ServiceKey(token#{} {})", id, label),
            _ => write!(f, "ServiceKey({} {})", self.kind_name(), self.label()),
        }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// A key that also fixes the type of the value registered under it
///
/// Derefs to [`ServiceKey`], so it can be passed wherever a key is expected;
/// [`Registry::get`](crate::container::Registry::get) uses the type to resolve
/// without a turbofish.
pub struct TypedKey<T> {
    key: ServiceKey,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedKey<T> {
    /// Allocate a fresh token key
    pub fn new(label: impl Into<String>) -> Self {
        Self::from_key(ServiceKey::token(label))
    }

    /// Key interned by name
    pub fn named(name: impl Into<String>) -> Self {
        Self::from_key(ServiceKey::named(name))
    }

    pub fn from_key(key: ServiceKey) -> Self {
        Self {
            key,
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> &ServiceKey {
        &self.key
    }
}

impl<T> Clone for TypedKey<T> {
    fn clone(&self) -> Self {
        Self::from_key(self.key.clone())
    }
}

impl<T> Deref for TypedKey<T> {
    type Target = ServiceKey;

    fn deref(&self) -> &ServiceKey {
        &self.key
    }
}

impl<T> fmt::Debug for TypedKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypedKey<{}>({:?})", std::any::type_name::<T>(), self.key)
    }
}

/// Trait for service tokens that give a semantic name to a service type
///
/// Tokens are zero-sized types; the key derived from a token is its type identity,
/// and the value registered under it must be a `Self::Service`.
///
/// ```rust
/// use pod_core::container::{Registry, ServiceToken};
///
/// struct GreetingToken;
/// impl ServiceToken for GreetingToken {
///     type Service = String;
/// }
///
/// let registry = Registry::new();
/// registry.register_token::<GreetingToken, _>(|_| Ok("hello".to_string())).unwrap();
/// assert_eq!(*registry.resolve_token::<GreetingToken>().unwrap(), "hello");
/// ```
pub trait ServiceToken: Send + Sync + 'static {
    /// The service type this token represents
    type Service: Send + Sync + 'static;

    /// Key under which the token's service is registered
    fn key() -> ServiceKey {
        ServiceKey::of::<Self>()
    }

    /// Get the token type name
    fn token_type_name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct Database;

    #[test]
    fn test_type_keys_compare_by_type() {
        assert_eq!(ServiceKey::of::<Database>(), ServiceKey::of::<Database>());
        assert_ne!(ServiceKey::of::<Database>(), ServiceKey::of::<String>());
        assert!(ServiceKey::of::<Database>().label().contains("Database"));
        assert_eq!(
            ServiceKey::of::<Database>().type_id(),
            Some(TypeId::of::<Database>())
        );
    }

    #[test]
    fn test_tokens_are_unique_despite_labels() {
        let a = ServiceKey::token("config");
        let b = ServiceKey::token("config");
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
        assert_eq!(a.label(), "config");

        let set: HashSet<_> = [a.clone(), b, a].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_function_keys_follow_closure_identity() {
        let first = || 1;
        let second = || 1;
        assert_eq!(ServiceKey::function(&first), ServiceKey::function(&first));
        assert_ne!(ServiceKey::function(&first), ServiceKey::function(&second));
        assert!(ServiceKey::function(&first).is_function());
    }

    #[test]
    fn test_closures_from_one_expression_share_a_key() {
        fn make(offset: usize) -> impl Fn() -> usize {
            move || offset
        }
        let (one, two) = (make(1), make(2));
        assert_eq!(ServiceKey::function(&one), ServiceKey::function(&two));
    }

    #[test]
    fn test_kinds_never_alias() {
        let named = ServiceKey::named("x");
        let token = ServiceKey::token("x");
        assert_ne!(named, token);
        assert_eq!(named, ServiceKey::named("x"));

        let list = ServiceKey::list_of(&named);
        assert!(list.is_list());
        assert_eq!(list, ServiceKey::list_of(&ServiceKey::named("x")));
        assert_eq!(list.label(), "list-of(x)");
    }

    #[test]
    fn test_typed_keys_deref_to_their_key() {
        let port: TypedKey<u16> = TypedKey::new("port");
        let copy = port.clone();
        assert_eq!(*port, *copy);
        assert_eq!(port.label(), "port");
        assert_ne!(*port, *TypedKey::<u16>::new("port"));
    }
}
