use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use crate::storage::StorageCell;

/// Key type identifying component types at runtime.
///
/// Any hashable, equality-comparable, cloneable value works: an enum, an
/// integer, a `&'static str`, a `String`, or a user-defined wrapper.
/// Implemented automatically for every qualifying type.
pub trait TypeKey: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

impl<K> TypeKey for K where K: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

/// A component type attachable to entities of stores keyed by `K`.
///
/// `Default` is the component's default constructor (used by callers that
/// attach a blank component), `Clone` its copy constructor (used exactly
/// once per component by store deep copies), and `Drop` its destructor.
///
/// # Example
///
/// ```
/// use loam_ecs::Component;
///
/// #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
/// enum CompKind { Transform, Movement }
///
/// #[derive(Default, Clone)]
/// struct Transform { x: i32, y: i32 }
///
/// impl Component<CompKind> for Transform {
///     fn type_id() -> CompKind { CompKind::Transform }
/// }
/// ```
pub trait Component<K: TypeKey>: Default + Clone + Send + Sync + 'static {
    /// Returns the runtime key identifying this component type.
    fn type_id() -> K;
}

/// Error returned when a component key has no registered descriptor.
#[derive(Debug, Clone)]
pub struct ComponentNotRegistered<K> {
    /// The key that failed to resolve.
    pub key: K,
}

impl<K: fmt::Debug> fmt::Display for ComponentNotRegistered<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "component key {:?} has never been registered; call ComponentRegistry::register() first",
            self.key
        )
    }
}

impl<K: fmt::Debug> std::error::Error for ComponentNotRegistered<K> {}

struct ComponentDescriptor<K> {
    type_name: &'static str,
    new_storage: fn() -> StorageCell<K>,
}

/// Maps component keys to their type descriptors.
///
/// A registry is populated up front with [`register`](Self::register) and
/// then shared immutably (typically behind an `Arc`) by every store that
/// uses it. Lookups after construction are read-only, so independent stores
/// may consult one registry from different threads without locking.
pub struct ComponentRegistry<K: TypeKey> {
    descriptors: HashMap<K, ComponentDescriptor<K>>,
}

impl<K: TypeKey> ComponentRegistry<K> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            descriptors: HashMap::new(),
        }
    }

    /// Registers component type `T` under its [`Component::type_id`] key.
    ///
    /// # Panics
    ///
    /// Panics if another component type is already registered under the
    /// same key.
    pub fn register<T: Component<K>>(&mut self) {
        let key = T::type_id();
        let previous = self.descriptors.insert(
            key.clone(),
            ComponentDescriptor {
                type_name: std::any::type_name::<T>(),
                new_storage: StorageCell::new::<T>,
            },
        );
        if let Some(previous) = previous {
            panic!(
                "component key {:?} registered twice: {} and {}",
                key,
                previous.type_name,
                std::any::type_name::<T>()
            );
        }
    }

    /// Returns whether a descriptor exists for `key`.
    pub fn is_registered(&self, key: &K) -> bool {
        self.descriptors.contains_key(key)
    }

    /// Returns the registered type name for `key`, if any.
    pub fn type_name(&self, key: &K) -> Option<&'static str> {
        self.descriptors.get(key).map(|d| d.type_name)
    }

    /// Returns the number of registered component types.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Returns whether no component types are registered.
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Creates an empty type-erased storage for `key`.
    pub(crate) fn create_storage(
        &self,
        key: &K,
    ) -> Result<StorageCell<K>, ComponentNotRegistered<K>> {
        self.descriptors
            .get(key)
            .map(|d| (d.new_storage)())
            .ok_or_else(|| ComponentNotRegistered { key: key.clone() })
    }
}

impl<K: TypeKey> Default for ComponentRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
    enum Kind {
        Alpha,
        Beta,
    }

    #[derive(Default, Clone)]
    struct Alpha {
        _value: u32,
    }

    impl Component<Kind> for Alpha {
        fn type_id() -> Kind {
            Kind::Alpha
        }
    }

    #[derive(Default, Clone)]
    struct AlphaImpostor;

    impl Component<Kind> for AlphaImpostor {
        fn type_id() -> Kind {
            Kind::Alpha
        }
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = ComponentRegistry::new();
        registry.register::<Alpha>();

        assert!(registry.is_registered(&Kind::Alpha));
        assert!(!registry.is_registered(&Kind::Beta));
        assert_eq!(registry.len(), 1);
        assert!(registry.type_name(&Kind::Alpha).unwrap().contains("Alpha"));
    }

    #[test]
    fn create_storage_for_registered_key() {
        let mut registry = ComponentRegistry::new();
        registry.register::<Alpha>();
        assert!(registry.create_storage(&Kind::Alpha).is_ok());
    }

    #[test]
    fn create_storage_for_unknown_key_errors() {
        let registry = ComponentRegistry::<Kind>::new();
        let err = registry.create_storage(&Kind::Beta).unwrap_err();
        assert_eq!(err.key, Kind::Beta);
        assert!(err.to_string().contains("never been registered"));
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn duplicate_key_panics() {
        let mut registry = ComponentRegistry::new();
        registry.register::<Alpha>();
        registry.register::<AlphaImpostor>();
    }

    #[test]
    fn string_keys_work() {
        #[derive(Default, Clone)]
        struct Named;
        impl Component<&'static str> for Named {
            fn type_id() -> &'static str {
                "named"
            }
        }

        let mut registry = ComponentRegistry::<&'static str>::new();
        registry.register::<Named>();
        assert!(registry.is_registered(&"named"));
    }
}
