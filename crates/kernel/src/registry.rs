use crate::entity::{Persistable, PersistentType};
use std::collections::BTreeMap;
use std::fmt;

type Constructor = Box<dyn Fn() -> Box<dyn Persistable>>;

/// Table from stable type names to constructors, populated at startup.
///
/// This is how the loader turns a type name read from a save back into a
/// live object. Names are never removed.
#[derive(Default)]
pub struct TypeRegistry {
    constructors: BTreeMap<String, Constructor>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` under `T::TYPE_NAME`.
    pub fn register<T: PersistentType>(&mut self) -> bool {
        self.register_fn(T::TYPE_NAME, || Box::new(T::create()))
    }

    /// Register an arbitrary constructor under `name`.
    ///
    /// A second registration under the same name is ignored with a warning;
    /// returns whether the constructor was added.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, constructor: F) -> bool
    where
        F: Fn() -> Box<dyn Persistable> + 'static,
    {
        let name = name.into();
        if self.constructors.contains_key(&name) {
            tracing::warn!(type_name = %name, "duplicate type registration ignored");
            return false;
        }
        self.constructors.insert(name, Box::new(constructor));
        true
    }

    /// Look a type up by its stable name.
    pub fn resolve(&self, name: &str) -> Option<TypeHandle<'_>> {
        self.constructors
            .get_key_value(name)
            .map(|(name, constructor)| TypeHandle { name, constructor })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.constructors.keys()).finish()
    }
}

/// A resolved type, able to build fresh instances of itself.
#[derive(Clone, Copy)]
pub struct TypeHandle<'r> {
    name: &'r str,
    constructor: &'r Constructor,
}

impl TypeHandle<'_> {
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn create(&self) -> Box<dyn Persistable> {
        (self.constructor)()
    }
}

impl fmt::Debug for TypeHandle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypeHandle").field(&self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Counter;

    #[test]
    fn resolve_known_type() {
        let mut types = TypeRegistry::new();
        assert!(types.register::<Counter>());

        let handle = types.resolve("counter").unwrap();
        assert_eq!(handle.name(), "counter");
        let created = handle.create();
        assert_eq!(created.type_name(), "counter");
        assert!(created.downcast_ref::<Counter>().is_some());
    }

    #[test]
    fn unknown_type_does_not_resolve() {
        let types = TypeRegistry::new();
        assert!(types.resolve("counter").is_none());
        assert!(types.is_empty());
    }

    #[test]
    fn duplicate_registration_is_ignored() {
        let mut types = TypeRegistry::new();
        assert!(types.register::<Counter>());
        assert!(!types.register_fn("counter", || Box::new(Counter::with_value(9))));
        assert_eq!(types.len(), 1);

        // The first constructor wins.
        let created = types.resolve("counter").unwrap().create();
        assert_eq!(created.downcast_ref::<Counter>().unwrap().value, 0);
    }

    #[test]
    fn closures_can_capture_state() {
        let mut types = TypeRegistry::new();
        let start = 5;
        types.register_fn("counter", move || Box::new(Counter::with_value(start)));
        let created = types.resolve("counter").unwrap().create();
        assert_eq!(created.downcast_ref::<Counter>().unwrap().value, 5);
        assert_eq!(types.names().collect::<Vec<_>>(), vec!["counter"]);
    }
}
