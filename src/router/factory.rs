use crate::core::{CrudError, Result};
use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Resolves a new handler instance by type.
pub trait HandlerFactory: Send + Sync + 'static {
    /// Returns a fresh instance of `T`; never a shared or cached one.
    fn create<T: Any + Send>(&self) -> Result<T>;
}

type Constructor = Arc<dyn Fn() -> Box<dyn Any + Send> + Send + Sync>;

struct Registration {
    type_name: &'static str,
    constructor: Constructor,
}

/// A [`HandlerFactory`] backed by constructors registered per type.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    registrations: HashMap<TypeId, Arc<Registration>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `constructor` for `T`, replacing any earlier registration.
    pub fn register<T, F>(&mut self, constructor: F) -> &mut Self
    where
        T: Any + Send,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.registrations.insert(
            TypeId::of::<T>(),
            Arc::new(Registration {
                type_name: type_name::<T>(),
                constructor: Arc::new(move || Box::new(constructor()) as Box<dyn Any + Send>),
            }),
        );
        self
    }

    /// Registers `T::default` as the constructor for `T`.
    pub fn register_default<T: Any + Send + Default>(&mut self) -> &mut Self {
        self.register::<T, _>(T::default)
    }

    pub fn contains<T: Any>(&self) -> bool {
        self.registrations.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Names of the registered types, sorted.
    pub fn registered_types(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self
            .registrations
            .values()
            .map(|registration| registration.type_name)
            .collect();
        names.sort_unstable();
        names
    }
}

impl HandlerFactory for HandlerRegistry {
    fn create<T: Any + Send>(&self) -> Result<T> {
        let registration = self.registrations.get(&TypeId::of::<T>()).ok_or_else(|| {
            CrudError::Configuration(format!(
                "No handler registered for type '{}'",
                type_name::<T>()
            ))
        })?;

        (registration.constructor)()
            .downcast::<T>()
            .map(|handler| *handler)
            .map_err(|_| {
                CrudError::Configuration(format!(
                    "Constructor for '{}' produced a different type",
                    registration.type_name
                ))
            })
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("types", &self.registered_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default, PartialEq)]
    struct Probe {
        serial: usize,
    }

    #[test]
    fn test_unregistered_type_is_configuration_error() {
        let registry = HandlerRegistry::new();
        let err = registry.create::<Probe>().unwrap_err();
        assert!(matches!(err, CrudError::Configuration(ref msg) if msg.contains("Probe")));
    }

    #[test]
    fn test_each_create_runs_the_constructor() {
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = counter.clone();
        let mut registry = HandlerRegistry::new();
        registry.register(move || Probe {
            serial: seen.fetch_add(1, Ordering::SeqCst),
        });

        assert_eq!(registry.create::<Probe>().unwrap().serial, 0);
        assert_eq!(registry.create::<Probe>().unwrap().serial, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_register_default() {
        let mut registry = HandlerRegistry::new();
        registry.register_default::<Probe>();

        assert!(registry.contains::<Probe>());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.create::<Probe>().unwrap(), Probe::default());
        assert!(registry.registered_types()[0].ends_with("Probe"));
    }
}
