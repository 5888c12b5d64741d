// Dependency injection container
//
// String-keyed registry of lazily built services. Every entry is a plain
// value, a factory re-invoked on each access, or a shared factory whose
// result is cached for the lifetime of the container.

use crate::Error;
use crate::logging::{debug, trace};
use parking_lot::Mutex;
use std::any::{Any, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

/// A type-erased service instance
pub type Service = Arc<dyn Any + Send + Sync>;

type RawFactory = Arc<dyn Fn(&Container) -> Result<Service, Error> + Send + Sync>;

enum Entry {
    Value(Service),
    Factory(RawFactory),
    Shared { factory: RawFactory, state: SharedState },
}

enum SharedState {
    Unresolved,
    Resolving,
    Resolved(Service),
}

impl Entry {
    fn kind(&self) -> &'static str {
        match self {
            Entry::Value(_) => "value",
            Entry::Factory(_) => "factory",
            Entry::Shared { .. } => "shared",
        }
    }
}

/// The dependency injection container
#[derive(Clone)]
pub struct Container {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

/// Non-owning handle to a [`Container`], for services that need to reach
/// back into the container that owns them.
#[derive(Clone)]
pub struct WeakContainer {
    entries: Weak<Mutex<HashMap<String, Entry>>>,
}

impl WeakContainer {
    pub fn upgrade(&self) -> Option<Container> {
        self.entries.upgrade().map(|entries| Container { entries })
    }
}

impl Container {
    pub fn new() -> Self {
        debug!("Creating new DI container");
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Store a plain value; every `get` returns the same instance
    pub fn set<T: Send + Sync + 'static>(&self, key: impl Into<String>, value: T) {
        self.set_raw(key, Arc::new(value));
    }

    /// Store an already type-erased value
    pub fn set_raw(&self, key: impl Into<String>, value: Service) {
        self.insert(key.into(), Entry::Value(value));
    }

    /// Register a factory invoked on every access
    pub fn factory<T, F>(&self, key: impl Into<String>, factory: F)
    where
        T: Send + Sync + 'static,
        F: Fn(&Container) -> Result<T, Error> + Send + Sync + 'static,
    {
        self.insert(key.into(), Entry::Factory(erase(factory)));
    }

    /// Register a factory whose first result is cached for the container's lifetime
    pub fn share<T, F>(&self, key: impl Into<String>, factory: F)
    where
        T: Send + Sync + 'static,
        F: Fn(&Container) -> Result<T, Error> + Send + Sync + 'static,
    {
        self.insert(
            key.into(),
            Entry::Shared {
                factory: erase(factory),
                state: SharedState::Unresolved,
            },
        );
    }

    fn insert(&self, key: String, entry: Entry) {
        let mut entries = self.entries.lock();
        trace!(key = %key, kind = entry.kind(), "Registering container entry");
        if let Some(previous) = entries.insert(key.clone(), entry) {
            debug!(key = %key, previous = previous.kind(), "Container entry overwritten");
        }
    }

    /// Wrap the factory of an existing entry.
    ///
    /// The wrapper receives the value the previous factory produced and
    /// returns its replacement; the entry keeps its shared/factory flavor.
    /// Plain values, unknown keys and shared entries that were already
    /// resolved cannot be extended.
    pub fn extend<T, F>(&self, key: &str, wrapper: F) -> Result<(), Error>
    where
        T: Send + Sync + 'static,
        F: Fn(Arc<T>, &Container) -> Result<T, Error> + Send + Sync + 'static,
    {
        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(key)
            .ok_or_else(|| Error::Logic(format!("Identifier \"{}\" is not defined", key)))?;

        let slot = match entry {
            Entry::Value(_) => {
                return Err(Error::Logic(format!(
                    "Identifier \"{}\" does not contain a service definition",
                    key
                )));
            }
            Entry::Shared {
                state: SharedState::Unresolved,
                factory,
            }
            | Entry::Factory(factory) => factory,
            Entry::Shared { .. } => {
                return Err(Error::Logic(format!(
                    "Cannot extend \"{}\": the service has already been resolved",
                    key
                )));
            }
        };

        let previous = slot.clone();
        let owned_key = key.to_string();
        *slot = Arc::new(move |container: &Container| {
            let value = downcast::<T>(&owned_key, previous(container)?)?;
            Ok(Arc::new(wrapper(value, container)?) as Service)
        });

        debug!(key = %key, "Container entry extended");
        Ok(())
    }

    /// Resolve an entry, building it if needed
    pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> Result<Arc<T>, Error> {
        downcast(key, self.get_raw(key)?)
    }

    /// Resolve an entry without downcasting it
    pub fn get_raw(&self, key: &str) -> Result<Service, Error> {
        let factory = {
            let mut entries = self.entries.lock();
            match entries.get_mut(key) {
                None => return Err(Error::ServiceNotFound(key.to_string())),
                Some(Entry::Value(value)) => return Ok(value.clone()),
                Some(Entry::Factory(factory)) => {
                    trace!(key = %key, "Invoking factory");
                    let factory = factory.clone();
                    drop(entries);
                    return factory(self);
                }
                Some(Entry::Shared { factory, state }) => match state {
                    SharedState::Resolved(value) => return Ok(value.clone()),
                    SharedState::Resolving => {
                        return Err(Error::CircularDependency(key.to_string()));
                    }
                    SharedState::Unresolved => {
                        *state = SharedState::Resolving;
                        factory.clone()
                    }
                },
            }
        };

        debug!(key = %key, "Building shared service");
        let result = factory(self);

        // The entry may have been replaced while the factory ran; only
        // settle the state of the entry this call started resolving.
        let mut entries = self.entries.lock();
        if let Some(Entry::Shared { factory: current, state }) = entries.get_mut(key) {
            if Arc::ptr_eq(current, &factory) && matches!(state, SharedState::Resolving) {
                *state = match &result {
                    Ok(value) => SharedState::Resolved(value.clone()),
                    Err(_) => SharedState::Unresolved,
                };
            }
        }

        result
    }

    /// Check if a key is registered
    pub fn has(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    /// Whether the key holds a value that will not be rebuilt on access
    pub fn is_resolved(&self, key: &str) -> bool {
        matches!(
            self.entries.lock().get(key),
            Some(Entry::Value(_))
                | Some(Entry::Shared {
                    state: SharedState::Resolved(_),
                    ..
                })
        )
    }

    /// Remove an entry, returning whether it existed
    pub fn remove(&self, key: &str) -> bool {
        let removed = self.entries.lock().remove(key).is_some();
        if removed {
            debug!(key = %key, "Container entry removed");
        }
        removed
    }

    /// All registered keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn downgrade(&self) -> WeakContainer {
        WeakContainer {
            entries: Arc::downgrade(&self.entries),
        }
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container").field("keys", &self.keys()).finish()
    }
}

fn erase<T, F>(factory: F) -> RawFactory
where
    T: Send + Sync + 'static,
    F: Fn(&Container) -> Result<T, Error> + Send + Sync + 'static,
{
    Arc::new(move |container: &Container| Ok(Arc::new(factory(container)?) as Service))
}

fn downcast<T: Send + Sync + 'static>(key: &str, service: Service) -> Result<Arc<T>, Error> {
    service.downcast::<T>().map_err(|_| Error::TypeMismatch {
        key: key.to_string(),
        expected: type_name::<T>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_factory_builds_on_every_access() {
        let container = Container::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        container.factory("token", move |_| Ok(counter.fetch_add(1, Ordering::SeqCst)));

        let first = container.get::<usize>("token").unwrap();
        let second = container.get::<usize>("token").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!((*first, *second), (0, 1));
        assert!(!container.is_resolved("token"));
    }

    #[test]
    fn test_shared_builds_once() {
        let container = Container::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        container.share("db", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(String::from("connection"))
        });

        assert!(!container.is_resolved("db"));
        let first = container.get::<String>("db").unwrap();
        let second = container.get::<String>("db").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(container.is_resolved("db"));
    }

    #[test]
    fn test_factories_can_depend_on_other_entries() {
        let container = Container::new();
        container.set("name", String::from("sprig"));
        container.share("greeting", |c: &Container| {
            Ok(format!("hello {}", c.get::<String>("name")?))
        });

        assert_eq!(*container.get::<String>("greeting").unwrap(), "hello sprig");
    }

    #[test]
    fn test_circular_dependency_is_detected() {
        let container = Container::new();
        container.share("a", |c: &Container| Ok(*c.get::<u8>("b")?));
        container.share("b", |c: &Container| Ok(*c.get::<u8>("a")?));

        assert!(matches!(
            container.get::<u8>("a"),
            Err(Error::CircularDependency(key)) if key == "a"
        ));
        // A failed build leaves the entry resolvable again
        assert!(!container.is_resolved("a"));
    }

    #[test]
    fn test_type_mismatch() {
        let container = Container::new();
        container.set("port", 8080u16);
        assert!(matches!(
            container.get::<String>("port"),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_missing_service() {
        let container = Container::new();
        assert!(matches!(
            container.get::<u8>("nope"),
            Err(Error::ServiceNotFound(_))
        ));
    }

    #[test]
    fn test_extend_wraps_previous_value() {
        let container = Container::new();
        container.share("list", |_| Ok(vec![1]));
        container
            .extend("list", |list: Arc<Vec<i32>>, _| {
                let mut list = (*list).clone();
                list.push(2);
                Ok(list)
            })
            .unwrap();
        container
            .extend("list", |list: Arc<Vec<i32>>, _| {
                let mut list = (*list).clone();
                list.push(3);
                Ok(list)
            })
            .unwrap();

        let first = container.get::<Vec<i32>>("list").unwrap();
        assert_eq!(*first, vec![1, 2, 3]);
        // Still shared after extension
        assert!(Arc::ptr_eq(&first, &container.get::<Vec<i32>>("list").unwrap()));
    }

    #[test]
    fn test_extend_rejects_unset_values_and_resolved_services() {
        let container = Container::new();
        let keep = |v: Arc<u8>, _: &Container| Ok(*v);

        assert!(matches!(container.extend("missing", keep), Err(Error::Logic(_))));

        container.set("param", 1u8);
        assert!(matches!(container.extend("param", keep), Err(Error::Logic(_))));

        container.share("svc", |_| Ok(1u8));
        container.get::<u8>("svc").unwrap();
        assert!(matches!(container.extend("svc", keep), Err(Error::Logic(_))));
    }

    #[test]
    fn test_overwrite_does_not_touch_other_entries() {
        let container = Container::new();
        container.share("a", |_| Ok(1u8));
        container.share("b", |_| Ok(2u8));
        let b = container.get::<u8>("b").unwrap();

        container.set("a", 10u8);
        assert_eq!(*container.get::<u8>("a").unwrap(), 10);
        assert!(Arc::ptr_eq(&b, &container.get::<u8>("b").unwrap()));
    }

    #[test]
    fn test_weak_handle() {
        let container = Container::new();
        let weak = container.downgrade();
        assert!(weak.upgrade().is_some());
        drop(container);
        assert!(weak.upgrade().is_none());
    }
}
