// Route definitions under construction and the collections that hold them
//
// A `Controller` is a handle to one route being configured. Collections
// gather controllers and mounted sub-collections until they are flushed
// into a `RouteCollection`; flushing drains the collection and freezes
// every controller it contained.

use crate::Error;
use crate::handler::{BoxedHandler, ControllerTarget};
use crate::http::{HttpRequest, HttpResponse, Reply};
use crate::logging::{debug, warn};
use crate::routing::{generate_route_name, Route, RouteCollection};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Turns a raw attribute into the value the controller sees
pub type ConverterFn = Arc<dyn Fn(Value, &HttpRequest) -> Result<Value, Error> + Send + Sync>;

/// Runs before the controller; returning a response skips it
pub type BeforeFn =
    Arc<dyn Fn(&mut HttpRequest) -> Result<Option<HttpResponse>, Error> + Send + Sync>;

/// Runs after the controller with the response it produced
pub type AfterFn = Arc<dyn Fn(&HttpRequest, &mut HttpResponse) -> Result<(), Error> + Send + Sync>;

/// Everything a route carries before it is compiled
#[derive(Clone, Default)]
pub struct RouteDefinition {
    pub pattern: String,
    pub methods: Vec<String>,
    pub requirements: HashMap<String, String>,
    pub defaults: HashMap<String, Value>,
    pub converters: Vec<(String, ConverterFn)>,
    pub before: Vec<BeforeFn>,
    pub after: Vec<AfterFn>,
    pub arguments: Vec<String>,
    pub target: Option<ControllerTarget>,
}

impl RouteDefinition {
    fn set_methods(&mut self, methods: &str) {
        self.methods = methods
            .split('|')
            .map(|m| m.trim().to_uppercase())
            .filter(|m| !m.is_empty())
            .collect();
    }

    fn set_converter(&mut self, variable: &str, converter: ConverterFn) {
        self.converters.retain(|(name, _)| name != variable);
        self.converters.push((variable.to_string(), converter));
    }

    fn add_argument(&mut self, name: &str) {
        if !self.arguments.iter().any(|a| a == name) {
            self.arguments.push(name.to_string());
        }
    }
}

impl fmt::Debug for RouteDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteDefinition")
            .field("pattern", &self.pattern)
            .field("methods", &self.methods)
            .field("requirements", &self.requirements)
            .field("defaults", &self.defaults)
            .field("arguments", &self.arguments)
            .finish_non_exhaustive()
    }
}

struct ControllerState {
    definition: RouteDefinition,
    name: Option<String>,
    frozen: bool,
}

/// Handle to a route being configured
#[derive(Clone)]
pub struct Controller {
    inner: Arc<Mutex<ControllerState>>,
}

impl Controller {
    pub fn new(definition: RouteDefinition) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ControllerState {
                definition,
                name: None,
                frozen: false,
            })),
        }
    }

    fn edit(&self, action: &str, change: impl FnOnce(&mut ControllerState)) {
        let mut state = self.inner.lock();
        if state.frozen {
            warn!(
                pattern = %state.definition.pattern,
                action,
                "Controller was already flushed; change ignored"
            );
            return;
        }
        change(&mut state);
    }

    /// Name the route
    pub fn bind(self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.edit("bind", |state| state.name = Some(name));
        self
    }

    /// Constrain a placeholder with a regular expression
    pub fn assert(self, variable: &str, regex: &str) -> Self {
        self.edit("assert", |state| {
            state
                .definition
                .requirements
                .insert(variable.to_string(), regex.to_string());
        });
        self
    }

    /// Default value for a placeholder
    pub fn value(self, variable: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        self.edit("value", |state| {
            state.definition.defaults.insert(variable.to_string(), value);
        });
        self
    }

    /// Convert a request attribute before the controller runs
    pub fn convert<F>(self, variable: &str, converter: F) -> Self
    where
        F: Fn(Value, &HttpRequest) -> Result<Value, Error> + Send + Sync + 'static,
    {
        self.convert_with(variable, Arc::new(converter))
    }

    fn convert_with(self, variable: &str, converter: ConverterFn) -> Self {
        self.edit("convert", |state| state.definition.set_converter(variable, converter));
        self
    }

    /// Restrict the HTTP methods, `|`-separated (`"GET|POST"`)
    pub fn method(self, methods: &str) -> Self {
        self.edit("method", |state| state.definition.set_methods(methods));
        self
    }

    pub fn before<F>(self, middleware: F) -> Self
    where
        F: Fn(&mut HttpRequest) -> Result<Option<HttpResponse>, Error> + Send + Sync + 'static,
    {
        self.before_with(Arc::new(middleware))
    }

    fn before_with(self, middleware: BeforeFn) -> Self {
        self.edit("before", |state| state.definition.before.push(middleware));
        self
    }

    pub fn after<F>(self, middleware: F) -> Self
    where
        F: Fn(&HttpRequest, &mut HttpResponse) -> Result<(), Error> + Send + Sync + 'static,
    {
        self.after_with(Arc::new(middleware))
    }

    fn after_with(self, middleware: AfterFn) -> Self {
        self.edit("after", |state| state.definition.after.push(middleware));
        self
    }

    /// Declare a named argument the controller requires
    pub fn argument(self, name: &str) -> Self {
        self.edit("argument", |state| state.definition.add_argument(name));
        self
    }

    /// The explicit name, if any
    pub fn route_name(&self) -> Option<String> {
        self.inner.lock().name.clone()
    }

    pub fn pattern(&self) -> String {
        self.inner.lock().definition.pattern.clone()
    }

    pub fn is_frozen(&self) -> bool {
        self.inner.lock().frozen
    }

    fn snapshot(&self) -> (RouteDefinition, Option<String>) {
        let state = self.inner.lock();
        (state.definition.clone(), state.name.clone())
    }

    fn freeze(&self) {
        self.inner.lock().frozen = true;
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("Controller")
            .field("name", &state.name)
            .field("definition", &state.definition)
            .field("frozen", &state.frozen)
            .finish()
    }
}

#[derive(Clone)]
enum CollectionEntry {
    Controller(Controller),
    Mount {
        prefix: String,
        collection: ControllerCollection,
    },
}

#[derive(Default)]
struct CollectionState {
    entries: Vec<CollectionEntry>,
    /// Template every new controller starts from
    defaults: RouteDefinition,
}

/// Accumulates controllers and mounted collections until flushed
#[derive(Clone, Default)]
pub struct ControllerCollection {
    inner: Arc<Mutex<CollectionState>>,
}

impl ControllerCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a pattern to a closure, for any method
    pub fn route<F, Fut, R>(&self, pattern: &str, handler: F) -> Controller
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, Error>> + Send + 'static,
        R: Into<Reply> + 'static,
    {
        self.route_to(pattern, BoxedHandler::from_fn(handler))
    }

    /// Map a pattern to a handler object or a container service
    pub fn route_to(&self, pattern: &str, target: impl Into<ControllerTarget>) -> Controller {
        let mut state = self.inner.lock();
        let mut definition = state.defaults.clone();
        definition.pattern = pattern.to_string();
        definition.target = Some(target.into());

        let controller = Controller::new(definition);
        state
            .entries
            .push(CollectionEntry::Controller(controller.clone()));
        controller
    }

    pub fn get<F, Fut, R>(&self, pattern: &str, handler: F) -> Controller
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, Error>> + Send + 'static,
        R: Into<Reply> + 'static,
    {
        self.route(pattern, handler).method("GET")
    }

    pub fn post<F, Fut, R>(&self, pattern: &str, handler: F) -> Controller
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, Error>> + Send + 'static,
        R: Into<Reply> + 'static,
    {
        self.route(pattern, handler).method("POST")
    }

    pub fn put<F, Fut, R>(&self, pattern: &str, handler: F) -> Controller
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, Error>> + Send + 'static,
        R: Into<Reply> + 'static,
    {
        self.route(pattern, handler).method("PUT")
    }

    pub fn patch<F, Fut, R>(&self, pattern: &str, handler: F) -> Controller
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, Error>> + Send + 'static,
        R: Into<Reply> + 'static,
    {
        self.route(pattern, handler).method("PATCH")
    }

    pub fn delete<F, Fut, R>(&self, pattern: &str, handler: F) -> Controller
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, Error>> + Send + 'static,
        R: Into<Reply> + 'static,
    {
        self.route(pattern, handler).method("DELETE")
    }

    pub fn options<F, Fut, R>(&self, pattern: &str, handler: F) -> Controller
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, Error>> + Send + 'static,
        R: Into<Reply> + 'static,
    {
        self.route(pattern, handler).method("OPTIONS")
    }

    /// Attach `collection` under `prefix`; resolved when this collection is flushed
    pub fn mount(&self, prefix: &str, collection: ControllerCollection) -> Result<(), Error> {
        if self.ptr_eq(&collection) || collection.contains(self) {
            return Err(Error::InvalidMount(format!(
                "mounting the collection at \"{}\" would create a cycle",
                prefix
            )));
        }

        debug!(prefix = %prefix, "Mounting controller collection");
        self.inner.lock().entries.push(CollectionEntry::Mount {
            prefix: prefix.to_string(),
            collection,
        });
        Ok(())
    }

    fn ptr_eq(&self, other: &ControllerCollection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Whether `other` is mounted somewhere below this collection
    fn contains(&self, other: &ControllerCollection) -> bool {
        self.mounted()
            .iter()
            .any(|child| child.ptr_eq(other) || child.contains(other))
    }

    fn mounted(&self) -> Vec<ControllerCollection> {
        self.inner
            .lock()
            .entries
            .iter()
            .filter_map(|entry| match entry {
                CollectionEntry::Mount { collection, .. } => Some(collection.clone()),
                CollectionEntry::Controller(_) => None,
            })
            .collect()
    }

    /// Change the template and every controller already added, mounts included
    fn apply(&self, action: &str, change: &dyn Fn(&mut RouteDefinition)) {
        let entries = {
            let mut state = self.inner.lock();
            change(&mut state.defaults);
            state.entries.clone()
        };

        for entry in entries {
            match entry {
                CollectionEntry::Controller(controller) => {
                    controller.edit(action, |state| change(&mut state.definition))
                }
                CollectionEntry::Mount { collection, .. } => collection.apply(action, change),
            }
        }
    }

    pub fn assert(&self, variable: &str, regex: &str) -> &Self {
        self.apply("assert", &|definition| {
            definition
                .requirements
                .insert(variable.to_string(), regex.to_string());
        });
        self
    }

    pub fn value(&self, variable: &str, value: impl Into<Value>) -> &Self {
        let value = value.into();
        self.apply("value", &|definition| {
            definition
                .defaults
                .insert(variable.to_string(), value.clone());
        });
        self
    }

    pub fn convert<F>(&self, variable: &str, converter: F) -> &Self
    where
        F: Fn(Value, &HttpRequest) -> Result<Value, Error> + Send + Sync + 'static,
    {
        let converter: ConverterFn = Arc::new(converter);
        self.apply("convert", &|definition| {
            definition.set_converter(variable, converter.clone())
        });
        self
    }

    pub fn method(&self, methods: &str) -> &Self {
        self.apply("method", &|definition| definition.set_methods(methods));
        self
    }

    pub fn before<F>(&self, middleware: F) -> &Self
    where
        F: Fn(&mut HttpRequest) -> Result<Option<HttpResponse>, Error> + Send + Sync + 'static,
    {
        let middleware: BeforeFn = Arc::new(middleware);
        self.apply("before", &|definition| definition.before.push(middleware.clone()));
        self
    }

    pub fn after<F>(&self, middleware: F) -> &Self
    where
        F: Fn(&HttpRequest, &mut HttpResponse) -> Result<(), Error> + Send + Sync + 'static,
    {
        let middleware: AfterFn = Arc::new(middleware);
        self.apply("after", &|definition| definition.after.push(middleware.clone()));
        self
    }

    pub fn argument(&self, name: &str) -> &Self {
        self.apply("argument", &|definition| definition.add_argument(name));
        self
    }

    /// Number of pending controllers and mounts
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Compile everything added so far into a route table, draining the collection.
    ///
    /// Unnamed routes get a name derived from their methods and path; a
    /// generated name already taken anywhere in this flush, mounts
    /// included, gets `_` appended. Nothing is drained unless every route
    /// compiles.
    pub fn flush(&self, prefix: &str) -> Result<RouteCollection, Error> {
        let prefix = normalize_prefix(prefix);
        let mut routes = RouteCollection::new();
        let mut compiled = Vec::new();
        self.compile_into(&prefix, &mut routes, &mut compiled)?;

        for (collection, count) in compiled {
            let drained: Vec<CollectionEntry> = {
                let mut state = collection.inner.lock();
                let count = count.min(state.entries.len());
                state.entries.drain(..count).collect()
            };
            for entry in drained {
                if let CollectionEntry::Controller(controller) = entry {
                    controller.freeze();
                }
            }
        }

        if !routes.is_empty() {
            debug!(prefix = %prefix, routes = routes.len(), "Flushed controller collection");
        }
        Ok(routes)
    }

    /// Compile the current entries of this collection and its mounts into
    /// `routes`, recording how many entries each collection contributed
    fn compile_into(
        &self,
        prefix: &str,
        routes: &mut RouteCollection,
        compiled: &mut Vec<(ControllerCollection, usize)>,
    ) -> Result<(), Error> {
        let entries = self.inner.lock().entries.clone();
        if !compiled.iter().any(|(collection, _)| collection.ptr_eq(self)) {
            compiled.push((self.clone(), entries.len()));
        }

        for entry in entries {
            match entry {
                CollectionEntry::Controller(controller) => {
                    let (definition, name) = controller.snapshot();
                    let path = join_path(prefix, &definition.pattern);
                    let name = match name {
                        Some(name) => name,
                        None => {
                            let mut name = generate_route_name(&definition.methods, &path);
                            while routes.contains(&name) {
                                name.push('_');
                            }
                            name
                        }
                    };
                    routes.add(Route::compile(name, path, definition)?);
                }
                CollectionEntry::Mount {
                    prefix: mount_prefix,
                    collection,
                } => {
                    let nested = format!("{}{}", prefix, normalize_prefix(&mount_prefix));
                    collection.compile_into(&nested, routes, compiled)?;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ControllerCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("ControllerCollection")
            .field("entries", &state.entries.len())
            .field("defaults", &state.defaults)
            .finish()
    }
}

/// `"api/"` and `"/api"` both become `"/api"`; `"/"` becomes `""`
fn normalize_prefix(prefix: &str) -> String {
    let prefix = prefix.trim();
    let prefix = if prefix.starts_with('/') {
        prefix.to_string()
    } else {
        format!("/{}", prefix)
    };
    prefix.trim_end_matches('/').to_string()
}

fn join_path(prefix: &str, pattern: &str) -> String {
    if pattern.is_empty() {
        return if prefix.is_empty() {
            "/".to_string()
        } else {
            prefix.to_string()
        };
    }
    if pattern.starts_with('/') {
        format!("{}{}", prefix, pattern)
    } else {
        format!("{}/{}", prefix, pattern)
    }
}
