// Service providers
//
// A provider wires services into the application in two phases: `register`
// runs as soon as the provider is added, while listener subscription and
// `boot` run once the whole service graph exists. Optional phases are
// exposed as capabilities rather than discovered at runtime.

use crate::Error;
use crate::application::Application;
use crate::container::{Container, Service};
use crate::controller::ControllerCollection;
use crate::events::EventDispatcher;
use crate::exception_handler::ExceptionHandler;
use crate::kernel::{ArgumentResolver, ControllerResolver, HttpKernel};
use crate::listeners::{
    ConverterListener, LogListener, MiddlewareListener, RouterListener, StringToResponseListener,
};
use crate::logging::debug;
use crate::routing::{RouteCollection, UrlGenerator};
use parking_lot::RwLock;
use std::sync::Arc;

/// A unit that registers services, routes and listeners
pub trait ServiceProvider: Send + Sync + 'static {
    /// Name used in logs
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    fn register(&self, app: &Application) -> Result<(), Error>;

    /// Boot capability, if the provider has one-time startup work
    fn bootable(&self) -> Option<&dyn BootableProvider> {
        None
    }

    /// Listener capability, if the provider attaches event listeners
    fn event_listener(&self) -> Option<&dyn EventListenerProvider> {
        None
    }
}

/// Runs once, after every provider registered before boot
pub trait BootableProvider {
    fn boot(&self, app: &Application) -> Result<(), Error>;
}

/// Attaches listeners to the application dispatcher during boot
pub trait EventListenerProvider {
    fn subscribe(&self, app: &Application, dispatcher: &EventDispatcher) -> Result<(), Error>;
}

/// Supplies a controller collection to mount under a prefix
pub trait ControllerProvider {
    fn connect(&self, app: &Application) -> Result<ControllerCollection, Error>;
}

/// Values assigned right after a provider registered, overriding its defaults
#[derive(Clone, Default)]
pub struct Parameters {
    values: Vec<(String, Service)>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<T: Send + Sync + 'static>(mut self, key: impl Into<String>, value: T) -> Self {
        self.values.push((key.into(), Arc::new(value)));
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub(crate) fn apply(self, container: &Container) {
        for (key, value) in self.values {
            container.set_raw(key, value);
        }
    }
}

/// Route table, controller collections and URL generation
pub struct RoutingServiceProvider;

impl ServiceProvider for RoutingServiceProvider {
    fn name(&self) -> &'static str {
        "routing"
    }

    fn register(&self, app: &Application) -> Result<(), Error> {
        let container = app.container();
        container.share("routes", |_| Ok(RwLock::new(RouteCollection::new())));
        container.factory("controllers_factory", |_| Ok(ControllerCollection::new()));
        container.share("url_generator", |c: &Container| {
            Ok(UrlGenerator::new(c.get::<RwLock<RouteCollection>>("routes")?))
        });
        Ok(())
    }

    fn event_listener(&self) -> Option<&dyn EventListenerProvider> {
        Some(self)
    }
}

impl EventListenerProvider for RoutingServiceProvider {
    fn subscribe(&self, app: &Application, dispatcher: &EventDispatcher) -> Result<(), Error> {
        let routes = app.container().get::<RwLock<RouteCollection>>("routes")?;
        dispatcher.add_subscriber(Arc::new(RouterListener::new(routes)));
        dispatcher.add_subscriber(Arc::new(ConverterListener));
        dispatcher.add_subscriber(Arc::new(MiddlewareListener));
        Ok(())
    }
}

/// Controller resolution, the kernel and the default error page
pub struct HttpKernelServiceProvider;

impl ServiceProvider for HttpKernelServiceProvider {
    fn name(&self) -> &'static str {
        "http_kernel"
    }

    fn register(&self, app: &Application) -> Result<(), Error> {
        let container = app.container();
        container.share("resolver", |c: &Container| {
            Ok(ControllerResolver::new(c.downgrade()))
        });
        container.share("argument_resolver", |_| Ok(ArgumentResolver::new()));
        container.share("kernel", |c: &Container| {
            Ok(HttpKernel::new(
                c.get("dispatcher")?,
                c.get("resolver")?,
                c.get("argument_resolver")?,
            ))
        });
        container.share("exception_handler", |c: &Container| {
            Ok(ExceptionHandler::new(*c.get::<bool>("debug")?))
        });
        Ok(())
    }

    fn event_listener(&self) -> Option<&dyn EventListenerProvider> {
        Some(self)
    }
}

impl EventListenerProvider for HttpKernelServiceProvider {
    fn subscribe(&self, app: &Application, dispatcher: &EventDispatcher) -> Result<(), Error> {
        let container = app.container();
        dispatcher.add_subscriber(Arc::new(StringToResponseListener));

        // Removing the key before boot disables the default error page
        if container.has("exception_handler") {
            dispatcher.add_subscriber(container.get::<ExceptionHandler>("exception_handler")?);
        } else {
            debug!("Default exception handler disabled");
        }

        if container.get::<bool>("logger.enabled").is_ok_and(|enabled| *enabled) {
            dispatcher.add_subscriber(Arc::new(LogListener));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameters_override_in_order() {
        let container = Container::new();
        container.set("x", 1u8);
        Parameters::new().with("x", 2u8).with("y", "why").apply(&container);

        assert_eq!(*container.get::<u8>("x").unwrap(), 2);
        assert_eq!(*container.get::<&str>("y").unwrap(), "why");
    }

    #[test]
    fn test_builtin_providers_expose_listener_capability() {
        assert!(RoutingServiceProvider.event_listener().is_some());
        assert!(RoutingServiceProvider.bootable().is_none());
        assert_eq!(HttpKernelServiceProvider.name(), "http_kernel");
    }
}
