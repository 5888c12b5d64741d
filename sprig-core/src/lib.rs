// Core library for the Sprig micro-framework
// This module contains the service container, the provider protocol, the
// event pipeline, routing and the HTTP kernel

pub mod application;
pub mod container;
pub mod controller;
pub mod error;
pub mod escape;
pub mod events;
pub mod exception_handler;
pub mod handler;
pub mod http;
pub mod kernel;
pub mod listeners;
pub mod logging;
pub mod provider;
pub mod routing;
pub mod server;

// Re-export commonly used types
pub use crate::application::*;
pub use crate::container::*;
pub use crate::controller::*;
pub use crate::error::*;
pub use crate::escape::*;
pub use crate::events::*;
pub use crate::exception_handler::*;
pub use crate::handler::*;
pub use crate::http::*;
pub use crate::kernel::*;
pub use crate::listeners::*;
pub use crate::logging::{LogConfig, LogFormat, LogLevel, LogOutput};
pub use crate::provider::*;
pub use crate::routing::{
    DEFAULT_REQUIREMENT, Route, RouteCollection, RouteMatch, SharedRoutes, UrlGenerator,
    generate_route_name, match_route,
};

pub use async_trait::async_trait;

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        Application, BootableProvider, BoxedHandler, Container, Controller, ControllerCollection,
        ControllerProvider, ControllerTarget, Error, EventDispatcher, EventListenerProvider,
        EventSubscriber, HttpRequest, HttpResponse, KernelEvents, Parameters, Reply,
        RequestHandler, RequestType, ServiceProvider, abort, async_trait,
    };
}
