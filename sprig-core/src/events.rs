//! Named event dispatcher and the kernel lifecycle events
//!
//! Listeners are registered under an event name with an integer priority.
//! Higher priorities fire first; listeners sharing a priority fire in the
//! order they were added. Any listener may stop propagation through its
//! event, and a listener error aborts the dispatch and is returned to the
//! caller.

use crate::Error;
use crate::handler::BoxedHandler;
use crate::http::{HttpRequest, HttpResponse, Reply, RequestType};
use crate::logging::trace;
use parking_lot::RwLock;
use serde_json::Value;
use std::any::{Any, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A payload that travels through the dispatcher
pub trait Event: Any + Send {
    /// Once true, the remaining listeners are skipped
    fn is_propagation_stopped(&self) -> bool {
        false
    }
}

type RawListener = Arc<dyn Fn(&mut dyn Any) -> Result<(), Error> + Send + Sync>;

#[derive(Clone)]
struct ListenerEntry {
    priority: i32,
    sequence: u64,
    listener: RawListener,
}

#[derive(Default)]
struct Registry {
    listeners: HashMap<String, Vec<ListenerEntry>>,
    sequence: u64,
}

/// Priority-ordered event dispatcher
#[derive(Clone, Default)]
pub struct EventDispatcher {
    registry: Arc<RwLock<Registry>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a listener for events of type `E` published under `name`.
    ///
    /// Dispatching a different payload type under the same name is a
    /// `TypeMismatch` error raised by this listener.
    pub fn add_listener<E, F>(&self, name: impl Into<String>, listener: F, priority: i32)
    where
        E: Event,
        F: Fn(&mut E) -> Result<(), Error> + Send + Sync + 'static,
    {
        let name = name.into();
        let event_name = name.clone();
        let raw: RawListener = Arc::new(move |payload: &mut dyn Any| {
            match payload.downcast_mut::<E>() {
                Some(event) => listener(event),
                None => Err(Error::TypeMismatch {
                    key: event_name.clone(),
                    expected: type_name::<E>(),
                }),
            }
        });

        let mut registry = self.registry.write();
        registry.sequence += 1;
        let sequence = registry.sequence;
        let entries = registry.listeners.entry(name.clone()).or_default();
        entries.push(ListenerEntry {
            priority,
            sequence,
            listener: raw,
        });
        entries.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.sequence.cmp(&b.sequence)));

        trace!(event = %name, priority, "Listener added");
    }

    /// Let a subscriber attach all of its listeners
    pub fn add_subscriber<S: EventSubscriber + 'static>(&self, subscriber: Arc<S>) {
        subscriber.subscribe(self);
    }

    /// Fire `event` through every listener registered under `name`
    pub fn dispatch<E: Event>(&self, name: &str, event: &mut E) -> Result<(), Error> {
        // Snapshot so listeners may register further listeners while running
        let listeners: Vec<RawListener> = match self.registry.read().listeners.get(name) {
            Some(entries) => entries.iter().map(|e| e.listener.clone()).collect(),
            None => return Ok(()),
        };

        trace!(event = %name, listeners = listeners.len(), "Dispatching event");
        for listener in listeners {
            if event.is_propagation_stopped() {
                trace!(event = %name, "Propagation stopped");
                break;
            }
            listener(&mut *event as &mut dyn Any)?;
        }
        Ok(())
    }

    pub fn has_listeners(&self, name: &str) -> bool {
        self.registry
            .read()
            .listeners
            .get(name)
            .is_some_and(|entries| !entries.is_empty())
    }

    /// Priorities of the listeners for `name`, in firing order
    pub fn listener_priorities(&self, name: &str) -> Vec<i32> {
        self.registry
            .read()
            .listeners
            .get(name)
            .map(|entries| entries.iter().map(|e| e.priority).collect())
            .unwrap_or_default()
    }

    /// Drop every listener registered under `name`
    pub fn remove_listeners(&self, name: &str) -> usize {
        self.registry
            .write()
            .listeners
            .remove(name)
            .map(|entries| entries.len())
            .unwrap_or(0)
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry.read();
        let mut names: Vec<(&String, usize)> = registry
            .listeners
            .iter()
            .map(|(name, entries)| (name, entries.len()))
            .collect();
        names.sort();
        f.debug_struct("EventDispatcher")
            .field("listeners", &names)
            .finish()
    }
}

/// A bundle of listeners attached in one go
pub trait EventSubscriber: Send + Sync {
    fn subscribe(self: Arc<Self>, dispatcher: &EventDispatcher);
}

/// Names of the events fired by the kernel, in lifecycle order
pub struct KernelEvents;

impl KernelEvents {
    /// Before routing and controller resolution; listeners may answer early
    pub const REQUEST: &'static str = "kernel.request";
    pub const CONTROLLER: &'static str = "kernel.controller";
    pub const CONTROLLER_ARGUMENTS: &'static str = "kernel.controller_arguments";
    /// The controller returned something other than a response
    pub const VIEW: &'static str = "kernel.view";
    pub const RESPONSE: &'static str = "kernel.response";
    pub const EXCEPTION: &'static str = "kernel.exception";
    /// After the response was sent
    pub const TERMINATE: &'static str = "kernel.terminate";
}

/// Fired first for every request
#[derive(Debug)]
pub struct RequestEvent {
    request: HttpRequest,
    request_type: RequestType,
    response: Option<HttpResponse>,
}

impl RequestEvent {
    pub fn new(request: HttpRequest, request_type: RequestType) -> Self {
        Self {
            request,
            request_type,
            response: None,
        }
    }

    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut HttpRequest {
        &mut self.request
    }

    pub fn request_type(&self) -> RequestType {
        self.request_type
    }

    pub fn is_master_request(&self) -> bool {
        self.request_type == RequestType::Master
    }

    /// Answer the request without invoking a controller.
    ///
    /// Remaining listeners still run; a later response replaces this one.
    pub fn set_response(&mut self, response: HttpResponse) {
        self.response = Some(response);
    }

    pub fn has_response(&self) -> bool {
        self.response.is_some()
    }

    pub fn response(&self) -> Option<&HttpResponse> {
        self.response.as_ref()
    }

    pub fn into_parts(self) -> (HttpRequest, Option<HttpResponse>) {
        (self.request, self.response)
    }
}

impl Event for RequestEvent {}

/// Fired once the controller for the request is known
pub struct ControllerEvent {
    request: HttpRequest,
    request_type: RequestType,
    controller: BoxedHandler,
}

impl ControllerEvent {
    pub fn new(request: HttpRequest, request_type: RequestType, controller: BoxedHandler) -> Self {
        Self {
            request,
            request_type,
            controller,
        }
    }

    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut HttpRequest {
        &mut self.request
    }

    pub fn request_type(&self) -> RequestType {
        self.request_type
    }

    pub fn controller(&self) -> &BoxedHandler {
        &self.controller
    }

    /// Swap the controller that will be invoked
    pub fn set_controller(&mut self, controller: BoxedHandler) {
        self.controller = controller;
    }

    pub fn into_parts(self) -> (HttpRequest, BoxedHandler) {
        (self.request, self.controller)
    }
}

impl Event for ControllerEvent {}

/// Fired with the resolved controller arguments before invocation
pub struct ControllerArgumentsEvent {
    request: HttpRequest,
    request_type: RequestType,
    arguments: Vec<(String, Value)>,
}

impl ControllerArgumentsEvent {
    pub fn new(
        request: HttpRequest,
        request_type: RequestType,
        arguments: Vec<(String, Value)>,
    ) -> Self {
        Self {
            request,
            request_type,
            arguments,
        }
    }

    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    pub fn request_type(&self) -> RequestType {
        self.request_type
    }

    pub fn arguments(&self) -> &[(String, Value)] {
        &self.arguments
    }

    pub fn set_arguments(&mut self, arguments: Vec<(String, Value)>) {
        self.arguments = arguments;
    }

    pub fn into_parts(self) -> (HttpRequest, Vec<(String, Value)>) {
        (self.request, self.arguments)
    }
}

impl Event for ControllerArgumentsEvent {}

/// Fired when the controller result is not a response
#[derive(Debug)]
pub struct ViewEvent {
    request: HttpRequest,
    request_type: RequestType,
    result: Reply,
    response: Option<HttpResponse>,
}

impl ViewEvent {
    pub fn new(request: HttpRequest, request_type: RequestType, result: Reply) -> Self {
        Self {
            request,
            request_type,
            result,
            response: None,
        }
    }

    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    pub fn request_type(&self) -> RequestType {
        self.request_type
    }

    /// The controller result, possibly rewritten by earlier view listeners
    pub fn controller_result(&self) -> &Reply {
        &self.result
    }

    pub fn set_controller_result(&mut self, result: Reply) {
        self.result = result;
    }

    /// Set the final response; stops propagation
    pub fn set_response(&mut self, response: HttpResponse) {
        self.response = Some(response);
    }

    pub fn has_response(&self) -> bool {
        self.response.is_some()
    }

    pub fn into_parts(self) -> (HttpRequest, Reply, Option<HttpResponse>) {
        (self.request, self.result, self.response)
    }
}

impl Event for ViewEvent {
    fn is_propagation_stopped(&self) -> bool {
        self.response.is_some()
    }
}

/// Fired with the response before it leaves the kernel
#[derive(Debug)]
pub struct ResponseEvent {
    request: HttpRequest,
    request_type: RequestType,
    response: HttpResponse,
}

impl ResponseEvent {
    pub fn new(request: HttpRequest, request_type: RequestType, response: HttpResponse) -> Self {
        Self {
            request,
            request_type,
            response,
        }
    }

    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    pub fn request_type(&self) -> RequestType {
        self.request_type
    }

    pub fn is_master_request(&self) -> bool {
        self.request_type == RequestType::Master
    }

    pub fn response(&self) -> &HttpResponse {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut HttpResponse {
        &mut self.response
    }

    /// Borrow the request and the response at the same time
    pub fn parts_mut(&mut self) -> (&HttpRequest, &mut HttpResponse) {
        (&self.request, &mut self.response)
    }

    pub fn set_response(&mut self, response: HttpResponse) {
        self.response = response;
    }

    pub fn into_parts(self) -> (HttpRequest, HttpResponse) {
        (self.request, self.response)
    }
}

impl Event for ResponseEvent {}

/// Fired when handling failed; the first listener to set a response wins
#[derive(Debug)]
pub struct ExceptionEvent {
    request: HttpRequest,
    request_type: RequestType,
    error: Error,
    response: Option<HttpResponse>,
}

impl ExceptionEvent {
    pub fn new(request: HttpRequest, request_type: RequestType, error: Error) -> Self {
        Self {
            request,
            request_type,
            error,
            response: None,
        }
    }

    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    pub fn request_type(&self) -> RequestType {
        self.request_type
    }

    pub fn error(&self) -> &Error {
        &self.error
    }

    /// Replace the error that propagates if nobody answers it
    pub fn set_error(&mut self, error: Error) {
        self.error = error;
    }

    /// Recover with `response`; stops propagation
    pub fn set_response(&mut self, response: HttpResponse) {
        self.response = Some(response);
    }

    pub fn has_response(&self) -> bool {
        self.response.is_some()
    }

    pub fn into_parts(self) -> (HttpRequest, Error, Option<HttpResponse>) {
        (self.request, self.error, self.response)
    }
}

impl Event for ExceptionEvent {
    fn is_propagation_stopped(&self) -> bool {
        self.response.is_some()
    }
}

/// Fired after the response was sent
#[derive(Debug)]
pub struct TerminateEvent {
    request: HttpRequest,
    response: HttpResponse,
}

impl TerminateEvent {
    pub fn new(request: HttpRequest, response: HttpResponse) -> Self {
        Self { request, response }
    }

    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    pub fn response(&self) -> &HttpResponse {
        &self.response
    }
}

impl Event for TerminateEvent {}
