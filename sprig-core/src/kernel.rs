// Request-to-response pipeline
//
// The kernel only sequences events: it asks listeners to route the request,
// resolves and invokes the controller, hands non-response results to the
// view listeners and lets response listeners post-process the result.
// Failures go through the exception listeners when the caller asks for it.

use crate::Error;
use crate::container::WeakContainer;
use crate::events::{
    ControllerArgumentsEvent, ControllerEvent, EventDispatcher, ExceptionEvent, KernelEvents,
    RequestEvent, ResponseEvent, TerminateEvent, ViewEvent,
};
use crate::handler::{BoxedHandler, ControllerTarget};
use crate::http::{HttpRequest, HttpResponse, Reply, RequestType};
use crate::logging::{debug, trace, warn};
use serde_json::Value;
use std::mem;
use std::sync::Arc;

/// Finds the handler attached to the route matched for a request
#[derive(Clone)]
pub struct ControllerResolver {
    container: WeakContainer,
}

impl ControllerResolver {
    pub fn new(container: WeakContainer) -> Self {
        Self { container }
    }

    pub fn get_controller(&self, request: &HttpRequest) -> Result<BoxedHandler, Error> {
        let route = request.route.as_ref().ok_or_else(|| {
            Error::ControllerNotFound(format!(
                "no route is attached to \"{} {}\"",
                request.method, request.path
            ))
        })?;

        match route.target() {
            ControllerTarget::Callable(handler) => Ok(handler.clone()),
            ControllerTarget::Service(key) => {
                let container = self.container.upgrade().ok_or_else(|| {
                    Error::Internal("the container has been dropped".to_string())
                })?;
                let handler = container.get::<BoxedHandler>(key).map_err(|e| {
                    Error::ControllerNotFound(format!(
                        "service \"{}\" for route \"{}\": {}",
                        key,
                        route.name(),
                        e
                    ))
                })?;
                Ok((*handler).clone())
            }
        }
    }
}

/// Collects the values of the arguments a route declares
#[derive(Debug, Clone, Default)]
pub struct ArgumentResolver;

impl ArgumentResolver {
    pub fn new() -> Self {
        Self
    }

    /// Each declared argument comes from the request attributes, then the
    /// query string, then the route defaults.
    pub fn get_arguments(&self, request: &HttpRequest) -> Result<Vec<(String, Value)>, Error> {
        let Some(route) = request.route.as_ref() else {
            return Ok(Vec::new());
        };

        route
            .arguments()
            .iter()
            .map(|name| {
                let value = request
                    .attributes
                    .get(name)
                    .cloned()
                    .or_else(|| request.query(name).map(Value::from))
                    .or_else(|| route.defaults().get(name).cloned())
                    .ok_or_else(|| Error::MissingArgument {
                        route: route.name().to_string(),
                        argument: name.clone(),
                    })?;
                Ok((name.clone(), value))
            })
            .collect()
    }
}

/// Drives a request through the kernel events
#[derive(Clone)]
pub struct HttpKernel {
    dispatcher: Arc<EventDispatcher>,
    resolver: Arc<ControllerResolver>,
    argument_resolver: Arc<ArgumentResolver>,
}

impl HttpKernel {
    pub fn new(
        dispatcher: Arc<EventDispatcher>,
        resolver: Arc<ControllerResolver>,
        argument_resolver: Arc<ArgumentResolver>,
    ) -> Self {
        Self {
            dispatcher,
            resolver,
            argument_resolver,
        }
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    /// Turn `request` into a response.
    ///
    /// With `catch` set, failures are offered to the EXCEPTION listeners and
    /// the original error is returned only if none of them answered.
    pub async fn handle(
        &self,
        request: HttpRequest,
        request_type: RequestType,
        catch: bool,
    ) -> Result<HttpResponse, Error> {
        let mut request = request;
        match self.handle_raw(&mut request, request_type).await {
            Ok(response) => Ok(response),
            Err(error) if catch => self.handle_error(error, request, request_type),
            Err(error) => Err(error),
        }
    }

    async fn handle_raw(
        &self,
        request: &mut HttpRequest,
        request_type: RequestType,
    ) -> Result<HttpResponse, Error> {
        // Listeners may answer before any controller runs
        let mut event = RequestEvent::new(mem::take(request), request_type);
        let dispatched = self.dispatcher.dispatch(KernelEvents::REQUEST, &mut event);
        let (req, early) = event.into_parts();
        *request = req;
        dispatched?;
        if let Some(response) = early {
            debug!(path = %request.path, status = response.status, "Request answered early");
            return self.filter_response(response, request, request_type);
        }

        let controller = self.resolver.get_controller(request)?;
        let mut event = ControllerEvent::new(mem::take(request), request_type, controller);
        let dispatched = self.dispatcher.dispatch(KernelEvents::CONTROLLER, &mut event);
        let (req, controller) = event.into_parts();
        *request = req;
        dispatched?;

        let arguments = self.argument_resolver.get_arguments(request)?;
        let mut event = ControllerArgumentsEvent::new(mem::take(request), request_type, arguments);
        let dispatched = self
            .dispatcher
            .dispatch(KernelEvents::CONTROLLER_ARGUMENTS, &mut event);
        let (req, arguments) = event.into_parts();
        *request = req;
        dispatched?;
        for (name, value) in arguments {
            request.attributes.insert(name, value);
        }

        trace!(route = ?request.route_name(), "Invoking controller");
        let result = controller.call(request.clone()).await?;

        let response = match result {
            Reply::Response(response) => response,
            result => {
                let mut event = ViewEvent::new(mem::take(request), request_type, result);
                let dispatched = self.dispatcher.dispatch(KernelEvents::VIEW, &mut event);
                let (req, result, response) = event.into_parts();
                *request = req;
                dispatched?;
                response.ok_or_else(|| Error::InvalidControllerResult(result.kind().to_string()))?
            }
        };

        self.filter_response(response, request, request_type)
    }

    fn filter_response(
        &self,
        response: HttpResponse,
        request: &mut HttpRequest,
        request_type: RequestType,
    ) -> Result<HttpResponse, Error> {
        let mut event = ResponseEvent::new(mem::take(request), request_type, response);
        let dispatched = self.dispatcher.dispatch(KernelEvents::RESPONSE, &mut event);
        let (req, response) = event.into_parts();
        *request = req;
        dispatched.map(|_| response)
    }

    fn handle_error(
        &self,
        error: Error,
        request: HttpRequest,
        request_type: RequestType,
    ) -> Result<HttpResponse, Error> {
        debug!(error = %error, "Handling error through exception listeners");
        let mut event = ExceptionEvent::new(request, request_type, error);
        let dispatched = self.dispatcher.dispatch(KernelEvents::EXCEPTION, &mut event);
        let (mut request, error, response) = event.into_parts();

        if let Err(listener_error) = dispatched {
            warn!(error = %error, listener_error = %listener_error, "Exception listener failed");
            return Err(listener_error);
        }

        let Some(response) = response else {
            return Err(error);
        };

        // A response that fails post-processing is still better than the error
        let fallback = response.clone();
        match self.filter_response(response, &mut request, request_type) {
            Ok(response) => Ok(response),
            Err(filter_error) => {
                warn!(error = %filter_error, "Response listeners failed for an error response");
                Ok(fallback)
            }
        }
    }

    /// Fire TERMINATE once the response was sent
    pub fn terminate(&self, request: &HttpRequest, response: &HttpResponse) -> Result<(), Error> {
        let mut event = TerminateEvent::new(request.clone(), response.clone());
        self.dispatcher.dispatch(KernelEvents::TERMINATE, &mut event)
    }
}
