// Built-in kernel listeners
//
// Routing, attribute conversion, route middlewares, string coercion and
// request logging are all plain event subscribers; the kernel itself knows
// nothing about them.

use crate::events::{
    ControllerEvent, EventDispatcher, EventSubscriber, ExceptionEvent, KernelEvents,
    RequestEvent, ResponseEvent, ViewEvent,
};
use crate::http::{HttpResponse, Reply};
use crate::logging::{debug, error, info, warn};
use crate::routing::{match_route, SharedRoutes};
use std::sync::Arc;

/// Matches the request against the route table and stores the result
/// on the request (`route` plus one attribute per parameter).
pub struct RouterListener {
    routes: SharedRoutes,
}

impl RouterListener {
    pub const PRIORITY: i32 = 32;

    pub fn new(routes: SharedRoutes) -> Self {
        Self { routes }
    }

    fn on_request(&self, event: &mut RequestEvent) -> Result<(), crate::Error> {
        let request = event.request_mut();
        if request.route.is_some() {
            // Already routed, e.g. a forwarded sub-request
            return Ok(());
        }

        let matched = match_route(&self.routes.read(), &request.method, &request.path)?;
        debug!(
            route = %matched.route.name(),
            method = %request.method,
            path = %request.path,
            "Matched route"
        );
        for (key, value) in matched.params {
            request.attributes.insert(key, value);
        }
        request.route = Some(matched.route);
        Ok(())
    }
}

impl EventSubscriber for RouterListener {
    fn subscribe(self: Arc<Self>, dispatcher: &EventDispatcher) {
        dispatcher.add_listener(
            KernelEvents::REQUEST,
            move |event: &mut RequestEvent| self.on_request(event),
            Self::PRIORITY,
        );
    }
}

/// Runs the converters of the matched route over the request attributes
pub struct ConverterListener;

impl ConverterListener {
    pub const PRIORITY: i32 = 0;

    fn on_controller(event: &mut ControllerEvent) -> Result<(), crate::Error> {
        let Some(route) = event.request().route.clone() else {
            return Ok(());
        };

        for (variable, converter) in route.converters() {
            let request = event.request();
            let raw = request
                .attributes
                .get(variable)
                .cloned()
                .unwrap_or(serde_json::Value::Null);
            let converted = converter(raw, request)?;
            event.request_mut().attributes.insert(variable.clone(), converted);
        }
        Ok(())
    }
}

impl EventSubscriber for ConverterListener {
    fn subscribe(self: Arc<Self>, dispatcher: &EventDispatcher) {
        dispatcher.add_listener(
            KernelEvents::CONTROLLER,
            ConverterListener::on_controller,
            Self::PRIORITY,
        );
    }
}

/// Runs the `before` and `after` middlewares attached to the matched route
pub struct MiddlewareListener;

impl MiddlewareListener {
    pub const BEFORE_PRIORITY: i32 = -1024;
    pub const AFTER_PRIORITY: i32 = 128;

    fn on_request(event: &mut RequestEvent) -> Result<(), crate::Error> {
        if event.has_response() {
            return Ok(());
        }
        let Some(route) = event.request().route.clone() else {
            return Ok(());
        };

        for middleware in route.before_middlewares() {
            if let Some(response) = middleware(event.request_mut())? {
                event.set_response(response);
                break;
            }
        }
        Ok(())
    }

    fn on_response(event: &mut ResponseEvent) -> Result<(), crate::Error> {
        let Some(route) = event.request().route.clone() else {
            return Ok(());
        };

        let (request, response) = event.parts_mut();
        for middleware in route.after_middlewares() {
            middleware(request, response)?;
        }
        Ok(())
    }
}

impl EventSubscriber for MiddlewareListener {
    fn subscribe(self: Arc<Self>, dispatcher: &EventDispatcher) {
        dispatcher.add_listener(
            KernelEvents::REQUEST,
            MiddlewareListener::on_request,
            Self::BEFORE_PRIORITY,
        );
        dispatcher.add_listener(
            KernelEvents::RESPONSE,
            MiddlewareListener::on_response,
            Self::AFTER_PRIORITY,
        );
    }
}

/// Turns a text controller result into a `200 OK` response
pub struct StringToResponseListener;

impl StringToResponseListener {
    pub const PRIORITY: i32 = -10;

    fn on_view(event: &mut ViewEvent) -> Result<(), crate::Error> {
        let body = match event.controller_result() {
            Reply::Text(text) => text.clone(),
            Reply::Response(response) => {
                let response = response.clone();
                event.set_response(response);
                return Ok(());
            }
            Reply::Data(_) => return Ok(()),
        };
        event.set_response(HttpResponse::ok().with_body(body.into_bytes()));
        Ok(())
    }
}

impl EventSubscriber for StringToResponseListener {
    fn subscribe(self: Arc<Self>, dispatcher: &EventDispatcher) {
        dispatcher.add_listener(
            KernelEvents::VIEW,
            StringToResponseListener::on_view,
            Self::PRIORITY,
        );
    }
}

/// Logs requests, responses and errors
pub struct LogListener;

impl LogListener {
    pub const REQUEST_PRIORITY: i32 = 64;
    pub const RESPONSE_PRIORITY: i32 = 0;
    pub const EXCEPTION_PRIORITY: i32 = -4;

    fn on_request(event: &mut RequestEvent) -> Result<(), crate::Error> {
        let request = event.request();
        info!(
            method = %request.method,
            path = %request.path,
            sub_request = !event.is_master_request(),
            "> {} {}",
            request.method,
            request.path
        );
        Ok(())
    }

    fn on_response(event: &mut ResponseEvent) -> Result<(), crate::Error> {
        let status = event.response().status;
        match event.response().header("Location") {
            Some(location) => info!(status, location = %location, "< {} {}", status, location),
            None => info!(status, "< {}", status),
        }
        Ok(())
    }

    fn on_exception(event: &mut ExceptionEvent) -> Result<(), crate::Error> {
        let err = event.error();
        let status = err.status_code();
        if err.is_client_error() {
            warn!(status, error = %err, "{}", err);
        } else {
            error!(status, error = %err, "{}", err);
        }
        Ok(())
    }
}

impl EventSubscriber for LogListener {
    fn subscribe(self: Arc<Self>, dispatcher: &EventDispatcher) {
        dispatcher.add_listener(
            KernelEvents::REQUEST,
            LogListener::on_request,
            Self::REQUEST_PRIORITY,
        );
        dispatcher.add_listener(
            KernelEvents::RESPONSE,
            LogListener::on_response,
            Self::RESPONSE_PRIORITY,
        );
        dispatcher.add_listener(
            KernelEvents::EXCEPTION,
            LogListener::on_exception,
            Self::EXCEPTION_PRIORITY,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ControllerCollection;
    use crate::http::{HttpRequest, RequestType};
    use crate::{Error, HttpResponse};
    use parking_lot::RwLock;

    async fn ok(_req: HttpRequest) -> Result<&'static str, Error> {
        Ok("ok")
    }

    fn routes(collection: &ControllerCollection) -> SharedRoutes {
        Arc::new(RwLock::new(collection.flush("").unwrap()))
    }

    #[test]
    fn test_router_sets_route_and_attributes() {
        let collection = ControllerCollection::new();
        collection.get("/hello/{name}", ok).value("greeting", "hi");
        let dispatcher = EventDispatcher::new();
        dispatcher.add_subscriber(Arc::new(RouterListener::new(routes(&collection))));

        let mut event = RequestEvent::new(HttpRequest::new("GET", "/hello/World"), RequestType::Master);
        dispatcher.dispatch(KernelEvents::REQUEST, &mut event).unwrap();

        let (request, response) = event.into_parts();
        assert!(response.is_none());
        assert_eq!(request.route_name(), Some("GET_hello_name"));
        assert_eq!(request.param("name"), Some("World"));
        assert_eq!(request.param("greeting"), Some("hi"));
    }

    #[test]
    fn test_router_reports_misses() {
        let dispatcher = EventDispatcher::new();
        dispatcher.add_subscriber(Arc::new(RouterListener::new(routes(&ControllerCollection::new()))));

        let mut event = RequestEvent::new(HttpRequest::new("GET", "/missing"), RequestType::Master);
        assert!(matches!(
            dispatcher.dispatch(KernelEvents::REQUEST, &mut event),
            Err(Error::RouteNotFound(_))
        ));
    }

    #[test]
    fn test_route_before_middleware_short_circuits() {
        let collection = ControllerCollection::new();
        collection
            .get("/admin", ok)
            .before(|_req| Ok(Some(HttpResponse::new(401))))
            .before(|_req| Err(Error::Internal("not reached".to_string())));
        let dispatcher = EventDispatcher::new();
        dispatcher.add_subscriber(Arc::new(RouterListener::new(routes(&collection))));
        dispatcher.add_subscriber(Arc::new(MiddlewareListener));

        let mut event = RequestEvent::new(HttpRequest::new("GET", "/admin"), RequestType::Master);
        dispatcher.dispatch(KernelEvents::REQUEST, &mut event).unwrap();
        assert_eq!(event.response().map(|r| r.status), Some(401));
    }

    #[test]
    fn test_string_to_response() {
        let dispatcher = EventDispatcher::new();
        dispatcher.add_subscriber(Arc::new(StringToResponseListener));

        let mut event = ViewEvent::new(HttpRequest::default(), RequestType::Master, "Hello".into());
        dispatcher.dispatch(KernelEvents::VIEW, &mut event).unwrap();
        let (_, _, response) = event.into_parts();
        let response = response.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body_string(), "Hello");

        let mut event = ViewEvent::new(
            HttpRequest::default(),
            RequestType::Master,
            Reply::Data(serde_json::json!({"a": 1})),
        );
        dispatcher.dispatch(KernelEvents::VIEW, &mut event).unwrap();
        assert!(!event.has_response());
    }
}
