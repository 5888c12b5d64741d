// The application: container, providers, routes and the request lifecycle

use crate::Error;
use crate::container::Container;
use crate::controller::{Controller, ControllerCollection};
use crate::escape::{escape_html, Charset};
use crate::events::{
    Event, EventDispatcher, ExceptionEvent, KernelEvents, RequestEvent, ResponseEvent,
    TerminateEvent, ViewEvent,
};
use crate::handler::ControllerTarget;
use crate::http::{HttpRequest, HttpResponse, Reply, RequestType};
use crate::kernel::HttpKernel;
use crate::logging::{debug, error, info};
use crate::provider::{
    ControllerProvider, HttpKernelServiceProvider, Parameters, RoutingServiceProvider,
    ServiceProvider,
};
use crate::routing::{RouteCollection, UrlGenerator};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

type PendingListener = Box<dyn FnOnce(&EventDispatcher) + Send>;

/// Listeners added before the dispatcher exists
#[derive(Default)]
struct PendingListeners {
    drained: bool,
    listeners: Vec<PendingListener>,
}

/// The application
///
/// ```
/// use sprig_core::{Application, Error, HttpRequest, RequestType};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let app = Application::new();
/// app.get("/hello/{name}", |req: HttpRequest| async move {
///     Ok::<_, Error>(format!("Hello {}", req.param("name").unwrap_or("you")))
/// });
///
/// let response = app
///     .handle(HttpRequest::new("GET", "/hello/World"), RequestType::Master, true)
///     .await
///     .unwrap();
/// assert_eq!(response.body_string(), "Hello World");
/// # }
/// ```
pub struct Application {
    container: Container,
    controllers: ControllerCollection,
    providers: RwLock<Vec<Arc<dyn ServiceProvider>>>,
    booted: AtomicBool,
    pending: Arc<Mutex<PendingListeners>>,
}

impl Application {
    /// Priority for listeners that must run before routing
    pub const EARLY_EVENT: i32 = 512;
    /// Priority for listeners that must run after everything else
    pub const LATE_EVENT: i32 = -512;

    /// Create an application with the default parameters and the routing
    /// and kernel providers registered.
    pub fn new() -> Self {
        let container = Container::new();
        container.set("debug", false);
        container.set("charset", String::from("UTF-8"));
        container.set("request.http_port", 80u16);
        container.set("request.https_port", 443u16);
        container.set("logger.enabled", false);

        let pending = Arc::new(Mutex::new(PendingListeners::default()));
        let queued = pending.clone();
        container.share("dispatcher", move |_| {
            let dispatcher = EventDispatcher::new();
            let mut pending = queued.lock();
            let listeners = std::mem::take(&mut pending.listeners);
            debug!(listeners = listeners.len(), "Attaching deferred listeners");
            for attach in listeners {
                attach(&dispatcher);
            }
            pending.drained = true;
            Ok(dispatcher)
        });

        let controllers = ControllerCollection::new();

        let app = Self {
            container,
            controllers,
            providers: RwLock::new(Vec::new()),
            booted: AtomicBool::new(false),
            pending,
        };

        let builtin: [Arc<dyn ServiceProvider>; 2] =
            [Arc::new(RoutingServiceProvider), Arc::new(HttpKernelServiceProvider)];
        // Both built-in providers only define container entries, which cannot fail
        for provider in builtin {
            if let Err(e) = app.register_arc(provider, Parameters::new()) {
                error!(error = %e, "Failed to register a built-in provider");
            }
        }

        app
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    /// The default controller collection routes are added to
    pub fn controllers(&self) -> &ControllerCollection {
        &self.controllers
    }

    pub fn is_debug(&self) -> bool {
        self.container
            .get::<bool>("debug")
            .map(|debug| *debug)
            .unwrap_or(false)
    }

    pub fn charset(&self) -> String {
        self.container
            .get::<String>("charset")
            .map(|charset| (*charset).clone())
            .unwrap_or_else(|_| "UTF-8".to_string())
    }

    pub fn dispatcher(&self) -> Result<Arc<EventDispatcher>, Error> {
        self.container.get("dispatcher")
    }

    pub fn kernel(&self) -> Result<Arc<HttpKernel>, Error> {
        self.container.get("kernel")
    }

    /// The shared route table
    pub fn routes(&self) -> Result<Arc<RwLock<RouteCollection>>, Error> {
        self.container.get("routes")
    }

    pub fn url_generator(&self) -> Result<Arc<UrlGenerator>, Error> {
        self.container.get("url_generator")
    }

    /// A fresh, empty controller collection for mounting
    pub fn controllers_factory(&self) -> Result<ControllerCollection, Error> {
        self.container
            .get::<ControllerCollection>("controllers_factory")
            .map(|collection| (*collection).clone())
    }

    // Providers

    pub fn register<P: ServiceProvider>(&self, provider: P) -> Result<(), Error> {
        self.register_arc(Arc::new(provider), Parameters::new())
    }

    /// Register a provider, then assign `parameters` over whatever it set
    pub fn register_with<P: ServiceProvider>(
        &self,
        provider: P,
        parameters: Parameters,
    ) -> Result<(), Error> {
        self.register_arc(Arc::new(provider), parameters)
    }

    pub fn register_arc(
        &self,
        provider: Arc<dyn ServiceProvider>,
        parameters: Parameters,
    ) -> Result<(), Error> {
        debug!(provider = provider.name(), "Registering service provider");
        self.providers.write().push(provider.clone());
        provider.register(self)?;
        parameters.apply(&self.container);

        if self.is_booted() {
            debug!(provider = provider.name(), "Application already booted; booting provider now");
            self.boot_provider(provider.as_ref())?;
        }
        Ok(())
    }

    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.read().iter().map(|p| p.name()).collect()
    }

    /// Subscribe and boot every provider, once.
    ///
    /// The flag is set before any provider runs, so a provider calling
    /// `boot` again is a no-op.
    pub fn boot(&self) -> Result<(), Error> {
        if self.booted.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let providers: Vec<Arc<dyn ServiceProvider>> = self.providers.read().clone();
        for provider in &providers {
            self.boot_provider(provider.as_ref())?;
        }
        info!(providers = providers.len(), "Application booted");
        Ok(())
    }

    fn boot_provider(&self, provider: &dyn ServiceProvider) -> Result<(), Error> {
        if let Some(listener) = provider.event_listener() {
            let dispatcher = self.dispatcher()?;
            listener.subscribe(self, &dispatcher)?;
        }
        if let Some(bootable) = provider.bootable() {
            debug!(provider = provider.name(), "Booting provider");
            bootable.boot(self)?;
        }
        Ok(())
    }

    pub fn is_booted(&self) -> bool {
        self.booted.load(Ordering::SeqCst)
    }

    // Listeners

    /// Attach a listener to the dispatcher.
    ///
    /// Before the dispatcher is built the listener is queued and attached
    /// when it is; afterwards it is attached directly.
    pub fn on<E, F>(&self, name: &str, listener: F, priority: i32)
    where
        E: Event,
        F: Fn(&mut E) -> Result<(), Error> + Send + Sync + 'static,
    {
        let name = name.to_string();
        let mut pending = self.pending.lock();
        if !pending.drained {
            pending.listeners.push(Box::new(move |dispatcher: &EventDispatcher| {
                dispatcher.add_listener(name, listener, priority)
            }));
            return;
        }
        drop(pending);

        match self.dispatcher() {
            Ok(dispatcher) => dispatcher.add_listener(name, listener, priority),
            Err(e) => error!(event = %name, error = %e, "Could not attach listener"),
        }
    }

    /// Run `callback` before routing answers a master request.
    ///
    /// A returned response skips the controller. Sub-requests never reach
    /// the callback.
    pub fn before<F>(&self, callback: F, priority: i32)
    where
        F: Fn(&mut HttpRequest) -> Result<Option<HttpResponse>, Error> + Send + Sync + 'static,
    {
        self.on(
            KernelEvents::REQUEST,
            move |event: &mut RequestEvent| {
                if !event.is_master_request() {
                    return Ok(());
                }
                if let Some(response) = callback(event.request_mut())? {
                    event.set_response(response);
                }
                Ok(())
            },
            priority,
        );
    }

    /// Run `callback` on the response of a master request before it is sent
    pub fn after<F>(&self, callback: F, priority: i32)
    where
        F: Fn(&HttpRequest, &mut HttpResponse) -> Result<(), Error> + Send + Sync + 'static,
    {
        self.on(
            KernelEvents::RESPONSE,
            move |event: &mut ResponseEvent| {
                if !event.is_master_request() {
                    return Ok(());
                }
                let (request, response) = event.parts_mut();
                callback(request, response)
            },
            priority,
        );
    }

    /// Run `callback` after the response was sent
    pub fn finish<F>(&self, callback: F, priority: i32)
    where
        F: Fn(&HttpRequest, &HttpResponse) -> Result<(), Error> + Send + Sync + 'static,
    {
        self.on(
            KernelEvents::TERMINATE,
            move |event: &mut TerminateEvent| callback(event.request(), event.response()),
            priority,
        );
    }

    /// Handle errors.
    ///
    /// The callback gets the error, the request and the status code the
    /// error maps to. Returning `None` passes the error to the next
    /// handler; text and data results become a response with that status.
    pub fn error<F>(&self, callback: F, priority: i32)
    where
        F: Fn(&Error, &HttpRequest, u16) -> Option<Reply> + Send + Sync + 'static,
    {
        self.on(
            KernelEvents::EXCEPTION,
            move |event: &mut ExceptionEvent| {
                if event.has_response() {
                    return Ok(());
                }
                let status = event.error().status_code();
                let Some(reply) = callback(event.error(), event.request(), status) else {
                    return Ok(());
                };

                let mut response = match reply {
                    Reply::Response(response) => response,
                    Reply::Data(Value::Null) => return Ok(()),
                    Reply::Text(text) => HttpResponse::new(status).with_body(text.into_bytes()),
                    Reply::Data(value) => HttpResponse::new(status).with_json(&value)?,
                };
                if response.status == status {
                    for (name, value) in event.error().headers() {
                        if response.header(&name).is_none() {
                            response.set_header(name, value);
                        }
                    }
                }
                event.set_response(response);
                Ok(())
            },
            priority,
        );
    }

    /// Turn non-response controller results into something sendable.
    ///
    /// Returning a response ends the view phase; any other reply replaces
    /// the controller result for the next view handler.
    pub fn view<F>(&self, callback: F, priority: i32)
    where
        F: Fn(&Reply, &HttpRequest) -> Result<Option<Reply>, Error> + Send + Sync + 'static,
    {
        self.on(
            KernelEvents::VIEW,
            move |event: &mut ViewEvent| {
                match callback(event.controller_result(), event.request())? {
                    Some(Reply::Response(response)) => event.set_response(response),
                    Some(result) => event.set_controller_result(result),
                    None => {}
                }
                Ok(())
            },
            priority,
        );
    }

    // Routes

    /// Map a pattern to a closure, for any method
    pub fn route<F, Fut, R>(&self, pattern: &str, handler: F) -> Controller
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, Error>> + Send + 'static,
        R: Into<Reply> + 'static,
    {
        self.controllers.route(pattern, handler)
    }

    /// Map a pattern to a handler object or a container service
    pub fn route_to(&self, pattern: &str, target: impl Into<ControllerTarget>) -> Controller {
        self.controllers.route_to(pattern, target)
    }

    pub fn get<F, Fut, R>(&self, pattern: &str, handler: F) -> Controller
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, Error>> + Send + 'static,
        R: Into<Reply> + 'static,
    {
        self.controllers.get(pattern, handler)
    }

    pub fn post<F, Fut, R>(&self, pattern: &str, handler: F) -> Controller
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, Error>> + Send + 'static,
        R: Into<Reply> + 'static,
    {
        self.controllers.post(pattern, handler)
    }

    pub fn put<F, Fut, R>(&self, pattern: &str, handler: F) -> Controller
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, Error>> + Send + 'static,
        R: Into<Reply> + 'static,
    {
        self.controllers.put(pattern, handler)
    }

    pub fn patch<F, Fut, R>(&self, pattern: &str, handler: F) -> Controller
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, Error>> + Send + 'static,
        R: Into<Reply> + 'static,
    {
        self.controllers.patch(pattern, handler)
    }

    pub fn delete<F, Fut, R>(&self, pattern: &str, handler: F) -> Controller
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, Error>> + Send + 'static,
        R: Into<Reply> + 'static,
    {
        self.controllers.delete(pattern, handler)
    }

    pub fn options<F, Fut, R>(&self, pattern: &str, handler: F) -> Controller
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, Error>> + Send + 'static,
        R: Into<Reply> + 'static,
    {
        self.controllers.options(pattern, handler)
    }

    /// Mount a collection under `prefix`; it is merged on the next flush
    pub fn mount(&self, prefix: &str, collection: ControllerCollection) -> Result<(), Error> {
        self.controllers.mount(prefix, collection)
    }

    /// Mount the collection a controller provider connects
    pub fn mount_provider<P: ControllerProvider>(&self, prefix: &str, provider: &P) -> Result<(), Error> {
        let collection = provider.connect(self)?;
        self.mount(prefix, collection)
    }

    /// Converter applied by every route of the default collection
    pub fn convert<F>(&self, variable: &str, converter: F) -> &Self
    where
        F: Fn(Value, &HttpRequest) -> Result<Value, Error> + Send + Sync + 'static,
    {
        self.controllers.convert(variable, converter);
        self
    }

    pub fn assert(&self, variable: &str, regex: &str) -> &Self {
        self.controllers.assert(variable, regex);
        self
    }

    pub fn value(&self, variable: &str, value: impl Into<Value>) -> &Self {
        self.controllers.value(variable, value);
        self
    }

    pub fn argument(&self, name: &str) -> &Self {
        self.controllers.argument(name);
        self
    }

    /// Move the routes added since the last flush into the route table
    pub fn flush(&self) -> Result<(), Error> {
        let flushed = self.controllers.flush("")?;
        if !flushed.is_empty() {
            self.routes()?.write().extend(flushed);
        }
        Ok(())
    }

    /// Generate the path of a named route
    pub fn path(&self, name: &str, params: &[(&str, &str)]) -> Result<String, Error> {
        self.url_generator()?.generate(name, params)
    }

    // Request lifecycle

    /// Handle a request: boot, flush pending routes, then run the kernel
    pub async fn handle(
        &self,
        request: HttpRequest,
        request_type: RequestType,
        catch: bool,
    ) -> Result<HttpResponse, Error> {
        self.boot()?;
        self.flush()?;
        let kernel = self.kernel()?;
        kernel.handle(request, request_type, catch).await
    }

    /// Fire the finish listeners for a request whose response was sent
    pub fn terminate(&self, request: &HttpRequest, response: &HttpResponse) {
        let result = self.kernel().and_then(|kernel| kernel.terminate(request, response));
        if let Err(e) = result {
            error!(path = %request.path, error = %e, "Terminate listener failed");
        }
    }

    /// Handle `request` (or the one from the environment), send the
    /// response to stdout, then terminate.
    pub async fn run(&self, request: Option<HttpRequest>) -> Result<(), Error> {
        let mut stdout = io::stdout();
        self.run_to(request, &mut stdout).await.map(|_| ())
    }

    /// Like [`run`](Self::run), writing to `writer`
    pub async fn run_to<W: Write>(
        &self,
        request: Option<HttpRequest>,
        writer: &mut W,
    ) -> Result<HttpResponse, Error> {
        let request = match request {
            Some(request) => request,
            None => HttpRequest::from_env()?,
        };

        let mut response = self
            .handle(request.clone(), RequestType::Master, true)
            .await?;
        response.prepare(&request, &self.charset());
        response.send(writer)?;
        self.terminate(&request, &response);
        Ok(response)
    }

    // Helpers

    /// Build an HTTP error to return from a handler or listener
    pub fn abort(&self, status: u16, message: impl Into<String>, headers: &[(&str, &str)]) -> Error {
        crate::error::abort(status, message, headers)
    }

    /// JSON response with the given status
    pub fn json<T: Serialize>(&self, value: &T, status: u16) -> Result<HttpResponse, Error> {
        HttpResponse::new(status).with_json(value)
    }

    pub fn redirect(&self, url: impl Into<String>, status: u16) -> HttpResponse {
        HttpResponse::redirect_with(url, status)
    }

    /// HTML-escape `text` for the configured charset
    pub fn escape(&self, text: &str) -> Result<String, Error> {
        let name = self.charset();
        let charset = Charset::from_name(&name)
            .ok_or_else(|| Error::Logic(format!("unsupported charset \"{}\"", name)))?;
        Ok(escape_html(text, charset))
    }
}

impl Default for Application {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::BootableProvider;
    use std::sync::atomic::AtomicUsize;

    struct Counting {
        boots: Arc<AtomicUsize>,
    }

    impl ServiceProvider for Counting {
        fn register(&self, app: &Application) -> Result<(), Error> {
            app.container().set("x", 1u8);
            Ok(())
        }

        fn bootable(&self) -> Option<&dyn BootableProvider> {
            Some(self)
        }
    }

    impl BootableProvider for Counting {
        fn boot(&self, app: &Application) -> Result<(), Error> {
            self.boots.fetch_add(1, Ordering::SeqCst);
            // Re-entrant boot is a no-op
            app.boot()
        }
    }

    #[test]
    fn test_default_parameters() {
        let app = Application::new();
        assert!(!app.is_debug());
        assert_eq!(app.charset(), "UTF-8");
        assert_eq!(*app.container().get::<u16>("request.http_port").unwrap(), 80);
        assert_eq!(*app.container().get::<u16>("request.https_port").unwrap(), 443);
        assert_eq!(app.provider_names(), vec!["routing", "http_kernel"]);
    }

    #[test]
    fn test_boot_runs_once() {
        let boots = Arc::new(AtomicUsize::new(0));
        let app = Application::new();
        app.register(Counting { boots: boots.clone() }).unwrap();

        app.boot().unwrap();
        app.boot().unwrap();
        app.boot().unwrap();
        assert_eq!(boots.load(Ordering::SeqCst), 1);
        assert!(app.is_booted());
    }

    #[test]
    fn test_late_provider_boots_immediately() {
        let boots = Arc::new(AtomicUsize::new(0));
        let app = Application::new();
        app.boot().unwrap();

        app.register(Counting { boots: boots.clone() }).unwrap();
        assert_eq!(boots.load(Ordering::SeqCst), 1);
        app.boot().unwrap();
        assert_eq!(boots.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_register_overrides() {
        let app = Application::new();
        let boots = Arc::new(AtomicUsize::new(0));
        app.register(Counting { boots: boots.clone() }).unwrap();
        assert_eq!(*app.container().get::<u8>("x").unwrap(), 1);

        app.register_with(Counting { boots }, Parameters::new().with("x", 2u8))
            .unwrap();
        assert_eq!(*app.container().get::<u8>("x").unwrap(), 2);
    }

    #[test]
    fn test_escape_follows_charset() {
        let app = Application::new();
        assert_eq!(app.escape("<b>").unwrap(), "&lt;b&gt;");

        app.container().set("charset", String::from("US-ASCII"));
        assert_eq!(app.escape("é<").unwrap(), "&#233;&lt;");

        app.container().set("charset", String::from("KOI8-R"));
        assert!(matches!(app.escape("x"), Err(Error::Logic(_))));
    }

    #[test]
    fn test_listeners_before_and_after_dispatcher_exists() {
        let app = Application::new();
        app.on(KernelEvents::TERMINATE, |_: &mut TerminateEvent| Ok(()), 3);
        app.on(KernelEvents::EXCEPTION, |_: &mut ExceptionEvent| Ok(()), 42);
        app.on(KernelEvents::TERMINATE, |_: &mut TerminateEvent| Ok(()), -1);
        assert!(!app.container().is_resolved("dispatcher"));

        let dispatcher = app.dispatcher().unwrap();
        assert_eq!(dispatcher.listener_priorities(KernelEvents::TERMINATE), vec![3, -1]);
        assert!(
            dispatcher
                .listener_priorities(KernelEvents::EXCEPTION)
                .contains(&42)
        );

        app.on(KernelEvents::TERMINATE, |_: &mut TerminateEvent| Ok(()), 7);
        assert_eq!(dispatcher.listener_priorities(KernelEvents::TERMINATE), vec![7, 3, -1]);
    }

    #[test]
    fn test_path_generation_after_flush() {
        let app = Application::new();
        app.get("/users/{id}", |_req| async { Ok::<_, Error>("user") })
            .bind("user");
        app.flush().unwrap();

        assert_eq!(app.path("user", &[("id", "7")]).unwrap(), "/users/7");
        assert!(app.path("missing", &[]).is_err());
    }

    #[test]
    fn test_json_and_redirect_helpers() {
        let app = Application::new();
        let response = app.json(&serde_json::json!({"ok": true}), 201).unwrap();
        assert_eq!(response.status, 201);
        assert_eq!(response.header("Content-Type"), Some("application/json"));

        let response = app.redirect("/login", 301);
        assert_eq!(response.status, 301);
        assert_eq!(response.header("Location"), Some("/login"));
    }
}
