// Controller handlers
//
// Every route target ends up as a `BoxedHandler`: a cheap-clone, type-erased
// async function from `HttpRequest` to `Reply`. Closures, `RequestHandler`
// implementations and handlers stored in the container all share it.

use crate::http::{HttpRequest, Reply};
use crate::Error;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// The future every handler call resolves through
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Reply, Error>> + Send>>;

/// Object-style controller.
///
/// ```
/// use sprig_core::{async_trait, Error, HttpRequest, Reply, RequestHandler};
///
/// struct Health;
///
/// #[async_trait]
/// impl RequestHandler for Health {
///     async fn handle(&self, _request: HttpRequest) -> Result<Reply, Error> {
///         Ok("ok".into())
///     }
/// }
/// ```
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: HttpRequest) -> Result<Reply, Error>;
}

trait ErasedHandler: Send + Sync {
    fn call(&self, request: HttpRequest) -> HandlerFuture;
}

struct FnHandler<F> {
    f: F,
}

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, Error>> + Send + 'static,
    R: Into<Reply> + 'static,
{
    fn call(&self, request: HttpRequest) -> HandlerFuture {
        let future = (self.f)(request);
        Box::pin(async move { future.await.map(Into::into) })
    }
}

struct ObjectHandler<H> {
    handler: Arc<H>,
}

impl<H: RequestHandler + 'static> ErasedHandler for ObjectHandler<H> {
    fn call(&self, request: HttpRequest) -> HandlerFuture {
        let handler = self.handler.clone();
        Box::pin(async move { handler.handle(request).await })
    }
}

/// Type-erased handler for storing in routes and in the container
#[derive(Clone)]
pub struct BoxedHandler {
    inner: Arc<dyn ErasedHandler>,
}

impl BoxedHandler {
    /// Wrap an async closure returning anything convertible to a [`Reply`]
    pub fn from_fn<F, Fut, R>(f: F) -> Self
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, Error>> + Send + 'static,
        R: Into<Reply> + 'static,
    {
        Self {
            inner: Arc::new(FnHandler { f }),
        }
    }

    pub fn from_handler<H: RequestHandler + 'static>(handler: H) -> Self {
        Self::from_arc(Arc::new(handler))
    }

    pub fn from_arc<H: RequestHandler + 'static>(handler: Arc<H>) -> Self {
        Self {
            inner: Arc::new(ObjectHandler { handler }),
        }
    }

    pub fn call(&self, request: HttpRequest) -> HandlerFuture {
        self.inner.call(request)
    }

    /// Whether both handles point at the same handler
    pub fn ptr_eq(&self, other: &BoxedHandler) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for BoxedHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BoxedHandler")
    }
}

/// What a route points at
#[derive(Clone, Debug)]
pub enum ControllerTarget {
    Callable(BoxedHandler),
    /// Container key of a `BoxedHandler` service, looked up per request
    Service(String),
}

impl ControllerTarget {
    pub fn service(key: impl Into<String>) -> Self {
        ControllerTarget::Service(key.into())
    }
}

impl From<BoxedHandler> for ControllerTarget {
    fn from(handler: BoxedHandler) -> Self {
        ControllerTarget::Callable(handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpResponse;

    struct Greeter;

    #[async_trait]
    impl RequestHandler for Greeter {
        async fn handle(&self, request: HttpRequest) -> Result<Reply, Error> {
            Ok(format!("hi {}", request.path).into())
        }
    }

    #[tokio::test]
    async fn test_closure_results_are_converted() {
        let text = BoxedHandler::from_fn(|_req| async { Ok::<_, Error>("plain") });
        assert_eq!(
            text.call(HttpRequest::default()).await.unwrap(),
            Reply::Text("plain".to_string())
        );

        let response = BoxedHandler::from_fn(|_req| async { Ok::<_, Error>(HttpResponse::created()) });
        assert_eq!(
            response.call(HttpRequest::default()).await.unwrap(),
            Reply::Response(HttpResponse::created())
        );
    }

    #[tokio::test]
    async fn test_errors_pass_through() {
        let failing = BoxedHandler::from_fn(|_req| async {
            Err::<String, _>(Error::Internal("nope".to_string()))
        });
        assert!(failing.call(HttpRequest::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_object_handler() {
        let handler = BoxedHandler::from_handler(Greeter);
        let reply = handler.call(HttpRequest::new("GET", "/there")).await.unwrap();
        assert_eq!(reply, Reply::Text("hi /there".to_string()));
        assert!(handler.ptr_eq(&handler.clone()));
    }
}
