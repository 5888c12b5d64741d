// HTTP/1 server loop on top of hyper

use crate::Error;
use crate::application::Application;
use crate::http::{HttpRequest, HttpResponse, RequestType};
use crate::logging::{error, info};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, body::Incoming as IncomingBody};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

impl Application {
    /// Serve the application on `0.0.0.0:port` until the listener fails.
    ///
    /// The application is booted and its routes flushed before the first
    /// connection is accepted.
    pub async fn listen(self: Arc<Self>, port: u16) -> Result<(), Error> {
        self.boot()?;
        self.flush()?;

        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr).await?;
        info!(address = %addr, "Server listening");

        loop {
            let (stream, remote) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let app = self.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<IncomingBody>| {
                    let app = app.clone();
                    async move { serve(app, req).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!(remote = %remote, error = %err, "Error serving connection");
                }
            });
        }
    }
}

async fn serve(
    app: Arc<Application>,
    req: Request<IncomingBody>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let uri = match req.uri().query() {
        Some(query) => format!("{}?{}", req.uri().path(), query),
        None => req.uri().path().to_string(),
    };
    let mut request = HttpRequest::new(req.method().as_str(), uri);
    for (name, value) in req.headers() {
        if let Ok(value) = value.to_str() {
            request.headers.insert(name.to_string(), value.to_string());
        }
    }
    request.body = req.collect().await?.to_bytes().to_vec();

    let mut response = match app.handle(request.clone(), RequestType::Master, true).await {
        Ok(response) => response,
        Err(err) => {
            error!(path = %request.path, error = %err, "Unhandled error");
            unhandled_error_response(&err)
        }
    };
    response.prepare(&request, &app.charset());

    let mut builder = Response::builder().status(response.status);
    for (name, value) in &response.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    let reply = builder
        .body(Full::new(Bytes::from(response.body.clone())))
        .unwrap_or_else(|e| {
            error!(error = %e, "Invalid response");
            let mut fallback = Response::new(Full::new(Bytes::new()));
            *fallback.status_mut() = hyper::StatusCode::INTERNAL_SERVER_ERROR;
            fallback
        });

    tokio::spawn(async move {
        app.terminate(&request, &response);
    });

    Ok(reply)
}

/// Bare status page for an error no listener answered; the error text stays in the logs
fn unhandled_error_response(err: &Error) -> HttpResponse {
    let status = err.status_code();
    let reason = ::http::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Error");
    let mut response = HttpResponse::new(status).with_body(reason.as_bytes().to_vec());
    for (name, value) in err.headers() {
        response.set_header(name, value);
    }
    response
}
