// Default error page
//
// Last-resort EXCEPTION listener: renders any error that no earlier
// listener answered as a small HTML page carrying the error's status and
// headers. The message is only shown in debug mode.

use crate::Error;
use crate::escape::{escape_html, Charset};
use crate::events::{EventDispatcher, EventSubscriber, ExceptionEvent, KernelEvents};
use crate::http::HttpResponse;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ExceptionHandler {
    debug: bool,
}

impl ExceptionHandler {
    pub const PRIORITY: i32 = -255;

    pub fn new(debug: bool) -> Self {
        Self { debug }
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    /// Build the error page for `error`
    pub fn render(&self, error: &Error) -> HttpResponse {
        let status = error.status_code();
        let reason = ::http::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("Error");

        let title = match status {
            404 => "Sorry, the page you are looking for could not be found.".to_string(),
            405 => "The method is not allowed for the requested URL.".to_string(),
            _ => "Whoops, looks like something went wrong.".to_string(),
        };
        let details = if self.debug {
            format!(
                "<p class=\"message\">{}</p>",
                escape_html(&error.to_string(), Charset::Utf8)
            )
        } else {
            String::new()
        };

        let body = format!(
            "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"UTF-8\" />\n<title>{status} {reason}</title>\n</head>\n<body>\n<h1>{title}</h1>\n{details}\n</body>\n</html>\n",
        );

        let mut response = HttpResponse::new(status)
            .content_type("text/html; charset=UTF-8")
            .with_body(body.into_bytes());
        for (name, value) in error.headers() {
            response.set_header(name, value);
        }
        response
    }

    fn on_exception(&self, event: &mut ExceptionEvent) -> Result<(), Error> {
        if !event.has_response() {
            let response = self.render(event.error());
            event.set_response(response);
        }
        Ok(())
    }
}

impl EventSubscriber for ExceptionHandler {
    fn subscribe(self: Arc<Self>, dispatcher: &EventDispatcher) {
        dispatcher.add_listener(
            KernelEvents::EXCEPTION,
            move |event: &mut ExceptionEvent| self.on_exception(event),
            Self::PRIORITY,
        );
    }
}
