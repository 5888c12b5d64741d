// HTTP request and response types

use crate::Error;
use crate::routing::Route;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::SystemTime;

/// Whether a request is the top-level one or an internal forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestType {
    #[default]
    Master,
    Sub,
}

/// HTTP request wrapper
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub query_string: Option<String>,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    /// Route parameters, defaults and converted values
    pub attributes: HashMap<String, Value>,
    pub query_params: HashMap<String, String>,
    /// The route matched for this request, once routing ran
    pub route: Option<Arc<Route>>,
}

impl HttpRequest {
    /// Create a request from a method and a URI (path plus optional query)
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        let uri = uri.into();
        let (path, query_string) = match uri.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (uri, None),
        };
        let path = if path.is_empty() { "/".to_string() } else { path };

        Self {
            method: method.into().to_uppercase(),
            query_params: query_string
                .as_deref()
                .map(parse_query_string)
                .unwrap_or_default(),
            path,
            query_string,
            headers: HashMap::new(),
            body: Vec::new(),
            attributes: HashMap::new(),
            route: None,
        }
    }

    /// Build the request the process was started for, CGI style.
    ///
    /// Reads `REQUEST_METHOD`, `REQUEST_URI` (or `PATH_INFO` + `QUERY_STRING`),
    /// `HTTP_*` headers, and `CONTENT_LENGTH` bytes of body from stdin.
    pub fn from_env() -> Result<Self, Error> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        let mut request = Self::from_cgi_vars(&vars);

        let length = vars
            .get("CONTENT_LENGTH")
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(0);
        if length > 0 {
            io::stdin().take(length).read_to_end(&mut request.body)?;
        }

        Ok(request)
    }

    fn from_cgi_vars(vars: &HashMap<String, String>) -> Self {
        let method = vars
            .get("REQUEST_METHOD")
            .cloned()
            .unwrap_or_else(|| "GET".to_string());
        let uri = match vars.get("REQUEST_URI") {
            Some(uri) => uri.clone(),
            None => {
                let path = vars.get("PATH_INFO").cloned().unwrap_or_else(|| "/".to_string());
                match vars.get("QUERY_STRING").filter(|q| !q.is_empty()) {
                    Some(query) => format!("{}?{}", path, query),
                    None => path,
                }
            }
        };

        let mut request = Self::new(method, uri);
        for (key, value) in vars {
            let name = match key.as_str() {
                "CONTENT_TYPE" => "content-type".to_string(),
                "CONTENT_LENGTH" => "content-length".to_string(),
                other => match other.strip_prefix("HTTP_") {
                    Some(name) => name.to_lowercase().replace('_', "-"),
                    None => continue,
                },
            };
            request.headers.insert(name, value.clone());
        }
        request
    }

    /// Set the request body
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Add a header
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Parse the request body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        serde_json::from_slice(&self.body).map_err(|e| Error::Deserialization(e.to_string()))
    }

    /// Get a string route parameter by name
    pub fn param(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(Value::as_str)
    }

    /// Get an attribute deserialized into `T`
    pub fn attribute<T: DeserializeOwned>(&self, name: &str) -> Result<T, Error> {
        let value = self
            .attributes
            .get(name)
            .ok_or_else(|| Error::Internal(format!("request attribute \"{}\" is not set", name)))?;
        serde_json::from_value(value.clone())
            .map_err(|e| Error::Deserialization(format!("attribute \"{}\": {}", name, e)))
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// Get a query parameter by name
    pub fn query(&self, name: &str) -> Option<&str> {
        self.query_params.get(name).map(String::as_str)
    }

    /// Get a header, ignoring case
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name).map(|(_, value)| value.as_str())
    }

    /// Name of the matched route, if any
    pub fn route_name(&self) -> Option<&str> {
        self.route.as_deref().map(Route::name)
    }

    pub fn is_method(&self, method: &str) -> bool {
        self.method.eq_ignore_ascii_case(method)
    }
}

impl Default for HttpRequest {
    fn default() -> Self {
        Self::new("GET", "/")
    }
}

/// HTTP response wrapper
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    pub fn ok() -> Self {
        Self::new(200)
    }

    pub fn created() -> Self {
        Self::new(201)
    }

    pub fn no_content() -> Self {
        Self::new(204)
    }

    pub fn bad_request() -> Self {
        Self::new(400)
    }

    pub fn not_found() -> Self {
        Self::new(404)
    }

    pub fn internal_server_error() -> Self {
        Self::new(500)
    }

    /// Plain text response
    pub fn text(body: impl Into<String>) -> Self {
        Self::ok()
            .content_type("text/plain; charset=utf-8")
            .with_body(body.into().into_bytes())
    }

    /// HTML response
    pub fn html(body: impl Into<String>) -> Self {
        Self::ok()
            .content_type("text/html; charset=utf-8")
            .with_body(body.into().into_bytes())
    }

    /// JSON response with status 200
    pub fn json<T: Serialize>(value: &T) -> Result<Self, Error> {
        Self::ok().with_json(value)
    }

    /// Temporary redirect
    pub fn redirect(location: impl Into<String>) -> Self {
        Self::redirect_with(location, 302)
    }

    pub fn redirect_with(location: impl Into<String>, status: u16) -> Self {
        let location = location.into();
        let body = format!(
            "<!DOCTYPE html>\n<html><head><meta http-equiv=\"refresh\" content=\"0;url={0}\" /><title>Redirecting to {0}</title></head><body>Redirecting to <a href=\"{0}\">{0}</a>.</body></html>",
            location
        );
        Self::new(status)
            .with_header("Location", location)
            .content_type("text/html; charset=utf-8")
            .with_body(body.into_bytes())
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_json<T: Serialize>(mut self, value: &T) -> Result<Self, Error> {
        self.body = serde_json::to_vec(value).map_err(|e| Error::Serialization(e.to_string()))?;
        self.set_header("Content-Type", "application/json");
        Ok(self)
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(key, value);
        self
    }

    pub fn content_type(self, value: impl Into<String>) -> Self {
        self.with_header("Content-Type", value)
    }

    /// Set a header, replacing any existing one with the same name in any case
    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        if let Some(existing) = find_header(&self.headers, &key).map(|(k, _)| k.clone()) {
            self.headers.remove(&existing);
        }
        self.headers.insert(key, value.into());
    }

    /// Get a header, ignoring case
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name).map(|(_, value)| value.as_str())
    }

    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }

    /// Make the response compliant with the request before it is sent.
    ///
    /// Fills in the content type (with `charset`), content length and date,
    /// and drops the body of bodiless statuses and of `HEAD` requests.
    pub fn prepare(&mut self, request: &HttpRequest, charset: &str) {
        if self.status < 200 || self.status == 204 || self.status == 304 {
            self.body.clear();
            for name in ["Content-Type", "Content-Length"] {
                if let Some(key) = find_header(&self.headers, name).map(|(k, _)| k.clone()) {
                    self.headers.remove(&key);
                }
            }
        } else {
            match self.header("Content-Type").map(str::to_string) {
                None => self.set_header("Content-Type", format!("text/html; charset={}", charset)),
                Some(value) if value.starts_with("text/") && !value.contains("charset") => {
                    self.set_header("Content-Type", format!("{}; charset={}", value, charset))
                }
                Some(_) => {}
            }
            self.set_header("Content-Length", self.body.len().to_string());
        }

        if self.header("Date").is_none() {
            self.set_header("Date", httpdate::fmt_http_date(SystemTime::now()));
        }

        if request.is_method("HEAD") {
            self.body.clear();
        }
    }

    /// Write the response as an HTTP/1.1 message
    pub fn send<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let reason = ::http::StatusCode::from_u16(self.status)
            .ok()
            .and_then(|status| status.canonical_reason())
            .unwrap_or("");
        write!(writer, "HTTP/1.1 {} {}\r\n", self.status, reason)?;

        let mut names: Vec<&String> = self.headers.keys().collect();
        names.sort();
        for name in names {
            write!(writer, "{}: {}\r\n", name, self.headers[name])?;
        }
        writer.write_all(b"\r\n")?;
        writer.write_all(&self.body)?;
        writer.flush()
    }
}

/// Raw result of a controller before it is turned into a response
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Response(HttpResponse),
    Text(String),
    Data(Value),
}

impl Reply {
    /// Short description used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Reply::Response(_) => "a response",
            Reply::Text(_) => "a string",
            Reply::Data(Value::Null) => "null",
            Reply::Data(_) => "a data value",
        }
    }
}

impl From<HttpResponse> for Reply {
    fn from(response: HttpResponse) -> Self {
        Reply::Response(response)
    }
}

impl From<String> for Reply {
    fn from(text: String) -> Self {
        Reply::Text(text)
    }
}

impl From<&str> for Reply {
    fn from(text: &str) -> Self {
        Reply::Text(text.to_string())
    }
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Reply::Data(value)
    }
}

impl From<()> for Reply {
    fn from(_: ()) -> Self {
        Reply::Data(Value::Null)
    }
}

fn find_header<'a>(
    headers: &'a HashMap<String, String>,
    name: &str,
) -> Option<(&'a String, &'a String)> {
    headers.iter().find(|(key, _)| key.eq_ignore_ascii_case(name))
}

/// Parse a query string into a map of decoded parameters
pub(crate) fn parse_query_string(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (key, value) = part.split_once('=').unwrap_or((part, ""));
            (decode_component(key), decode_component(value))
        })
        .collect()
}

fn decode_component(raw: &str) -> String {
    let raw = raw.replace('+', " ");
    urlencoding::decode(&raw)
        .map(|decoded| decoded.into_owned())
        .unwrap_or(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_splits_query_string() {
        let req = HttpRequest::new("get", "/search?q=rust+lang&page=2&flag");
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/search");
        assert_eq!(req.query_string.as_deref(), Some("q=rust+lang&page=2&flag"));
        assert_eq!(req.query("q"), Some("rust lang"));
        assert_eq!(req.query("page"), Some("2"));
        assert_eq!(req.query("flag"), Some(""));
    }

    #[test]
    fn test_request_decodes_percent_encoding() {
        let req = HttpRequest::new("GET", "/?email=test%40example.com");
        assert_eq!(req.query("email"), Some("test@example.com"));
    }

    #[test]
    fn test_request_from_cgi_vars() {
        let vars = HashMap::from([
            ("REQUEST_METHOD".to_string(), "POST".to_string()),
            ("PATH_INFO".to_string(), "/users".to_string()),
            ("QUERY_STRING".to_string(), "sort=name".to_string()),
            ("HTTP_X_REQUEST_ID".to_string(), "abc".to_string()),
            ("CONTENT_TYPE".to_string(), "application/json".to_string()),
            ("PATH".to_string(), "/usr/bin".to_string()),
        ]);

        let req = HttpRequest::from_cgi_vars(&vars);
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/users");
        assert_eq!(req.query("sort"), Some("name"));
        assert_eq!(req.header("X-Request-Id"), Some("abc"));
        assert_eq!(req.header("content-type"), Some("application/json"));
        assert!(req.header("path").is_none());
    }

    #[test]
    fn test_attributes() {
        let mut req = HttpRequest::new("GET", "/users/42");
        req.set_attribute("id", "42");
        req.set_attribute("page", 3);

        assert_eq!(req.param("id"), Some("42"));
        assert_eq!(req.attribute::<u32>("page").unwrap(), 3);
        assert!(req.param("page").is_none());
        assert!(req.attribute::<String>("missing").is_err());
    }

    #[test]
    fn test_response_headers_are_case_insensitive() {
        let mut res = HttpResponse::ok().with_header("content-type", "text/plain");
        res.set_header("Content-Type", "application/xml");
        assert_eq!(res.headers.len(), 1);
        assert_eq!(res.header("CONTENT-TYPE"), Some("application/xml"));
    }

    #[test]
    fn test_prepare_adds_charset_and_length() {
        let req = HttpRequest::new("GET", "/");
        let mut res = HttpResponse::ok().with_body(b"<p>hi</p>".to_vec());
        res.prepare(&req, "ISO-8859-1");

        assert_eq!(res.header("Content-Type"), Some("text/html; charset=ISO-8859-1"));
        assert_eq!(res.header("Content-Length"), Some("9"));
        assert!(res.header("Date").is_some());

        let mut res = HttpResponse::ok().content_type("text/plain");
        res.prepare(&req, "UTF-8");
        assert_eq!(res.header("Content-Type"), Some("text/plain; charset=UTF-8"));
    }

    #[test]
    fn test_prepare_strips_body_for_head() {
        let req = HttpRequest::new("HEAD", "/");
        let mut res = HttpResponse::text("hello");
        res.prepare(&req, "UTF-8");
        assert!(res.body.is_empty());
        assert_eq!(res.header("Content-Length"), Some("5"));
    }

    #[test]
    fn test_send_writes_http_message() {
        let res = HttpResponse::not_found()
            .with_header("X-A", "1")
            .with_body(b"gone".to_vec());
        let mut out = Vec::new();
        res.send(&mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.contains("X-A: 1\r\n"));
        assert!(text.ends_with("\r\n\r\ngone"));
    }

    #[test]
    fn test_reply_conversions() {
        assert_eq!(Reply::from("hi"), Reply::Text("hi".to_string()));
        assert_eq!(Reply::from(()).kind(), "null");
        assert_eq!(
            Reply::from(HttpResponse::ok()),
            Reply::Response(HttpResponse::ok())
        );
    }
}
