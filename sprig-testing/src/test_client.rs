// In-process test client

use sprig_core::{Application, Error, HttpRequest, HttpResponse, RequestType};
use std::sync::Arc;

/// Sends requests straight through an application, no socket involved.
///
/// Responses are produced by `Application::handle` and followed by
/// `terminate`, so finish listeners run as they would for a served request.
pub struct TestClient {
    app: Arc<Application>,
    catch: bool,
}

impl TestClient {
    pub fn new(app: Arc<Application>) -> Self {
        Self { app, catch: true }
    }

    /// Return errors to the test instead of rendering them through the
    /// error handlers
    pub fn without_catch(mut self) -> Self {
        self.catch = false;
        self
    }

    pub fn app(&self) -> &Arc<Application> {
        &self.app
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    pub async fn post(&self, path: &str, body: Vec<u8>) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    pub async fn put(&self, path: &str, body: Vec<u8>) -> TestResponse {
        self.request("PUT", path, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request("DELETE", path, None).await
    }

    pub async fn patch(&self, path: &str, body: Vec<u8>) -> TestResponse {
        self.request("PATCH", path, Some(body)).await
    }

    pub async fn request(&self, method: &str, path: &str, body: Option<Vec<u8>>) -> TestResponse {
        let builder = TestRequestBuilder::new(method, path).body(body.unwrap_or_default());
        self.send(builder).await
    }

    pub async fn send(&self, builder: TestRequestBuilder) -> TestResponse {
        let request_type = builder.request_type;
        let request = builder.build();

        match self.app.handle(request.clone(), request_type, self.catch).await {
            Ok(response) => {
                if request_type == RequestType::Master {
                    self.app.terminate(&request, &response);
                }
                TestResponse::Success(response)
            }
            Err(error) => TestResponse::Error(error),
        }
    }
}

/// Builder for test requests
pub struct TestRequestBuilder {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    query: Vec<(String, String)>,
    request_type: RequestType,
}

impl TestRequestBuilder {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            headers: Vec::new(),
            body: Vec::new(),
            query: Vec::new(),
            request_type: RequestType::Master,
        }
    }

    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Serialize `data` as the body and set the JSON content type
    pub fn json<T: serde::Serialize>(mut self, data: &T) -> Result<Self, Error> {
        self.body = serde_json::to_vec(data).map_err(|e| Error::Serialization(e.to_string()))?;
        self.headers
            .push(("Content-Type".to_string(), "application/json".to_string()));
        Ok(self)
    }

    pub fn query(mut self, key: &str, value: &str) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    /// Send as a sub-request; application filters skip it
    pub fn sub_request(mut self) -> Self {
        self.request_type = RequestType::Sub;
        self
    }

    pub fn build(self) -> HttpRequest {
        let mut uri = self.path;
        if !self.query.is_empty() {
            let pairs: Vec<String> = self
                .query
                .iter()
                .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
                .collect();
            uri.push(if uri.contains('?') { '&' } else { '?' });
            uri.push_str(&pairs.join("&"));
        }

        let mut request = HttpRequest::new(self.method, uri).with_body(self.body);
        for (key, value) in self.headers {
            request = request.with_header(key, value);
        }
        request
    }
}

/// Response from a test request
#[derive(Debug)]
pub enum TestResponse {
    Success(HttpResponse),
    Error(Error),
}

impl TestResponse {
    /// The response, panicking on an error
    pub fn assert_success(&self) -> &HttpResponse {
        match self {
            TestResponse::Success(response) => response,
            TestResponse::Error(error) => {
                panic!("Expected a response, got error: {:?}", error)
            }
        }
    }

    /// The error, panicking on a response
    pub fn assert_error(&self) -> &Error {
        match self {
            TestResponse::Error(error) => error,
            TestResponse::Success(response) => {
                panic!("Expected an error, got a {} response", response.status)
            }
        }
    }

    /// Status of the response, or the status the error maps to
    pub fn status(&self) -> u16 {
        match self {
            TestResponse::Success(response) => response.status,
            TestResponse::Error(error) => error.status_code(),
        }
    }

    pub fn body_string(&self) -> Option<String> {
        match self {
            TestResponse::Success(response) => String::from_utf8(response.body.clone()).ok(),
            TestResponse::Error(_) => None,
        }
    }

    pub fn body_json<T: serde::de::DeserializeOwned>(&self) -> Result<T, String> {
        match self {
            TestResponse::Success(response) => serde_json::from_slice(&response.body)
                .map_err(|e| format!("Deserialization error: {}", e)),
            TestResponse::Error(error) => Err(format!("{:?}", error)),
        }
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        match self {
            TestResponse::Success(response) => response.header(key),
            TestResponse::Error(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let req = TestRequestBuilder::new("get", "/search")
            .header("Authorization", "Bearer token")
            .query("q", "a b")
            .query("page", "2")
            .build();

        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/search");
        assert_eq!(req.query("q"), Some("a b"));
        assert_eq!(req.query("page"), Some("2"));
        assert_eq!(req.header("authorization"), Some("Bearer token"));
    }

    #[test]
    fn test_json_body() {
        let req = TestRequestBuilder::new("POST", "/items")
            .json(&serde_json::json!({"name": "x"}))
            .unwrap()
            .build();

        assert_eq!(req.header("Content-Type"), Some("application/json"));
        assert_eq!(req.body, br#"{"name":"x"}"#.to_vec());
    }

    #[test]
    fn test_error_status() {
        let response = TestResponse::Error(Error::RouteNotFound("/x".to_string()));
        assert_eq!(response.status(), 404);
        assert!(response.body_string().is_none());
    }
}
