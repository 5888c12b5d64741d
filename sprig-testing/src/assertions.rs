// Test assertions for responses

use crate::TestResponse;

/// Assert the status code; errors count with the status they map to
pub fn assert_status(response: &TestResponse, expected: u16) {
    let actual = response.status();
    assert_eq!(
        actual, expected,
        "Expected status {}, got {}",
        expected, actual
    );
}

/// Assert the body deserializes to `expected`
pub fn assert_json<T>(response: &TestResponse, expected: &T)
where
    T: serde::de::DeserializeOwned + PartialEq + std::fmt::Debug,
{
    let actual: T = match response.body_json() {
        Ok(actual) => actual,
        Err(e) => panic!("Failed to deserialize response body: {}", e),
    };
    assert_eq!(actual, *expected, "JSON bodies do not match");
}

/// Assert a header value, ignoring the case of its name
pub fn assert_header(response: &TestResponse, key: &str, expected: &str) {
    let actual = response.header(key);
    assert_eq!(
        actual,
        Some(expected),
        "Expected header '{}' to be '{}', got {:?}",
        key,
        expected,
        actual
    );
}

pub fn assert_body(response: &TestResponse, expected: &str) {
    let body = response.body_string();
    assert_eq!(
        body.as_deref(),
        Some(expected),
        "Expected body {:?}, got {:?}",
        expected,
        body
    );
}

pub fn assert_body_contains(response: &TestResponse, expected: &str) {
    let body = response.body_string().unwrap_or_default();
    assert!(
        body.contains(expected),
        "Expected body to contain '{}', but it didn't. Body: {}",
        expected,
        body
    );
}

/// Assert a 2xx response
pub fn assert_success(response: &TestResponse) {
    let status = response.status();
    assert!(
        matches!(response, TestResponse::Success(_)) && (200..300).contains(&status),
        "Expected successful status (2xx), got {}",
        status
    );
}

/// Assert a 4xx response or error
pub fn assert_client_error(response: &TestResponse) {
    let status = response.status();
    assert!(
        (400..500).contains(&status),
        "Expected client error status (4xx), got {}",
        status
    );
}

/// Assert a 5xx response or error
pub fn assert_server_error(response: &TestResponse) {
    let status = response.status();
    assert!(
        (500..600).contains(&status),
        "Expected server error status (5xx), got {}",
        status
    );
}

pub fn assert_json_content_type(response: &TestResponse) {
    let content_type = response.header("Content-Type");
    assert!(
        content_type.is_some_and(|ct| ct.contains("application/json")),
        "Expected JSON content type, got {:?}",
        content_type
    );
}

pub fn assert_html_content_type(response: &TestResponse) {
    let content_type = response.header("Content-Type");
    assert!(
        content_type.is_some_and(|ct| ct.contains("text/html")),
        "Expected HTML content type, got {:?}",
        content_type
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use sprig_core::{Error, HttpResponse};

    fn response(status: u16, body: &str) -> TestResponse {
        TestResponse::Success(HttpResponse::new(status).with_body(body.as_bytes().to_vec()))
    }

    #[test]
    fn test_assert_status() {
        assert_status(&response(201, "Created"), 201);
        assert_status(&TestResponse::Error(Error::RouteNotFound("/".to_string())), 404);
    }

    #[test]
    fn test_assert_body() {
        let res = response(200, "Hello World");
        assert_body(&res, "Hello World");
        assert_body_contains(&res, "World");
    }

    #[test]
    fn test_status_ranges() {
        assert_success(&response(204, ""));
        assert_client_error(&response(404, "Not Found"));
        assert_server_error(&response(503, "Service Unavailable"));
        assert_server_error(&TestResponse::Error(Error::Internal("x".to_string())));
    }

    #[test]
    #[should_panic(expected = "Expected successful status")]
    fn test_error_is_not_success() {
        assert_success(&TestResponse::Error(Error::Http {
            status: 200,
            message: String::new(),
            headers: Default::default(),
        }));
    }

    #[test]
    fn test_content_types() {
        let json = TestResponse::Success(HttpResponse::json(&serde_json::json!({"a": 1})).unwrap());
        assert_json_content_type(&json);
        assert_json(&json, &serde_json::json!({"a": 1}));

        let html = TestResponse::Success(HttpResponse::html("<p>hi</p>"));
        assert_html_content_type(&html);
        assert_header(&html, "content-type", "text/html; charset=utf-8");
    }
}
