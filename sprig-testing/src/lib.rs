//! Testing utilities for Sprig applications.
//!
//! [`TestClient`] pushes requests through an [`Application`](sprig_core::Application)
//! in-process, running the same boot, routing, filter and error handling
//! steps a served request goes through.
//!
//! ```
//! use sprig_core::{Application, Error, HttpRequest};
//! use sprig_testing::*;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let app = Arc::new(Application::new());
//! app.get("/hello/{name}", |req: HttpRequest| async move {
//!     Ok::<_, Error>(format!("Hello {}", req.param("name").unwrap_or_default()))
//! });
//!
//! let client = TestClient::new(app);
//! let response = client.get("/hello/World").await;
//! assert_status(&response, 200);
//! assert_body(&response, "Hello World");
//! # }
//! ```
//!
//! Requests needing headers, a query string or a JSON body go through
//! [`TestRequestBuilder`]:
//!
//! ```
//! use sprig_testing::TestRequestBuilder;
//!
//! let request = TestRequestBuilder::new("POST", "/users")
//!     .header("Authorization", "Bearer token")
//!     .json(&serde_json::json!({"name": "Alice"}))
//!     .unwrap()
//!     .build();
//! assert_eq!(request.header("Content-Type"), Some("application/json"));
//! ```

mod assertions;
mod test_client;

pub use assertions::{
    assert_body, assert_body_contains, assert_client_error, assert_header,
    assert_html_content_type, assert_json, assert_json_content_type, assert_server_error,
    assert_status, assert_success,
};
pub use test_client::{TestClient, TestRequestBuilder, TestResponse};

// Re-export common testing utilities
pub use tokio::test as tokio_test;
