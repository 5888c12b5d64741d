//! Integration tests for sprig-testing

use sprig_core::{Application, Error, HttpRequest, HttpResponse};
use sprig_testing::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn app() -> Arc<Application> {
    let app = Application::new();
    app.get("/users/{id}", |req: HttpRequest| async move {
        let id: String = req.attribute("id")?;
        Ok::<_, Error>(serde_json::json!({ "id": id }))
    });
    app.post("/echo", |req: HttpRequest| async move {
        Ok::<_, Error>(HttpResponse::new(201).with_body(req.body))
    });
    app.view(
        |result, _req| match result {
            sprig_core::Reply::Data(value) => {
                Ok(Some(sprig_core::Reply::Response(HttpResponse::json(value)?)))
            }
            _ => Ok(None),
        },
        0,
    );
    Arc::new(app)
}

#[tokio::test]
async fn test_get_json() {
    let client = TestClient::new(app());
    let response = client.get("/users/42").await;

    assert_success(&response);
    assert_json_content_type(&response);
    assert_json(&response, &serde_json::json!({"id": "42"}));
}

#[tokio::test]
async fn test_post_body() {
    let client = TestClient::new(app());
    let response = client.post("/echo", b"ping".to_vec()).await;

    assert_status(&response, 201);
    assert_body(&response, "ping");
}

#[tokio::test]
async fn test_errors_are_rendered_or_returned() {
    let client = TestClient::new(app());
    let response = client.delete("/users/42").await;
    assert_status(&response, 405);
    assert_html_content_type(&response);
    assert_header(&response, "Allow", "GET");

    let client = TestClient::new(app()).without_catch();
    let response = client.get("/nowhere").await;
    assert!(matches!(response.assert_error(), Error::RouteNotFound(_)));
    assert_client_error(&response);
}

#[tokio::test]
async fn test_send_runs_finish_listeners_for_master_requests() {
    let finished = Arc::new(AtomicUsize::new(0));
    let app = app();
    let seen = finished.clone();
    app.finish(
        move |_req, _res| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
        0,
    );
    let client = TestClient::new(app);

    client.get("/users/1").await;
    assert_eq!(finished.load(Ordering::SeqCst), 1);

    client
        .send(TestRequestBuilder::new("GET", "/users/2").sub_request())
        .await;
    assert_eq!(finished.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_builder_query_and_headers() {
    let app = Application::new();
    app.get("/search", |req: HttpRequest| async move {
        Ok::<_, Error>(format!(
            "{} {}",
            req.query("q").unwrap_or_default(),
            req.header("X-Token").unwrap_or_default()
        ))
    });
    let client = TestClient::new(Arc::new(app));

    let response = client
        .send(
            TestRequestBuilder::new("GET", "/search")
                .query("q", "rust lang")
                .header("X-Token", "abc"),
        )
        .await;
    assert_body(&response, "rust lang abc");
}
