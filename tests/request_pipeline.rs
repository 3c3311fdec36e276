//! End-to-end checks for the request pipeline: the canonical error body, the
//! correlation of log events, body masking, and the exclusion list.

use std::sync::{Arc, Mutex};

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header::CONTENT_TYPE},
    routing::{get, post},
};
use http_body_util::BodyExt;
use keel::{
    domain::error::ServiceError,
    http::middleware::{RequestLogConfig, log_requests, set_request_context},
    logging::Masker,
};
use serde_json::Value;
use tower::ServiceExt;
use tracing_subscriber::fmt::MakeWriter;

#[derive(Clone, Default)]
struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().expect("writer lock").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CaptureWriter {
    type Writer = CaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl CaptureWriter {
    fn events(&self) -> Vec<Value> {
        let bytes = self.0.lock().expect("writer lock").clone();
        String::from_utf8_lossy(&bytes)
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }
}

fn pipeline_router(exclude_paths: Vec<String>) -> Router {
    let log_config = Arc::new(RequestLogConfig {
        masker: Masker::default(),
        exclude_paths,
    });

    Router::new()
        .route(
            "/users/{id}",
            get(|| async { Err::<StatusCode, _>(ServiceError::not_found("User", 42)) }),
        )
        .route(
            "/reports",
            get(|| async {
                let source = std::io::Error::other("connection reset");
                Err::<StatusCode, _>(ServiceError::database("load_reports", &source))
            }),
        )
        .route("/echo", post(|| async { StatusCode::NO_CONTENT }))
        .route("/healthz", get(|| async { StatusCode::NO_CONTENT }))
        .layer(axum::middleware::from_fn_with_state(
            log_config,
            log_requests,
        ))
        .layer(axum::middleware::from_fn(set_request_context))
}

fn capture_subscriber(writer: CaptureWriter) -> impl tracing::Subscriber + Send + Sync {
    tracing_subscriber::fmt()
        .json()
        .with_writer(writer)
        .finish()
}

fn pipeline_events(events: &[Value]) -> Vec<&Value> {
    events
        .iter()
        .filter(|event| event["target"] == "keel::http")
        .collect()
}

#[tokio::test]
async fn failed_request_returns_the_canonical_error_body() {
    let router = pipeline_router(vec![]);

    let response = router
        .oneshot(
            Request::builder()
                .uri("/users/42")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    let body: Value = serde_json::from_slice(&bytes).expect("json body");

    assert_eq!(body["status"], 404);
    assert_eq!(body["code"], "NOT_FOUND");
    assert_eq!(body["type"], "NOT_FOUND");
    assert_eq!(body["target"], serde_json::json!(["42"]));
    assert_eq!(body["message"], "not found error(s) in 42");
    assert_eq!(body["detail"], "User with identifier 42 not found");
    assert!(body["timestamp"].as_str().is_some_and(|t| t.contains('T')));
}

#[tokio::test]
async fn failed_request_emits_incoming_then_failed_with_one_correlation_id() {
    let writer = CaptureWriter::default();
    let _guard = tracing::subscriber::set_default(capture_subscriber(writer.clone()));

    let router = pipeline_router(vec![]);
    let response = router
        .oneshot(
            Request::builder()
                .uri("/users/42")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let events = writer.events();
    let pipeline = pipeline_events(&events);
    assert_eq!(pipeline.len(), 2, "one incoming and one terminal event");

    assert_eq!(pipeline[0]["fields"]["event"], "incoming");
    assert_eq!(pipeline[1]["fields"]["event"], "failed");
    assert_eq!(pipeline[1]["level"], "ERROR");

    let incoming_id = pipeline[0]["fields"]["correlation_id"]
        .as_str()
        .expect("correlation id");
    let failed_id = pipeline[1]["fields"]["correlation_id"]
        .as_str()
        .expect("correlation id");
    assert!(!incoming_id.is_empty());
    assert_eq!(incoming_id, failed_id);

    let error_field = pipeline[1]["fields"]["error"].as_str().expect("error field");
    assert!(error_field.contains("NOT_FOUND"));
}

#[tokio::test]
async fn nested_error_events_inherit_the_request_correlation_id() {
    let writer = CaptureWriter::default();
    let _guard = tracing::subscriber::set_default(capture_subscriber(writer.clone()));

    let router = pipeline_router(vec![]);
    let response = router
        .oneshot(
            Request::builder()
                .uri("/reports")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let events = writer.events();
    let pipeline = pipeline_events(&events);
    let incoming_id = pipeline[0]["fields"]["correlation_id"]
        .as_str()
        .expect("correlation id");

    let db_events: Vec<_> = events
        .iter()
        .filter(|event| event["target"] == "keel::db")
        .collect();
    assert_eq!(db_events.len(), 1);
    assert_eq!(db_events[0]["span"]["correlation_id"], incoming_id);
}

#[test]
fn constructing_a_database_error_logs_one_error_event() {
    let writer = CaptureWriter::default();
    let _guard = tracing::subscriber::set_default(capture_subscriber(writer.clone()));

    let source = std::io::Error::other("connection reset");
    let error = ServiceError::database("insert_user", &source);
    drop(error);

    let events = writer.events();
    let db_events: Vec<_> = events
        .iter()
        .filter(|event| event["target"] == "keel::db")
        .collect();
    assert_eq!(db_events.len(), 1);
    assert_eq!(db_events[0]["level"], "ERROR");
    assert_eq!(db_events[0]["fields"]["operation"], "insert_user");
    assert_eq!(db_events[0]["fields"]["error"], "connection reset");
}

#[tokio::test]
async fn successful_request_masks_the_logged_body() {
    let writer = CaptureWriter::default();
    let _guard = tracing::subscriber::set_default(capture_subscriber(writer.clone()));

    let router = pipeline_router(vec![]);
    let payload = r#"{"password":"abc123","nested":{"token":"xyz"}}"#;
    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/echo")
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(payload))
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let events = writer.events();
    let pipeline = pipeline_events(&events);
    assert_eq!(pipeline.len(), 2);

    let body_field = pipeline[0]["fields"]["body"].as_str().expect("body field");
    assert!(body_field.contains("***MASKED***"));
    assert!(!body_field.contains("abc123"));
    assert!(!body_field.contains("xyz"));

    assert_eq!(pipeline[1]["fields"]["event"], "completed");
    assert_eq!(pipeline[1]["fields"]["status"], 204);
    assert!(pipeline[1]["fields"]["elapsed_ms"].is_u64());
}

#[tokio::test]
async fn excluded_paths_emit_no_events() {
    let writer = CaptureWriter::default();
    let _guard = tracing::subscriber::set_default(capture_subscriber(writer.clone()));

    let router = pipeline_router(vec!["/healthz".to_string()]);
    let response = router
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let events = writer.events();
    assert!(pipeline_events(&events).is_empty());
}

#[tokio::test]
async fn health_routes_respond_without_backends() {
    use keel::{assembly::AssembledServices, http::AppState};

    let state = AppState {
        services: Arc::new(AssembledServices {
            active_modules: vec!["logging"],
            database: None,
            cache: None,
        }),
    };
    let log_config = Arc::new(RequestLogConfig {
        masker: Masker::default(),
        exclude_paths: vec!["/healthz".to_string(), "/readyz".to_string()],
    });
    let router = keel::http::build_router(Router::new(), state, log_config);

    for uri in ["/healthz", "/readyz"] {
        let response = router
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NO_CONTENT, "{uri}");
    }
}

#[tokio::test]
async fn exclusion_matches_path_substrings() {
    let writer = CaptureWriter::default();
    let _guard = tracing::subscriber::set_default(capture_subscriber(writer.clone()));

    let router = pipeline_router(vec!["health".to_string()]);
    let response = router
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(pipeline_events(&writer.events()).is_empty());
}
