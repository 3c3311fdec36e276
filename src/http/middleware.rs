//! Request pipeline instrumentation.
//!
//! Each request gets one correlation identifier at entry; the identifier
//! joins the `incoming` event, the terminal `completed`/`failed` event, and
//! any nested error log line. The incoming event for an id is always emitted
//! before that request's terminal event; events from concurrent requests may
//! interleave in the stream.

use std::{sync::Arc, time::Instant};

use axum::{
    body::Body,
    extract::State,
    http::{Request, header::CONTENT_TYPE, request::Parts},
    middleware::Next,
    response::Response,
};
use bytes::Bytes;
use http_body_util::BodyExt;
use serde_json::Value;
use tracing::{Instrument, error, info, info_span};
use uuid::Uuid;

use crate::{domain::error::ErrorRecord, logging::Masker};

/// Request bodies above this size are logged as an omission marker instead
/// of being buffered.
const MAX_LOGGED_BODY_BYTES: usize = 64 * 1024;

/// Per-request correlation state, attached to the request's lifetime only.
#[derive(Clone)]
pub struct RequestContext {
    pub correlation_id: String,
}

/// Static configuration for the request-logging middleware, fixed at startup.
#[derive(Clone)]
pub struct RequestLogConfig {
    pub masker: Masker,
    pub exclude_paths: Vec<String>,
}

impl RequestLogConfig {
    fn is_excluded(&self, path: &str) -> bool {
        self.exclude_paths
            .iter()
            .any(|excluded| path.contains(excluded.as_str()))
    }
}

/// Allocate a correlation identifier and attach it to both the request and
/// the response extensions. The rest of the pipeline runs inside a span
/// carrying the identifier, so any event logged below the boundary inherits
/// it without threading the context by hand.
pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let ctx = RequestContext {
        correlation_id: Uuid::new_v4().to_string(),
    };
    request.extensions_mut().insert(ctx.clone());

    let span = info_span!("request", correlation_id = %ctx.correlation_id);
    let mut response = next.run(request).instrument(span).await;
    response.extensions_mut().insert(ctx);
    response
}

/// Emit the `incoming` event with the masked body, run the handler, then emit
/// exactly one terminal event. A normalized [`ErrorRecord`] left in the
/// response extensions by the error boundary selects the `failed` branch.
pub async fn log_requests(
    State(config): State<Arc<RequestLogConfig>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if config.is_excluded(&path) {
        return next.run(request).await;
    }

    let method = request.method().clone();
    let correlation_id = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.correlation_id.clone())
        .unwrap_or_default();

    let (request, body) = buffer_json_body(request, &config.masker).await;
    info!(
        target: "keel::http",
        event = "incoming",
        method = %method,
        path = %path,
        body = %body,
        correlation_id = %correlation_id,
        "request received",
    );

    let start = Instant::now();
    let mut response = next.run(request).await;
    let elapsed_ms = start.elapsed().as_millis() as u64;
    let status = response.status().as_u16();

    match response.extensions_mut().remove::<ErrorRecord>() {
        Some(record) => {
            let masked = config
                .masker
                .mask(&serde_json::to_value(&record).unwrap_or(Value::Null));
            error!(
                target: "keel::http",
                event = "failed",
                method = %method,
                path = %path,
                status = status,
                error = %masked,
                elapsed_ms = elapsed_ms,
                correlation_id = %correlation_id,
                "request failed",
            );
        }
        None => {
            info!(
                target: "keel::http",
                event = "completed",
                method = %method,
                path = %path,
                status = status,
                elapsed_ms = elapsed_ms,
                correlation_id = %correlation_id,
                "request completed",
            );
        }
    }

    response
}

fn declares_json(parts: &Parts) -> bool {
    parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"))
}

/// Buffer a JSON request body for the incoming event, returning the rebuilt
/// request and the masked payload. Non-JSON and oversized bodies are not
/// parsed; a read failure yields an empty body downstream rather than a 500
/// from the logging layer.
async fn buffer_json_body(request: Request<Body>, masker: &Masker) -> (Request<Body>, Value) {
    let (parts, body) = request.into_parts();
    if !declares_json(&parts) {
        return (Request::from_parts(parts, body), Value::Null);
    }

    match body.collect().await {
        Ok(collected) => {
            let bytes: Bytes = collected.to_bytes();
            let payload = if bytes.len() <= MAX_LOGGED_BODY_BYTES {
                serde_json::from_slice::<Value>(&bytes)
                    .map(|value| masker.mask(&value))
                    .unwrap_or(Value::Null)
            } else {
                Value::String("<body omitted: too large>".to_string())
            };
            (Request::from_parts(parts, Body::from(bytes)), payload)
        }
        Err(_) => (Request::from_parts(parts, Body::empty()), Value::Null),
    }
}
