//! HTTP surface: router assembly and the health probes.
//!
//! Business routes are mounted by consumers; this module only wires the
//! cross-cutting pipeline (correlation, masked logging, error boundary) and
//! exposes the liveness/readiness probes over the activated handles.

pub mod middleware;

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};

use crate::{
    assembly::AssembledServices,
    domain::error::{ErrorKind, ErrorRecord},
};
use middleware::RequestLogConfig;

#[derive(Clone)]
pub struct AppState {
    pub services: Arc<AssembledServices>,
}

/// Wrap the given routes with the request pipeline and mount the health
/// probes. The context layer is outermost so the logging layer always finds
/// a correlation id.
pub fn build_router(
    routes: Router<AppState>,
    state: AppState,
    log_config: Arc<RequestLogConfig>,
) -> Router {
    routes
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(state)
        .layer(axum::middleware::from_fn_with_state(
            log_config,
            middleware::log_requests,
        ))
        .layer(axum::middleware::from_fn(middleware::set_request_context))
}

async fn healthz() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// Probe only the modules that were activated at startup.
async fn readyz(State(state): State<AppState>) -> Response {
    if let Some(database) = &state.services.database
        && let Err(err) = database.ping().await
    {
        return unavailable("database", &err);
    }
    if let Some(cache) = &state.services.cache
        && let Err(err) = cache.ping().await
    {
        return unavailable("cache", &err);
    }
    StatusCode::NO_CONTENT.into_response()
}

fn unavailable(component: &str, err: &dyn std::error::Error) -> Response {
    ErrorRecord::new(
        StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::InternalServerError,
        [component.to_string()],
        err.to_string(),
    )
    .into_response()
}
