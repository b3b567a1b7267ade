//! HTTP router and handlers

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header::HeaderName},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use tower_http::{
    catch_panic::CatchPanicLayer, compression::CompressionLayer, trace::TraceLayer,
};
use tracing::error;

use crate::Error;
use crate::compute::ComputeBackend;
use crate::readiness::ReadinessController;
use crate::solve::{SolveRequest, Solver};

/// Response header reporting cache disposition on solves
static CACHE_HEADER: HeaderName = HeaderName::from_static("x-cache");

/// Shared application state
pub struct AppState {
    /// Solve orchestrator
    pub solver: Arc<Solver>,
    /// Backend readiness controller
    pub readiness: Arc<ReadinessController>,
    /// Compute backend (for the healthcheck proxy)
    pub compute: Arc<dyn ComputeBackend>,
    /// Include error chains in client responses (off in production)
    pub expose_error_detail: bool,
}

impl AppState {
    /// Terminal error handler: full detail to the log, minimal `{message}`
    /// to the client, the error chain only when configured for it.
    fn error_response(&self, err: &Error) -> Response {
        error!(error = %err, "Request failed");

        let mut body = json!({ "message": err.to_string() });
        if self.expose_error_detail {
            body["stack"] = json!(format!("{err:?}"));
        }
        (err.status_code(), Json(body)).into_response()
    }
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(list_handler))
        .route("/definition/{name}/info", get(definition_info_handler))
        .route("/solve", post(solve_handler))
        .route("/healthcheck", get(healthcheck_handler))
        .route("/version", get(version_handler))
        .route("/wakeup", post(wakeup_handler))
        .layer(CatchPanicLayer::new())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET / - list registered definitions
async fn list_handler(State(state): State<Arc<AppState>>) -> Response {
    let definitions: Vec<Value> = state
        .solver
        .list()
        .iter()
        .map(|d| json!({ "name": d.name, "id": d.id }))
        .collect();
    Json(definitions).into_response()
}

/// GET /definition/{name}/info - normalized parameter descriptors
async fn definition_info_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Response {
    match state.solver.describe(&name).await {
        Ok(info) => Json(info.as_ref().clone()).into_response(),
        Err(e) => state.error_response(&e),
    }
}

/// POST /solve - solve a definition, cache-first
async fn solve_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SolveRequest>,
) -> Response {
    match state.solver.solve(&request.definition, &request.inputs).await {
        Ok(outcome) => {
            let mut response = Json(outcome.value).into_response();
            response.headers_mut().insert(
                CACHE_HEADER.clone(),
                HeaderValue::from_static(if outcome.cached { "HIT" } else { "MISS" }),
            );
            response
        }
        Err(e) => state.error_response(&e),
    }
}

/// GET /healthcheck - proxy the backend health probe
async fn healthcheck_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.compute.health().await {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(e) => state.error_response(&e),
    }
}

/// GET /version - gateway version
async fn version_handler() -> Response {
    Json(json!({ "version": env!("CARGO_PKG_VERSION") })).into_response()
}

/// POST /wakeup - manual backend wake-up trigger
async fn wakeup_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.readiness.ensure_running().await {
        Ok(readiness) => Json(json!({ "status": readiness })).into_response(),
        Err(e) => state.error_response(&e),
    }
}
