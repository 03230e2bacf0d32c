//! Health check endpoint.
//!
//! Used by load balancers and Kubernetes health checks. It reports liveness
//! only and does NOT touch the queue or the database.

use crate::state::AppState;
use axum::{Json, extract::State};
use serde::Serialize;

/// Body of a health response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the process is serving.
    pub status: &'static str,
    /// Build version, from `APP_VERSION`.
    pub version: String,
}

/// Liveness endpoint.
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
///
/// # Response
///
/// ```json
/// {
///   "status": "ok",
///   "version": "1.0.0"
/// }
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: state.version.to_string(),
    })
}
