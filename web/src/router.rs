//! Route table and middleware stack.

use crate::handlers::{fetch_orders, get_order, health_check, update_order};
use crate::middleware::correlation_id_layer;
use crate::state::AppState;
use axum::Router;
use axum::routing::{get, put};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Builds the service router.
///
/// CORS is fully permissive: the makeline is called from browser front ends
/// on other origins. `/order/fetch` is registered alongside `/order/:id`;
/// axum prefers the static segment, so `fetch` never reaches `get_order`.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/order/fetch", get(fetch_orders))
        .route("/order/:id", get(get_order))
        .route("/order", put(update_order))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(correlation_id_layer())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
