//! Order endpoints.

use crate::error::AppError;
use crate::response::IndentedJson;
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use makeline_core::order::{Order, OrderUpdate};

/// Runs the intake pipeline and returns every pending order.
///
/// ```text
/// GET /order/fetch
/// ```
///
/// # Errors
///
/// `500` if the queue or the database fails, `408` on timeout.
pub async fn fetch_orders(State(state): State<AppState>) -> Result<IndentedJson<Vec<Order>>, AppError> {
    let pending = state.service.drain_and_list_pending().await?;
    Ok(IndentedJson(pending))
}

/// Returns a single order.
///
/// ```text
/// GET /order/:id
/// ```
///
/// # Errors
///
/// `400` if `id` is not an integer, `404` if there is no such order, `500` if
/// the database fails, `408` on timeout.
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<IndentedJson<Order>, AppError> {
    let order = state.service.get_order(&id).await?;
    Ok(IndentedJson(order))
}

/// Moves an order to `Processing` or `Complete`.
///
/// ```text
/// PUT /order
/// { "orderId": "1", "status": 2 }
/// ```
///
/// The body is read as JSON whatever its declared content type.
///
/// # Errors
///
/// `400` for an unparsable body, a missing `orderId` or a status other than
/// Processing/Complete; `404` if there is no such order; `500` if the database
/// fails; `408` on timeout.
pub async fn update_order(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let update: OrderUpdate = serde_json::from_slice(&body)
        .map_err(|e| AppError::bad_request(format!("Invalid order update: {e}")))?;

    let id = state.service.update_order(update).await?;

    tracing::info!(order_id = %id, "Order updated");
    Ok(StatusCode::ACCEPTED)
}
