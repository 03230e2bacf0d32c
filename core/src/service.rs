//! The order service: intake pipeline, lookups and status updates.
//!
//! [`OrderService`] is the only object HTTP handlers talk to. It owns one
//! repository and one queue handle and nothing else, so a single instance is
//! cloned into every request.
//!
//! # Intake
//!
//! ```text
//! queue ──receive_orders──▶ stamp Pending ──insert_orders──▶ repository
//!                                                                │
//!            caller ◀──────────── get_pending_orders ────────────┘
//! ```
//!
//! Ingesting new orders and reporting the backlog are separate steps: the caller
//! always gets every order still pending, including ones drained by earlier calls.
//!
//! A batch is acknowledged to the queue only once it is stored, so a failed or
//! abandoned insert leaves it to be redelivered by the next intake. Intakes run
//! one at a time: the queue position is shared, and acknowledging a later batch
//! must not cover an earlier one whose insert failed.
//!
//! # Timeouts
//!
//! Every queue and storage call is bounded by the service timeout. When it
//! elapses the in-flight future is dropped (cancelling it if the client library
//! supports that) and [`OrderError::Timeout`] is returned.

use crate::order::{Order, OrderId, OrderParseError, OrderStatus, OrderUpdate};
use crate::queue::{OrderQueue, QueueError};
use crate::repository::{OrderRepository, RepositoryError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

/// Default bound on a single queue or storage call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors surfaced by [`OrderService`] operations.
#[derive(Error, Debug)]
pub enum OrderError {
    /// The request itself is invalid (bad id, disallowed status, missing field).
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// The order does not exist.
    #[error("Order not found: {0}")]
    NotFound(OrderId),

    /// The storage backend failed.
    #[error(transparent)]
    Repository(RepositoryError),

    /// Polling the queue failed.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// A queue or storage call did not finish in time.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// Name of the operation that timed out.
        operation: &'static str,
        /// The bound that elapsed.
        timeout: Duration,
    },
}

impl From<RepositoryError> for OrderError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(id) => Self::NotFound(id),
            other => Self::Repository(other),
        }
    }
}

impl From<OrderParseError> for OrderError {
    fn from(err: OrderParseError) -> Self {
        Self::MalformedRequest(err.to_string())
    }
}

/// Façade over the order repository and queue.
///
/// Cloning is cheap and every clone shares the same backend handles.
///
/// # Example
///
/// ```ignore
/// let service = OrderService::new(repository, queue)
///     .with_timeout(Duration::from_secs(5));
///
/// let pending = service.drain_and_list_pending().await?;
/// ```
#[derive(Clone)]
pub struct OrderService {
    repository: Arc<dyn OrderRepository>,
    queue: Arc<dyn OrderQueue>,
    intake: Arc<Mutex<()>>,
    timeout: Duration,
}

impl OrderService {
    /// Creates a service over the given backend and queue.
    #[must_use]
    pub fn new(repository: Arc<dyn OrderRepository>, queue: Arc<dyn OrderQueue>) -> Self {
        Self {
            repository,
            queue,
            intake: Arc::new(Mutex::new(())),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Overrides the per-call timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The per-call timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Drains the queue into storage and returns every pending order.
    ///
    /// Each drained order is stamped `Pending` regardless of what the producer
    /// sent. The batch is acknowledged to the queue once stored; orders
    /// redelivered by the queue are absorbed by the repository's idempotent
    /// insert.
    ///
    /// # Errors
    ///
    /// - [`OrderError::Queue`] if the poll fails (nothing is inserted)
    /// - [`OrderError::Repository`] if the insert or the listing fails
    /// - [`OrderError::Timeout`] if any step exceeds the timeout
    pub async fn drain_and_list_pending(&self) -> Result<Vec<Order>, OrderError> {
        self.ingest().await?;

        let pending = self
            .bounded("get_pending_orders", self.repository.get_pending_orders())
            .await
            .inspect_err(|e| {
                tracing::error!(error = %e, "Failed to get pending orders from database");
            })?;

        tracing::info!(count = pending.len(), "Returning pending orders");
        Ok(pending)
    }

    async fn ingest(&self) -> Result<(), OrderError> {
        let _intake = self.intake.lock().await;

        let mut new_orders = self
            .bounded("receive_orders", self.queue.receive_orders())
            .await
            .inspect_err(|e| {
                tracing::error!(error = %e, "Failed to fetch orders from queue");
                metrics::counter!("makeline.intake.failures").increment(1);
            })?;

        for order in &mut new_orders {
            order.status = OrderStatus::Pending;
        }

        if !new_orders.is_empty() {
            let count = new_orders.len();
            self.bounded("insert_orders", self.repository.insert_orders(new_orders))
                .await
                .inspect_err(|e| {
                    tracing::error!(error = %e, count, "Failed to save orders to database");
                    metrics::counter!("makeline.intake.failures").increment(1);
                })?;

            tracing::info!(count, "Inserted new orders into the database");
            metrics::counter!("makeline.orders.ingested").increment(count as u64);
        }

        // Stored orders are safe either way; a lost acknowledgement only means redelivery.
        if let Err(e) = self.bounded("acknowledge", self.queue.acknowledge()).await {
            tracing::warn!(error = %e, "Failed to acknowledge order batch");
        }
        Ok(())
    }

    /// Looks up an order by its raw id.
    ///
    /// The id is canonicalized first, so `"007"` finds order `7`.
    ///
    /// # Errors
    ///
    /// - [`OrderError::MalformedRequest`] if `raw_id` is not a decimal integer
    /// - [`OrderError::NotFound`] if the order does not exist
    /// - [`OrderError::Repository`] / [`OrderError::Timeout`] on storage failure
    pub async fn get_order(&self, raw_id: &str) -> Result<Order, OrderError> {
        let id = OrderId::parse(raw_id).inspect_err(|e| {
            tracing::warn!(order_id = raw_id, error = %e, "Rejected order lookup");
        })?;

        self.bounded("get_order", self.repository.get_order(&id))
            .await
            .inspect_err(|e| {
                tracing::error!(order_id = %id, error = %e, "Failed to get order from database");
            })
    }

    /// Validates and applies a status update.
    ///
    /// Only `Processing` and `Complete` may be set here; `Pending` is reserved
    /// for the intake pipeline. The stored order must be one stage behind the
    /// requested status (see [`OrderStatus::can_advance_to`]). Supplied payload
    /// fields are written through along with the status. Repeating an identical
    /// update succeeds.
    ///
    /// Returns the canonical id of the updated order.
    ///
    /// # Errors
    ///
    /// - [`OrderError::MalformedRequest`] for a missing/invalid id, a
    ///   disallowed status, or a move that skips or reverses a stage; nothing
    ///   is written
    /// - [`OrderError::NotFound`] if the order does not exist
    /// - [`OrderError::Repository`] / [`OrderError::Timeout`] on storage failure
    pub async fn update_order(&self, update: OrderUpdate) -> Result<OrderId, OrderError> {
        let order = validate_update(update).inspect_err(|e| {
            tracing::warn!(error = %e, "Invalid order update request");
        })?;
        let id = order.order_id.clone();
        let status = order.status;

        let current = self
            .bounded("get_order", self.repository.get_order(&id))
            .await
            .inspect_err(|e| {
                tracing::warn!(order_id = %id, error = %e, "Failed to load order for update");
            })?;
        if !current.status.can_advance_to(status) {
            tracing::warn!(order_id = %id, from = %current.status, to = %status, "Rejected status change");
            return Err(OrderError::MalformedRequest(format!(
                "order {id} cannot move from {} to {status}",
                current.status
            )));
        }

        self.bounded("update_order", self.repository.update_order(order))
            .await
            .inspect_err(|e| {
                tracing::error!(order_id = %id, error = %e, "Failed to update order");
            })?;

        tracing::info!(order_id = %id, %status, "Order updated successfully");
        metrics::counter!("makeline.orders.updated", "status" => status.to_string()).increment(1);
        Ok(id)
    }

    async fn bounded<T, E>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, E>>,
    ) -> Result<T, OrderError>
    where
        OrderError: From<E>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result.map_err(OrderError::from),
            Err(_) => {
                tracing::warn!(operation, timeout = ?self.timeout, "Operation timed out");
                Err(OrderError::Timeout {
                    operation,
                    timeout: self.timeout,
                })
            }
        }
    }
}

/// Turns a raw update request into the order to persist.
fn validate_update(update: OrderUpdate) -> Result<Order, OrderError> {
    let raw_id = update
        .order_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| OrderError::MalformedRequest("missing orderId".to_string()))?;

    let raw_status = update
        .status
        .ok_or_else(|| OrderError::MalformedRequest("missing status".to_string()))?;
    let status = OrderStatus::try_from(raw_status)?;
    if !status.is_user_settable() {
        return Err(OrderError::MalformedRequest(format!(
            "status {status} cannot be set by an update"
        )));
    }

    let order_id = OrderId::parse(&raw_id)?;

    Ok(Order {
        order_id,
        status,
        payload: update.payload,
    })
}
