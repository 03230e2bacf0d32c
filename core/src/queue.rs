//! Order queue abstraction.
//!
//! The intake pipeline only needs one capability from the queue: hand back
//! whatever order messages are visible right now, without blocking for new ones.
//!
//! # Delivery Semantics
//!
//! **At-least-once**: a received batch stays unacknowledged until
//! [`OrderQueue::acknowledge`] is called, which the service does only after the
//! orders are stored. An unacknowledged batch is handed out again by the next
//! poll. A message may therefore be returned more than once (failed insert,
//! consumer restart, rebalance). Nothing here deduplicates; the repository's
//! idempotent insert absorbs duplicates.
//!
//! # Implementations
//!
//! - `RedpandaOrderQueue` (in `makeline-redpanda`): Kafka-compatible consumer
//! - `InMemoryOrderQueue` (in `makeline-testing`): scripted batches for tests

use crate::order::Order;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur while polling the queue.
#[derive(Error, Debug, Clone)]
pub enum QueueError {
    /// Could not connect to or configure the queue client.
    #[error("Queue connection failed: {0}")]
    ConnectionFailed(String),

    /// The poll itself failed.
    #[error("Failed to receive orders: {0}")]
    ReceiveFailed(String),

    /// Recording the consumed position failed.
    #[error("Failed to acknowledge orders: {0}")]
    AcknowledgeFailed(String),
}

/// Source of newly placed orders.
///
/// Uses boxed futures for dyn compatibility, like
/// [`OrderRepository`](crate::repository::OrderRepository).
pub trait OrderQueue: Send + Sync {
    /// Drains the orders currently visible on the queue.
    ///
    /// This is a single poll, not a consume loop: it returns as soon as no
    /// further message is immediately available (possibly with an empty batch).
    /// Messages that cannot be decoded as orders are skipped by the
    /// implementation rather than failing the batch.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ReceiveFailed`] if the poll fails. No orders are
    /// returned in that case.
    fn receive_orders(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Order>, QueueError>> + Send + '_>>;

    /// Marks everything received so far as consumed.
    ///
    /// Until this is called, the orders returned by earlier polls are
    /// delivered again, starting with the next [`receive_orders`](Self::receive_orders).
    /// Acknowledging with nothing outstanding is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::AcknowledgeFailed`] if the position could not be
    /// recorded. The orders may then be redelivered.
    fn acknowledge(&self) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + '_>>;
}
