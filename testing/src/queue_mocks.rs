//! In-memory order queue for intake tests.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use makeline_core::order::Order;
use makeline_core::queue::{OrderQueue, QueueError};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Queue whose visible messages are scripted by the test.
///
/// Each [`receive_orders`](OrderQueue::receive_orders) call drains everything
/// pushed so far (up to the optional batch size), mirroring a single
/// non-blocking poll. Orders received but not yet
/// [`acknowledge`](OrderQueue::acknowledge)d are handed out again first.
/// Pushing the same order twice models a producer-side duplicate.
///
/// # Example
///
/// ```
/// use makeline_testing::InMemoryOrderQueue;
/// use makeline_core::queue::OrderQueue;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let queue = InMemoryOrderQueue::new();
/// queue.push_message(br#"{"orderId":"1","customerId":"42"}"#);
///
/// let batch = queue.receive_orders().await?;
/// assert_eq!(batch.len(), 1);
/// queue.acknowledge().await?;
/// assert!(queue.receive_orders().await?.is_empty());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryOrderQueue {
    visible: Arc<Mutex<VecDeque<Order>>>,
    in_flight: Arc<Mutex<Vec<Order>>>,
    failing: Arc<AtomicBool>,
    batch_size: Option<usize>,
}

impl InMemoryOrderQueue {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit how many orders a single poll returns.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// Make an order visible.
    pub fn push(&self, order: Order) {
        self.visible.lock().unwrap().push_back(order);
    }

    /// Make a raw message visible, decoding it the way a real consumer does.
    ///
    /// Returns `false` (and enqueues nothing) for undecodable messages.
    pub fn push_message(&self, bytes: &[u8]) -> bool {
        match Order::from_queue_message(bytes) {
            Ok(order) => {
                self.push(order);
                true
            },
            Err(e) => {
                tracing::warn!(error = %e, "Skipping undecodable order message");
                false
            },
        }
    }

    /// Make every subsequent poll fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of orders waiting to be received.
    #[must_use]
    pub fn visible(&self) -> usize {
        self.visible.lock().unwrap().len()
    }

    /// Number of orders received but not yet acknowledged.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().unwrap().len()
    }
}

impl OrderQueue for InMemoryOrderQueue {
    fn receive_orders(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Order>, QueueError>> + Send + '_>> {
        Box::pin(async move {
            if self.failing.load(Ordering::SeqCst) {
                return Err(QueueError::ReceiveFailed(
                    "in-memory queue marked failing".to_string(),
                ));
            }

            let mut visible = self.visible.lock().unwrap();
            let mut in_flight = self.in_flight.lock().unwrap();
            for order in in_flight.drain(..).rev() {
                visible.push_front(order);
            }

            let take = self.batch_size.unwrap_or(visible.len()).min(visible.len());
            let batch: Vec<Order> = visible.drain(..take).collect();
            in_flight.extend(batch.iter().cloned());
            Ok(batch)
        })
    }

    fn acknowledge(&self) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + '_>> {
        Box::pin(async move {
            self.in_flight.lock().unwrap().clear();
            Ok(())
        })
    }
}
