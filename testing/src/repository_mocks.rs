//! In-memory order repository for fast, deterministic tests.
//!
//! [`InMemoryOrderRepository`] follows the same contract as the real backends:
//! duplicate ids on insert are a no-op, listings are sorted by numeric id, and
//! updates of unknown ids fail with `NotFound`. It can also simulate an outage
//! or a slow store.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Lock poisoning only happens if a test already panicked

use makeline_core::order::{Order, OrderId, OrderStatus};
use makeline_core::repository::{
    OrderRepository, RepositoryError, RepositoryFuture, sort_by_id,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// `HashMap`-backed order storage.
///
/// Clones share the same data, so a test can keep one handle for assertions
/// while the service owns another.
///
/// # Example
///
/// ```
/// use makeline_testing::InMemoryOrderRepository;
/// use makeline_core::order::{Order, OrderId, OrderStatus};
/// use makeline_core::repository::OrderRepository;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let repo = InMemoryOrderRepository::new();
/// let order = Order::new(OrderId::parse("1")?, OrderStatus::Pending);
///
/// repo.insert_orders(vec![order.clone()]).await?;
/// repo.insert_orders(vec![order]).await?; // duplicate: no-op
/// assert_eq!(repo.len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryOrderRepository {
    orders: Arc<RwLock<HashMap<OrderId, Order>>>,
    unavailable: Arc<AtomicBool>,
    insert_calls: Arc<AtomicUsize>,
    latency: Option<Duration>,
}

impl InMemoryOrderRepository {
    /// Create a new empty repository
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every operation by `latency`, for timeout tests.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Store orders directly, bypassing the duplicate check.
    pub fn seed(&self, orders: impl IntoIterator<Item = Order>) {
        let mut stored = self.orders.write().unwrap();
        for order in orders {
            stored.insert(order.order_id.clone(), order);
        }
    }

    /// Make every subsequent operation fail with a `DatabaseError`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of stored orders
    #[must_use]
    pub fn len(&self) -> usize {
        self.orders.read().unwrap().len()
    }

    /// Check if the repository is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.orders.read().unwrap().is_empty()
    }

    /// Stored copy of an order, if any.
    #[must_use]
    pub fn stored(&self, id: &str) -> Option<Order> {
        let id = OrderId::parse(id).ok()?;
        self.orders.read().unwrap().get(&id).cloned()
    }

    /// How many times `insert_orders` has been called.
    #[must_use]
    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> Result<(), RepositoryError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepositoryError::DatabaseError(
                "in-memory repository marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

impl OrderRepository for InMemoryOrderRepository {
    fn insert_orders(&self, orders: Vec<Order>) -> RepositoryFuture<'_, ()> {
        Box::pin(async move {
            self.insert_calls.fetch_add(1, Ordering::SeqCst);
            self.enter().await?;

            let mut stored = self.orders.write().unwrap();
            for order in orders {
                stored.entry(order.order_id.clone()).or_insert(order);
            }
            Ok(())
        })
    }

    fn get_pending_orders(&self) -> RepositoryFuture<'_, Vec<Order>> {
        Box::pin(async move {
            self.enter().await?;

            let mut pending: Vec<Order> = self
                .orders
                .read()
                .unwrap()
                .values()
                .filter(|order| order.status == OrderStatus::Pending)
                .cloned()
                .collect();
            sort_by_id(&mut pending);
            Ok(pending)
        })
    }

    fn get_order<'a>(&'a self, id: &'a OrderId) -> RepositoryFuture<'a, Order> {
        Box::pin(async move {
            self.enter().await?;

            self.orders
                .read()
                .unwrap()
                .get(id)
                .cloned()
                .ok_or_else(|| RepositoryError::NotFound(id.clone()))
        })
    }

    fn update_order(&self, order: Order) -> RepositoryFuture<'_, ()> {
        Box::pin(async move {
            self.enter().await?;

            let mut stored = self.orders.write().unwrap();
            let existing = stored
                .get_mut(&order.order_id)
                .ok_or_else(|| RepositoryError::NotFound(order.order_id.clone()))?;

            existing.status = order.status;
            existing.payload.extend(order.payload);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn order(id: &str, status: OrderStatus) -> Order {
        Order::new(OrderId::parse(id).unwrap(), status)
    }

    #[tokio::test]
    async fn duplicate_insert_keeps_single_record() {
        let repo = InMemoryOrderRepository::new();
        let first = order("1", OrderStatus::Pending).with_field("customerId", "a");
        let second = order("1", OrderStatus::Pending).with_field("customerId", "b");

        repo.insert_orders(vec![first, second]).await.unwrap();

        assert_eq!(repo.len(), 1);
        assert_eq!(repo.insert_calls(), 1);
    }

    #[tokio::test]
    async fn pending_listing_is_filtered_and_sorted() {
        let repo = InMemoryOrderRepository::new();
        repo.seed([
            order("10", OrderStatus::Pending),
            order("2", OrderStatus::Processing),
            order("3", OrderStatus::Pending),
        ]);

        let pending = repo.get_pending_orders().await.unwrap();
        let ids: Vec<&str> = pending.iter().map(|o| o.order_id.as_str()).collect();
        assert_eq!(ids, vec!["3", "10"]);
    }

    #[tokio::test]
    async fn update_merges_fields() {
        let repo = InMemoryOrderRepository::new();
        repo.seed([order("4", OrderStatus::Pending).with_field("customerId", "c")]);

        repo.update_order(order("4", OrderStatus::Complete).with_field("note", "done"))
            .await
            .unwrap();

        let stored = repo.stored("4").unwrap();
        assert_eq!(stored.status, OrderStatus::Complete);
        assert_eq!(stored.payload.get("customerId"), Some(&json!("c")));
        assert_eq!(stored.payload.get("note"), Some(&json!("done")));
    }

    #[tokio::test]
    async fn missing_order_is_not_found() {
        let repo = InMemoryOrderRepository::new();
        let id = OrderId::parse("9").unwrap();

        assert!(matches!(repo.get_order(&id).await, Err(RepositoryError::NotFound(_))));
        assert!(matches!(
            repo.update_order(order("9", OrderStatus::Processing)).await,
            Err(RepositoryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn unavailable_repository_fails() {
        let repo = InMemoryOrderRepository::new();
        repo.set_unavailable(true);

        assert!(matches!(
            repo.get_pending_orders().await,
            Err(RepositoryError::DatabaseError(_))
        ));
    }
}
