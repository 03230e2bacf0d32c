//! Repository abstraction over order storage backends.
//!
//! Every backend implements the same four operations with the same semantics, so
//! the rest of the system never branches on which store is in use. The backend is
//! picked once at startup and handed around as `Arc<dyn OrderRepository>`.
//!
//! # Implementations
//!
//! - `MongoOrderRepository` (in `makeline-mongodb`): document store keyed by `orderId`
//! - `CosmosOrderRepository` (in `makeline-cosmos`): partitioned SQL-API store
//! - `InMemoryOrderRepository` (in `makeline-testing`): fast, deterministic tests
//!
//! # Example
//!
//! ```no_run
//! use makeline_core::order::{Order, OrderId, OrderStatus};
//! use makeline_core::repository::{OrderRepository, RepositoryError};
//!
//! async fn example<R: OrderRepository>(repo: &R) -> Result<(), RepositoryError> {
//!     let id = OrderId::parse("42").unwrap();
//!     repo.insert_orders(vec![Order::new(id.clone(), OrderStatus::Pending)]).await?;
//!
//!     let pending = repo.get_pending_orders().await?;
//!     let order = repo.get_order(&id).await?;
//!     Ok(())
//! }
//! ```

use crate::order::{Order, OrderId};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by repository operations.
pub type RepositoryFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, RepositoryError>> + Send + 'a>>;

/// Errors that can occur during repository operations.
///
/// A duplicate key on insert is deliberately absent: backends swallow it.
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// No order with this id exists.
    #[error("Order not found: {0}")]
    NotFound(OrderId),

    /// Connectivity or query failure reported by the store.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// An order could not be converted to or from the store's representation.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The store rejected our credentials, or they could not be obtained.
    #[error("Authentication error: {0}")]
    AuthenticationError(String),
}

/// Storage capability shared by every order backend.
///
/// # Thread Safety
///
/// Implementations are shared by all concurrent requests and must be
/// `Send + Sync`. They hold no per-request state; concurrent writers are
/// reconciled by the store itself (duplicate-key rejection, last writer wins).
///
/// # Dyn Compatibility
///
/// Methods return boxed futures instead of using `async fn` so the trait can be
/// used as `Arc<dyn OrderRepository>`.
pub trait OrderRepository: Send + Sync {
    /// Bulk insert.
    ///
    /// An empty `orders` is a no-op. An order whose id already exists is treated
    /// as inserted, so draining the same message twice stores it once. Every
    /// other order is durably stored unless the whole call fails.
    ///
    /// # Errors
    ///
    /// - `DatabaseError`: the store failed for a reason other than a duplicate key
    /// - `SerializationError`: an order could not be encoded
    /// - `AuthenticationError`: the store refused the credentials
    fn insert_orders(&self, orders: Vec<Order>) -> RepositoryFuture<'_, ()>;

    /// Returns every order whose status is `Pending`, sorted by numeric id.
    ///
    /// # Errors
    ///
    /// - `DatabaseError`: the query failed
    /// - `SerializationError`: a stored document is not a valid order
    fn get_pending_orders(&self) -> RepositoryFuture<'_, Vec<Order>>;

    /// Looks up a single order by its canonical id.
    ///
    /// # Errors
    ///
    /// - `NotFound`: no order has this id
    /// - `DatabaseError` / `SerializationError`: as above
    fn get_order<'a>(&'a self, id: &'a OrderId) -> RepositoryFuture<'a, Order>;

    /// Replaces the stored status and every supplied payload field of the order
    /// with the same id.
    ///
    /// # Errors
    ///
    /// - `NotFound`: no order has this id
    /// - `DatabaseError` / `SerializationError`: as above
    fn update_order(&self, order: Order) -> RepositoryFuture<'_, ()>;
}

/// Sorts orders by numeric id so listings are stable for a stable dataset.
pub fn sort_by_id(orders: &mut [Order]) {
    orders.sort_by_key(|order| order.order_id.numeric());
}
