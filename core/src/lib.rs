//! # Makeline Core
//!
//! Order model, storage and queue abstractions, and the order service for the
//! makeline: the component that drains newly placed orders from a queue into a
//! store and tracks their preparation status.
//!
//! ## Core Concepts
//!
//! - **Order**: business key ([`order::OrderId`]), [`order::OrderStatus`], opaque payload
//! - **Repository**: four-operation storage capability every backend implements
//! - **Queue**: non-blocking, at-least-once source of new orders
//! - **Service**: the façade handlers use; intake, lookup, status update
//!
//! ## Status Lifecycle
//!
//! ```text
//! New ──intake──▶ Pending ──update──▶ Processing ──update──▶ Complete
//! ```
//!
//! Only the intake pipeline sets `Pending`; updates may only set `Processing`
//! or `Complete`.
//!
//! ## Example
//!
//! ```ignore
//! use makeline_core::service::OrderService;
//! use std::sync::Arc;
//!
//! let service = OrderService::new(Arc::new(repository), Arc::new(queue));
//! let pending = service.drain_and_list_pending().await?;
//! ```

pub mod order;
pub mod queue;
pub mod repository;
pub mod service;

// Re-export commonly used types
pub use order::{Order, OrderId, OrderStatus, OrderUpdate};
pub use queue::{OrderQueue, QueueError};
pub use repository::{OrderRepository, RepositoryError};
pub use service::{OrderError, OrderService};
