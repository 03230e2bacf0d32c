//! # Makeline Testing
//!
//! Testing utilities for the makeline.
//!
//! This crate provides in-memory implementations of the core abstractions:
//! - [`InMemoryOrderRepository`]: `HashMap`-backed storage honouring the
//!   repository contract, with outage and latency injection
//! - [`InMemoryOrderQueue`]: scripted queue batches, with failure injection
//!
//! ## Example
//!
//! ```
//! use makeline_core::service::OrderService;
//! use makeline_testing::{InMemoryOrderQueue, InMemoryOrderRepository};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let repo = InMemoryOrderRepository::new();
//! let queue = InMemoryOrderQueue::new();
//! queue.push_message(br#"{"orderId":"1"}"#);
//!
//! let service = OrderService::new(Arc::new(repo.clone()), Arc::new(queue));
//! let pending = service.drain_and_list_pending().await?;
//! assert_eq!(pending.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod queue_mocks;
pub mod repository_mocks;

// Re-export commonly used items
pub use queue_mocks::InMemoryOrderQueue;
pub use repository_mocks::InMemoryOrderRepository;
