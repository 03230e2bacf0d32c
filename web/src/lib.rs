//! HTTP surface of the makeline service.
//!
//! Thin axum layer over [`OrderService`](makeline_core::OrderService): handlers
//! decode the request, call the service once, and map the outcome to a status
//! code. No order logic lives here.
//!
//! # Routes
//!
//! | Method | Path           | Success                              |
//! |--------|----------------|--------------------------------------|
//! | `GET`  | `/order/fetch` | `200` pending orders (after intake)  |
//! | `GET`  | `/order/:id`   | `200` the order                      |
//! | `PUT`  | `/order`       | `202` empty body                     |
//! | `GET`  | `/health`      | `200` `{"status":"ok","version":..}` |
//!
//! Failures use [`AppError`]'s `{"code","message"}` body.
//!
//! # Example
//!
//! ```no_run
//! use makeline_core::OrderService;
//! use makeline_testing::{InMemoryOrderQueue, InMemoryOrderRepository};
//! use makeline_web::{AppState, build_router};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let service = OrderService::new(
//!     Arc::new(InMemoryOrderRepository::new()),
//!     Arc::new(InMemoryOrderQueue::new()),
//! );
//! let app = build_router(AppState::new(service, "1.0.0"));
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3001").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod router;
pub mod state;

// Re-export key types for convenience
pub use error::AppError;
pub use middleware::{CORRELATION_ID_HEADER, correlation_id_layer};
pub use response::IndentedJson;
pub use router::build_router;
pub use state::AppState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
