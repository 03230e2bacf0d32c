//! HTTP request handlers.

pub mod health;
pub mod orders;

pub use health::health_check;
pub use orders::{fetch_orders, get_order, update_order};
