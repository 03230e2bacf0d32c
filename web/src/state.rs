//! Application state for axum handlers.

use makeline_core::OrderService;
use std::sync::Arc;

/// Application state shared across all HTTP handlers.
///
/// Cheap to clone: the service shares its backend handles and the version
/// string is reference counted.
#[derive(Clone)]
pub struct AppState {
    /// Order service every handler calls into.
    pub service: OrderService,
    /// Build version reported by `/health`.
    pub version: Arc<str>,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(service: OrderService, version: impl Into<Arc<str>>) -> Self {
        Self {
            service,
            version: version.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_is_clone_send_sync() {
        // Required by axum for router state
        fn assert_state<T: Clone + Send + Sync + 'static>() {}
        assert_state::<AppState>();
    }
}
