//! Shared state for the HTTP handlers.

use orderbus_workers::creator::OrderService;

/// State handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// The order creator.
    pub service: OrderService,
}

impl AppState {
    /// Wrap the creator service.
    #[must_use]
    pub const fn new(service: OrderService) -> Self {
        Self { service }
    }
}
