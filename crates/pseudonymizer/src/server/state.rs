//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use crate::pseudonymize::PseudonymizationService;

/// Application state shared across all request handlers.
///
/// Cloned by Axum for every request, so everything behind it is `Arc`-wrapped.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PseudonymizationService>,
}

impl AppState {
    pub fn new(service: PseudonymizationService) -> Self {
        Self {
            service: Arc::new(service),
        }
    }
}
