//! Shared application state for the gateway HTTP API.
//!
//! [`AppState`] holds the [`Gateway`] facade. Handlers never touch the
//! bus, arbiter or recorder except through it.

use std::sync::Arc;

use gateway_core::config::GatewayConfig;
use gateway_core::gateway::Gateway;

/// Shared state for the Axum application.
///
/// Wrapped in [`Arc`] and injected via Axum's `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The gateway facade.
    pub gateway: Arc<Gateway>,
}

impl AppState {
    /// Wrap an existing gateway.
    pub const fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }

    /// Build a gateway from `config` with no adapters registered.
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(Arc::new(Gateway::new(config)))
    }
}
