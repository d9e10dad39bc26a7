//! Error type for gateway-level operations.

use gateway_types::{Protocol, ServerId};

use crate::adapter::AdapterError;
use crate::bus::BusError;
use crate::control::ControlError;

/// Errors returned by [`crate::gateway::Gateway`].
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Session registry failure.
    #[error(transparent)]
    Bus(#[from] BusError),

    /// Control arbitration refused the operation.
    #[error(transparent)]
    Control(#[from] ControlError),

    /// The adapter failed.
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    /// No adapter is registered for the server and protocol.
    #[error("no {protocol} adapter for server {server_id}")]
    NoAdapter {
        /// The requested server.
        server_id: ServerId,
        /// The requested protocol.
        protocol: Protocol,
    },
}
