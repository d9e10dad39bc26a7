//! Event distribution, write-control arbitration, and recording for the
//! sensor monitoring gateway.
//!
//! Adapters push [`SensorBatch`]es through a [`Publisher`]; the
//! [`EventBus`] records them and fans them out to browser sessions. The
//! [`ControlArbiter`] gates writes and broadcasts ownership changes. The
//! [`Gateway`] facade ties these together with the adapter table.
//!
//! # Modules
//!
//! - [`adapter`] -- [`Adapter`] trait, [`Publisher`], and the in-memory
//!   [`LoopbackAdapter`].
//! - [`bus`] -- Session registry and fan-out.
//! - [`config`] -- Configuration loading from `gateway-config.yaml`.
//! - [`control`] -- Single-controller arbitration with idle timeout.
//! - [`error`] -- [`GatewayError`].
//! - [`gateway`] -- The facade used by the HTTP layer.
//! - [`recording`] -- Ring-buffered recording and JSON/CSV export.
//! - [`servers`] -- Registry of configured upstream servers.
//!
//! [`SensorBatch`]: gateway_types::SensorBatch
//! [`Adapter`]: adapter::Adapter
//! [`Publisher`]: adapter::Publisher
//! [`LoopbackAdapter`]: adapter::LoopbackAdapter
//! [`EventBus`]: bus::EventBus
//! [`ControlArbiter`]: control::ControlArbiter
//! [`Gateway`]: gateway::Gateway
//! [`GatewayError`]: error::GatewayError

pub mod adapter;
pub mod bus;
pub mod config;
pub mod control;
pub mod error;
pub mod gateway;
pub mod recording;
pub mod servers;
