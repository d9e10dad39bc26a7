//! Shared type definitions for the sensor monitoring gateway.
//!
//! This crate is the single source of truth for the data that flows between
//! adapters, the gateway core, and browsers. Types defined here flow
//! downstream to `TypeScript` via `ts-rs` for the dashboard.
//!
//! # Modules
//!
//! - [`ids`] -- Session and server identifiers
//! - [`enums`] -- Protocol tag, sensor values and sensor keys
//! - [`structs`] -- Updates, batches, records, servers and status snapshots
//! - [`events`] -- Events pushed to browser sessions

pub mod enums;
pub mod events;
pub mod ids;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{Protocol, SensorKey, SensorValue, UnknownProtocol};
pub use events::{ConnectedEvent, PushEvent};
pub use ids::{ServerId, SessionId};
pub use structs::{
    ControlStatus, ControlView, Record, RecordingStatus, SensorBatch, SensorUpdate, Server, Topic,
};
