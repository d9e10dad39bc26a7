//! HTTP API server for the sensor monitoring gateway.
//!
//! This crate provides an Axum HTTP server that exposes:
//!
//! - **SSE endpoint** (`/api/events`) streaming sensor batches, control
//!   and recording status to each browser session
//! - **Object endpoints** for subscribing to sensors and writing values
//! - **Control endpoints** for taking and releasing write control
//! - **Recording endpoints** for start/stop/clear and JSON, CSV and
//!   `SQLite` downloads
//! - **Minimal HTML status page** (`GET /`)
//!
//! # Architecture
//!
//! Every handler goes through the [`Gateway`] facade held in
//! [`AppState`]. Each SSE response owns a guard that closes its session
//! when the client disconnects.
//!
//! [`Gateway`]: gateway_core::gateway::Gateway
//! [`AppState`]: state::AppState

pub mod control;
pub mod error;
pub mod export;
pub mod handlers;
pub mod objects;
pub mod params;
pub mod recording;
pub mod router;
pub mod server;
pub mod sse;
pub mod startup;
pub mod state;

// Re-export primary types for convenience.
pub use error::ApiError;
pub use router::build_router;
pub use server::{ServerConfig, ServerError, start_server};
pub use startup::{StartupError, spawn_server};
pub use state::AppState;
