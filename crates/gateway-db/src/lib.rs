//! `SQLite` export for the sensor monitoring gateway.
//!
//! The recording engine keeps its buffer in memory; this crate turns a
//! snapshot of that buffer into a self-contained `SQLite` file a user can
//! download and query offline.
//!
//! # Modules
//!
//! - [`export`] -- Database construction
//! - [`error`] -- Shared error types

pub mod error;
pub mod export;

// Re-export primary types for convenience.
pub use error::DbError;
pub use export::{CONTENT_TYPE, export_database};
