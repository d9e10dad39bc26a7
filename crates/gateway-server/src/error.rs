//! Error types for the gateway binary.
//!
//! [`AppError`] is the top-level error type that wraps all possible
//! failure modes during startup and serving.

/// Top-level error for the gateway binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: gateway_core::config::ConfigError,
    },

    /// The HTTP server could not be started.
    #[error("startup error: {source}")]
    Startup {
        /// The underlying startup error.
        #[from]
        source: gateway_api::StartupError,
    },

    /// The HTTP server stopped with an error.
    #[error("server error: {source}")]
    Server {
        /// The underlying server error.
        #[from]
        source: gateway_api::ServerError,
    },

    /// Logging could not be initialized.
    #[error("logging error: {message}")]
    Logging {
        /// Description of the failure.
        message: String,
    },

    /// The server task panicked or was cancelled.
    #[error("server task failed: {message}")]
    Task {
        /// Description of the failure.
        message: String,
    },
}
