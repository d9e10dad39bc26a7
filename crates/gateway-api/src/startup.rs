//! Server startup helper.
//!
//! Provides [`spawn_server`] which launches the HTTP server on a
//! background Tokio task, so the binary can run the control watchdog and
//! wait for `Ctrl-C` alongside it.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::server::{ServerConfig, ServerError, start_server};
use crate::state::AppState;

/// Errors that can occur when spawning the HTTP server.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// The server failed to bind or start.
    #[error("server start error: {0}")]
    Server(#[from] ServerError),
}

/// Spawn the HTTP server on a background Tokio task.
///
/// The address is validated before the task is spawned; binding happens
/// inside the task, and a bind or serve failure ends the task with an
/// error log. The caller should hold the returned handle and abort or
/// await it during shutdown.
///
/// # Errors
///
/// Returns [`StartupError::Server`] if the configured address does not
/// parse.
pub fn spawn_server(
    config: ServerConfig,
    state: Arc<AppState>,
) -> Result<JoinHandle<Result<(), ServerError>>, StartupError> {
    let addr = config.socket_addr()?;

    let handle = tokio::spawn(async move {
        let result = start_server(&config, state).await;
        if let Err(e) = &result {
            tracing::error!(error = %e, "Gateway server exited with error");
        }
        result
    });

    tracing::info!(%addr, "Gateway server spawned on background task");

    Ok(handle)
}
