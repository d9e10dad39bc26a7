//! Sensor monitoring gateway binary.
//!
//! Loads configuration, registers adapters for the configured servers,
//! and serves the HTTP API until `Ctrl-C`.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `GATEWAY_CONFIG` or `gateway-config.yaml`
//! 2. Initialize structured logging (tracing)
//! 3. Build the gateway and register loopback adapters
//! 4. Start the control idle watchdog
//! 5. Serve the HTTP API

mod error;

use std::path::PathBuf;
use std::sync::Arc;

use gateway_api::{AppState, ServerConfig};
use gateway_core::config::{GatewayConfig, LogFormat, LoggingConfig};
use gateway_core::control::ControlArbiter;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::AppError;

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "gateway-config.yaml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration is invalid, the server cannot bind,
/// or the server stops with an error.
#[tokio::main]
async fn main() -> Result<(), AppError> {
    // 1. Load configuration.
    let (config, source) = load_config()?;

    // 2. Initialize structured logging.
    init_tracing(&config.logging)?;
    info!(
        config = %source,
        servers = config.servers.len(),
        control_tokens = config.control.tokens.len(),
        max_records = config.recording.max_records,
        "gateway-server starting"
    );
    if config.control.tokens.is_empty() {
        warn!("No control tokens configured; any non-empty token may take control");
    }

    // 3. Build the gateway and register adapters.
    let state = Arc::new(AppState::from_config(&config));
    let adapters = state.gateway.register_loopback(&config.servers);
    info!(adapters, "Adapters registered");

    // 4. Control idle watchdog.
    let watchdog = spawn_control_watchdog(Arc::clone(state.gateway.control()));

    // 5. Serve.
    let server = gateway_api::spawn_server(ServerConfig::from(&config.http), state)?;

    let result = tokio::select! {
        joined = server => match joined {
            Ok(served) => served.map_err(AppError::from),
            Err(e) => Err(AppError::Task { message: e.to_string() }),
        },
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "Failed to listen for Ctrl-C");
            }
            info!("Shutdown requested");
            Ok(())
        }
    };

    if let Some(handle) = watchdog {
        handle.abort();
    }
    info!("gateway-server stopped");
    result
}

/// Load configuration from `GATEWAY_CONFIG`, or `gateway-config.yaml` in
/// the working directory. A missing default file falls back to defaults;
/// a missing explicit file is an error.
fn load_config() -> Result<(GatewayConfig, String), AppError> {
    if let Ok(explicit) = std::env::var("GATEWAY_CONFIG") {
        let path = PathBuf::from(&explicit);
        return Ok((GatewayConfig::from_file(&path)?, explicit));
    }

    let path = PathBuf::from(DEFAULT_CONFIG_PATH);
    if path.exists() {
        Ok((GatewayConfig::from_file(&path)?, String::from(DEFAULT_CONFIG_PATH)))
    } else {
        let mut config = GatewayConfig::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok((config, String::from("defaults")))
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `logging.level`.
fn init_tracing(logging: &LoggingConfig) -> Result<(), AppError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .map_err(|e| AppError::Logging {
            message: format!("invalid log filter '{}': {e}", logging.level),
        })?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    let installed = match logging.format {
        LogFormat::Fmt => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| AppError::Logging {
        message: e.to_string(),
    })
}

/// Periodically release control held by an idle controller.
///
/// Returns `None` when the idle timeout is disabled.
fn spawn_control_watchdog(
    control: Arc<ControlArbiter>,
) -> Option<tokio::task::JoinHandle<()>> {
    let period = control.watchdog_interval()?;
    debug!(period = ?period, "Control watchdog started");
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            control.expire_idle().await;
        }
    }))
}
