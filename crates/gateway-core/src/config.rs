//! Configuration loading and typed config structures for the gateway.
//!
//! The configuration lives in `gateway-config.yaml` (or the path named by
//! `GATEWAY_CONFIG`). This module defines strongly-typed structs that mirror
//! the YAML structure, applies environment overrides, and validates the
//! result before anything is started.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use gateway_types::{Protocol, SensorValue, ServerId};
use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// An environment override could not be parsed.
    #[error("invalid value for {variable}: {value}")]
    Env {
        /// Name of the offending variable.
        variable: &'static str,
        /// The value it held.
        value: String,
    },

    /// The configuration parsed but is not usable.
    #[error("invalid configuration: {message}")]
    Invalid {
        /// What is wrong.
        message: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GatewayConfig {
    /// HTTP listener settings.
    #[serde(default)]
    pub http: HttpConfig,

    /// Upstream automation servers.
    #[serde(default)]
    pub servers: Vec<ServerConfig>,

    /// Write-control settings.
    #[serde(default)]
    pub control: ControlConfig,

    /// Recording buffer settings.
    #[serde(default)]
    pub recording: RecordingConfig,

    /// Per-session push channel settings.
    #[serde(default)]
    pub sessions: SessionConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl GatewayConfig {
    /// Load configuration from a YAML file, apply environment overrides,
    /// and validate.
    ///
    /// Environment variables override YAML values:
    /// - `GATEWAY_HOST` overrides `http.host`
    /// - `GATEWAY_PORT` overrides `http.port`
    /// - `GATEWAY_CONTROL_TOKENS` (comma separated) overrides `control.tokens`
    /// - `GATEWAY_LOG_FORMAT` overrides `logging.format`
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Self = serde_yml::from_str(&contents)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate configuration from a YAML string. No environment
    /// overrides are applied.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_env_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides using `lookup` to read variables.
    pub fn apply_env_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("GATEWAY_HOST") {
            self.http.host = host;
        }
        if let Some(port) = lookup("GATEWAY_PORT") {
            self.http.port = port.trim().parse().map_err(|_parse| ConfigError::Env {
                variable: "GATEWAY_PORT",
                value: port.clone(),
            })?;
        }
        if let Some(tokens) = lookup("GATEWAY_CONTROL_TOKENS") {
            self.control.tokens = tokens
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_owned)
                .collect();
        }
        if let Some(format) = lookup("GATEWAY_LOG_FORMAT") {
            self.logging.format = match format.trim().to_ascii_lowercase().as_str() {
                "fmt" | "text" => LogFormat::Fmt,
                "json" => LogFormat::Json,
                _ => {
                    return Err(ConfigError::Env {
                        variable: "GATEWAY_LOG_FORMAT",
                        value: format,
                    });
                }
            };
        }
        Ok(())
    }

    /// Check the invariants the rest of the gateway relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = BTreeSet::new();
        for (index, server) in self.servers.iter().enumerate() {
            if server.url.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    message: format!("server at index {index} has no URL"),
                });
            }
            let id = server.resolved_id();
            if !seen.insert(id.clone()) {
                return Err(ConfigError::Invalid {
                    message: format!("duplicate server id {id}"),
                });
            }
        }
        if self.sessions.channel_capacity == 0 {
            return Err(ConfigError::Invalid {
                message: String::from("sessions.channel_capacity must be greater than zero"),
            });
        }
        Ok(())
    }
}

/// HTTP listener configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HttpConfig {
    /// Bind address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// One upstream automation server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerConfig {
    /// Stable id; derived from the URL when omitted.
    #[serde(default)]
    pub id: Option<String>,

    /// Base URL of the server's HTTP interface.
    pub url: String,

    /// Display name; defaults to the URL.
    #[serde(default)]
    pub name: Option<String>,

    /// Objects served by the in-process loopback adapter for this server.
    #[serde(default)]
    pub loopback: Vec<LoopbackObjectConfig>,
}

impl ServerConfig {
    /// The configured id, or the hash-derived id of the URL.
    pub fn resolved_id(&self) -> ServerId {
        match &self.id {
            Some(id) if !id.trim().is_empty() => ServerId::new(id.trim()),
            _ => server_id_from_url(&self.url),
        }
    }

    /// The configured name, or the URL.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) if !name.trim().is_empty() => name.clone(),
            _ => self.url.clone(),
        }
    }
}

/// An object served by the loopback adapter.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LoopbackObjectConfig {
    /// Object name.
    pub name: String,

    /// Protocol the object is exposed through.
    pub protocol: Protocol,

    /// Initial sensor values.
    #[serde(default)]
    pub sensors: Vec<LoopbackSensorConfig>,
}

/// Initial state of one loopback sensor.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LoopbackSensorConfig {
    /// Numeric id; derived from the name when omitted.
    #[serde(default)]
    pub id: Option<i64>,

    /// Sensor name.
    #[serde(default)]
    pub name: String,

    /// Initial value.
    #[serde(default = "default_sensor_value")]
    pub value: SensorValue,
}

impl LoopbackSensorConfig {
    /// The configured id, or the name hash when no id is given.
    pub fn resolved_id(&self) -> i64 {
        self.id.unwrap_or_else(|| i64::from(hash32(self.name.as_bytes())))
    }
}

/// Write-control configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ControlConfig {
    /// Tokens allowed to take control. Empty accepts any non-empty token.
    #[serde(default)]
    pub tokens: Vec<String>,

    /// Seconds of inactivity after which control is released (0 disables).
    #[serde(default = "default_idle_timeout_seconds")]
    pub idle_timeout_seconds: u64,
}

impl ControlConfig {
    /// The idle timeout, or `None` when disabled.
    pub const fn idle_timeout(&self) -> Option<Duration> {
        if self.idle_timeout_seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(self.idle_timeout_seconds))
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            tokens: Vec::new(),
            idle_timeout_seconds: default_idle_timeout_seconds(),
        }
    }
}

/// Recording buffer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RecordingConfig {
    /// Ring buffer capacity; 0 means unbounded.
    #[serde(default = "default_max_records")]
    pub max_records: usize,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            max_records: default_max_records(),
        }
    }
}

/// Per-session push channel configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionConfig {
    /// Bounded channel capacity per session.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// How long a publish may wait on a full channel before evicting.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

impl SessionConfig {
    /// The send timeout as a [`Duration`].
    pub const fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            send_timeout_ms: default_send_timeout_ms(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Fmt,
    /// One JSON object per line.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Fmt,
        }
    }
}

// ---------------------------------------------------------------------------
// Server id derivation
// ---------------------------------------------------------------------------

/// Derive a server id from its URL: 8 lowercase hex digits of [`hash32`].
pub fn server_id_from_url(url: &str) -> ServerId {
    ServerId::new(format!("{:08x}", hash32(url.as_bytes())))
}

/// `MurmurHash2` with seed 0, the hash used for ids on the automation side.
pub fn hash32(data: &[u8]) -> u32 {
    murmur_hash2(data, 0)
}

/// Austin Appleby's `MurmurHash2`, 32-bit.
pub fn murmur_hash2(data: &[u8], seed: u32) -> u32 {
    const M: u32 = 0x5bd1_e995;
    const R: u32 = 24;

    let len = u32::try_from(data.len()).unwrap_or(u32::MAX);
    let mut h = seed ^ len;

    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let Ok(bytes) = <[u8; 4]>::try_from(chunk) else {
            continue;
        };
        let mut k = u32::from_le_bytes(bytes);
        k = k.wrapping_mul(M);
        k ^= k.wrapping_shr(R);
        k = k.wrapping_mul(M);
        h = h.wrapping_mul(M);
        h ^= k;
    }

    match *chunks.remainder() {
        [a, b, c] => {
            h ^= u32::from(c).wrapping_shl(16);
            h ^= u32::from(b).wrapping_shl(8);
            h ^= u32::from(a);
            h = h.wrapping_mul(M);
        }
        [a, b] => {
            h ^= u32::from(b).wrapping_shl(8);
            h ^= u32::from(a);
            h = h.wrapping_mul(M);
        }
        [a] => {
            h ^= u32::from(a);
            h = h.wrapping_mul(M);
        }
        _ => {}
    }

    h ^= h.wrapping_shr(13);
    h = h.wrapping_mul(M);
    h ^= h.wrapping_shr(15);
    h
}

// ---------------------------------------------------------------------------
// Default value functions (serde default requires named functions)
// ---------------------------------------------------------------------------

fn default_host() -> String {
    "0.0.0.0".to_owned()
}

const fn default_port() -> u16 {
    8000
}

const fn default_idle_timeout_seconds() -> u64 {
    300
}

const fn default_max_records() -> usize {
    500_000
}

const fn default_channel_capacity() -> usize {
    256
}

const fn default_send_timeout_ms() -> u64 {
    250
}

fn default_log_level() -> String {
    "info".to_owned()
}

const fn default_sensor_value() -> SensorValue {
    SensorValue::Int(0)
}
