//! Enumeration types shared by the gateway, its adapters, and the browser.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ---------------------------------------------------------------------------
// Protocol
// ---------------------------------------------------------------------------

/// The upstream protocol family an object is served through.
///
/// Each protocol has its own adapter and its own push event name, so the
/// browser can route a batch to the renderer for that object type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "bindings/")]
pub enum Protocol {
    /// Input/output node controller sensors (shared memory).
    Ionc,
    /// Modbus master/slave registers.
    Modbus,
    /// OPC-UA server and exchange variables.
    Opcua,
    /// Sensors streamed by a `UWebSocketGate`.
    Uwsgate,
}

impl Protocol {
    /// Every protocol, in declaration order.
    pub const ALL: [Self; 4] = [Self::Ionc, Self::Modbus, Self::Opcua, Self::Uwsgate];

    /// Short lowercase name used in URLs and configuration.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ionc => "ionc",
            Self::Modbus => "modbus",
            Self::Opcua => "opcua",
            Self::Uwsgate => "uwsgate",
        }
    }

    /// Name of the push event carrying a batch for this protocol.
    pub const fn batch_event_name(self) -> &'static str {
        match self {
            Self::Ionc => "ionc_sensor_batch",
            Self::Modbus => "modbus_register_batch",
            Self::Opcua => "opcua_sensor_batch",
            Self::Uwsgate => "uwsgate_sensor_batch",
        }
    }
}

impl core::fmt::Display for Protocol {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A protocol name that does not map to any known [`Protocol`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown protocol: {0}")]
pub struct UnknownProtocol(pub String);

impl FromStr for Protocol {
    type Err = UnknownProtocol;

    /// Accepts the canonical names plus the extension names used in object
    /// URLs (`mbmaster`, `mbslave`, `opcuaserver`, `opcuaexchange`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ionc" => Ok(Self::Ionc),
            "modbus" | "mbmaster" | "mbslave" => Ok(Self::Modbus),
            "opcua" | "opcuaserver" | "opcuaexchange" => Ok(Self::Opcua),
            "uwsgate" => Ok(Self::Uwsgate),
            _ => Err(UnknownProtocol(s.to_owned())),
        }
    }
}

// ---------------------------------------------------------------------------
// Sensor values and keys
// ---------------------------------------------------------------------------

/// The value carried by a sensor, register, or variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(untagged)]
#[ts(export, export_to = "bindings/")]
pub enum SensorValue {
    /// Discrete on/off state.
    Bool(bool),
    /// Integer value (analog sensors and registers).
    Int(i64),
    /// Floating-point value (OPC-UA variables).
    Float(f64),
    /// Anything else, kept verbatim.
    Text(String),
}

impl SensorValue {
    /// Numeric view of the value, if it has one.
    ///
    /// Booleans map to `0.0`/`1.0`; text parses as a float when possible.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl core::fmt::Display for SensorValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for SensorValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for SensorValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for SensorValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for SensorValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

/// How a subscription or write addresses a sensor.
///
/// IONC, Modbus and OPC-UA objects address sensors by numeric id; a
/// `UWebSocketGate` addresses them by name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(untagged)]
#[ts(export, export_to = "bindings/")]
pub enum SensorKey {
    /// Numeric sensor id.
    Id(i64),
    /// Sensor name.
    Name(String),
}

impl core::fmt::Display for SensorKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}
