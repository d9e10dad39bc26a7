//! Events pushed to browser sessions over the SSE stream.
//!
//! Each variant maps to one SSE event name. Sensor batches are keyed by
//! protocol so the browser can hand them to the matching renderer; routing
//! inside the gateway never looks at the event name.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::ids::SessionId;
use crate::structs::{ControlStatus, ControlView, RecordingStatus, SensorBatch};

/// First event on every stream: the session id plus current state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct ConnectedEvent {
    /// Id the browser passes back on subscribe/unsubscribe.
    pub session_id: SessionId,
    /// Control state (a fresh session is never the controller).
    pub control: ControlView,
    /// Recording state.
    pub recording: RecordingStatus,
}

/// Anything the gateway can push to a session.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    /// Session handshake.
    Connected(ConnectedEvent),
    /// Updates for one subscribed topic.
    SensorBatch(SensorBatch),
    /// Control ownership changed.
    ControlStatus(ControlStatus),
    /// Recording started, stopped or was cleared.
    RecordingStatus(RecordingStatus),
}

impl PushEvent {
    /// The SSE event name for this event.
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Connected(_) => "connected",
            Self::SensorBatch(batch) => batch.protocol.batch_event_name(),
            Self::ControlStatus(_) => "control_status",
            Self::RecordingStatus(_) => "recording_status",
        }
    }

    /// Serialize the payload for the SSE `data:` field.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Connected(e) => serde_json::to_string(e),
            Self::SensorBatch(b) => serde_json::to_string(b),
            Self::ControlStatus(s) => serde_json::to_string(s),
            Self::RecordingStatus(s) => serde_json::to_string(s),
        }
    }
}
