//! Core data structs for the gateway.
//!
//! Covers sensor updates and batches, recorded rows, upstream server
//! descriptors, and the status snapshots pushed to browsers.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{Protocol, SensorKey, SensorValue};
use crate::ids::ServerId;

// ---------------------------------------------------------------------------
// Topic
// ---------------------------------------------------------------------------

/// The routing key for sensor data: one object on one upstream server.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct Topic {
    /// Upstream server the object lives on.
    pub server_id: ServerId,
    /// Object name within that server.
    pub object_name: String,
}

impl Topic {
    /// Build a topic from its parts.
    pub fn new(server_id: impl Into<ServerId>, object_name: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            object_name: object_name.into(),
        }
    }
}

impl core::fmt::Display for Topic {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.server_id, self.object_name)
    }
}

// ---------------------------------------------------------------------------
// Updates and batches
// ---------------------------------------------------------------------------

/// A single observed change of one sensor. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct SensorUpdate {
    /// Upstream server that produced the value.
    pub server_id: ServerId,
    /// Object the sensor belongs to.
    pub object_name: String,
    /// Numeric sensor id (0 when the upstream only knows names).
    pub sensor_id: i64,
    /// Human-readable sensor name, empty when unknown.
    pub name: String,
    /// The new value.
    pub value: SensorValue,
    /// When the adapter observed the value.
    pub timestamp: DateTime<Utc>,
}

impl SensorUpdate {
    /// The topic this update is routed on.
    pub fn topic(&self) -> Topic {
        Topic::new(self.server_id.clone(), self.object_name.clone())
    }

    /// The name used for this sensor in recordings: the sensor name, or
    /// the numeric id when no name is known.
    pub fn variable_name(&self) -> String {
        if self.name.is_empty() {
            self.sensor_id.to_string()
        } else {
            self.name.clone()
        }
    }

    /// Whether a subscription key addresses this update's sensor.
    pub fn key_matches(&self, key: &SensorKey) -> bool {
        match key {
            SensorKey::Id(id) => *id == self.sensor_id,
            SensorKey::Name(name) => *name == self.name,
        }
    }
}

/// A group of updates for a single topic, produced by one adapter poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct SensorBatch {
    /// Protocol of the producing adapter; selects the push event name.
    pub protocol: Protocol,
    /// Upstream server of every update in the batch.
    pub server_id: ServerId,
    /// Object of every update in the batch.
    pub object_name: String,
    /// The updates, in observation order.
    pub updates: Vec<SensorUpdate>,
}

impl SensorBatch {
    /// Build a batch for one topic.
    pub fn new(protocol: Protocol, topic: Topic, updates: Vec<SensorUpdate>) -> Self {
        Self {
            protocol,
            server_id: topic.server_id,
            object_name: topic.object_name,
            updates,
        }
    }

    /// The topic this batch is routed on.
    pub fn topic(&self) -> Topic {
        Topic::new(self.server_id.clone(), self.object_name.clone())
    }

    /// Whether the batch carries no updates.
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Split a mixed list of updates into one batch per topic.
    ///
    /// Batches come back in topic order; updates keep their relative order
    /// within each topic.
    pub fn split_by_topic(protocol: Protocol, updates: Vec<SensorUpdate>) -> Vec<Self> {
        let mut grouped: BTreeMap<Topic, Vec<SensorUpdate>> = BTreeMap::new();
        for update in updates {
            grouped.entry(update.topic()).or_default().push(update);
        }
        grouped
            .into_iter()
            .map(|(topic, updates)| Self::new(protocol, topic, updates))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Recording
// ---------------------------------------------------------------------------

/// One row of a recording. Field names are the export column names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Record {
    /// When the value was observed (monotonic within a recording).
    pub timestamp: DateTime<Utc>,
    /// Upstream server id.
    pub server_id: ServerId,
    /// Object name.
    pub object_name: String,
    /// Sensor name, or the sensor id when no name is known.
    pub variable_name: String,
    /// The recorded value.
    pub value: SensorValue,
}

impl Record {
    /// Build a record from an update, stamped with `timestamp`.
    pub fn from_update(update: &SensorUpdate, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            server_id: update.server_id.clone(),
            object_name: update.object_name.clone(),
            variable_name: update.variable_name(),
            value: update.value.clone(),
        }
    }
}

/// Snapshot of the recording engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct RecordingStatus {
    /// Whether updates are currently being captured.
    pub is_recording: bool,
    /// Number of records in the buffer.
    pub record_count: u64,
    /// Approximate in-memory size of the buffer.
    pub size_bytes: u64,
    /// Records discarded because the buffer was full.
    pub dropped_count: u64,
    /// Buffer capacity; 0 means unbounded.
    pub max_records: u64,
    /// When the current or last recording started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the last recording stopped.
    pub stopped_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Servers
// ---------------------------------------------------------------------------

/// A configured upstream automation server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct Server {
    /// Stable server id.
    pub id: ServerId,
    /// Base URL of the server's HTTP interface.
    pub url: String,
    /// Display name.
    pub name: String,
    /// Whether the last health check succeeded.
    pub connected: bool,
    /// Error reported by the last failed health check.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub last_error: Option<String>,
}

// ---------------------------------------------------------------------------
// Control
// ---------------------------------------------------------------------------

/// Control state as broadcast to every session. Never carries the token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct ControlStatus {
    /// Whether someone currently holds control.
    pub has_controller: bool,
    /// Idle timeout in seconds; 0 when disabled.
    pub timeout_sec: u64,
    /// Increases on every broadcast so clients can drop stale updates.
    pub revision: u64,
}

/// Control state as seen by one caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct ControlView {
    /// Whether the caller's token is the controller token.
    pub is_controller: bool,
    /// Whether someone currently holds control.
    pub has_controller: bool,
    /// Idle timeout in seconds; 0 when disabled.
    pub timeout_sec: u64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn update(server: &str, object: &str, id: i64, name: &str) -> SensorUpdate {
        SensorUpdate {
            server_id: ServerId::from(server),
            object_name: object.to_owned(),
            sensor_id: id,
            name: name.to_owned(),
            value: SensorValue::Int(1),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn variable_name_falls_back_to_id() {
        assert_eq!(update("s", "o", 12, "").variable_name(), "12");
        assert_eq!(update("s", "o", 12, "AI12").variable_name(), "AI12");
    }

    #[test]
    fn keys_match_by_id_or_name() {
        let u = update("s", "o", 5, "DI5");
        assert!(u.key_matches(&SensorKey::Id(5)));
        assert!(u.key_matches(&SensorKey::Name(String::from("DI5"))));
        assert!(!u.key_matches(&SensorKey::Id(6)));
    }

    #[test]
    fn split_groups_updates_per_topic_in_order() {
        let updates = vec![
            update("a", "obj1", 1, ""),
            update("b", "obj1", 2, ""),
            update("a", "obj1", 3, ""),
            update("a", "obj2", 4, ""),
        ];
        let batches = SensorBatch::split_by_topic(Protocol::Ionc, updates);
        assert_eq!(batches.len(), 3);

        let first = batches.first().unwrap();
        assert_eq!(first.topic(), Topic::new("a", "obj1"));
        let ids: Vec<i64> = first.updates.iter().map(|u| u.sensor_id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn record_serializes_with_snake_case_columns() {
        let record = Record::from_update(&update("s1", "obj", 7, "T1"), Utc::now());
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["variable_name"], "T1");
        assert_eq!(json["server_id"], "s1");
        assert_eq!(json["value"], 1);
    }

    #[test]
    fn control_status_uses_camel_case() {
        let status = ControlStatus {
            has_controller: true,
            timeout_sec: 60,
            revision: 3,
        };
        let json = serde_json::to_value(status).unwrap();
        assert_eq!(json["hasController"], true);
        assert_eq!(json["timeoutSec"], 60);
        assert!(json.get("token").is_none());
    }
}
