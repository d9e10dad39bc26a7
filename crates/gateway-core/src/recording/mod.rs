//! The recording engine.
//!
//! While recording, every batch published on the event bus is appended to a
//! bounded ring buffer, one [`Record`] per update. The buffer survives
//! `stop` and is only emptied by `start` or `clear`, so it can be exported
//! at any time.
//!
//! The engine also remembers which topics it is recording, and which
//! sensors on each. The gateway keeps adapters watching those sensors until
//! `stop`, whatever browsers subscribe or unsubscribe in the meantime.

pub mod export;

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use gateway_types::{Protocol, Record, RecordingStatus, SensorBatch, SensorKey, Topic};
use tracing::{debug, info};

pub use export::{ExportFilter, JsonExport};

/// A topic held by the recorder and the sensors captured on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedTopic {
    /// Protocol of the recorded object.
    pub protocol: Protocol,
    /// Sensors the adapter must keep emitting while recording.
    pub sensors: BTreeSet<SensorKey>,
}

/// Mutable recording state, guarded by one mutex.
#[derive(Debug, Default)]
struct RecordingState {
    is_recording: bool,
    records: VecDeque<Record>,
    size_bytes: u64,
    dropped: u64,
    last_timestamp: Option<DateTime<Utc>>,
    tracked: BTreeMap<Topic, RecordedTopic>,
    started_at: Option<DateTime<Utc>>,
    stopped_at: Option<DateTime<Utc>>,
}

impl RecordingState {
    fn reset_buffer(&mut self) {
        self.records.clear();
        self.size_bytes = 0;
        self.dropped = 0;
        self.last_timestamp = None;
    }
}

/// Captures published sensor updates into a bounded, time-ordered buffer.
#[derive(Debug)]
pub struct RecordingEngine {
    state: Mutex<RecordingState>,
    max_records: usize,
}

impl RecordingEngine {
    /// Create an idle engine holding at most `max_records` records
    /// (0 means unbounded).
    pub fn new(max_records: usize) -> Self {
        Self {
            state: Mutex::new(RecordingState::default()),
            max_records,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RecordingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Begin recording `topics`. Clears the buffer.
    ///
    /// Returns `false` without touching anything when already recording.
    pub fn start(&self, topics: BTreeMap<Topic, RecordedTopic>) -> bool {
        let mut state = self.lock();
        if state.is_recording {
            return false;
        }
        state.reset_buffer();
        state.is_recording = true;
        state.started_at = Some(Utc::now());
        state.stopped_at = None;
        info!(topics = topics.len(), "Recording started");
        state.tracked = topics;
        true
    }

    /// Stop recording and release the tracked topics.
    ///
    /// Returns the released topics, or `None` when not recording.
    pub fn stop(&self) -> Option<BTreeMap<Topic, RecordedTopic>> {
        let mut state = self.lock();
        if !state.is_recording {
            return None;
        }
        state.is_recording = false;
        state.stopped_at = Some(Utc::now());
        info!(records = state.records.len(), "Recording stopped");
        Some(std::mem::take(&mut state.tracked))
    }

    /// Empty the buffer. Recording, if active, continues.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.reset_buffer();
        debug!("Recording buffer cleared");
    }

    /// Whether updates are currently being captured.
    pub fn is_recording(&self) -> bool {
        self.lock().is_recording
    }

    /// Widen the recorded set with `sensors` on `topic`. Ignored when not
    /// recording.
    ///
    /// Returns `true` if anything was added. Sensors are never removed
    /// before `stop`.
    pub fn track(&self, topic: Topic, protocol: Protocol, sensors: &BTreeSet<SensorKey>) -> bool {
        let mut state = self.lock();
        if !state.is_recording || sensors.is_empty() {
            return false;
        }
        let recorded = state.tracked.entry(topic).or_insert_with(|| RecordedTopic {
            protocol,
            sensors: BTreeSet::new(),
        });
        let before = recorded.sensors.len();
        recorded.sensors.extend(sensors.iter().cloned());
        recorded.sensors.len() > before
    }

    /// Whether the recorder is holding `topic`.
    pub fn is_tracking(&self, topic: &Topic) -> bool {
        self.lock().tracked.contains_key(topic)
    }

    /// Sensors the recorder holds on `topic`, or `None` if it holds none.
    pub fn tracked_sensors(&self, topic: &Topic) -> Option<BTreeSet<SensorKey>> {
        self.lock()
            .tracked
            .get(topic)
            .map(|recorded| recorded.sensors.clone())
    }

    /// The topics currently being recorded.
    pub fn tracked_topics(&self) -> BTreeMap<Topic, RecordedTopic> {
        self.lock().tracked.clone()
    }

    /// Append one record per update in `batch`. No-op when idle.
    ///
    /// Timestamps never go backwards: an update older than the previous
    /// record is stamped with that record's time. Returns the number of
    /// records appended.
    pub fn record_batch(&self, batch: &SensorBatch) -> usize {
        let mut state = self.lock();
        if !state.is_recording {
            return 0;
        }
        for update in &batch.updates {
            let timestamp = match state.last_timestamp {
                Some(last) if update.timestamp < last => last,
                _ => update.timestamp,
            };
            state.last_timestamp = Some(timestamp);

            let record = Record::from_update(update, timestamp);
            state.size_bytes = state
                .size_bytes
                .saturating_add(export::record_size(&record));
            state.records.push_back(record);

            let overflow = if self.max_records > 0 && state.records.len() > self.max_records {
                state.records.pop_front()
            } else {
                None
            };
            if let Some(oldest) = overflow {
                state.size_bytes = state
                    .size_bytes
                    .saturating_sub(export::record_size(&oldest));
                state.dropped = state.dropped.saturating_add(1);
            }
        }
        batch.updates.len()
    }

    /// Current status snapshot.
    pub fn status(&self) -> RecordingStatus {
        let state = self.lock();
        RecordingStatus {
            is_recording: state.is_recording,
            record_count: u64::try_from(state.records.len()).unwrap_or(u64::MAX),
            size_bytes: state.size_bytes,
            dropped_count: state.dropped,
            max_records: u64::try_from(self.max_records).unwrap_or(u64::MAX),
            started_at: state.started_at,
            stopped_at: state.stopped_at,
        }
    }

    /// Records passing `filter`, oldest first.
    pub fn records(&self, filter: &ExportFilter) -> Vec<Record> {
        self.lock()
            .records
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect()
    }

    /// JSON export document for records passing `filter`.
    pub fn export_json(&self, filter: &ExportFilter) -> JsonExport {
        JsonExport::new(self.records(filter))
    }

    /// CSV export for records passing `filter`.
    pub fn export_csv(&self, filter: &ExportFilter) -> String {
        export::encode_csv(&self.records(filter))
    }
}
