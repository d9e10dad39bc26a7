//! The seam between the gateway and protocol-specific pollers.
//!
//! An [`Adapter`] serves the objects of one upstream server for one
//! [`Protocol`]. The gateway tells it which sensors are wanted; the adapter
//! pushes [`SensorBatch`]es back through a [`Publisher`].

pub mod loopback;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use gateway_types::{Protocol, SensorBatch, SensorKey, SensorValue};

use crate::bus::{EventBus, PublishReport};

pub use loopback::LoopbackAdapter;

/// Errors reported by adapters.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// The upstream server could not be reached.
    #[error("upstream unavailable: {message}")]
    Unavailable {
        /// Transport-level detail.
        message: String,
    },

    /// The object does not exist on the upstream server.
    #[error("unknown object: {object}")]
    UnknownObject {
        /// The requested object name.
        object: String,
    },

    /// The sensor does not exist on the object.
    #[error("unknown sensor {sensor} on {object}")]
    UnknownSensor {
        /// The object name.
        object: String,
        /// The requested sensor key.
        sensor: SensorKey,
    },

    /// The upstream server refused the request.
    #[error("rejected by upstream: {message}")]
    Rejected {
        /// Reason given by the upstream.
        message: String,
    },
}

/// A protocol-specific source of sensor batches for one upstream server.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Protocol served by this adapter.
    fn protocol(&self) -> Protocol;

    /// Replace the set of sensors watched on `object`.
    async fn subscribe(&self, object: &str, keys: &BTreeSet<SensorKey>)
    -> Result<(), AdapterError>;

    /// Stop watching `object` entirely.
    async fn unsubscribe(&self, object: &str) -> Result<(), AdapterError>;

    /// Publish the current value of every watched sensor on `object`,
    /// changed or not. The batch must reach the publisher before this
    /// returns.
    async fn force_emit_all(&self, object: &str) -> Result<(), AdapterError>;

    /// Write a value to one sensor.
    async fn set_value(
        &self,
        object: &str,
        key: &SensorKey,
        value: SensorValue,
    ) -> Result<(), AdapterError>;
}

/// Handle adapters use to push batches into the event bus.
#[derive(Clone)]
pub struct Publisher {
    bus: Arc<EventBus>,
}

impl Publisher {
    /// Create a publisher feeding `bus`.
    pub const fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }

    /// Publish one batch. Empty batches are dropped.
    pub async fn publish(&self, batch: SensorBatch) -> PublishReport {
        if batch.is_empty() {
            return PublishReport::default();
        }
        self.bus.publish(batch).await
    }
}

impl core::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Publisher")
            .field("sessions", &self.bus.session_count())
            .finish()
    }
}
