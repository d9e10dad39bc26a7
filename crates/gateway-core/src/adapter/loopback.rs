//! In-memory adapter.
//!
//! Holds sensor values configured in YAML and behaves like a well-mannered
//! upstream: newly watched sensors are emitted once, writes are echoed back
//! as updates, and force-emit publishes every watched value.

use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use gateway_types::{Protocol, SensorBatch, SensorKey, SensorUpdate, SensorValue, ServerId, Topic};
use tracing::debug;

use super::{Adapter, AdapterError, Publisher};
use crate::config::LoopbackObjectConfig;

#[derive(Debug, Clone)]
struct LoopbackSensor {
    id: i64,
    name: String,
    value: SensorValue,
}

impl LoopbackSensor {
    fn addressed_by(&self, key: &SensorKey) -> bool {
        match key {
            SensorKey::Id(id) => *id == self.id,
            SensorKey::Name(name) => *name == self.name,
        }
    }

    fn watched_by(&self, keys: &BTreeSet<SensorKey>) -> bool {
        keys.iter().any(|key| self.addressed_by(key))
    }
}

#[derive(Debug, Default)]
struct LoopbackObject {
    sensors: Vec<LoopbackSensor>,
    watched: BTreeSet<SensorKey>,
}

/// Adapter serving configured objects from memory.
#[derive(Debug)]
pub struct LoopbackAdapter {
    server_id: ServerId,
    protocol: Protocol,
    objects: RwLock<HashMap<String, LoopbackObject>>,
    publisher: Publisher,
}

impl LoopbackAdapter {
    /// Build an adapter for the objects of `protocol` among `objects`.
    pub fn new(
        server_id: ServerId,
        protocol: Protocol,
        objects: &[LoopbackObjectConfig],
        publisher: Publisher,
    ) -> Self {
        let objects = objects
            .iter()
            .filter(|obj| obj.protocol == protocol)
            .map(|obj| {
                let sensors = obj
                    .sensors
                    .iter()
                    .map(|s| LoopbackSensor {
                        id: s.resolved_id(),
                        name: s.name.clone(),
                        value: s.value.clone(),
                    })
                    .collect();
                (
                    obj.name.clone(),
                    LoopbackObject {
                        sensors,
                        watched: BTreeSet::new(),
                    },
                )
            })
            .collect();
        Self {
            server_id,
            protocol,
            objects: RwLock::new(objects),
            publisher,
        }
    }

    /// Names of the objects served, sorted.
    pub fn object_names(&self) -> Vec<String> {
        let objects = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = objects.keys().cloned().collect();
        names.sort();
        names
    }

    /// Current value of one sensor.
    pub fn value(&self, object: &str, key: &SensorKey) -> Option<SensorValue> {
        let objects = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        objects
            .get(object)?
            .sensors
            .iter()
            .find(|s| s.addressed_by(key))
            .map(|s| s.value.clone())
    }

    /// Keys currently watched on `object`.
    pub fn watched(&self, object: &str) -> BTreeSet<SensorKey> {
        let objects = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        objects
            .get(object)
            .map(|o| o.watched.clone())
            .unwrap_or_default()
    }

    fn batch<'a>(&self, object: &str, sensors: impl Iterator<Item = &'a LoopbackSensor>) -> SensorBatch {
        let now = Utc::now();
        let updates = sensors
            .map(|s| SensorUpdate {
                server_id: self.server_id.clone(),
                object_name: object.to_owned(),
                sensor_id: s.id,
                name: s.name.clone(),
                value: s.value.clone(),
                timestamp: now,
            })
            .collect();
        SensorBatch::new(
            self.protocol,
            Topic::new(self.server_id.clone(), object),
            updates,
        )
    }

    fn unknown_object(object: &str) -> AdapterError {
        AdapterError::UnknownObject {
            object: object.to_owned(),
        }
    }
}

#[async_trait]
impl Adapter for LoopbackAdapter {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    async fn subscribe(
        &self,
        object: &str,
        keys: &BTreeSet<SensorKey>,
    ) -> Result<(), AdapterError> {
        let batch = {
            let mut objects = self.objects.write().unwrap_or_else(PoisonError::into_inner);
            let entry = objects
                .get_mut(object)
                .ok_or_else(|| Self::unknown_object(object))?;
            let previous = std::mem::replace(&mut entry.watched, keys.clone());
            let fresh = entry
                .sensors
                .iter()
                .filter(|s| s.watched_by(keys) && !s.watched_by(&previous));
            self.batch(object, fresh)
        };
        debug!(object, sensors = keys.len(), "Loopback subscription updated");
        self.publisher.publish(batch).await;
        Ok(())
    }

    async fn unsubscribe(&self, object: &str) -> Result<(), AdapterError> {
        let mut objects = self.objects.write().unwrap_or_else(PoisonError::into_inner);
        let entry = objects
            .get_mut(object)
            .ok_or_else(|| Self::unknown_object(object))?;
        entry.watched.clear();
        debug!(object, "Loopback subscription dropped");
        Ok(())
    }

    async fn force_emit_all(&self, object: &str) -> Result<(), AdapterError> {
        let batch = {
            let objects = self.objects.read().unwrap_or_else(PoisonError::into_inner);
            let entry = objects
                .get(object)
                .ok_or_else(|| Self::unknown_object(object))?;
            self.batch(
                object,
                entry.sensors.iter().filter(|s| s.watched_by(&entry.watched)),
            )
        };
        self.publisher.publish(batch).await;
        Ok(())
    }

    async fn set_value(
        &self,
        object: &str,
        key: &SensorKey,
        value: SensorValue,
    ) -> Result<(), AdapterError> {
        let batch = {
            let mut objects = self.objects.write().unwrap_or_else(PoisonError::into_inner);
            let entry = objects
                .get_mut(object)
                .ok_or_else(|| Self::unknown_object(object))?;
            let watched = &entry.watched;
            let sensor = entry
                .sensors
                .iter_mut()
                .find(|s| s.addressed_by(key))
                .ok_or_else(|| AdapterError::UnknownSensor {
                    object: object.to_owned(),
                    sensor: key.clone(),
                })?;
            sensor.value = value;
            let echoed = sensor.watched_by(watched).then(|| sensor.clone());
            self.batch(object, echoed.iter())
        };
        debug!(object, sensor = %key, "Loopback value written");
        self.publisher.publish(batch).await;
        Ok(())
    }
}
