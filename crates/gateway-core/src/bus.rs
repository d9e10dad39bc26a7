//! Session registry and event bus.
//!
//! Every browser push stream is a session with its own bounded channel and
//! its own set of topic subscriptions. Adapters publish batches; the bus
//! hands each batch to the recording engine, then fans it out to every
//! session subscribed to the batch's topic, trimmed to the sensors that
//! session asked for.
//!
//! Delivery to one session never waits on another: sends run concurrently
//! and a session whose channel stays full past the send timeout (or whose
//! receiver is gone) is evicted.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use futures::future::join_all;
use gateway_types::{Protocol, PushEvent, SensorBatch, SensorKey, SessionId, Topic};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::recording::RecordingEngine;

/// Errors returned by the event bus.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The session id is not registered (closed, evicted, or never opened).
    #[error("unknown session: {session_id}")]
    UnknownSession {
        /// The id that was looked up.
        session_id: SessionId,
    },
}

/// One session's interest in one topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Protocol of the subscribed object.
    pub protocol: Protocol,
    /// Sensors the session wants updates for.
    pub sensors: BTreeSet<SensorKey>,
}

#[derive(Debug)]
struct SessionEntry {
    tx: mpsc::Sender<PushEvent>,
    subscriptions: HashMap<Topic, Subscription>,
}

/// Outcome of a publish or broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Sessions the event was delivered to.
    pub delivered: usize,
    /// Sessions evicted because delivery failed.
    pub evicted: Vec<SessionId>,
}

type Delivery = (SessionId, mpsc::Sender<PushEvent>, PushEvent);

/// Registry of browser sessions and fan-out point for pushed events.
#[derive(Debug)]
pub struct EventBus {
    sessions: RwLock<HashMap<SessionId, SessionEntry>>,
    recorder: Arc<RecordingEngine>,
    channel_capacity: usize,
    send_timeout: Duration,
}

impl EventBus {
    /// Create a bus feeding `recorder`, with per-session channels sized by
    /// `config`.
    pub fn new(recorder: Arc<RecordingEngine>, config: &SessionConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            recorder,
            channel_capacity: config.channel_capacity.max(1),
            send_timeout: config.send_timeout(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<SessionId, SessionEntry>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<SessionId, SessionEntry>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// The recording engine tapped by [`Self::publish`].
    pub const fn recorder(&self) -> &Arc<RecordingEngine> {
        &self.recorder
    }

    /// Register a new session and return its id and the receiving end of
    /// its push channel.
    pub fn register_session(&self) -> (SessionId, mpsc::Receiver<PushEvent>) {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let session_id = SessionId::new();
        self.write().insert(
            session_id,
            SessionEntry {
                tx,
                subscriptions: HashMap::new(),
            },
        );
        info!(session_id = %session_id, "Session registered");
        (session_id, rx)
    }

    /// Remove a session and return the topics it was subscribed to.
    ///
    /// Closing an unknown session returns an empty list.
    pub fn close_session(&self, session_id: SessionId) -> Vec<(Topic, Protocol)> {
        let removed = self.write().remove(&session_id);
        removed.map_or_else(Vec::new, |entry| {
            info!(
                session_id = %session_id,
                topics = entry.subscriptions.len(),
                "Session closed"
            );
            entry
                .subscriptions
                .into_iter()
                .map(|(topic, sub)| (topic, sub.protocol))
                .collect()
        })
    }

    /// Replace the session's subscription for `topic`.
    ///
    /// Returns the number of sensors now tracked for the topic. An empty
    /// `sensors` set removes the subscription and returns 0.
    pub fn subscribe(
        &self,
        session_id: SessionId,
        topic: Topic,
        protocol: Protocol,
        sensors: BTreeSet<SensorKey>,
    ) -> Result<usize, BusError> {
        let mut sessions = self.write();
        let entry = sessions
            .get_mut(&session_id)
            .ok_or(BusError::UnknownSession { session_id })?;

        if sensors.is_empty() {
            entry.subscriptions.remove(&topic);
            debug!(session_id = %session_id, topic = %topic, "Subscription removed (empty set)");
            return Ok(0);
        }

        let count = sensors.len();
        debug!(session_id = %session_id, topic = %topic, sensors = count, "Subscribed");
        entry
            .subscriptions
            .insert(topic, Subscription { protocol, sensors });
        Ok(count)
    }

    /// Drop the session's subscription for `topic`. No-op if absent.
    pub fn unsubscribe(&self, session_id: SessionId, topic: &Topic) -> Result<(), BusError> {
        let mut sessions = self.write();
        let entry = sessions
            .get_mut(&session_id)
            .ok_or(BusError::UnknownSession { session_id })?;
        if entry.subscriptions.remove(topic).is_some() {
            debug!(session_id = %session_id, topic = %topic, "Unsubscribed");
        }
        Ok(())
    }

    /// The session's current subscription for `topic`, if any.
    pub fn subscription(&self, session_id: SessionId, topic: &Topic) -> Option<Subscription> {
        self.read()
            .get(&session_id)
            .and_then(|entry| entry.subscriptions.get(topic))
            .cloned()
    }

    /// Put back a subscription captured by [`Self::subscription`]. `None`
    /// removes whatever the session holds on `topic`.
    pub fn restore(
        &self,
        session_id: SessionId,
        topic: Topic,
        previous: Option<Subscription>,
    ) -> Result<(), BusError> {
        let mut sessions = self.write();
        let entry = sessions
            .get_mut(&session_id)
            .ok_or(BusError::UnknownSession { session_id })?;
        match previous {
            Some(sub) => {
                entry.subscriptions.insert(topic, sub);
            }
            None => {
                entry.subscriptions.remove(&topic);
            }
        }
        Ok(())
    }

    /// Union of the sensors every session wants on `topic`.
    pub fn sensors_for_topic(&self, topic: &Topic) -> BTreeSet<SensorKey> {
        self.read()
            .values()
            .filter_map(|entry| entry.subscriptions.get(topic))
            .flat_map(|sub| sub.sensors.iter().cloned())
            .collect()
    }

    /// Every topic at least one session is subscribed to.
    pub fn active_topics(&self) -> BTreeMap<Topic, Protocol> {
        let sessions = self.read();
        let mut topics = BTreeMap::new();
        for entry in sessions.values() {
            for (topic, sub) in &entry.subscriptions {
                topics.entry(topic.clone()).or_insert(sub.protocol);
            }
        }
        topics
    }

    /// Number of registered sessions.
    pub fn session_count(&self) -> usize {
        self.read().len()
    }

    /// Whether `session_id` is registered.
    pub fn is_registered(&self, session_id: SessionId) -> bool {
        self.read().contains_key(&session_id)
    }

    /// Record `batch` and deliver it to every subscribed session.
    ///
    /// Each session receives only the updates for sensors it subscribed to;
    /// sessions with no matching update receive nothing.
    pub async fn publish(&self, batch: SensorBatch) -> PublishReport {
        self.recorder.record_batch(&batch);

        let topic = batch.topic();
        let targets: Vec<Delivery> = {
            let sessions = self.read();
            sessions
                .iter()
                .filter_map(|(id, entry)| {
                    let sub = entry.subscriptions.get(&topic)?;
                    let updates: Vec<_> = batch
                        .updates
                        .iter()
                        .filter(|u| sub.sensors.iter().any(|key| u.key_matches(key)))
                        .cloned()
                        .collect();
                    if updates.is_empty() {
                        return None;
                    }
                    let scoped = SensorBatch::new(batch.protocol, topic.clone(), updates);
                    Some((*id, entry.tx.clone(), PushEvent::SensorBatch(scoped)))
                })
                .collect()
        };

        if targets.is_empty() {
            debug!(topic = %topic, updates = batch.updates.len(), "No subscribers for batch");
            return PublishReport::default();
        }
        self.deliver(targets).await
    }

    /// Deliver a non-topic event to every session.
    pub async fn broadcast(&self, event: PushEvent) -> PublishReport {
        let targets: Vec<Delivery> = self
            .read()
            .iter()
            .map(|(id, entry)| (*id, entry.tx.clone(), event.clone()))
            .collect();
        if targets.is_empty() {
            return PublishReport::default();
        }
        self.deliver(targets).await
    }

    /// Send directly to one session, evicting it on failure.
    pub async fn send_to(&self, session_id: SessionId, event: PushEvent) -> Result<(), BusError> {
        let tx = self
            .read()
            .get(&session_id)
            .map(|entry| entry.tx.clone())
            .ok_or(BusError::UnknownSession { session_id })?;
        let report = self.deliver(vec![(session_id, tx, event)]).await;
        if report.evicted.is_empty() {
            Ok(())
        } else {
            Err(BusError::UnknownSession { session_id })
        }
    }

    async fn deliver(&self, targets: Vec<Delivery>) -> PublishReport {
        let sends = targets.into_iter().map(|(id, tx, event)| async move {
            let ok = match tx.try_send(event) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Closed(_)) => false,
                Err(mpsc::error::TrySendError::Full(event)) => {
                    tx.send_timeout(event, self.send_timeout).await.is_ok()
                }
            };
            (id, tx, ok)
        });

        let mut report = PublishReport::default();
        for (id, tx, ok) in join_all(sends).await {
            if ok {
                report.delivered = report.delivered.saturating_add(1);
            } else {
                self.evict(id, &tx);
                report.evicted.push(id);
            }
        }
        report
    }

    /// Remove `session_id` if its channel is still `failed`.
    fn evict(&self, session_id: SessionId, failed: &mpsc::Sender<PushEvent>) {
        let mut sessions = self.write();
        let same = sessions
            .get(&session_id)
            .is_some_and(|entry| entry.tx.same_channel(failed));
        if same {
            sessions.remove(&session_id);
            warn!(session_id = %session_id, "Evicted session with unusable push channel");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;
    use gateway_types::{ControlStatus, SensorUpdate, SensorValue, ServerId};

    use super::*;

    fn bus_with(capacity: usize, timeout_ms: u64) -> EventBus {
        let config = SessionConfig {
            channel_capacity: capacity,
            send_timeout_ms: timeout_ms,
        };
        EventBus::new(Arc::new(RecordingEngine::new(0)), &config)
    }

    fn topic() -> Topic {
        Topic::new("srv", "SharedMemory")
    }

    fn keys(ids: &[i64]) -> BTreeSet<SensorKey> {
        ids.iter().map(|id| SensorKey::Id(*id)).collect()
    }

    fn batch(ids: &[i64]) -> SensorBatch {
        let updates = ids
            .iter()
            .map(|id| SensorUpdate {
                server_id: ServerId::from("srv"),
                object_name: String::from("SharedMemory"),
                sensor_id: *id,
                name: String::new(),
                value: SensorValue::Int(*id),
                timestamp: Utc::now(),
            })
            .collect();
        SensorBatch::new(Protocol::Ionc, topic(), updates)
    }

    fn ids_of(event: &PushEvent) -> Vec<i64> {
        match event {
            PushEvent::SensorBatch(b) => b.updates.iter().map(|u| u.sensor_id).collect(),
            _ => Vec::new(),
        }
    }

    #[tokio::test]
    async fn publish_filters_per_session() {
        let bus = bus_with(8, 50);
        let (a, mut rx_a) = bus.register_session();
        let (b, mut rx_b) = bus.register_session();
        bus.subscribe(a, topic(), Protocol::Ionc, keys(&[1, 2])).unwrap();
        bus.subscribe(b, topic(), Protocol::Ionc, keys(&[3])).unwrap();

        let report = bus.publish(batch(&[1, 2, 3])).await;
        assert_eq!(report.delivered, 2);
        assert_eq!(ids_of(&rx_a.recv().await.unwrap()), vec![1, 2]);
        assert_eq!(ids_of(&rx_b.recv().await.unwrap()), vec![3]);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_empty() {
        let bus = bus_with(8, 50);
        let _session = bus.register_session();
        assert_eq!(bus.publish(batch(&[1])).await, PublishReport::default());
    }

    #[tokio::test]
    async fn batches_arrive_in_publish_order() {
        let bus = bus_with(8, 50);
        let (a, mut rx) = bus.register_session();
        bus.subscribe(a, topic(), Protocol::Ionc, keys(&[1, 2, 3])).unwrap();
        bus.publish(batch(&[1])).await;
        bus.publish(batch(&[2])).await;
        bus.publish(batch(&[3])).await;
        for expected in 1..=3 {
            assert_eq!(ids_of(&rx.recv().await.unwrap()), vec![expected]);
        }
    }

    #[test]
    fn subscribe_replaces_and_empty_removes() {
        let bus = bus_with(8, 50);
        let (a, _rx) = bus.register_session();
        assert_eq!(bus.subscribe(a, topic(), Protocol::Ionc, keys(&[1, 2])).unwrap(), 2);
        assert_eq!(bus.subscribe(a, topic(), Protocol::Ionc, keys(&[5])).unwrap(), 1);
        assert_eq!(bus.sensors_for_topic(&topic()), keys(&[5]));

        assert_eq!(bus.subscribe(a, topic(), Protocol::Ionc, BTreeSet::new()).unwrap(), 0);
        assert!(bus.active_topics().is_empty());
    }

    #[test]
    fn restore_puts_back_or_removes() {
        let bus = bus_with(8, 50);
        let (a, _rx) = bus.register_session();
        bus.subscribe(a, topic(), Protocol::Ionc, keys(&[1, 2])).unwrap();
        let previous = bus.subscription(a, &topic());

        bus.subscribe(a, topic(), Protocol::Ionc, keys(&[9])).unwrap();
        bus.restore(a, topic(), previous).unwrap();
        assert_eq!(bus.sensors_for_topic(&topic()), keys(&[1, 2]));

        bus.restore(a, topic(), None).unwrap();
        assert!(bus.subscription(a, &topic()).is_none());
        assert!(bus.restore(SessionId::new(), topic(), None).is_err());
    }

    #[tokio::test]
    async fn publish_on_another_topic_reaches_nobody_else() {
        let bus = bus_with(8, 50);
        let other = Topic::new("remote", "MBMaster1");
        let (a, mut rx_a) = bus.register_session();
        let (b, mut rx_b) = bus.register_session();
        bus.subscribe(a, topic(), Protocol::Ionc, keys(&[1])).unwrap();
        bus.subscribe(b, other.clone(), Protocol::Modbus, keys(&[1])).unwrap();

        let update = SensorUpdate {
            server_id: ServerId::from("remote"),
            object_name: String::from("MBMaster1"),
            sensor_id: 1,
            name: String::new(),
            value: SensorValue::Int(1),
            timestamp: Utc::now(),
        };
        let report = bus
            .publish(SensorBatch::new(Protocol::Modbus, other, vec![update]))
            .await;
        assert_eq!(report.delivered, 1);
        assert_eq!(ids_of(&rx_b.recv().await.unwrap()), vec![1]);
        assert!(matches!(
            rx_a.try_recv(),
            Err(mpsc::error::TryRecvError::Empty)
        ));
    }

    #[test]
    fn unknown_session_is_an_error() {
        let bus = bus_with(8, 50);
        let result = bus.subscribe(SessionId::new(), topic(), Protocol::Ionc, keys(&[1]));
        assert!(matches!(result, Err(BusError::UnknownSession { .. })));
        assert!(bus.unsubscribe(SessionId::new(), &topic()).is_err());
    }

    #[test]
    fn sensors_for_topic_is_the_union() {
        let bus = bus_with(8, 50);
        let (a, _rx_a) = bus.register_session();
        let (b, _rx_b) = bus.register_session();
        bus.subscribe(a, topic(), Protocol::Ionc, keys(&[1, 2])).unwrap();
        bus.subscribe(b, topic(), Protocol::Ionc, keys(&[2, 3])).unwrap();
        assert_eq!(bus.sensors_for_topic(&topic()), keys(&[1, 2, 3]));

        bus.unsubscribe(a, &topic()).unwrap();
        assert_eq!(bus.sensors_for_topic(&topic()), keys(&[2, 3]));
    }

    #[test]
    fn close_session_returns_its_topics() {
        let bus = bus_with(8, 50);
        let (a, _rx) = bus.register_session();
        bus.subscribe(a, topic(), Protocol::Ionc, keys(&[1])).unwrap();
        assert!(bus.is_registered(a));

        assert_eq!(bus.close_session(a), vec![(topic(), Protocol::Ionc)]);
        assert!(!bus.is_registered(a));
        assert_eq!(bus.session_count(), 0);
        assert!(bus.close_session(a).is_empty());
    }

    #[tokio::test]
    async fn dropped_receiver_is_evicted_without_affecting_others() {
        let bus = bus_with(8, 50);
        let (dead, rx_dead) = bus.register_session();
        let (live, mut rx_live) = bus.register_session();
        bus.subscribe(dead, topic(), Protocol::Ionc, keys(&[1])).unwrap();
        bus.subscribe(live, topic(), Protocol::Ionc, keys(&[1])).unwrap();
        drop(rx_dead);

        let report = bus.publish(batch(&[1])).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.evicted, vec![dead]);
        assert!(!bus.is_registered(dead));
        assert_eq!(ids_of(&rx_live.recv().await.unwrap()), vec![1]);
    }

    #[tokio::test]
    async fn stalled_session_is_evicted_after_timeout() {
        let bus = bus_with(1, 10);
        let (slow, _rx_slow) = bus.register_session();
        let (fast, mut rx_fast) = bus.register_session();
        bus.subscribe(slow, topic(), Protocol::Ionc, keys(&[1])).unwrap();
        bus.subscribe(fast, topic(), Protocol::Ionc, keys(&[1])).unwrap();

        bus.publish(batch(&[1])).await;
        assert!(rx_fast.recv().await.is_some());

        let report = bus.publish(batch(&[1])).await;
        assert_eq!(report.evicted, vec![slow]);
        assert!(bus.is_registered(fast));
        assert!(rx_fast.recv().await.is_some());
    }

    #[tokio::test]
    async fn broadcast_reaches_every_session() {
        let bus = bus_with(8, 50);
        let (_a, mut rx_a) = bus.register_session();
        let (_b, mut rx_b) = bus.register_session();
        let event = PushEvent::ControlStatus(ControlStatus {
            has_controller: true,
            timeout_sec: 0,
            revision: 1,
        });

        let report = bus.broadcast(event.clone()).await;
        assert_eq!(report.delivered, 2);
        assert_eq!(rx_a.recv().await.unwrap(), event);
        assert_eq!(rx_b.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn publish_feeds_the_recorder() {
        let bus = bus_with(8, 50);
        bus.recorder().start(BTreeMap::new());
        bus.publish(batch(&[1, 2])).await;
        assert_eq!(bus.recorder().status().record_count, 2);
    }
}
