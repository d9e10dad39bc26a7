//! The gateway facade.
//!
//! Owns the event bus, control arbiter, recording engine, server registry
//! and adapter table, and keeps adapters watching exactly the sensors that
//! sessions or the recorder still need.
//!
//! Every change to a topic's interest (subscribe, unsubscribe, session
//! cleanup, recording start and stop) runs under that topic's async lock,
//! from the bus update through the adapter call. The adapter therefore
//! always ends up with the union computed last.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use gateway_types::{
    ConnectedEvent, Protocol, PushEvent, RecordingStatus, SensorKey, SensorValue, ServerId,
    SessionId, Topic,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::adapter::{Adapter, LoopbackAdapter, Publisher};
use crate::bus::EventBus;
use crate::config::{GatewayConfig, ServerConfig};
use crate::control::ControlArbiter;
use crate::error::GatewayError;
use crate::recording::{RecordedTopic, RecordingEngine};
use crate::servers::ServerRegistry;

type AdapterTable = HashMap<(ServerId, Protocol), Arc<dyn Adapter>>;
type TopicLocks = HashMap<Topic, Arc<tokio::sync::Mutex<()>>>;

/// A freshly opened push session.
#[derive(Debug)]
pub struct OpenedSession {
    /// The new session's id.
    pub session_id: SessionId,
    /// Events for the session, in delivery order.
    pub events: mpsc::Receiver<PushEvent>,
    /// Handshake to send before anything from `events`.
    pub connected: ConnectedEvent,
}

/// Wires bus, arbiter, recorder, servers and adapters together.
pub struct Gateway {
    bus: Arc<EventBus>,
    control: Arc<ControlArbiter>,
    recorder: Arc<RecordingEngine>,
    servers: Arc<ServerRegistry>,
    adapters: RwLock<AdapterTable>,
    topic_locks: Mutex<TopicLocks>,
}

impl Gateway {
    /// Build a gateway from configuration. No adapters are registered yet.
    pub fn new(config: &GatewayConfig) -> Self {
        let recorder = Arc::new(RecordingEngine::new(config.recording.max_records));
        let bus = Arc::new(EventBus::new(Arc::clone(&recorder), &config.sessions));
        let control = Arc::new(ControlArbiter::new(&config.control, Arc::clone(&bus)));
        let servers = Arc::new(ServerRegistry::from_config(&config.servers));
        Self {
            bus,
            control,
            recorder,
            servers,
            adapters: RwLock::new(HashMap::new()),
            topic_locks: Mutex::new(HashMap::new()),
        }
    }

    /// The event bus.
    pub const fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// The control arbiter.
    pub const fn control(&self) -> &Arc<ControlArbiter> {
        &self.control
    }

    /// The recording engine.
    pub const fn recorder(&self) -> &Arc<RecordingEngine> {
        &self.recorder
    }

    /// The server registry.
    pub const fn servers(&self) -> &Arc<ServerRegistry> {
        &self.servers
    }

    /// A publisher for adapters to push batches through.
    pub fn publisher(&self) -> Publisher {
        Publisher::new(Arc::clone(&self.bus))
    }

    /// Register the adapter serving `server_id` for its protocol, replacing
    /// any previous one.
    pub fn register_adapter(&self, server_id: ServerId, adapter: Arc<dyn Adapter>) {
        let protocol = adapter.protocol();
        info!(server_id = %server_id, protocol = %protocol, "Adapter registered");
        self.adapters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((server_id, protocol), adapter);
    }

    /// Register a [`LoopbackAdapter`] for every protocol used by a
    /// server's `loopback` objects, and mark those servers connected.
    ///
    /// Returns the number of adapters registered.
    pub fn register_loopback(&self, servers: &[ServerConfig]) -> usize {
        let mut registered = 0_usize;
        for server in servers {
            let protocols: BTreeSet<Protocol> =
                server.loopback.iter().map(|object| object.protocol).collect();
            if protocols.is_empty() {
                continue;
            }
            let server_id = server.resolved_id();
            for protocol in protocols {
                let adapter = LoopbackAdapter::new(
                    server_id.clone(),
                    protocol,
                    &server.loopback,
                    self.publisher(),
                );
                self.register_adapter(server_id.clone(), Arc::new(adapter));
                registered = registered.saturating_add(1);
            }
            self.servers.set_connected(&server_id, true, None);
        }
        registered
    }

    fn adapter(
        &self,
        server_id: &ServerId,
        protocol: Protocol,
    ) -> Result<Arc<dyn Adapter>, GatewayError> {
        self.adapters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(server_id.clone(), protocol))
            .cloned()
            .ok_or_else(|| GatewayError::NoAdapter {
                server_id: server_id.clone(),
                protocol,
            })
    }

    fn topic_lock(&self, topic: &Topic) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .topic_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(topic.clone()).or_default())
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    /// Register a push session.
    pub fn open_session(&self) -> OpenedSession {
        let (session_id, events) = self.bus.register_session();
        OpenedSession {
            session_id,
            events,
            connected: ConnectedEvent {
                session_id,
                control: self.control.status(None),
                recording: self.recorder.status(),
            },
        }
    }

    /// Unregister a session and, in the background, release adapter
    /// subscriptions nobody needs any more.
    ///
    /// Safe to call from `Drop`; without a Tokio runtime the adapter
    /// cleanup is skipped.
    pub fn close_session(self: &Arc<Self>, session_id: SessionId) {
        let topics = self.bus.close_session(session_id);
        if topics.is_empty() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let gateway = Arc::clone(self);
                handle.spawn(async move {
                    gateway.release_topics(topics).await;
                });
            }
            Err(_) => debug!(session_id = %session_id, "No runtime; skipping adapter cleanup"),
        }
    }

    /// Reconcile adapter subscriptions for each of `topics`.
    pub async fn release_topics(&self, topics: Vec<(Topic, Protocol)>) {
        for (topic, protocol) in topics {
            let lock = self.topic_lock(&topic);
            let _held = lock.lock().await;
            if let Err(e) = self.reconcile(&topic, protocol).await {
                warn!(topic = %topic, error = %e, "Adapter reconcile failed");
            }
        }
    }

    /// Point the adapter at the union of sensors sessions and the recorder
    /// want on `topic`. The caller holds the topic lock.
    ///
    /// With no remaining interest the adapter is unsubscribed.
    async fn reconcile(&self, topic: &Topic, protocol: Protocol) -> Result<(), GatewayError> {
        let adapter = self.adapter(&topic.server_id, protocol)?;
        let recorded = self.recorder.tracked_sensors(topic);
        let mut union = self.bus.sensors_for_topic(topic);
        if let Some(sensors) = &recorded {
            union.extend(sensors.iter().cloned());
        }
        if !union.is_empty() {
            adapter.subscribe(&topic.object_name, &union).await?;
        } else if recorded.is_none() {
            adapter.unsubscribe(&topic.object_name).await?;
            debug!(topic = %topic, "Adapter unsubscribed; no remaining interest");
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Subscriptions and writes
    // -----------------------------------------------------------------------

    /// Subscribe a session to `keys` on `topic`.
    ///
    /// Returns the number of sensors the session now tracks there. If the
    /// adapter refuses, the session's previous subscription is put back and
    /// the adapter is pointed at the restored union.
    pub async fn subscribe(
        &self,
        session_id: SessionId,
        topic: Topic,
        protocol: Protocol,
        keys: BTreeSet<SensorKey>,
    ) -> Result<usize, GatewayError> {
        self.adapter(&topic.server_id, protocol)?;
        let lock = self.topic_lock(&topic);
        let _held = lock.lock().await;

        let previous = self.bus.subscription(session_id, &topic);
        let count = self
            .bus
            .subscribe(session_id, topic.clone(), protocol, keys.clone())?;

        if let Err(e) = self.reconcile(&topic, protocol).await {
            self.bus.restore(session_id, topic.clone(), previous)?;
            if let Err(restore) = self.reconcile(&topic, protocol).await {
                warn!(topic = %topic, error = %restore, "Adapter restore failed");
            }
            return Err(e);
        }
        if self.recorder.track(topic.clone(), protocol, &keys) {
            debug!(topic = %topic, "Sensors added to recording");
        }
        Ok(count)
    }

    /// Drop a session's subscription on `topic`.
    pub async fn unsubscribe(
        &self,
        session_id: SessionId,
        topic: Topic,
        protocol: Protocol,
    ) -> Result<(), GatewayError> {
        let lock = self.topic_lock(&topic);
        let _held = lock.lock().await;
        self.bus.unsubscribe(session_id, &topic)?;
        self.reconcile(&topic, protocol).await
    }

    /// Write a sensor value on behalf of the holder of `token`.
    ///
    /// Authorization happens first; a refused write never reaches the
    /// adapter.
    pub async fn set_value(
        &self,
        token: Option<&str>,
        topic: &Topic,
        protocol: Protocol,
        key: &SensorKey,
        value: SensorValue,
    ) -> Result<(), GatewayError> {
        self.control.authorize(token)?;
        let adapter = self.adapter(&topic.server_id, protocol)?;
        adapter.set_value(&topic.object_name, key, value).await?;
        info!(topic = %topic, sensor = %key, "Value written");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Recording
    // -----------------------------------------------------------------------

    /// Start recording every currently subscribed topic and capture a
    /// baseline of their current values. No-op when already recording.
    ///
    /// The recorder holds the sensors subscribed at this point until
    /// `stop`, even if every session later narrows or leaves.
    pub async fn start_recording(&self) -> RecordingStatus {
        let topics = self
            .bus
            .active_topics()
            .into_iter()
            .map(|(topic, protocol)| {
                let sensors = self.bus.sensors_for_topic(&topic);
                (topic, RecordedTopic { protocol, sensors })
            })
            .collect();
        if self.recorder.start(topics) {
            for (topic, recorded) in self.recorder.tracked_topics() {
                if let Err(e) = self.force_emit(&topic, recorded.protocol).await {
                    warn!(topic = %topic, error = %e, "Baseline capture failed; skipping");
                }
            }
            self.broadcast_recording().await
        } else {
            self.recorder.status()
        }
    }

    async fn force_emit(&self, topic: &Topic, protocol: Protocol) -> Result<(), GatewayError> {
        let adapter = self.adapter(&topic.server_id, protocol)?;
        adapter.force_emit_all(&topic.object_name).await?;
        Ok(())
    }

    /// Stop recording, keeping the buffer. No-op when idle.
    pub async fn stop_recording(&self) -> RecordingStatus {
        match self.recorder.stop() {
            Some(released) => {
                let topics = released
                    .into_iter()
                    .map(|(topic, recorded)| (topic, recorded.protocol))
                    .collect();
                self.release_topics(topics).await;
                self.broadcast_recording().await
            }
            None => self.recorder.status(),
        }
    }

    /// Empty the recording buffer.
    pub async fn clear_recording(&self) -> RecordingStatus {
        self.recorder.clear();
        self.broadcast_recording().await
    }

    async fn broadcast_recording(&self) -> RecordingStatus {
        let status = self.recorder.status();
        self.bus
            .broadcast(PushEvent::RecordingStatus(status.clone()))
            .await;
        status
    }
}

impl core::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let adapters = self
            .adapters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("Gateway")
            .field("sessions", &self.bus.session_count())
            .field("servers", &self.servers.len())
            .field("adapters", &adapters)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::adapter::AdapterError;
    use crate::config::{LoopbackObjectConfig, LoopbackSensorConfig};
    use crate::control::ControlError;
    use crate::recording::ExportFilter;

    /// Adapter that only logs the calls it receives.
    #[derive(Default)]
    struct CallLog {
        calls: Mutex<Vec<String>>,
    }

    impl CallLog {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn push(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl Adapter for CallLog {
        fn protocol(&self) -> Protocol {
            Protocol::Modbus
        }

        async fn subscribe(
            &self,
            object: &str,
            keys: &BTreeSet<SensorKey>,
        ) -> Result<(), AdapterError> {
            self.push(format!("subscribe {object} {}", keys.len()));
            Ok(())
        }

        async fn unsubscribe(&self, object: &str) -> Result<(), AdapterError> {
            self.push(format!("unsubscribe {object}"));
            Ok(())
        }

        async fn force_emit_all(&self, object: &str) -> Result<(), AdapterError> {
            self.push(format!("force {object}"));
            Err(AdapterError::Unavailable {
                message: String::from("offline"),
            })
        }

        async fn set_value(
            &self,
            object: &str,
            _key: &SensorKey,
            _value: SensorValue,
        ) -> Result<(), AdapterError> {
            self.push(format!("set {object}"));
            Ok(())
        }
    }

    /// Adapter that remembers the last sensor set it was pointed at. It can
    /// refuse one numbered subscribe call and stall the first one.
    #[derive(Default)]
    struct Watcher {
        watched: Mutex<BTreeSet<SensorKey>>,
        calls: AtomicUsize,
        refuse_call: Option<usize>,
        stall_first: bool,
    }

    impl Watcher {
        fn watched(&self) -> BTreeSet<SensorKey> {
            self.watched.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Adapter for Watcher {
        fn protocol(&self) -> Protocol {
            Protocol::Modbus
        }

        async fn subscribe(
            &self,
            _object: &str,
            keys: &BTreeSet<SensorKey>,
        ) -> Result<(), AdapterError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst).saturating_add(1);
            if self.refuse_call == Some(call) {
                return Err(AdapterError::Rejected {
                    message: String::from("too many registers"),
                });
            }
            if self.stall_first && call == 1 {
                tokio::time::sleep(std::time::Duration::from_millis(30)).await;
            }
            *self.watched.lock().unwrap() = keys.clone();
            Ok(())
        }

        async fn unsubscribe(&self, _object: &str) -> Result<(), AdapterError> {
            self.watched.lock().unwrap().clear();
            Ok(())
        }

        async fn force_emit_all(&self, _object: &str) -> Result<(), AdapterError> {
            Ok(())
        }

        async fn set_value(
            &self,
            _object: &str,
            _key: &SensorKey,
            _value: SensorValue,
        ) -> Result<(), AdapterError> {
            Ok(())
        }
    }

    fn with_watcher(gateway: &Gateway, watcher: Watcher) -> Arc<Watcher> {
        let watcher = Arc::new(watcher);
        gateway.register_adapter(ServerId::from("srv"), Arc::clone(&watcher) as Arc<dyn Adapter>);
        watcher
    }

    fn gateway() -> Arc<Gateway> {
        let gateway = Arc::new(Gateway::new(&GatewayConfig::default()));
        let objects = vec![LoopbackObjectConfig {
            name: String::from("SharedMemory"),
            protocol: Protocol::Ionc,
            sensors: (1..=5)
                .map(|id| LoopbackSensorConfig {
                    id: Some(id),
                    name: format!("AI{id}"),
                    value: SensorValue::Int(id),
                })
                .collect(),
        }];
        let loopback = LoopbackAdapter::new(
            ServerId::from("srv"),
            Protocol::Ionc,
            &objects,
            gateway.publisher(),
        );
        gateway.register_adapter(ServerId::from("srv"), Arc::new(loopback));
        gateway
    }

    fn with_call_log(gateway: &Gateway) -> Arc<CallLog> {
        let log = Arc::new(CallLog::default());
        gateway.register_adapter(ServerId::from("srv"), Arc::clone(&log) as Arc<dyn Adapter>);
        log
    }

    fn shm() -> Topic {
        Topic::new("srv", "SharedMemory")
    }

    fn mb() -> Topic {
        Topic::new("srv", "MBMaster1")
    }

    fn keys(ids: &[i64]) -> BTreeSet<SensorKey> {
        ids.iter().map(|id| SensorKey::Id(*id)).collect()
    }

    #[tokio::test]
    async fn recording_scenario_baseline_write_and_export() {
        let gw = gateway();
        let session = gw.open_session();
        gw.subscribe(session.session_id, shm(), Protocol::Ionc, keys(&[1, 2, 3, 4, 5]))
            .await
            .unwrap();

        let status = gw.start_recording().await;
        assert!(status.is_recording);
        assert_eq!(status.record_count, 5);

        gw.control().take("admin123").await.unwrap();
        gw.set_value(
            Some("admin123"),
            &shm(),
            Protocol::Ionc,
            &SensorKey::Id(3),
            SensorValue::Int(300),
        )
        .await
        .unwrap();
        assert_eq!(gw.recorder().status().record_count, 6);

        let status = gw.stop_recording().await;
        assert!(!status.is_recording);
        assert_eq!(status.record_count, 6);

        let csv = gw.recorder().export_csv(&ExportFilter::default());
        assert_eq!(csv.lines().count(), 7);
    }

    #[tokio::test]
    async fn start_twice_keeps_existing_records() {
        let gw = gateway();
        let session = gw.open_session();
        gw.subscribe(session.session_id, shm(), Protocol::Ionc, keys(&[1, 2]))
            .await
            .unwrap();
        gw.start_recording().await;
        let again = gw.start_recording().await;
        assert_eq!(again.record_count, 2);
    }

    #[tokio::test]
    async fn write_without_control_reaches_no_adapter() {
        let gw = gateway();
        let log = with_call_log(&gw);
        gw.control().take("admin123").await.unwrap();

        let denied = gw
            .set_value(Some("wrong"), &mb(), Protocol::Modbus, &SensorKey::Id(1), SensorValue::Int(1))
            .await;
        assert!(matches!(
            denied,
            Err(GatewayError::Control(ControlError::NotController))
        ));
        let missing = gw
            .set_value(None, &mb(), Protocol::Modbus, &SensorKey::Id(1), SensorValue::Int(1))
            .await;
        assert!(matches!(
            missing,
            Err(GatewayError::Control(ControlError::MissingToken))
        ));
        assert!(log.calls().is_empty());

        gw.set_value(Some("admin123"), &mb(), Protocol::Modbus, &SensorKey::Id(1), SensorValue::Int(1))
            .await
            .unwrap();
        assert_eq!(log.calls(), vec!["set MBMaster1"]);
    }

    #[tokio::test]
    async fn unsubscribe_releases_adapter_when_nobody_is_left() {
        let gw = gateway();
        let log = with_call_log(&gw);
        let a = gw.open_session();
        let b = gw.open_session();
        gw.subscribe(a.session_id, mb(), Protocol::Modbus, keys(&[1])).await.unwrap();
        gw.subscribe(b.session_id, mb(), Protocol::Modbus, keys(&[2])).await.unwrap();

        gw.unsubscribe(a.session_id, mb(), Protocol::Modbus).await.unwrap();
        gw.unsubscribe(b.session_id, mb(), Protocol::Modbus).await.unwrap();
        assert_eq!(
            log.calls(),
            vec![
                "subscribe MBMaster1 1",
                "subscribe MBMaster1 2",
                "subscribe MBMaster1 1",
                "unsubscribe MBMaster1",
            ]
        );
    }

    #[tokio::test]
    async fn recorder_keeps_topic_until_stop() {
        let gw = gateway();
        let log = with_call_log(&gw);
        let a = gw.open_session();
        gw.subscribe(a.session_id, mb(), Protocol::Modbus, keys(&[1])).await.unwrap();

        // Baseline failure on an offline adapter is logged, not fatal.
        assert!(gw.start_recording().await.is_recording);

        gw.unsubscribe(a.session_id, mb(), Protocol::Modbus).await.unwrap();
        assert!(!log.calls().contains(&String::from("unsubscribe MBMaster1")));

        gw.stop_recording().await;
        assert_eq!(log.calls().last().map(String::as_str), Some("unsubscribe MBMaster1"));
    }

    #[tokio::test]
    async fn missing_adapter_is_reported() {
        let gw = gateway();
        let session = gw.open_session();
        let result = gw
            .subscribe(session.session_id, Topic::new("other", "X"), Protocol::Opcua, keys(&[1]))
            .await;
        assert!(matches!(result, Err(GatewayError::NoAdapter { .. })));
    }

    #[tokio::test]
    async fn unknown_object_rolls_back_subscription() {
        let gw = gateway();
        let session = gw.open_session();
        let result = gw
            .subscribe(session.session_id, Topic::new("srv", "Nope"), Protocol::Ionc, keys(&[1]))
            .await;
        assert!(matches!(result, Err(GatewayError::Adapter(_))));
        assert!(gw.bus().active_topics().is_empty());
    }

    #[tokio::test]
    async fn closing_a_session_releases_its_topics() {
        let gw = gateway();
        let log = with_call_log(&gw);
        let session = gw.open_session();
        gw.subscribe(session.session_id, mb(), Protocol::Modbus, keys(&[1])).await.unwrap();

        let topics = gw.bus().close_session(session.session_id);
        gw.release_topics(topics).await;
        assert_eq!(log.calls().last().map(String::as_str), Some("unsubscribe MBMaster1"));
        assert!(!gw.bus().is_registered(session.session_id));
    }

    #[tokio::test]
    async fn loopback_servers_get_one_adapter_per_protocol() {
        let config = GatewayConfig::parse(
            r"
servers:
  - id: plant
    url: http://localhost:9090
    loopback:
      - name: SharedMemory
        protocol: ionc
        sensors: [{ id: 1, name: AI1 }]
      - name: MBMaster1
        protocol: modbus
        sensors: [{ id: 7, name: Reg7 }]
      - name: MBSlave1
        protocol: modbus
        sensors: [{ id: 8, name: Reg8 }]
  - id: remote
    url: http://localhost:9091
",
        )
        .unwrap();
        let gw = Arc::new(Gateway::new(&config));
        assert_eq!(gw.register_loopback(&config.servers), 2);
        assert!(gw.servers().get(&ServerId::from("plant")).unwrap().connected);
        assert!(!gw.servers().get(&ServerId::from("remote")).unwrap().connected);

        let session = gw.open_session();
        let count = gw
            .subscribe(session.session_id, Topic::new("plant", "MBSlave1"), Protocol::Modbus, keys(&[8]))
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn connected_event_reflects_state() {
        let gw = gateway();
        gw.control().take("admin123").await.unwrap();
        let session = gw.open_session();
        assert_eq!(session.connected.session_id, session.session_id);
        assert!(session.connected.control.has_controller);
        assert!(!session.connected.control.is_controller);
        assert!(!session.connected.recording.is_recording);
    }

    #[tokio::test]
    async fn recording_transitions_are_broadcast() {
        let gw = gateway();
        let mut session = gw.open_session();
        gw.start_recording().await;
        assert!(matches!(
            session.events.recv().await.unwrap(),
            PushEvent::RecordingStatus(RecordingStatus {
                is_recording: true,
                ..
            })
        ));
        gw.clear_recording().await;
        assert!(matches!(
            session.events.recv().await.unwrap(),
            PushEvent::RecordingStatus(_)
        ));
    }

    #[tokio::test]
    async fn narrowing_during_recording_keeps_recorded_sensors() {
        let gw = gateway();
        let session = gw.open_session();
        gw.subscribe(session.session_id, shm(), Protocol::Ionc, keys(&[1, 2, 3]))
            .await
            .unwrap();
        assert_eq!(gw.start_recording().await.record_count, 3);

        gw.subscribe(session.session_id, shm(), Protocol::Ionc, keys(&[1]))
            .await
            .unwrap();
        gw.control().take("admin123").await.unwrap();
        gw.set_value(
            Some("admin123"),
            &shm(),
            Protocol::Ionc,
            &SensorKey::Id(2),
            SensorValue::Int(200),
        )
        .await
        .unwrap();
        assert_eq!(gw.recorder().status().record_count, 4);
    }

    #[tokio::test]
    async fn recorder_sensors_outlive_a_departed_session() {
        let gw = gateway();
        let watcher = with_watcher(&gw, Watcher::default());
        let a = gw.open_session();
        let b = gw.open_session();
        gw.subscribe(a.session_id, mb(), Protocol::Modbus, keys(&[1, 2, 3])).await.unwrap();
        gw.subscribe(b.session_id, mb(), Protocol::Modbus, keys(&[4])).await.unwrap();
        gw.start_recording().await;

        gw.unsubscribe(a.session_id, mb(), Protocol::Modbus).await.unwrap();
        assert_eq!(watcher.watched(), keys(&[1, 2, 3, 4]));

        gw.stop_recording().await;
        assert_eq!(watcher.watched(), keys(&[4]));
    }

    #[tokio::test]
    async fn refused_resubscribe_restores_previous_subscription() {
        let gw = gateway();
        let watcher = with_watcher(
            &gw,
            Watcher {
                refuse_call: Some(2),
                ..Watcher::default()
            },
        );
        let session = gw.open_session();
        gw.subscribe(session.session_id, mb(), Protocol::Modbus, keys(&[1, 2]))
            .await
            .unwrap();

        let result = gw
            .subscribe(session.session_id, mb(), Protocol::Modbus, keys(&[1, 2, 3]))
            .await;
        assert!(matches!(result, Err(GatewayError::Adapter(_))));
        assert_eq!(
            gw.bus().subscription(session.session_id, &mb()).unwrap().sensors,
            keys(&[1, 2])
        );
        assert_eq!(watcher.watched(), keys(&[1, 2]));
    }

    #[tokio::test]
    async fn concurrent_subscribes_leave_adapter_on_the_full_union() {
        let gw = gateway();
        let watcher = with_watcher(
            &gw,
            Watcher {
                stall_first: true,
                ..Watcher::default()
            },
        );
        let a = gw.open_session();
        let b = gw.open_session();

        let (first, second) = tokio::join!(
            gw.subscribe(a.session_id, mb(), Protocol::Modbus, keys(&[1])),
            gw.subscribe(b.session_id, mb(), Protocol::Modbus, keys(&[2])),
        );
        first.unwrap();
        second.unwrap();
        assert_eq!(watcher.watched(), keys(&[1, 2]));
    }
}
