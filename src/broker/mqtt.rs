//! MQTT broker client built on `rumqttc`.
//!
//! # Responsibilities
//! - Drive the rumqttc event loop on its own task
//! - Forward inbound PUBLISH packets to the message router
//! - Pair SUBSCRIBE/UNSUBSCRIBE requests with their acknowledgements
//! - Reconnect with backoff once a session has been established, restoring
//!   subscriptions when the broker did not keep the session
//! - Treat a broker refusing the reconnect as fatal

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet,
    SubscribeReasonCode,
};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time;

use crate::broker::types::{BrokerError, Message, QosLevel, Topic};
use crate::broker::BrokerClient;
use crate::config::validation::parse_broker_url;
use crate::config::BrokerConfig;
use crate::lifecycle::Shutdown;
use crate::resilience::backoff::ReconnectBackoff;
use crate::routing::MessageRouter;

type AckResult = Result<(), BrokerError>;

/// Topics the broker acknowledged, with the QoS they were requested at.
type Subscriptions = Arc<Mutex<Vec<(Topic, QosLevel)>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AckKind {
    Subscribe,
    Unsubscribe,
}

struct PendingAck {
    topic: String,
    tx: oneshot::Sender<AckResult>,
}

/// Requests of one kind: queued until the event loop assigns a packet id,
/// then in flight until the broker acknowledges.
#[derive(Default)]
struct AckQueue {
    queued: VecDeque<PendingAck>,
    in_flight: HashMap<u16, PendingAck>,
}

#[derive(Default)]
struct AckState {
    subscribe: AckQueue,
    unsubscribe: AckQueue,
}

impl AckState {
    fn queue(&mut self, kind: AckKind) -> &mut AckQueue {
        match kind {
            AckKind::Subscribe => &mut self.subscribe,
            AckKind::Unsubscribe => &mut self.unsubscribe,
        }
    }
}

/// Correlates client requests with broker acknowledgements.
///
/// The event loop reports outgoing packets in request order, so the oldest
/// queued request of a kind always owns the next packet id of that kind.
#[derive(Default)]
struct AckTracker {
    state: Mutex<AckState>,
}

impl AckTracker {
    /// Queue a pending ack and issue the request while holding the lock, so
    /// queue order always matches request order.
    fn request<F, E>(
        &self,
        kind: AckKind,
        topic: &str,
        send: F,
    ) -> Result<oneshot::Receiver<AckResult>, BrokerError>
    where
        F: FnOnce() -> Result<(), E>,
        E: std::fmt::Display,
    {
        let mut state = lock(&self.state);
        let (tx, rx) = oneshot::channel();
        let queue = state.queue(kind);
        queue.queued.push_back(PendingAck {
            topic: topic.to_string(),
            tx,
        });

        if let Err(e) = send() {
            queue.queued.pop_back();
            return Err(BrokerError::Request(e.to_string()));
        }
        Ok(rx)
    }

    fn sent(&self, kind: AckKind, pkid: u16) {
        let mut state = lock(&self.state);
        let queue = state.queue(kind);
        match queue.queued.pop_front() {
            Some(pending) => {
                queue.in_flight.insert(pkid, pending);
            }
            None => tracing::debug!(pkid, ?kind, "Outgoing packet with no pending request"),
        }
    }

    fn acknowledge(&self, kind: AckKind, pkid: u16, granted: bool) {
        let pending = lock(&self.state).queue(kind).in_flight.remove(&pkid);
        let Some(pending) = pending else {
            tracing::debug!(pkid, ?kind, "Acknowledgement with no pending request");
            return;
        };

        let result = if granted {
            Ok(())
        } else {
            Err(BrokerError::SubscriptionRejected(pending.topic))
        };
        let _ = pending.tx.send(result);
    }

    /// Drop requests already written to a connection that has gone away.
    /// Requests not yet written are replayed by the event loop and stay queued.
    fn abandon_in_flight(&self) {
        let mut state = lock(&self.state);
        state.subscribe.in_flight.clear();
        state.unsubscribe.in_flight.clear();
    }

    /// Drop every pending request; waiting callers observe `AckLost`.
    fn abandon_all(&self) {
        let mut state = lock(&self.state);
        *state = AckState::default();
    }
}

async fn await_ack(rx: oneshot::Receiver<AckResult>, topic: &Topic) -> AckResult {
    rx.await
        .unwrap_or_else(|_| Err(BrokerError::AckLost(topic.to_string())))
}

/// Owns the rumqttc event loop for the lifetime of the connection.
struct EventLoopDriver {
    eventloop: EventLoop,
    client: AsyncClient,
    router: Arc<MessageRouter>,
    acks: Arc<AckTracker>,
    subscriptions: Subscriptions,
    backoff: ReconnectBackoff,
    connected: Option<oneshot::Sender<AckResult>>,
    failure: Arc<OnceLock<BrokerError>>,
    shutdown: Shutdown,
    disconnecting: bool,
}

impl EventLoopDriver {
    async fn run(mut self) {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    self.backoff.reset();
                    match self.connected.take() {
                        Some(tx) => {
                            tracing::info!("Connected to broker");
                            let _ = tx.send(Ok(()));
                        }
                        None => {
                            tracing::warn!(
                                session_present = ack.session_present,
                                "Reconnected to broker"
                            );
                            if !ack.session_present {
                                self.resubscribe();
                            }
                        }
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let message = Message::from_bytes(publish.topic, &publish.payload);
                    self.router.dispatch(message).await;
                }
                Ok(Event::Incoming(Packet::SubAck(suback))) => {
                    let granted = !suback
                        .return_codes
                        .iter()
                        .any(|code| matches!(code, SubscribeReasonCode::Failure));
                    self.acks.acknowledge(AckKind::Subscribe, suback.pkid, granted);
                }
                Ok(Event::Incoming(Packet::UnsubAck(unsuback))) => {
                    self.acks.acknowledge(AckKind::Unsubscribe, unsuback.pkid, true);
                }
                Ok(Event::Outgoing(Outgoing::Subscribe(pkid))) => {
                    self.acks.sent(AckKind::Subscribe, pkid);
                }
                Ok(Event::Outgoing(Outgoing::Unsubscribe(pkid))) => {
                    self.acks.sent(AckKind::Unsubscribe, pkid);
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    self.disconnecting = true;
                }
                Ok(_) => {}
                Err(e) => {
                    if let Some(tx) = self.connected.take() {
                        let _ = tx.send(Err(BrokerError::Connect(e.to_string())));
                        break;
                    }
                    if self.disconnecting {
                        tracing::debug!(error = %e, "Event loop closed after disconnect");
                        break;
                    }
                    if let ConnectionError::ConnectionRefused(code) = &e {
                        tracing::error!(
                            return_code = ?code,
                            "Broker refused to resume the session, shutting down"
                        );
                        let _ = self.failure.set(BrokerError::Connect(format!(
                            "broker refused reconnect: {code:?}"
                        )));
                        self.shutdown.trigger();
                        break;
                    }

                    self.acks.abandon_in_flight();
                    let delay = self.backoff.next_delay();
                    tracing::warn!(
                        error = %e,
                        attempt = self.backoff.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        "Connection to broker lost, reconnecting"
                    );
                    time::sleep(delay).await;
                }
            }
        }

        self.acks.abandon_all();
    }

    /// Subscribe again to every acknowledged topic after the broker started
    /// a fresh session.
    fn resubscribe(&self) {
        let subscriptions = lock(&self.subscriptions).clone();
        for (topic, qos) in subscriptions {
            let request = self.acks.request(AckKind::Subscribe, topic.as_str(), || {
                self.client.try_subscribe(topic.as_str(), qos.into())
            });
            match request {
                Ok(rx) => {
                    tokio::spawn(async move {
                        match await_ack(rx, &topic).await {
                            Ok(()) => tracing::info!(topic = %topic, "Resubscribed to topic"),
                            Err(e) => tracing::error!(
                                topic = %topic,
                                error = %e,
                                "Failed to resubscribe after reconnect"
                            ),
                        }
                    });
                }
                Err(e) => tracing::error!(
                    topic = %topic,
                    error = %e,
                    "Failed to resubscribe after reconnect"
                ),
            }
        }
    }
}

/// Stops the event loop if `connect` is dropped before the CONNACK.
struct PendingConnect<'a> {
    driver: &'a Mutex<Option<JoinHandle<()>>>,
    armed: bool,
}

impl Drop for PendingConnect<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(handle) = lock(self.driver).take() {
            tracing::warn!("Connect abandoned before CONNACK, stopping event loop");
            handle.abort();
        }
    }
}

/// `BrokerClient` backed by an MQTT v3.1.1 connection.
pub struct MqttBroker {
    options: MqttOptions,
    request_capacity: usize,
    reconnect: (u64, u64),
    client: OnceLock<AsyncClient>,
    acks: Arc<AckTracker>,
    subscriptions: Subscriptions,
    failure: Arc<OnceLock<BrokerError>>,
    shutdown: Shutdown,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl MqttBroker {
    /// Build a client from configuration. Nothing touches the network until
    /// `connect`. `shutdown` fires if the broker later refuses to resume the
    /// session.
    pub fn new(config: &BrokerConfig, shutdown: Shutdown) -> Result<Self, BrokerError> {
        let endpoint =
            parse_broker_url(&config.url).map_err(|e| BrokerError::Connect(e.to_string()))?;

        let client_id = config.effective_client_id();
        tracing::debug!(
            host = %endpoint.host,
            port = endpoint.port,
            client_id = %client_id,
            "Configured MQTT client"
        );

        let mut options = MqttOptions::new(client_id, endpoint.host, endpoint.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        options.set_clean_session(config.clean_session);

        Ok(Self {
            options,
            request_capacity: config.event_capacity,
            reconnect: (config.reconnect_base_delay_ms, config.reconnect_max_delay_ms),
            client: OnceLock::new(),
            acks: Arc::new(AckTracker::default()),
            subscriptions: Arc::new(Mutex::new(Vec::new())),
            failure: Arc::new(OnceLock::new()),
            shutdown,
            driver: Mutex::new(None),
        })
    }

    fn client(&self) -> Result<&AsyncClient, BrokerError> {
        self.client.get().ok_or(BrokerError::NotConnected)
    }

    fn remember(&self, topic: &Topic, qos: QosLevel) {
        let mut subscriptions = lock(&self.subscriptions);
        subscriptions.retain(|(known, _)| known != topic);
        subscriptions.push((topic.clone(), qos));
    }

    fn forget(&self, topic: &Topic) {
        lock(&self.subscriptions).retain(|(known, _)| known != topic);
    }
}

#[async_trait]
impl BrokerClient for MqttBroker {
    async fn connect(&self, router: Arc<MessageRouter>) -> Result<(), BrokerError> {
        let (client, eventloop) = AsyncClient::new(self.options.clone(), self.request_capacity);
        self.client
            .set(client.clone())
            .map_err(|_| BrokerError::Connect("client already connected".to_string()))?;

        let (connected_tx, connected_rx) = oneshot::channel();
        let driver = EventLoopDriver {
            eventloop,
            client,
            router,
            acks: self.acks.clone(),
            subscriptions: self.subscriptions.clone(),
            backoff: ReconnectBackoff::new(self.reconnect.0, self.reconnect.1),
            connected: Some(connected_tx),
            failure: self.failure.clone(),
            shutdown: self.shutdown.clone(),
            disconnecting: false,
        };
        *lock(&self.driver) = Some(tokio::spawn(driver.run()));

        let mut pending = PendingConnect {
            driver: &self.driver,
            armed: true,
        };
        let result = connected_rx.await.unwrap_or_else(|_| {
            Err(BrokerError::Connect("event loop stopped before CONNACK".to_string()))
        });
        pending.armed = false;
        result
    }

    async fn subscribe(&self, topic: &Topic, qos: QosLevel) -> Result<(), BrokerError> {
        let client = self.client()?;
        let rx = self.acks.request(AckKind::Subscribe, topic.as_str(), || {
            client.try_subscribe(topic.as_str(), qos.into())
        })?;
        await_ack(rx, topic).await?;
        self.remember(topic, qos);
        Ok(())
    }

    async fn unsubscribe(&self, topic: &Topic) -> Result<(), BrokerError> {
        let client = self.client()?;
        self.forget(topic);
        let rx = self.acks.request(AckKind::Unsubscribe, topic.as_str(), || {
            client.try_unsubscribe(topic.as_str())
        })?;
        await_ack(rx, topic).await
    }

    async fn disconnect(&self, grace: Duration) -> Result<(), BrokerError> {
        let result = self
            .client()?
            .try_disconnect()
            .map_err(|e| BrokerError::Request(e.to_string()));

        let driver = lock(&self.driver).take();
        if let Some(mut handle) = driver {
            if time::timeout(grace, &mut handle).await.is_err() {
                tracing::warn!(
                    grace_ms = grace.as_millis() as u64,
                    "Event loop did not stop within grace period, aborting"
                );
                handle.abort();
            }
        }

        result
    }

    fn failure(&self) -> Option<BrokerError> {
        self.failure.get().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::ClientError;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn accept_request(
        tracker: &AckTracker,
        kind: AckKind,
        topic: &str,
    ) -> oneshot::Receiver<AckResult> {
        tracker
            .request(kind, topic, || Ok::<(), ClientError>(()))
            .unwrap()
    }

    #[test]
    fn test_acks_follow_request_order() {
        let tracker = AckTracker::default();
        let mut first = accept_request(&tracker, AckKind::Subscribe, "a");
        let mut second = accept_request(&tracker, AckKind::Subscribe, "b");

        tracker.sent(AckKind::Subscribe, 7);
        tracker.sent(AckKind::Subscribe, 8);
        tracker.acknowledge(AckKind::Subscribe, 8, false);
        tracker.acknowledge(AckKind::Subscribe, 7, true);

        assert!(matches!(first.try_recv(), Ok(Ok(()))));
        match second.try_recv() {
            Ok(Err(BrokerError::SubscriptionRejected(topic))) => assert_eq!(topic, "b"),
            other => panic!("unexpected ack: {:?}", other),
        }
    }

    #[test]
    fn test_kinds_are_tracked_separately() {
        let tracker = AckTracker::default();
        let mut sub = accept_request(&tracker, AckKind::Subscribe, "a");
        let mut unsub = accept_request(&tracker, AckKind::Unsubscribe, "a");

        tracker.sent(AckKind::Unsubscribe, 1);
        tracker.sent(AckKind::Subscribe, 1);
        tracker.acknowledge(AckKind::Unsubscribe, 1, true);

        assert!(matches!(unsub.try_recv(), Ok(Ok(()))));
        assert!(sub.try_recv().is_err());
    }

    #[test]
    fn test_failed_request_is_not_queued() {
        let tracker = AckTracker::default();
        let err = tracker
            .request(AckKind::Subscribe, "a", || Err("request queue full"))
            .unwrap_err();
        assert!(matches!(err, BrokerError::Request(_)));

        let mut next = accept_request(&tracker, AckKind::Subscribe, "b");
        tracker.sent(AckKind::Subscribe, 3);
        tracker.acknowledge(AckKind::Subscribe, 3, true);
        assert!(matches!(next.try_recv(), Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_abandoned_acks_surface_as_lost() {
        let tracker = AckTracker::default();
        let rx = accept_request(&tracker, AckKind::Unsubscribe, "a");
        tracker.abandon_all();

        let result = await_ack(rx, &Topic::new("a")).await;
        assert!(matches!(result, Err(BrokerError::AckLost(_))));
    }

    #[tokio::test]
    async fn test_connection_loss_keeps_unsent_requests() {
        let tracker = AckTracker::default();
        let written = accept_request(&tracker, AckKind::Subscribe, "a");
        tracker.sent(AckKind::Subscribe, 1);
        let mut unsent = accept_request(&tracker, AckKind::Subscribe, "b");

        tracker.abandon_in_flight();
        let lost = await_ack(written, &Topic::new("a")).await;
        assert!(matches!(lost, Err(BrokerError::AckLost(_))));

        // Replayed on the next session with a fresh packet id.
        tracker.sent(AckKind::Subscribe, 1);
        tracker.acknowledge(AckKind::Subscribe, 1, true);
        assert!(matches!(unsent.try_recv(), Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_calls_before_connect_fail() {
        let broker = MqttBroker::new(&BrokerConfig::default(), Shutdown::new()).unwrap();
        let result = broker.subscribe(&Topic::new("a"), QosLevel::AtMostOnce).await;
        assert!(matches!(result, Err(BrokerError::NotConnected)));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Reserve a port, then free it so nothing is listening there.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let broker = MqttBroker::new(&local_config(port), Shutdown::new()).unwrap();
        let result = broker.connect(Arc::new(MessageRouter::new())).await;
        assert!(matches!(result, Err(BrokerError::Connect(_))));
    }

    // Minimal MQTT 3.1.1 peer speaking just enough of the protocol for the
    // client under test.

    const CONNECT: u8 = 0x10;
    const SUBSCRIBE: u8 = 0x80;
    const NOT_AUTHORIZED: u8 = 5;

    fn local_config(port: u16) -> BrokerConfig {
        BrokerConfig {
            url: format!("tcp://127.0.0.1:{port}"),
            reconnect_base_delay_ms: 10,
            reconnect_max_delay_ms: 50,
            ..Default::default()
        }
    }

    async fn read_packet(stream: &mut TcpStream) -> Option<(u8, Vec<u8>)> {
        let header = stream.read_u8().await.ok()?;
        let mut len = 0usize;
        let mut shift = 0;
        loop {
            let byte = stream.read_u8().await.ok()?;
            len |= usize::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut body = vec![0; len];
        stream.read_exact(&mut body).await.ok()?;
        Some((header, body))
    }

    /// Accept a connection, read its CONNECT and answer with `return_code`.
    async fn accept_session(listener: &TcpListener, return_code: u8) -> TcpStream {
        let (mut stream, _) = listener.accept().await.unwrap();
        let (header, _) = read_packet(&mut stream).await.unwrap();
        assert_eq!(header, CONNECT);
        stream
            .write_all(&[0x20, 0x02, 0x00, return_code])
            .await
            .unwrap();
        stream
    }

    /// Read a SUBSCRIBE, grant it and return its topic filter.
    async fn grant_subscribe(stream: &mut TcpStream) -> String {
        let (header, body) = read_packet(stream).await.unwrap();
        assert_eq!(header & 0xf0, SUBSCRIBE);
        let len = usize::from(u16::from_be_bytes([body[2], body[3]]));
        let topic = String::from_utf8(body[4..4 + len].to_vec()).unwrap();
        stream
            .write_all(&[0x90, 0x03, body[0], body[1], 0x00])
            .await
            .unwrap();
        topic
    }

    #[tokio::test]
    async fn test_resubscribes_after_clean_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let peer = tokio::spawn(async move {
            let mut first = accept_session(&listener, 0).await;
            assert_eq!(grant_subscribe(&mut first).await, "a");
            time::sleep(Duration::from_millis(200)).await;
            drop(first);

            let mut second = accept_session(&listener, 0).await;
            time::timeout(Duration::from_secs(5), grant_subscribe(&mut second))
                .await
                .expect("no SUBSCRIBE after a clean reconnect")
        });

        let broker = MqttBroker::new(&local_config(port), Shutdown::new()).unwrap();
        let mut router = MessageRouter::new();
        let _inbox = router.register(&Topic::new("a")).unwrap();
        broker.connect(Arc::new(router)).await.unwrap();
        broker
            .subscribe(&Topic::new("a"), QosLevel::AtLeastOnce)
            .await
            .unwrap();

        let resubscribed = time::timeout(Duration::from_secs(10), peer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resubscribed, "a");
        assert!(broker.failure().is_none());
    }

    #[tokio::test]
    async fn test_refused_reconnect_fires_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let first = accept_session(&listener, 0).await;
            time::sleep(Duration::from_millis(100)).await;
            drop(first);

            let _second = accept_session(&listener, NOT_AUTHORIZED).await;
            time::sleep(Duration::from_secs(2)).await;
        });

        let shutdown = Shutdown::new();
        let broker = MqttBroker::new(&local_config(port), shutdown.clone()).unwrap();
        broker.connect(Arc::new(MessageRouter::new())).await.unwrap();

        time::timeout(Duration::from_secs(5), shutdown.wait())
            .await
            .expect("a refused reconnect must fire shutdown");
        match broker.failure() {
            Some(BrokerError::Connect(reason)) => assert!(reason.contains("refused")),
            other => panic!("unexpected failure: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_abandoned_connect_stops_event_loop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let peer = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let (header, _) = read_packet(&mut stream).await.unwrap();
            assert_eq!(header, CONNECT);
            // Never answer; the client should hang up once it gives up.
            time::timeout(Duration::from_secs(2), read_packet(&mut stream)).await
        });

        let broker = MqttBroker::new(&local_config(port), Shutdown::new()).unwrap();
        let attempt = time::timeout(
            Duration::from_millis(300),
            broker.connect(Arc::new(MessageRouter::new())),
        )
        .await;
        assert!(attempt.is_err());

        let next = peer.await.unwrap();
        assert!(matches!(next, Ok(None)), "socket must close once connect is abandoned");
    }
}
