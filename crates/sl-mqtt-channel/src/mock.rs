//! Mock MQTT transport for testing without a real broker.
//!
//! `MockChannel` records all published messages and subscription filters for
//! assertion in tests. A linked channel (see [`mock_session`]) also feeds the
//! matching `MockEvents` with publish-sent and ack events the way the broker
//! would, and `MockBroker` lets tests inject inbound messages and disconnects.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;

use sl_protocol::{DeviceIdentity, DisconnectReason, MqttMessage, Qos};

use crate::channel::Channel;
use crate::config::MqttConfig;
use crate::connector::{Connector, Session};
use crate::error::{MqttError, MqttResult};
use crate::events::{EventSource, TransportEvent};

type EventResult = Result<TransportEvent, DisconnectReason>;

/// A recorded publish call.
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: Qos,
}

impl PublishedMessage {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload).unwrap_or(serde_json::Value::Null)
    }
}

struct Link {
    events: mpsc::UnboundedSender<EventResult>,
    next_pkid: Mutex<u16>,
    auto_ack: Arc<AtomicBool>,
}

impl Link {
    fn next_pkid(&self) -> u16 {
        let mut next = self.next_pkid.lock().unwrap();
        *next = next.checked_add(1).unwrap_or(1);
        *next
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(Ok(event));
    }
}

/// Mock implementation of the `Channel` trait.
///
/// Stores all publishes and subscriptions in memory for test verification.
/// Thread-safe via `Mutex` (fine for test contexts).
pub struct MockChannel {
    published: Mutex<Vec<PublishedMessage>>,
    subscriptions: Mutex<Vec<(String, Qos)>>,
    unsubscriptions: Mutex<Vec<String>>,
    disconnects: AtomicUsize,
    fail_publish: AtomicBool,
    fail_subscribe: AtomicBool,
    unsubscribe_limit: Mutex<Option<usize>>,
    link: Option<Link>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            unsubscriptions: Mutex::new(Vec::new()),
            disconnects: AtomicUsize::new(0),
            fail_publish: AtomicBool::new(false),
            fail_subscribe: AtomicBool::new(false),
            unsubscribe_limit: Mutex::new(None),
            link: None,
        }
    }

    /// Get all published messages.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().unwrap().clone()
    }

    /// Get all subscription filters.
    pub fn subscriptions(&self) -> Vec<(String, Qos)> {
        self.subscriptions.lock().unwrap().clone()
    }

    /// Get all unsubscribed topics.
    pub fn unsubscriptions(&self) -> Vec<String> {
        self.unsubscriptions.lock().unwrap().clone()
    }

    /// Get the last published message.
    pub fn last_published(&self) -> Option<PublishedMessage> {
        self.published.lock().unwrap().last().cloned()
    }

    /// Get published messages for a specific topic.
    pub fn published_to(&self, topic: &str) -> Vec<PublishedMessage> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    /// Check whether a subscription was made to the given filter.
    pub fn is_subscribed_to(&self, filter: &str) -> bool {
        self.subscriptions
            .lock()
            .unwrap()
            .iter()
            .any(|(f, _)| f == filter)
    }

    /// Number of DISCONNECT requests sent through this channel.
    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Make subsequent publishes fail as if the request queue were full.
    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent subscribe/unsubscribe calls fail.
    pub fn set_fail_subscribe(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Accept only the first `limit` topics of each unsubscribe request, as
    /// a full request queue would.
    pub fn set_unsubscribe_limit(&self, limit: Option<usize>) {
        *self.unsubscribe_limit.lock().unwrap() = limit;
    }

    /// Clear all recorded state.
    pub fn reset(&self) {
        self.published.lock().unwrap().clear();
        self.subscriptions.lock().unwrap().clear();
        self.unsubscriptions.lock().unwrap().clear();
    }
}

impl Default for MockChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for MockChannel {
    async fn publish(&self, topic: &str, payload: &[u8], qos: Qos) -> MqttResult<()> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(MqttError::Publish("mock request queue full".into()));
        }
        self.published.lock().unwrap().push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
        });

        if let Some(link) = &self.link {
            let pkid = match qos {
                Qos::AtMostOnce => 0,
                _ => link.next_pkid(),
            };
            link.emit(TransportEvent::PublishSent { pkid });
            if pkid != 0 && link.auto_ack.load(Ordering::SeqCst) {
                link.emit(TransportEvent::PublishAcked { pkid });
            }
        }
        Ok(())
    }

    async fn subscribe_many(&self, filters: &[(String, Qos)]) -> MqttResult<()> {
        if self.fail_subscribe.load(Ordering::SeqCst) || filters.is_empty() {
            return Err(MqttError::Subscribe("mock subscribe refused".into()));
        }
        self.subscriptions
            .lock()
            .unwrap()
            .extend(filters.iter().cloned());

        if let Some(link) = &self.link {
            let pkid = link.next_pkid();
            if link.auto_ack.load(Ordering::SeqCst) {
                link.emit(TransportEvent::Subscribed {
                    pkid,
                    success: true,
                });
            }
        }
        Ok(())
    }

    async fn unsubscribe_many(&self, topics: &[String]) -> MqttResult<()> {
        if self.fail_subscribe.load(Ordering::SeqCst) || topics.is_empty() {
            return Err(MqttError::Unsubscribe("mock unsubscribe refused".into()));
        }
        let limit = *self.unsubscribe_limit.lock().unwrap();
        let accepted = limit.map_or(topics.len(), |n| n.min(topics.len()));
        if accepted == 0 {
            return Err(MqttError::Unsubscribe("mock request queue full".into()));
        }
        let sent = &topics[..accepted];
        self.unsubscriptions
            .lock()
            .unwrap()
            .extend(sent.iter().cloned());

        if let Some(link) = &self.link {
            for _ in sent {
                let pkid = link.next_pkid();
                if link.auto_ack.load(Ordering::SeqCst) {
                    link.emit(TransportEvent::Unsubscribed { pkid });
                }
            }
        }
        if accepted < topics.len() {
            return Err(MqttError::PartialUnsubscribe {
                sent: sent.to_vec(),
                reason: "mock request queue full".into(),
            });
        }
        Ok(())
    }

    async fn disconnect(&self) -> MqttResult<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        if let Some(link) = &self.link {
            link.emit(TransportEvent::DisconnectSent);
            let _ = link.events.send(Err(DisconnectReason::Called));
        }
        Ok(())
    }
}

// ── Linked session ────────────────────────────────────────────

/// Mock `EventSource` fed by a linked `MockChannel` and `MockBroker`.
pub struct MockEvents {
    rx: mpsc::UnboundedReceiver<EventResult>,
}

#[async_trait]
impl EventSource for MockEvents {
    async fn poll(&mut self) -> Result<TransportEvent, DisconnectReason> {
        self.rx.recv().await.unwrap_or(Err(DisconnectReason::NetPollTimeout))
    }
}

/// Test handle playing the broker's side of a mock session.
#[derive(Clone)]
pub struct MockBroker {
    events: mpsc::UnboundedSender<EventResult>,
    channel: Arc<MockChannel>,
    auto_ack: Arc<AtomicBool>,
}

impl MockBroker {
    /// The channel the client publishes through.
    pub fn channel(&self) -> &Arc<MockChannel> {
        &self.channel
    }

    /// Deliver an inbound PUBLISH to the client.
    pub fn deliver(&self, topic: &str, payload: &[u8]) {
        let _ = self.events.send(Ok(TransportEvent::Message(MqttMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos: Qos::AtLeastOnce,
        })));
    }

    /// Acknowledge a publish by packet id.
    pub fn ack(&self, pkid: u16) {
        let _ = self.events.send(Ok(TransportEvent::PublishAcked { pkid }));
    }

    /// Inject any transport event.
    pub fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(Ok(event));
    }

    /// Drop the connection with the given reason.
    pub fn drop_connection(&self, reason: DisconnectReason) {
        let _ = self.events.send(Err(reason));
    }

    /// Whether QoS>0 publishes and subscriptions are acknowledged automatically.
    pub fn set_auto_ack(&self, auto_ack: bool) {
        self.auto_ack.store(auto_ack, Ordering::SeqCst);
    }
}

/// Build a linked mock session: channel, event source and broker handle.
pub fn mock_session(auto_ack: bool) -> (Arc<MockChannel>, MockEvents, MockBroker) {
    let (tx, rx) = mpsc::unbounded_channel();
    let auto_ack = Arc::new(AtomicBool::new(auto_ack));

    let mut channel = MockChannel::new();
    channel.link = Some(Link {
        events: tx.clone(),
        next_pkid: Mutex::new(0),
        auto_ack: auto_ack.clone(),
    });
    let channel = Arc::new(channel);

    let broker = MockBroker {
        events: tx,
        channel: channel.clone(),
        auto_ack,
    };
    (channel, MockEvents { rx }, broker)
}

// ── Connector ─────────────────────────────────────────────────

/// Mock `Connector` that hands out linked mock sessions and counts attempts.
pub struct MockConnector {
    attempts: AtomicUsize,
    failures_remaining: AtomicUsize,
    auto_ack: bool,
    brokers: Mutex<Vec<MockBroker>>,
}

impl MockConnector {
    /// Connector whose sessions acknowledge everything.
    pub fn new() -> Self {
        Self::with_auto_ack(true)
    }

    /// Connector whose sessions never acknowledge publishes (stalled network).
    pub fn stalled() -> Self {
        Self::with_auto_ack(false)
    }

    fn with_auto_ack(auto_ack: bool) -> Self {
        Self {
            attempts: AtomicUsize::new(0),
            failures_remaining: AtomicUsize::new(0),
            auto_ack,
            brokers: Mutex::new(Vec::new()),
        }
    }

    /// Refuse the next `n` connection attempts.
    pub fn fail_next(&self, n: usize) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    /// Total connection attempts, successful or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Number of sessions handed out.
    pub fn sessions(&self) -> usize {
        self.brokers.lock().unwrap().len()
    }

    /// Broker side of the `index`-th session.
    pub fn broker(&self, index: usize) -> Option<MockBroker> {
        self.brokers.lock().unwrap().get(index).cloned()
    }

    /// Broker side of the most recent session.
    pub fn latest(&self) -> Option<MockBroker> {
        self.brokers.lock().unwrap().last().cloned()
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, identity: &DeviceIdentity, _config: &MqttConfig) -> MqttResult<Session> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let refused = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(MqttError::Connection(format!(
                "mock broker refused {}",
                identity.client_id
            )));
        }

        let (channel, events, broker) = mock_session(self.auto_ack);
        broker.emit(TransportEvent::Connected);
        self.brokers.lock().unwrap().push(broker);

        Ok(Session {
            channel,
            events: Box::new(events),
        })
    }
}
