//! The device client handle.
//!
//! A [`DeviceClient`] owns one transport session at a time, the shadow state
//! machine and the registered callbacks. Application calls are validated here
//! and handed to the session task through the request queue; none of them
//! touch the network directly.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use sl_mqtt_channel::{Connector, MqttConnector, MqttError, Session};
use sl_protocol::message::validate_filter;
use sl_protocol::shadows::parse_update_document;
use sl_protocol::{DisconnectReason, MqttMessage, OperationType, Qos, ShadowTopics};

use crate::backoff::Backoff;
use crate::callbacks::Callbacks;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::publish_queue::{Completion, Request, RequestQueue};
use crate::session::SessionLoop;
use crate::shadow::{ShadowDocument, ShadowMachine, SharedShadowDocument};
use crate::supervisor::{ConnectionState, ReconnectSupervisor};

/// Client identifiers held by live clients in this process.
static LIVE_CLIENT_IDS: LazyLock<Mutex<HashSet<String>>> = LazyLock::new(Default::default);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Exclusive use of a client identifier; released on drop.
#[derive(Debug)]
struct IdentifierClaim(String);

impl IdentifierClaim {
    fn acquire(client_id: &str) -> ClientResult<Self> {
        if !lock(&LIVE_CLIENT_IDS).insert(client_id.to_string()) {
            return Err(ClientError::DuplicateIdentifier(client_id.to_string()));
        }
        Ok(Self(client_id.to_string()))
    }
}

impl Drop for IdentifierClaim {
    fn drop(&mut self) {
        lock(&LIVE_CLIENT_IDS).remove(&self.0);
    }
}

struct ClientInner {
    config: ClientConfig,
    callbacks: Callbacks,
    connector: Arc<dyn Connector>,
    topics: ShadowTopics,
    document: SharedShadowDocument,
    shadow: Arc<tokio::sync::Mutex<ShadowMachine>>,
    supervisor: ReconnectSupervisor,
    /// Queue of the current session; `None` while reconnecting or released.
    requests: Mutex<Option<RequestQueue>>,
    session_task: Mutex<Option<JoinHandle<()>>>,
    /// Application subscriptions, restored after a reconnect.
    subscriptions: Mutex<Vec<(String, Qos)>>,
    released: AtomicBool,
    claim: Mutex<Option<IdentifierClaim>>,
}

impl ClientInner {
    fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Start the session task for a freshly connected session.
    fn install(self: &Arc<Self>, session: Session) {
        let (queue, rx) = RequestQueue::new(self.config.publish.queue_capacity);
        let session_loop = SessionLoop::new(
            session,
            rx,
            self.shadow.clone(),
            self.topics.clone(),
            self.callbacks.clone(),
        );

        {
            let mut requests = lock(&self.requests);
            // Released while connecting: the queue is dropped and the session shuts down.
            if !self.is_released() {
                *requests = Some(queue);
            }
        }

        let weak = Arc::downgrade(self);
        let callbacks = self.callbacks.clone();
        let task = tokio::spawn(async move {
            let reason = session_loop.run().await;
            callbacks.disconnect(reason);
            if let Some(inner) = weak.upgrade() {
                inner.session_ended(reason);
            }
        });
        *lock(&self.session_task) = Some(task);
    }

    fn session_ended(self: &Arc<Self>, reason: DisconnectReason) {
        lock(&self.requests).take();
        if self.is_released() {
            self.supervisor.disconnected();
            return;
        }
        let weak = Arc::downgrade(self);
        self.supervisor.on_disconnect(reason, move || reconnect(weak));
    }

    /// Re-establish application state on a new session. Sessions start
    /// clean, so subscriptions are always restored; the shadow GET is
    /// optional.
    fn resync(&self) {
        let Some(queue) = lock(&self.requests).clone() else {
            return;
        };

        let filters = lock(&self.subscriptions).clone();
        if !filters.is_empty() {
            let (reply, _) = oneshot::channel();
            if let Err(e) = queue.send(Request::Subscribe { filters, reply }) {
                tracing::warn!(error = %e, "failed to restore subscriptions");
            }
        }
        if !self.config.reconnect.resync_shadow {
            return;
        }
        if let Err(e) = queue.send(Request::ShadowGet) {
            tracing::warn!(error = %e, "failed to request shadow after reconnect");
        }
    }
}

/// One reconnect cycle: back off, connect, install, resync. Runs until a
/// session is up or the client is released or dropped.
async fn reconnect(weak: Weak<ClientInner>) {
    loop {
        let delay = match weak.upgrade() {
            Some(inner) if !inner.is_released() => inner.supervisor.next_delay(),
            _ => return,
        };
        tracing::info!(delay_ms = delay.as_millis() as u64, "reconnecting after delay");
        tokio::time::sleep(delay).await;

        let Some(inner) = weak.upgrade() else {
            return;
        };
        if inner.is_released() {
            inner.supervisor.disconnected();
            return;
        }

        match inner.connector.connect(&inner.config.device, &inner.config.mqtt).await {
            Ok(session) => {
                inner.supervisor.connected();
                inner.install(session);
                inner.resync();
                tracing::info!(client_id = %inner.config.device.client_id, "reconnected");
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "reconnect attempt failed");
            }
        }
    }
}

fn connect_error(err: MqttError) -> ClientError {
    match err {
        MqttError::Tls(_) => ClientError::Config(err.to_string()),
        other => ClientError::Connection(other.to_string()),
    }
}

/// Handle to one device's shadow-synchronizing MQTT client.
///
/// Cheap to clone; all clones share the same session. Dropping the last
/// clone has the same effect as [`release`](Self::release).
#[derive(Clone)]
pub struct DeviceClient {
    inner: Arc<ClientInner>,
}

impl DeviceClient {
    /// Connect to the broker with TLS credentials from the configuration.
    pub async fn create(config: ClientConfig, callbacks: Callbacks) -> ClientResult<Self> {
        Self::create_with_connector(config, callbacks, Arc::new(MqttConnector)).await
    }

    /// Like [`create`](Self::create), opening sessions through `connector`.
    pub async fn create_with_connector(
        config: ClientConfig,
        callbacks: Callbacks,
        connector: Arc<dyn Connector>,
    ) -> ClientResult<Self> {
        config.device.validate()?;
        config.validate()?;
        let claim = IdentifierClaim::acquire(&config.device.client_id)?;

        let topics = ShadowTopics::new(&config.mqtt.shadow_topic_prefix, &config.device.thing_name);
        let document = SharedShadowDocument::default();
        let shadow = ShadowMachine::new(&config.device, config.publish.auto_ack_delta, document.clone());
        let supervisor = ReconnectSupervisor::new(Backoff::from_config(&config.reconnect));

        supervisor.begin_connect();
        let session = connector
            .connect(&config.device, &config.mqtt)
            .await
            .map_err(connect_error)?;

        let inner = Arc::new(ClientInner {
            callbacks,
            connector,
            topics,
            document,
            shadow: Arc::new(tokio::sync::Mutex::new(shadow)),
            supervisor,
            requests: Mutex::new(None),
            session_task: Mutex::new(None),
            subscriptions: Mutex::new(Vec::new()),
            released: AtomicBool::new(false),
            claim: Mutex::new(Some(claim)),
            config,
        });
        inner.supervisor.connected();
        inner.install(session);

        tracing::info!(
            client_id = %inner.config.device.client_id,
            thing = %inner.config.device.thing_name,
            "device client created"
        );
        Ok(Self { inner })
    }

    pub fn client_id(&self) -> &str {
        &self.inner.config.device.client_id
    }

    pub fn thing_name(&self) -> &str {
        &self.inner.config.device.thing_name
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.supervisor.state()
    }

    pub fn is_released(&self) -> bool {
        self.inner.is_released()
    }

    /// Application subscriptions restored on every new session.
    pub fn subscriptions(&self) -> Vec<(String, Qos)> {
        lock(&self.inner.subscriptions).clone()
    }

    /// Copy of the local shadow document.
    pub async fn shadow_snapshot(&self) -> ShadowDocument {
        self.inner.document.read().await.clone()
    }

    fn send(&self, request: Request) -> ClientResult<()> {
        if self.inner.is_released() {
            return Err(ClientError::Released);
        }
        let queue = lock(&self.inner.requests).clone();
        queue.ok_or(ClientError::NotConnected)?.send(request)
    }

    /// Subscribe to or unsubscribe from `topics`; `qos[i]` applies to
    /// `topics[i]`. Succeeds once the whole request has been handed to the
    /// session; broker acknowledgements arrive on the operation-complete
    /// callback.
    pub async fn modify_subscriptions(
        &self,
        operation: OperationType,
        topics: &[&str],
        qos: &[Qos],
    ) -> ClientResult<()> {
        if topics.is_empty() {
            return Err(ClientError::InvalidArgument("no topics given".into()));
        }
        if topics.len() != qos.len() {
            return Err(ClientError::InvalidArgument(format!(
                "{} topics but {} QoS levels",
                topics.len(),
                qos.len()
            )));
        }
        for topic in topics {
            validate_filter(topic)?;
        }

        let (reply, rx) = oneshot::channel();
        match operation {
            OperationType::Subscribe => {
                let filters: Vec<(String, Qos)> = topics
                    .iter()
                    .zip(qos)
                    .map(|(t, q)| (t.to_string(), *q))
                    .collect();
                self.send(Request::Subscribe {
                    filters: filters.clone(),
                    reply,
                })?;
                rx.await.map_err(|_| ClientError::SessionClosed)??;

                let mut subs = lock(&self.inner.subscriptions);
                for (filter, qos) in filters {
                    match subs.iter_mut().find(|(f, _)| *f == filter) {
                        Some(existing) => existing.1 = qos,
                        None => subs.push((filter, qos)),
                    }
                }
            }
            OperationType::Unsubscribe => {
                let names: Vec<String> = topics.iter().map(|t| t.to_string()).collect();
                self.send(Request::Unsubscribe {
                    topics: names.clone(),
                    reply,
                })?;
                match rx.await.map_err(|_| ClientError::SessionClosed)? {
                    Ok(()) => lock(&self.inner.subscriptions).retain(|(f, _)| !names.contains(f)),
                    // Topics that went out are gone on the broker; stop tracking them.
                    Err(ClientError::Transport(MqttError::PartialUnsubscribe { sent, reason })) => {
                        lock(&self.inner.subscriptions).retain(|(f, _)| !sent.contains(f));
                        return Err(MqttError::PartialUnsubscribe { sent, reason }.into());
                    }
                    Err(e) => return Err(e),
                }
            }
            other => {
                return Err(ClientError::InvalidArgument(format!(
                    "{other} is not a subscription operation"
                )));
            }
        }
        Ok(())
    }

    /// Queue a publish and return. The outcome is reported on the
    /// operation-complete callback once the broker acknowledges it.
    pub fn publish_async(&self, message: MqttMessage) -> ClientResult<()> {
        self.publish(message, true)
    }

    /// Like [`publish_async`](Self::publish_async); with `ack_required`
    /// unset a QoS 1/2 publish is reported complete as soon as it is sent.
    pub fn publish(&self, message: MqttMessage, ack_required: bool) -> ClientResult<()> {
        message.validate()?;
        self.send(Request::Publish {
            message,
            completion: Completion::Notify,
            deadline: None,
            ack_required,
        })
    }

    /// Publish and wait for the broker's acknowledgement (or the send, for
    /// QoS 0). `None` uses the configured default timeout.
    ///
    /// On timeout the publish stays in flight; a later acknowledgement is
    /// discarded.
    pub async fn publish_sync(&self, message: MqttMessage, timeout: Option<Duration>) -> ClientResult<()> {
        message.validate()?;
        let timeout = timeout.unwrap_or_else(|| self.inner.config.publish.default_timeout());

        let (tx, rx) = oneshot::channel();
        self.send(Request::Publish {
            message,
            completion: Completion::Waiter(tx),
            // A timeout past the clock's range never expires.
            deadline: Instant::now().checked_add(timeout),
            ack_required: true,
        })?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::SessionClosed),
            Err(_) => Err(ClientError::Timeout {
                operation: OperationType::PublishToServer,
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    /// Request the full shadow document. The response is delivered to the
    /// shadow-param and attribute callbacks.
    pub fn shadow_get(&self) -> ClientResult<()> {
        self.send(Request::ShadowGet)
    }

    /// Report `document` (a JSON object) as the device's state.
    ///
    /// `respond_to_desire` marks the update as the answer to a delta: the
    /// reported keys are also cleared from the desired section. The server's
    /// verdict arrives on the update-result callback.
    pub fn shadow_update(&self, document: &str, respond_to_desire: bool) -> ClientResult<()> {
        let document = parse_update_document(document)?;
        if document.is_empty() {
            return Err(ClientError::InvalidDocument("update document has no keys".into()));
        }
        self.send(Request::ShadowUpdate {
            document,
            respond_to_desire,
        })
    }

    /// Ask the server to delete the whole shadow document.
    pub fn shadow_clear(&self) -> ClientResult<()> {
        self.send(Request::ShadowClear)
    }

    /// Close the session and free the client identifier. Safe to call more
    /// than once; later calls do nothing.
    pub fn release(&self) {
        if self.inner.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(queue) = lock(&self.inner.requests).take() {
            // A full queue still closes once this sender is dropped.
            let _ = queue.send(Request::Release);
        }
        lock(&self.inner.claim).take();
        tracing::info!(client_id = %self.inner.config.device.client_id, "device client released");
    }

    /// A handle that does not keep the client alive, for callbacks that
    /// need to call back into it.
    pub fn downgrade(&self) -> WeakDeviceClient {
        WeakDeviceClient {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Release and wait for the session task to finish.
    pub async fn shutdown(&self) {
        self.release();
        let task = lock(&self.inner.session_task).take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

/// Non-owning [`DeviceClient`] handle.
#[derive(Clone, Default)]
pub struct WeakDeviceClient {
    inner: Weak<ClientInner>,
}

impl WeakDeviceClient {
    /// The client, unless every strong handle has been dropped.
    pub fn upgrade(&self) -> Option<DeviceClient> {
        self.inner.upgrade().map(|inner| DeviceClient { inner })
    }
}

impl fmt::Debug for WeakDeviceClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakDeviceClient")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl fmt::Debug for DeviceClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceClient")
            .field("client_id", &self.client_id())
            .field("thing_name", &self.thing_name())
            .field("state", &self.connection_state())
            .field("released", &self.is_released())
            .finish()
    }
}
