//! MQTT channel: the outbound half of a transport session.
//!
//! Wraps `rumqttc::AsyncClient`. Every call hands a request to the event loop
//! without waiting, so the task that drives the loop can also issue commands
//! without deadlocking on a full request channel.

use async_trait::async_trait;
use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS, SubscribeFilter};

use sl_protocol::{DeviceIdentity, Qos};

use crate::config::MqttConfig;
use crate::error::{MqttError, MqttResult};
use crate::tls;

// ── Channel trait ─────────────────────────────────────────────

/// Abstraction for MQTT publishing and subscription control.
///
/// Enables mocking in tests without a real MQTT broker.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Publish a raw payload to a topic.
    async fn publish(&self, topic: &str, payload: &[u8], qos: Qos) -> MqttResult<()>;

    /// Subscribe to a set of filters with one SUBSCRIBE packet. Either the
    /// whole request is handed to the session or nothing is.
    async fn subscribe_many(&self, filters: &[(String, Qos)]) -> MqttResult<()>;

    /// Subscribe to a single topic filter.
    async fn subscribe(&self, filter: &str, qos: Qos) -> MqttResult<()> {
        self.subscribe_many(&[(filter.to_string(), qos)]).await
    }

    /// Unsubscribe from a set of topic filters. If the transport refuses a
    /// topic after earlier ones went out, the error is
    /// [`MqttError::PartialUnsubscribe`] naming the topics that were sent.
    async fn unsubscribe_many(&self, topics: &[String]) -> MqttResult<()>;

    /// Send DISCONNECT and stop the session.
    async fn disconnect(&self) -> MqttResult<()>;
}

pub(crate) fn to_rumqttc(qos: Qos) -> QoS {
    match qos {
        Qos::AtMostOnce => QoS::AtMostOnce,
        Qos::AtLeastOnce => QoS::AtLeastOnce,
        Qos::ExactlyOnce => QoS::ExactlyOnce,
    }
}

pub(crate) fn from_rumqttc(qos: QoS) -> Qos {
    match qos {
        QoS::AtMostOnce => Qos::AtMostOnce,
        QoS::AtLeastOnce => Qos::AtLeastOnce,
        QoS::ExactlyOnce => Qos::ExactlyOnce,
    }
}

// ── MqttChannel ───────────────────────────────────────────────

/// MQTT channel connected to the shadow broker.
///
/// Owns the `AsyncClient`. The `EventLoop` is returned separately from
/// `new()` and must be driven by the session's network task.
pub struct MqttChannel {
    client: AsyncClient,
    client_id: String,
}

impl MqttChannel {
    /// Create a channel for `identity`, with TLS unless the config disables it.
    ///
    /// No network I/O happens here; the connection is made on the first
    /// `EventLoop::poll`.
    pub fn new(identity: &DeviceIdentity, config: &MqttConfig) -> MqttResult<(Self, EventLoop)> {
        let mut options = MqttOptions::new(&identity.client_id, &identity.host, identity.port);
        options.set_keep_alive(config.keepalive());
        options.set_clean_session(true);

        if config.use_tls {
            options.set_transport(tls::load_tls_transport(&identity.credentials)?);
        } else {
            tracing::info!(host = %identity.host, "MQTT plaintext mode (no TLS)");
            options.set_transport(tls::plaintext_transport());
        }

        let (client, eventloop) = AsyncClient::new(options, config.request_capacity.max(1));

        Ok((
            Self {
                client,
                client_id: identity.client_id.clone(),
            },
            eventloop,
        ))
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

#[async_trait]
impl Channel for MqttChannel {
    async fn publish(&self, topic: &str, payload: &[u8], qos: Qos) -> MqttResult<()> {
        self.client
            .try_publish(topic, to_rumqttc(qos), false, payload.to_vec())
            .map_err(|e| MqttError::Publish(e.to_string()))
    }

    async fn subscribe_many(&self, filters: &[(String, Qos)]) -> MqttResult<()> {
        if filters.is_empty() {
            return Err(MqttError::Subscribe("no topics given".into()));
        }
        let filters = filters
            .iter()
            .map(|(path, qos)| SubscribeFilter::new(path.clone(), to_rumqttc(*qos)));
        self.client
            .try_subscribe_many(filters)
            .map_err(|e| MqttError::Subscribe(e.to_string()))
    }

    async fn unsubscribe_many(&self, topics: &[String]) -> MqttResult<()> {
        if topics.is_empty() {
            return Err(MqttError::Unsubscribe("no topics given".into()));
        }
        // rumqttc sends one UNSUBSCRIBE per topic.
        for (i, topic) in topics.iter().enumerate() {
            if let Err(e) = self.client.try_unsubscribe(topic.as_str()) {
                return Err(if i == 0 {
                    MqttError::Unsubscribe(format!("{topic}: {e}"))
                } else {
                    MqttError::PartialUnsubscribe {
                        sent: topics[..i].to_vec(),
                        reason: format!("{topic}: {e}"),
                    }
                });
            }
        }
        Ok(())
    }

    async fn disconnect(&self) -> MqttResult<()> {
        self.client
            .try_disconnect()
            .map_err(|e| MqttError::Connection(e.to_string()))
    }
}
