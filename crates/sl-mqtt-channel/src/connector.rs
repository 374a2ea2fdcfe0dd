//! Session establishment.
//!
//! A [`Connector`] turns a device identity into a live [`Session`]: the
//! outbound [`Channel`] plus the inbound [`EventSource`]. Connecting does not
//! retry; callers decide whether and when to try again.

use std::sync::Arc;

use async_trait::async_trait;
use rumqttc::{Event, EventLoop, Packet};

use sl_protocol::DeviceIdentity;

use crate::channel::{Channel, MqttChannel};
use crate::config::MqttConfig;
use crate::error::{MqttError, MqttResult};
use crate::events::{EventSource, MqttEvents};

/// One authenticated connection.
pub struct Session {
    pub channel: Arc<dyn Channel>,
    pub events: Box<dyn EventSource>,
}

/// Opens sessions. Mockable in tests.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, identity: &DeviceIdentity, config: &MqttConfig) -> MqttResult<Session>;
}

/// Production connector backed by rumqttc.
#[derive(Debug, Clone, Copy, Default)]
pub struct MqttConnector;

#[async_trait]
impl Connector for MqttConnector {
    async fn connect(&self, identity: &DeviceIdentity, config: &MqttConfig) -> MqttResult<Session> {
        let (channel, mut eventloop) = MqttChannel::new(identity, config)?;

        tracing::info!(
            host = %identity.host,
            port = identity.port,
            client_id = %identity.client_id,
            "connecting to MQTT broker"
        );

        match tokio::time::timeout(config.connect_timeout(), wait_for_connack(&mut eventloop)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(MqttError::ConnectTimeout {
                    timeout_secs: config.connect_timeout_secs,
                });
            }
        }

        tracing::info!(client_id = %identity.client_id, "MQTT connected");
        Ok(Session {
            channel: Arc::new(channel),
            events: Box::new(MqttEvents::new(eventloop)),
        })
    }
}

/// Drive the event loop until the broker accepts the connection.
async fn wait_for_connack(eventloop: &mut EventLoop) -> MqttResult<()> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
            Ok(_) => {}
            Err(e) => return Err(MqttError::Connection(e.to_string())),
        }
    }
}
