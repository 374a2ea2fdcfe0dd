//! MQTT message and event vocabulary shared by the transport and the client.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, ProtocolResult};

/// Topic and payload lengths are carried as 16-bit values.
pub const MAX_TOPIC_LEN: usize = u16::MAX as usize;
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// MQTT delivery guarantee.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Qos {
    /// Delivery at most once.
    AtMostOnce,
    /// Delivery at least once.
    #[default]
    AtLeastOnce,
    /// Delivery exactly once.
    ExactlyOnce,
}

impl Qos {
    pub fn level(self) -> u8 {
        match self {
            Self::AtMostOnce => 0,
            Self::AtLeastOnce => 1,
            Self::ExactlyOnce => 2,
        }
    }
}

impl TryFrom<u8> for Qos {
    type Error = ProtocolError;

    fn try_from(level: u8) -> ProtocolResult<Self> {
        match level {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            other => Err(ProtocolError::Qos(other)),
        }
    }
}

impl From<Qos> for u8 {
    fn from(qos: Qos) -> u8 {
        qos.level()
    }
}

/// A single PUBLISH: topic, raw payload bytes and QoS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: Qos,
}

impl MqttMessage {
    /// Build an outbound message, checking topic and payload bounds.
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>, qos: Qos) -> ProtocolResult<Self> {
        let message = Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
        };
        message.validate()?;
        Ok(message)
    }

    pub fn validate(&self) -> ProtocolResult<()> {
        validate_publish_topic(&self.topic)?;
        if self.payload.len() > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::PayloadTooLarge {
                len: self.payload.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }
        Ok(())
    }

    /// Payload as UTF-8, if it is.
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Topic names used for PUBLISH may not contain wildcards.
pub fn validate_publish_topic(topic: &str) -> ProtocolResult<()> {
    validate_filter(topic)?;
    if topic.contains(['+', '#']) {
        return Err(ProtocolError::Topic {
            topic: topic.to_string(),
            reason: "wildcards are not allowed in a publish topic",
        });
    }
    Ok(())
}

/// Subscription filters may contain wildcards but must be non-empty and bounded.
pub fn validate_filter(filter: &str) -> ProtocolResult<()> {
    if filter.is_empty() {
        return Err(ProtocolError::Topic {
            topic: String::new(),
            reason: "topic is empty",
        });
    }
    if filter.len() > MAX_TOPIC_LEN {
        return Err(ProtocolError::Topic {
            topic: filter.chars().take(32).collect(),
            reason: "topic is too long",
        });
    }
    if filter.contains('\0') {
        return Err(ProtocolError::Topic {
            topic: filter.replace('\0', "\\0"),
            reason: "topic contains a NUL character",
        });
    }
    let levels: Vec<&str> = filter.split('/').collect();
    for (i, level) in levels.iter().enumerate() {
        let misplaced = match *level {
            "#" => i + 1 != levels.len(),
            "+" => false,
            other => other.contains(['+', '#']),
        };
        if misplaced {
            return Err(ProtocolError::Topic {
                topic: filter.to_string(),
                reason: "wildcard must fill a whole level, and '#' must be last",
            });
        }
    }
    Ok(())
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// The handler was released by the application.
    Called,
    /// An invalid packet was received from the network.
    BadPacket,
    /// The broker did not answer a keep-alive ping in time.
    KeepAliveTimeout,
    /// The network layer failed or timed out while polling.
    NetPollTimeout,
}

impl DisconnectReason {
    /// Reasons that should be answered with a reconnect cycle.
    pub const RECONNECTABLE: [DisconnectReason; 3] = [
        Self::BadPacket,
        Self::KeepAliveTimeout,
        Self::NetPollTimeout,
    ];

    pub fn triggers_reconnect(self) -> bool {
        Self::RECONNECTABLE.contains(&self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Called => "called",
            Self::BadPacket => "bad_packet",
            Self::KeepAliveTimeout => "keep_alive_timeout",
            Self::NetPollTimeout => "net_poll_timeout",
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of shadow document delivered to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShadowDataType {
    /// Full document previously requested with GET.
    Get,
    /// Desired state differs from reported; the device should act and acknowledge.
    Delta,
    /// Previous and current document after an accepted update.
    Document,
}

/// Client-to-server MQTT operations reported through operation-complete events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Connect,
    PublishToServer,
    PubAck,
    Subscribe,
    Unsubscribe,
    PingReq,
    Disconnect,
}

impl OperationType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::PublishToServer => "PUBLISH",
            Self::PubAck => "PUBACK",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::PingReq => "PINGREQ",
            Self::Disconnect => "DISCONNECT",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
