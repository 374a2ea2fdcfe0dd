//! Incoming message classification for the session's network loop.
//!
//! Splits inbound publishes into shadow responses for this thing and
//! ordinary subscription messages, so the loop can dispatch them without
//! topic string matching.

use sl_protocol::MqttMessage;
use sl_protocol::topics::{ShadowOperation, ShadowResponse, ShadowTopics};

/// A classified incoming MQTT message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncomingMessage {
    /// Response on one of this thing's shadow topics.
    Shadow {
        operation: ShadowOperation,
        response: ShadowResponse,
        payload: Vec<u8>,
    },
    /// Anything the application subscribed to itself.
    Subscribed(MqttMessage),
}

/// Classify a raw inbound message against the thing's shadow topics.
pub fn classify(topics: &ShadowTopics, message: MqttMessage) -> IncomingMessage {
    match topics.parse(&message.topic) {
        Some((operation, response)) => IncomingMessage::Shadow {
            operation,
            response,
            payload: message.payload,
        },
        None => IncomingMessage::Subscribed(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sl_protocol::Qos;

    fn topics() -> ShadowTopics {
        ShadowTopics::new("$aws/things", "lamp0001")
    }

    fn message(topic: &str, payload: &[u8]) -> MqttMessage {
        MqttMessage {
            topic: topic.into(),
            payload: payload.to_vec(),
            qos: Qos::AtLeastOnce,
        }
    }

    #[test]
    fn classify_delta() {
        let msg = classify(
            &topics(),
            message(
                "$aws/things/lamp0001/shadow/update/delta",
                br#"{"state":{"brightness":"80"}}"#,
            ),
        );
        assert!(matches!(
            msg,
            IncomingMessage::Shadow {
                operation: ShadowOperation::Update,
                response: ShadowResponse::Delta,
                ..
            }
        ));
    }

    #[test]
    fn classify_get_accepted() {
        let msg = classify(
            &topics(),
            message("$aws/things/lamp0001/shadow/get/accepted", b"{}"),
        );
        assert!(matches!(
            msg,
            IncomingMessage::Shadow {
                operation: ShadowOperation::Get,
                response: ShadowResponse::Accepted,
                ref payload,
            } if payload == b"{}"
        ));
    }

    #[test]
    fn classify_other_thing_is_subscription() {
        let msg = classify(
            &topics(),
            message("$aws/things/lamp0002/shadow/update/delta", b"{}"),
        );
        assert!(matches!(msg, IncomingMessage::Subscribed(ref m) if m.topic.contains("lamp0002")));
    }

    #[test]
    fn classify_application_topic() {
        let msg = classify(&topics(), message("lamp/cmd", b"reboot"));
        assert!(matches!(msg, IncomingMessage::Subscribed(ref m) if m.payload == b"reboot"));
    }
}
