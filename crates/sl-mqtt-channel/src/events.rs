//! Inbound half of a transport session: network events and disconnect reasons.

use async_trait::async_trait;
use rumqttc::{
    ConnectionError, Event, EventLoop, Outgoing, Packet, StateError, SubscribeReasonCode,
};

use sl_protocol::{DisconnectReason, MqttMessage};

use crate::channel::from_rumqttc;

/// Network events the session's owner reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// CONNACK received.
    Connected,
    /// A PUBLISH arrived from the broker.
    Message(MqttMessage),
    /// An outbound PUBLISH left the client. `pkid` is 0 for QoS 0.
    PublishSent { pkid: u16 },
    /// The broker acknowledged a publish (PUBACK for QoS 1, PUBCOMP for QoS 2).
    PublishAcked { pkid: u16 },
    /// SUBACK received; `success` is false if any filter was refused.
    Subscribed { pkid: u16, success: bool },
    /// UNSUBACK received.
    Unsubscribed { pkid: u16 },
    PingSent,
    PingResponse,
    /// Our DISCONNECT was written to the network.
    DisconnectSent,
    /// Anything else (PUBREC, PUBREL, ...).
    Other,
}

/// Source of network events for one session.
///
/// `poll` returns the next event, or the reason the connection was lost.
/// After an error the source is finished.
#[async_trait]
pub trait EventSource: Send {
    async fn poll(&mut self) -> Result<TransportEvent, DisconnectReason>;
}

/// Classify a connection error into the reason reported to the application.
pub fn disconnect_reason(error: &ConnectionError) -> DisconnectReason {
    match error {
        ConnectionError::MqttState(StateError::AwaitPingResp) => DisconnectReason::KeepAliveTimeout,
        ConnectionError::MqttState(
            StateError::Deserialization(_) | StateError::WrongPacket | StateError::Unsolicited(_),
        )
        | ConnectionError::NotConnAck(_) => DisconnectReason::BadPacket,
        ConnectionError::RequestsDone => DisconnectReason::Called,
        _ => DisconnectReason::NetPollTimeout,
    }
}

/// Translate a rumqttc event.
pub fn translate(event: Event) -> TransportEvent {
    match event {
        Event::Incoming(packet) => match packet {
            Packet::ConnAck(_) => TransportEvent::Connected,
            Packet::Publish(publish) => TransportEvent::Message(MqttMessage {
                topic: publish.topic,
                payload: publish.payload.to_vec(),
                qos: from_rumqttc(publish.qos),
            }),
            Packet::PubAck(ack) => TransportEvent::PublishAcked { pkid: ack.pkid },
            Packet::PubComp(comp) => TransportEvent::PublishAcked { pkid: comp.pkid },
            Packet::SubAck(ack) => TransportEvent::Subscribed {
                pkid: ack.pkid,
                success: ack
                    .return_codes
                    .iter()
                    .all(|code| matches!(code, SubscribeReasonCode::Success(_))),
            },
            Packet::UnsubAck(ack) => TransportEvent::Unsubscribed { pkid: ack.pkid },
            Packet::PingResp => TransportEvent::PingResponse,
            _ => TransportEvent::Other,
        },
        Event::Outgoing(outgoing) => match outgoing {
            Outgoing::Publish(pkid) => TransportEvent::PublishSent { pkid },
            Outgoing::PingReq => TransportEvent::PingSent,
            Outgoing::Disconnect => TransportEvent::DisconnectSent,
            _ => TransportEvent::Other,
        },
    }
}

/// `EventSource` backed by a rumqttc `EventLoop`.
pub struct MqttEvents {
    eventloop: EventLoop,
}

impl MqttEvents {
    pub fn new(eventloop: EventLoop) -> Self {
        Self { eventloop }
    }
}

#[async_trait]
impl EventSource for MqttEvents {
    async fn poll(&mut self) -> Result<TransportEvent, DisconnectReason> {
        match self.eventloop.poll().await {
            Ok(event) => Ok(translate(event)),
            Err(e) => {
                let reason = disconnect_reason(&e);
                tracing::warn!(error = %e, reason = %reason, "MQTT connection lost");
                Err(reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::{PubAck, Publish, QoS, SubAck};
    use sl_protocol::Qos;

    #[test]
    fn incoming_publish_becomes_message() {
        let publish = Publish::new("lamp/cmd", QoS::AtLeastOnce, b"on".to_vec());
        let event = translate(Event::Incoming(Packet::Publish(publish)));
        assert_eq!(
            event,
            TransportEvent::Message(MqttMessage {
                topic: "lamp/cmd".into(),
                payload: b"on".to_vec(),
                qos: Qos::AtLeastOnce,
            })
        );
    }

    #[test]
    fn acks_carry_packet_ids() {
        let event = translate(Event::Incoming(Packet::PubAck(PubAck::new(7))));
        assert_eq!(event, TransportEvent::PublishAcked { pkid: 7 });

        let event = translate(Event::Outgoing(Outgoing::Publish(7)));
        assert_eq!(event, TransportEvent::PublishSent { pkid: 7 });
    }

    #[test]
    fn refused_subscription_is_reported() {
        let ack = SubAck::new(
            3,
            vec![
                SubscribeReasonCode::Success(QoS::AtLeastOnce),
                SubscribeReasonCode::Failure,
            ],
        );
        let event = translate(Event::Incoming(Packet::SubAck(ack)));
        assert_eq!(
            event,
            TransportEvent::Subscribed {
                pkid: 3,
                success: false
            }
        );
    }

    #[test]
    fn missing_ping_response_is_keep_alive_timeout() {
        let err = ConnectionError::MqttState(StateError::AwaitPingResp);
        assert_eq!(disconnect_reason(&err), DisconnectReason::KeepAliveTimeout);
    }

    #[test]
    fn unexpected_packets_are_bad_packets() {
        let err = ConnectionError::MqttState(StateError::WrongPacket);
        assert_eq!(disconnect_reason(&err), DisconnectReason::BadPacket);
        let err = ConnectionError::MqttState(StateError::Unsolicited(4));
        assert_eq!(disconnect_reason(&err), DisconnectReason::BadPacket);
    }

    #[test]
    fn network_failures_are_poll_timeouts() {
        assert_eq!(
            disconnect_reason(&ConnectionError::NetworkTimeout),
            DisconnectReason::NetPollTimeout
        );
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert_eq!(
            disconnect_reason(&ConnectionError::Io(io)),
            DisconnectReason::NetPollTimeout
        );
    }

    #[test]
    fn requests_done_is_a_called_disconnect() {
        assert_eq!(
            disconnect_reason(&ConnectionError::RequestsDone),
            DisconnectReason::Called
        );
    }
}
