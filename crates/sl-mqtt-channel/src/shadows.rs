//! Device shadow MQTT requests.
//!
//! Typed helpers for publishing shadow requests and subscribing to the
//! shadow response topics through any `Channel`.

use sl_protocol::shadows::{ShadowGetRequest, ShadowUpdateRequest};
use sl_protocol::{Qos, ShadowTopics};

use crate::channel::Channel;
use crate::error::{MqttError, MqttResult};

/// Shadow operations backed by a `Channel` implementation.
///
/// Wraps any `Channel` (real or mock) to provide shadow-specific
/// publish and subscribe methods.
pub struct ShadowClient<'a, C: Channel + ?Sized> {
    channel: &'a C,
    topics: &'a ShadowTopics,
}

impl<'a, C: Channel + ?Sized> ShadowClient<'a, C> {
    pub fn new(channel: &'a C, topics: &'a ShadowTopics) -> Self {
        Self { channel, topics }
    }

    /// Subscribe to every shadow response topic with a single SUBSCRIBE.
    pub async fn subscribe_responses(&self) -> MqttResult<()> {
        let filters: Vec<(String, Qos)> = self
            .topics
            .response_filters()
            .into_iter()
            .map(|f| (f, Qos::AtLeastOnce))
            .collect();
        self.channel.subscribe_many(&filters).await
    }

    /// Ask the server for the full shadow document.
    pub async fn request_get(&self, client_token: &str) -> MqttResult<()> {
        let body = ShadowGetRequest {
            client_token: client_token.to_string(),
        };
        let bytes = serde_json::to_vec(&body).map_err(|e| MqttError::Other(e.to_string()))?;
        self.channel
            .publish(&self.topics.get(), &bytes, Qos::AtLeastOnce)
            .await
    }

    /// Publish a shadow update (reported state).
    pub async fn publish_update(&self, update: &ShadowUpdateRequest) -> MqttResult<()> {
        let bytes = serde_json::to_vec(update).map_err(|e| MqttError::Other(e.to_string()))?;
        self.channel
            .publish(&self.topics.update(), &bytes, Qos::AtLeastOnce)
            .await
    }

    /// Ask the server to delete the whole shadow document.
    pub async fn request_delete(&self) -> MqttResult<()> {
        self.channel
            .publish(&self.topics.delete(), b"", Qos::AtLeastOnce)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockChannel;
    use serde_json::Value;
    use sl_protocol::shadows::parse_update_document;

    fn topics() -> ShadowTopics {
        ShadowTopics::new("$aws/things", "lamp0001")
    }

    #[tokio::test]
    async fn publish_shadow_update() {
        let mock = MockChannel::new();
        let topics = topics();
        let client = ShadowClient::new(&mock, &topics);

        let update = ShadowUpdateRequest::new(
            parse_update_document(r#"{"brightness":"80"}"#).unwrap(),
            true,
            "acct-0001-1".into(),
        );
        client.publish_update(&update).await.unwrap();

        let msgs = mock.published();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].topic, "$aws/things/lamp0001/shadow/update");
        let payload: Value = serde_json::from_slice(&msgs[0].payload).unwrap();
        assert_eq!(payload["state"]["reported"]["brightness"], "80");
        assert_eq!(payload["state"]["desired"]["brightness"], Value::Null);
        assert_eq!(payload["clientToken"], "acct-0001-1");
    }

    #[tokio::test]
    async fn get_request_carries_token() {
        let mock = MockChannel::new();
        let topics = topics();
        let client = ShadowClient::new(&mock, &topics);

        client.request_get("acct-0001-2").await.unwrap();

        let last = mock.last_published().unwrap();
        assert_eq!(last.topic, "$aws/things/lamp0001/shadow/get");
        assert_eq!(last.payload, br#"{"clientToken":"acct-0001-2"}"#);
    }

    #[tokio::test]
    async fn delete_request_is_empty() {
        let mock = MockChannel::new();
        let topics = topics();
        ShadowClient::new(&mock, &topics).request_delete().await.unwrap();

        let msgs = mock.published_to("$aws/things/lamp0001/shadow/delete");
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].payload.is_empty());
    }

    #[tokio::test]
    async fn subscribe_all_responses() {
        let mock = MockChannel::new();
        let topics = topics();
        ShadowClient::new(&mock, &topics)
            .subscribe_responses()
            .await
            .unwrap();

        assert!(mock.is_subscribed_to("$aws/things/lamp0001/shadow/update/delta"));
        assert!(mock.is_subscribed_to("$aws/things/lamp0001/shadow/get/accepted"));
        assert_eq!(mock.subscriptions().len(), 8);
    }
}
