//! Per-client callback set.
//!
//! Each [`DeviceClient`](crate::DeviceClient) owns one `Callbacks` value.
//! Events are delivered synchronously on the session task that observed them;
//! an empty slot is a no-op.

use std::fmt;
use std::sync::Arc;

use sl_protocol::{DisconnectReason, MqttMessage, OperationType, ShadowDataType};

/// Outcome of a client-to-server operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationResult {
    Success,
    Failure(String),
}

impl OperationResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for OperationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("SUCCESS"),
            Self::Failure(reason) => f.write_str(reason),
        }
    }
}

/// Payload of the operation-complete and subscription-message callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MqttInfo {
    /// A client-to-server operation finished.
    Operation {
        operation: OperationType,
        result: OperationResult,
    },
    /// A message arrived on an application subscription.
    Message(MqttMessage),
}

pub type InfoCallback = Arc<dyn Fn(&MqttInfo) + Send + Sync>;
pub type DisconnectCallback = Arc<dyn Fn(DisconnectReason) + Send + Sync>;
pub type ShadowParamCallback = Arc<dyn Fn(ShadowDataType, &[u8]) + Send + Sync>;
pub type UpdateResultCallback = Arc<dyn Fn(&str) + Send + Sync>;
pub type AttributeCallback = Arc<dyn Fn(&str, &str, bool) + Send + Sync>;

/// Callback slots registered with a client.
#[derive(Clone, Default)]
pub struct Callbacks {
    operation_complete: Option<InfoCallback>,
    subscription_message: Option<InfoCallback>,
    disconnect: Option<DisconnectCallback>,
    shadow_param: Option<ShadowParamCallback>,
    update_result: Option<UpdateResultCallback>,
    attribute: Option<AttributeCallback>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_operation_complete(mut self, f: impl Fn(&MqttInfo) + Send + Sync + 'static) -> Self {
        self.operation_complete = Some(Arc::new(f));
        self
    }

    pub fn on_subscription_message(mut self, f: impl Fn(&MqttInfo) + Send + Sync + 'static) -> Self {
        self.subscription_message = Some(Arc::new(f));
        self
    }

    pub fn on_disconnect(mut self, f: impl Fn(DisconnectReason) + Send + Sync + 'static) -> Self {
        self.disconnect = Some(Arc::new(f));
        self
    }

    /// Raw shadow documents: GET responses, deltas and update documents.
    pub fn on_shadow_param(
        mut self,
        f: impl Fn(ShadowDataType, &[u8]) + Send + Sync + 'static,
    ) -> Self {
        self.shadow_param = Some(Arc::new(f));
        self
    }

    /// `"SUCCESS"` or `"REJECTED: <code> <message>"` for each shadow update.
    pub fn on_update_result(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.update_result = Some(Arc::new(f));
        self
    }

    /// Managed attribute changed: `(key, value, is_delta)`.
    pub fn on_attribute(mut self, f: impl Fn(&str, &str, bool) + Send + Sync + 'static) -> Self {
        self.attribute = Some(Arc::new(f));
        self
    }

    pub(crate) fn operation_complete(&self, operation: OperationType, result: OperationResult) {
        if let Some(cb) = &self.operation_complete {
            cb(&MqttInfo::Operation { operation, result });
        }
    }

    pub(crate) fn subscription_message(&self, message: MqttMessage) {
        if let Some(cb) = &self.subscription_message {
            cb(&MqttInfo::Message(message));
        }
    }

    pub(crate) fn disconnect(&self, reason: DisconnectReason) {
        if let Some(cb) = &self.disconnect {
            cb(reason);
        }
    }

    pub(crate) fn shadow_param(&self, kind: ShadowDataType, document: &[u8]) {
        if let Some(cb) = &self.shadow_param {
            cb(kind, document);
        }
    }

    pub(crate) fn update_result(&self, result: &str) {
        if let Some(cb) = &self.update_result {
            cb(result);
        }
    }

    pub(crate) fn attribute(&self, key: &str, value: &str, is_delta: bool) {
        if let Some(cb) = &self.attribute {
            cb(key, value, is_delta);
        }
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("operation_complete", &self.operation_complete.is_some())
            .field("subscription_message", &self.subscription_message.is_some())
            .field("disconnect", &self.disconnect.is_some())
            .field("shadow_param", &self.shadow_param.is_some())
            .field("update_result", &self.update_result.is_some())
            .field("attribute", &self.attribute.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sl_protocol::Qos;
    use std::sync::Mutex;

    #[test]
    fn empty_slots_are_no_ops() {
        let callbacks = Callbacks::new();
        callbacks.disconnect(DisconnectReason::Called);
        callbacks.update_result("SUCCESS");
        callbacks.attribute("brightness", "80", true);
        callbacks.operation_complete(OperationType::Subscribe, OperationResult::Success);
    }

    #[test]
    fn info_payload_is_tagged() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callbacks = Callbacks::new()
            .on_operation_complete({
                let sink = sink.clone();
                move |info| sink.lock().unwrap().push(info.clone())
            })
            .on_subscription_message(move |info| sink.lock().unwrap().push(info.clone()));

        callbacks.operation_complete(OperationType::PublishToServer, OperationResult::Success);
        callbacks.subscription_message(MqttMessage {
            topic: "lamp/cmd".into(),
            payload: b"on".to_vec(),
            qos: Qos::AtLeastOnce,
        });

        let seen = seen.lock().unwrap();
        assert!(matches!(
            &seen[0],
            MqttInfo::Operation { operation: OperationType::PublishToServer, result } if result.is_success()
        ));
        assert!(matches!(&seen[1], MqttInfo::Message(m) if m.topic == "lamp/cmd"));
    }

    #[test]
    fn operation_result_renders() {
        assert_eq!(OperationResult::Success.to_string(), "SUCCESS");
        assert_eq!(
            OperationResult::Failure("session closed".into()).to_string(),
            "session closed"
        );
    }

    #[test]
    fn debug_shows_registered_slots() {
        let callbacks = Callbacks::new().on_disconnect(|_| {});
        let text = format!("{callbacks:?}");
        assert!(text.contains("disconnect: true"));
        assert!(text.contains("attribute: false"));
    }
}
