//! Shared harness for end-to-end tests.
//!
//! Connects a real `DeviceClient` through a `MockConnector`, records every
//! callback it raises and lets the test play the broker through `MockBroker`.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use sl_device_client::{
    Callbacks, ClientConfig, DeviceClient, DisconnectReason, MqttInfo, OperationType,
    ShadowDataType,
};
use sl_mqtt_channel::{MockBroker, MockConnector, PublishedMessage};
use sl_protocol::{DeviceIdentity, ShadowTopics};

pub const ACCOUNT: &str = "acct";
pub const PRODUCT: &str = "lamp";

/// Config for device `serial` managing `brightness` and `lightMode`, with
/// reconnect delays short enough for tests.
pub fn config(serial: &str) -> ClientConfig {
    let identity = DeviceIdentity::derive("localhost", 1883, ACCOUNT, PRODUCT, serial)
        .with_attributes(["brightness", "lightMode"]);
    let mut config = ClientConfig::new(identity);
    config.mqtt.use_tls = false;
    config.reconnect.initial_delay_ms = 10;
    config.reconnect.max_delay_ms = 50;
    config.reconnect.jitter = 0.0;
    config
}

/// Everything the client reported through its callbacks.
#[derive(Clone, Default)]
pub struct Recorder {
    pub attributes: Arc<Mutex<Vec<(String, String, bool)>>>,
    pub params: Arc<Mutex<Vec<(ShadowDataType, Vec<u8>)>>>,
    pub results: Arc<Mutex<Vec<String>>>,
    pub disconnects: Arc<Mutex<Vec<DisconnectReason>>>,
    pub operations: Arc<Mutex<Vec<(OperationType, bool)>>>,
    pub messages: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
}

impl Recorder {
    pub fn callbacks(&self) -> Callbacks {
        let attributes = self.attributes.clone();
        let params = self.params.clone();
        let results = self.results.clone();
        let disconnects = self.disconnects.clone();
        let operations = self.operations.clone();
        let messages = self.messages.clone();

        Callbacks::new()
            .on_attribute(move |k, v, delta| {
                attributes.lock().unwrap().push((k.into(), v.into(), delta))
            })
            .on_shadow_param(move |kind, doc| params.lock().unwrap().push((kind, doc.to_vec())))
            .on_update_result(move |r| results.lock().unwrap().push(r.into()))
            .on_disconnect(move |reason| disconnects.lock().unwrap().push(reason))
            .on_operation_complete(move |info| {
                if let MqttInfo::Operation { operation, result } = info {
                    operations.lock().unwrap().push((*operation, result.is_success()));
                }
            })
            .on_subscription_message(move |info| {
                if let MqttInfo::Message(m) = info {
                    messages.lock().unwrap().push((m.topic.clone(), m.payload.clone()));
                }
            })
    }

    pub fn attributes(&self) -> Vec<(String, String, bool)> {
        self.attributes.lock().unwrap().clone()
    }

    pub fn params(&self) -> Vec<(ShadowDataType, Vec<u8>)> {
        self.params.lock().unwrap().clone()
    }

    pub fn results(&self) -> Vec<String> {
        self.results.lock().unwrap().clone()
    }

    pub fn disconnects(&self) -> Vec<DisconnectReason> {
        self.disconnects.lock().unwrap().clone()
    }

    pub fn operations(&self) -> Vec<(OperationType, bool)> {
        self.operations.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<(String, Vec<u8>)> {
        self.messages.lock().unwrap().clone()
    }
}

/// One connected device and the broker it talks to.
pub struct Device {
    pub client: DeviceClient,
    pub connector: Arc<MockConnector>,
    pub recorder: Recorder,
    pub topics: ShadowTopics,
}

impl Device {
    /// Connect device `serial` through an acknowledging mock broker.
    pub async fn connect(serial: &str) -> Self {
        Self::connect_with(serial, Arc::new(MockConnector::new()), config(serial)).await
    }

    pub async fn connect_with(serial: &str, connector: Arc<MockConnector>, config: ClientConfig) -> Self {
        let recorder = Recorder::default();
        let topics = ShadowTopics::new(&config.mqtt.shadow_topic_prefix, &format!("{PRODUCT}{serial}"));
        let client = DeviceClient::create_with_connector(config, recorder.callbacks(), connector.clone())
            .await
            .unwrap();

        let device = Self {
            client,
            connector,
            recorder,
            topics,
        };
        // Shadow responses are subscribed before any request is made.
        let delta = device.topics.delta();
        assert!(eventually(|| device.broker().channel().is_subscribed_to(&delta)).await);
        device
    }

    /// Broker side of the current session.
    pub fn broker(&self) -> MockBroker {
        self.connector.latest().unwrap()
    }

    pub fn published_to(&self, topic: &str) -> Vec<PublishedMessage> {
        self.broker().channel().published_to(topic)
    }

    /// Wait for the `n`-th (1-based) update request and return its JSON body.
    pub async fn nth_update(&self, n: usize) -> serde_json::Value {
        let topic = self.topics.update();
        assert!(eventually(|| self.published_to(&topic).len() >= n).await, "no update #{n}");
        self.published_to(&topic)[n - 1].json()
    }
}

/// Poll `check` for up to two seconds.
pub async fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..400 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

/// Give the session task a moment to process anything already queued.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
