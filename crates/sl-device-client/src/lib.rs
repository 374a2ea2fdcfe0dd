//! shadowlink device client: one device, one MQTT session, one mirrored
//! shadow document.
//!
//! [`DeviceClient`] is the entry point. It connects through a transport
//! [`Connector`](sl_mqtt_channel::Connector), keeps the shadow in sync,
//! delivers events to the registered [`Callbacks`] and reconnects with
//! backoff when the session is lost.

pub mod backoff;
pub mod callbacks;
pub mod client;
pub mod config;
pub mod error;
mod publish_queue;
mod session;
pub mod shadow;
pub mod supervisor;

pub use callbacks::{Callbacks, MqttInfo, OperationResult};
pub use client::{DeviceClient, WeakDeviceClient};
pub use config::{ClientConfig, PublishConfig, ReconnectConfig};
pub use error::{ClientError, ClientResult};
pub use shadow::ShadowDocument;
pub use supervisor::ConnectionState;

pub use sl_protocol::document::parse_value;
pub use sl_protocol::{DisconnectReason, MqttMessage, OperationType, Qos, ShadowDataType};

/// Version of this client library.
pub fn sdk_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    #[test]
    fn version_matches_manifest() {
        assert_eq!(super::sdk_version(), env!("CARGO_PKG_VERSION"));
        assert!(!super::sdk_version().is_empty());
    }
}
