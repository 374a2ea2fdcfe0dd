//! Shared types for shadowlink: device identity, MQTT message vocabulary,
//! shadow topics, shadow wire payloads and the zero-copy document parser.

pub mod document;
pub mod error;
pub mod identity;
pub mod message;
pub mod shadows;
pub mod topics;

pub use error::{ProtocolError, ProtocolResult};
pub use identity::{CredentialMode, Credentials, DeviceIdentity};
pub use message::{DisconnectReason, MqttMessage, OperationType, Qos, ShadowDataType};
pub use topics::ShadowTopics;
