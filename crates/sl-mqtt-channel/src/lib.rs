//! MQTT transport session for shadowlink.
//!
//! Provides the connection primitives the device client builds on:
//! - `Channel` trait for publish/subscribe/unsubscribe/disconnect (mockable)
//! - `EventSource` trait for network events and disconnect reasons
//! - `Connector` trait for opening sessions, with the rumqttc-backed `MqttConnector`
//! - TLS (mTLS) setup from inline or file-path credentials
//! - `ShadowClient` for shadow requests
//! - `IncomingMessage` classification for dispatching events
//! - In-memory mocks for testing without a broker

pub mod channel;
pub mod config;
pub mod connector;
pub mod error;
pub mod events;
pub mod handler;
pub mod mock;
pub mod shadows;
pub mod tls;

// Re-exports for convenience.
pub use channel::{Channel, MqttChannel};
pub use config::MqttConfig;
pub use connector::{Connector, MqttConnector, Session};
pub use error::{MqttError, MqttResult};
pub use events::{EventSource, MqttEvents, TransportEvent};
pub use handler::{IncomingMessage, classify};
pub use mock::{MockBroker, MockChannel, MockConnector, MockEvents, PublishedMessage, mock_session};
pub use shadows::ShadowClient;
