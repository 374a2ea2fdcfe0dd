//! MQTT channel error types.

use thiserror::Error;

/// Errors that can occur during MQTT operations.
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("connection timed out after {timeout_secs}s waiting for CONNACK")]
    ConnectTimeout { timeout_secs: u64 },

    #[error("publish error: {0}")]
    Publish(String),

    #[error("subscribe error: {0}")]
    Subscribe(String),

    #[error("unsubscribe error: {0}")]
    Unsubscribe(String),

    /// The transport refused a topic after `sent` had already gone out.
    #[error("unsubscribe error after {} topics were sent: {reason}", .sent.len())]
    PartialUnsubscribe { sent: Vec<String>, reason: String },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("invalid message: {0}")]
    Protocol(#[from] sl_protocol::ProtocolError),

    #[error("{0}")]
    Other(String),
}

/// Convenience alias for MQTT results.
pub type MqttResult<T> = Result<T, MqttError>;
