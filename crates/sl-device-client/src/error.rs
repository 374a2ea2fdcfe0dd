//! Errors surfaced by the device client API.

use sl_mqtt_channel::MqttError;
use sl_protocol::{OperationType, ProtocolError};
use thiserror::Error;

/// Errors returned by [`DeviceClient`](crate::DeviceClient) operations.
///
/// Faults inside an established session (bad packets, keep-alive loss,
/// network timeouts) are not reported here; they reach the application once,
/// as a `DisconnectReason` on the disconnect callback.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Bad identity, credentials or configuration file.
    #[error("configuration error: {0}")]
    Config(String),

    /// TLS or socket failure while opening a session.
    #[error("connection error: {0}")]
    Connection(String),

    #[error("{operation} timed out after {timeout_ms} ms")]
    Timeout {
        operation: OperationType,
        timeout_ms: u64,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Malformed shadow document supplied by the application.
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("client has been released")]
    Released,

    #[error("no active session (reconnecting)")]
    NotConnected,

    #[error("client id '{0}' is already in use by a live client")]
    DuplicateIdentifier(String),

    #[error("request queue is full")]
    QueueFull,

    /// The session ended before the request completed.
    #[error("session closed before completion")]
    SessionClosed,

    /// The transport refused to take the request.
    #[error("transport error: {0}")]
    Transport(#[from] MqttError),
}

impl From<ProtocolError> for ClientError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Identity(_) | ProtocolError::DuplicateAttribute(_) => {
                Self::Config(err.to_string())
            }
            ProtocolError::Document(msg) => Self::InvalidDocument(msg),
            ProtocolError::Topic { .. } | ProtocolError::PayloadTooLarge { .. } | ProtocolError::Qos(_) => {
                Self::InvalidArgument(err.to_string())
            }
        }
    }
}

/// Convenience alias for client results.
pub type ClientResult<T> = Result<T, ClientError>;
