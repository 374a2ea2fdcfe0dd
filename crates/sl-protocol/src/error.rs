//! Protocol-level validation errors.

use thiserror::Error;

/// Errors raised while validating identities, messages, and documents.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid identity: {0}")]
    Identity(String),

    #[error("duplicate attribute name '{0}'")]
    DuplicateAttribute(String),

    #[error("invalid topic '{topic}': {reason}")]
    Topic { topic: String, reason: &'static str },

    #[error("payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("invalid QoS level {0}")]
    Qos(u8),

    #[error("invalid document: {0}")]
    Document(String),
}

/// Convenience alias for protocol results.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
