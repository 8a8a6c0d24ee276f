//! Protocol and transport errors.

use imbus_types::ErrorName;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("serialisation error: {0}")]
    Serialization(String),

    #[error("deserialisation error: {0}")]
    Deserialization(String),

    #[error("message size {size} exceeds maximum {max}")]
    TooLarge { size: u32, max: u32 },

    #[error("protocol violation: {reason}")]
    Violation { serial: Option<u32>, reason: String },

    #[error("stream closed unexpectedly")]
    StreamClosed,

    #[error("{name}: {message}")]
    Remote { name: ErrorName, message: String },

    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ProtocolError {
    /// Whether the stream is unusable after this error.
    ///
    /// Decode and validation failures consume exactly one frame, so the
    /// reader can carry on with the next one.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Deserialization(_) | Self::Violation { .. })
    }
}
