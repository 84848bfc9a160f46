use thiserror::Error;

/// Errors from framing, encoding or interpreting protocol messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Tag byte names no known message type.
    #[error("invalid message type: {0}")]
    InvalidMessageType(u8),

    /// Tag byte names a different message than the payload decodes to.
    #[error("frame tag {tag} does not match {payload} payload")]
    TagMismatch { tag: u8, payload: &'static str },

    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("framing error: {0}")]
    FramingError(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// A well-formed message arrived where another type was required.
    #[error("unexpected message: expected {expected}, got {actual}")]
    UnexpectedMessage {
        expected: &'static str,
        actual: &'static str,
    },
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
