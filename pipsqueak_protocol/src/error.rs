use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown protocol id: {0:#04x}")]
    UnknownProtocol(u8),

    #[error("unknown status event type: {0}")]
    UnknownEventType(u8),

    #[error("short buffer: expected {expected} bytes, got {actual}")]
    ShortBuffer { expected: usize, actual: usize },

    #[error("secret key must be 32 bytes, got {0}")]
    KeyLength(usize),

    #[error("frame too large: {size} bytes (limit {limit})")]
    Oversized { size: usize, limit: usize },
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
