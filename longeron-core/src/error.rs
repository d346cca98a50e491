//! Longeron Error Types
//!
//! Comprehensive error handling for the engine core. Codec crates layer
//! their own `DecodeError`/`EncodeError` details on top of these.

use std::io;
use thiserror::Error;

/// Main error type for engine operations
#[derive(Error, Debug)]
pub enum CoreError {
    /// IO error during socket operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Frame decoding failed (connection-fatal)
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Frame encoding failed
    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    /// Operation timed out
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Connection closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// Event loop no longer accepts work
    #[error("Event loop closed")]
    LoopClosed,

    /// Channel send error
    #[error("Channel send error")]
    ChannelSend,

    /// Channel receive error
    #[error("Channel receive error")]
    ChannelRecv,

    /// Handler rejected a frame
    #[error("Handler error: {0}")]
    Handler(String),
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Create a handler error with a message
    pub fn handler(msg: impl Into<String>) -> Self {
        Self::Handler(msg.into())
    }

    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
            Self::Timeout(_) => true,
            _ => false,
        }
    }

    /// Check if this error should close the connection
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionClosed | Self::Decode(_) | Self::ChannelSend | Self::ChannelRecv
        )
    }
}

/// Decoding failures.
///
/// An incomplete frame is NOT an error: decoders signal it by returning
/// `Ok(None)` so the loop can deliver more bytes later.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Malformed input (bad start line, bad header, protocol violation)
    #[error("Malformed input: {0}")]
    Malformed(String),

    /// Declared body size exceeds the configured limit
    #[error("Payload too large: {size} bytes (limit: {limit})")]
    PayloadTooLarge { size: usize, limit: usize },

    /// A wire feature the decoder deliberately does not implement
    #[error("Unsupported: {0}")]
    Unsupported(&'static str),
}

impl DecodeError {
    /// Create a malformed-input error with a message
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }
}

/// Encoding failures.
///
/// Buffers allocated during a failed encode attempt are owned by the
/// encoder and dropped before the error propagates, so the pool never
/// leaks units on this path.
#[derive(Error, Debug)]
pub enum EncodeError {
    /// The frame cannot be represented on the wire
    #[error("Unencodable frame: {0}")]
    Unencodable(String),

    /// Frame exceeds the configured maximum size
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },
}

impl EncodeError {
    /// Create an unencodable-frame error with a message
    pub fn unencodable(msg: impl Into<String>) -> Self {
        Self::Unencodable(msg.into())
    }
}

/// Attribute-key registration attempted after the owner type's key set
/// was frozen by its first constructed instance.
///
/// This is a programmer error: keys must be declared before any
/// attribute map for the owner type exists.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("attribute registry for `{owner}` is frozen; cannot register key `{name}`")]
pub struct FrozenRegistryError {
    /// Type name of the owner whose key set is frozen
    pub owner: &'static str,
    /// Name of the key that could not be registered
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_classification() {
        let timeout = CoreError::Timeout(std::time::Duration::from_secs(1));
        assert!(timeout.is_recoverable());

        let interrupted = CoreError::Io(io::Error::new(io::ErrorKind::Interrupted, "sig"));
        assert!(interrupted.is_recoverable());

        let closed = CoreError::ConnectionClosed;
        assert!(!closed.is_recoverable());
        assert!(closed.is_connection_error());
    }

    #[test]
    fn decode_errors_are_connection_fatal() {
        let err = CoreError::Decode(DecodeError::malformed("bad start line"));
        assert!(err.is_connection_error());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn payload_too_large_carries_sizes() {
        let err = DecodeError::PayloadTooLarge { size: 4096, limit: 1024 };
        let msg = err.to_string();
        assert!(msg.contains("4096"));
        assert!(msg.contains("1024"));
    }
}
