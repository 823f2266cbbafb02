//! Protocol error types.

use std::io;

use thiserror::Error;

/// Errors produced while decoding a frame from a byte stream.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The frame had `FIN` cleared or was a continuation frame.
    #[error("fragmented frames are not supported")]
    FragmentationUnsupported,
    /// The peer closed the stream on a frame boundary.
    #[error("stream closed by peer")]
    StreamClosed,
    /// Any other I/O failure, including a stream that ends mid-frame.
    #[error("stream error: {0}")]
    Stream(#[from] io::Error),
    /// RSV1..RSV3 set without a negotiated extension.
    #[error("reserved bits set: {0:#05b}")]
    ReservedBitsSet(u8),
    /// Opcode outside the set defined by RFC 6455.
    #[error("unknown opcode {0:#x}")]
    UnknownOpcode(u8),
    /// Declared payload length exceeds the configured limit.
    #[error("payload of {len} bytes exceeds limit of {max} bytes")]
    PayloadTooLarge {
        /// Length declared in the frame header.
        len: u64,
        /// Configured maximum.
        max: u64,
    },
}

impl FrameError {
    /// Short classification string for structured logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FragmentationUnsupported => "fragmentation_unsupported",
            Self::StreamClosed => "stream_closed",
            Self::Stream(_) => "stream_error",
            Self::ReservedBitsSet(_) => "reserved_bits_set",
            Self::UnknownOpcode(_) => "unknown_opcode",
            Self::PayloadTooLarge { .. } => "payload_too_large",
        }
    }

    /// Whether this is the graceful end-of-stream case.
    pub fn is_stream_closed(&self) -> bool {
        matches!(self, Self::StreamClosed)
    }
}

/// Reasons an upgrade request is not a valid WebSocket handshake.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum HandshakeError {
    /// `Upgrade` header missing or not exactly `websocket`.
    #[error("invalid handshake: Upgrade header must be \"websocket\"")]
    NotWebSocketUpgrade,
    /// `Sec-WebSocket-Key` missing or empty.
    #[error("invalid handshake: missing Sec-WebSocket-Key")]
    MissingKey,
}

impl HandshakeError {
    /// Short classification string for structured logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotWebSocketUpgrade => "not_websocket_upgrade",
            Self::MissingKey => "missing_key",
        }
    }
}
