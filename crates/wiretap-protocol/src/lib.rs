//! # wiretap-protocol
//!
//! The WebSocket wire protocol, free of any socket or session knowledge.
//!
//! - [`frame`]: encode/decode of single, unfragmented frames (RFC 6455 §5.2)
//! - [`handshake`]: opening handshake validation and the accept token (§4.2)
//! - [`errors`]: decode and handshake error taxonomy

#![deny(unsafe_code)]

pub mod errors;
pub mod frame;
pub mod handshake;
pub mod opcode;

pub use errors::{FrameError, HandshakeError};
pub use frame::{Frame, FrameCodec, Origin};
pub use handshake::{AcceptToken, Handshake, HandshakeRequest, negotiate};
pub use opcode::OpCode;
