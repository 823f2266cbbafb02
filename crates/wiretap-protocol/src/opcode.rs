//! Frame opcodes.

use std::fmt;

/// The 4-bit opcode carried in the low nibble of a frame's first byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpCode {
    /// `0x0`, continues a fragmented message.
    Continuation,
    /// `0x1`, UTF-8 text payload.
    Text,
    /// `0x2`, arbitrary binary payload.
    Binary,
    /// `0x8`, connection close.
    Close,
    /// `0x9`, liveness probe.
    Ping,
    /// `0xA`, liveness reply.
    Pong,
}

impl OpCode {
    /// Parse the low nibble of a header byte. Undefined opcodes yield `None`.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value & 0x0F {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }

    /// Wire value of this opcode.
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
        }
    }

    /// Whether this is a control opcode (close, ping, pong).
    pub fn is_control(self) -> bool {
        self.as_u8() & 0x08 != 0
    }

    /// Whether this opcode carries application data (text or binary).
    pub fn is_data(self) -> bool {
        matches!(self, Self::Text | Self::Binary)
    }

    /// Lowercase name used in log output.
    pub fn name(self) -> &'static str {
        match self {
            Self::Continuation => "continuation",
            Self::Text => "text",
            Self::Binary => "binary",
            Self::Close => "close",
            Self::Ping => "ping",
            Self::Pong => "pong",
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
