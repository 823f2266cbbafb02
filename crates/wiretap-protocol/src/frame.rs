//! Single-frame codec.
//!
//! Wire layout (RFC 6455 §5.2), most significant bit first:
//!
//! ```text
//! byte0: FIN(1) RSV(3) OPCODE(4)
//! byte1: MASK(1) PAYLOAD_LEN(7)
//!   PAYLOAD_LEN == 126 -> 2 more bytes, big-endian u16 length
//!   PAYLOAD_LEN == 127 -> 8 more bytes, big-endian u64 length
//!   MASK == 1          -> 4 byte mask key
//! payload, XORed with mask_key[i % 4] when masked
//! ```
//!
//! Only complete messages are understood. A frame with `FIN` cleared is
//! rejected with [`FrameError::FragmentationUnsupported`], and the encoder
//! never produces one.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::errors::FrameError;
use crate::opcode::OpCode;

const FIN_BIT: u8 = 0x80;
const RSV_BITS: u8 = 0x70;
const MASK_BIT: u8 = 0x80;
const LEN_BITS: u8 = 0x7F;
const LEN_U16: u8 = 126;
const LEN_U64: u8 = 127;

/// Largest possible frame header: 2 base bytes, 8 length bytes, 4 mask bytes.
pub const MAX_HEADER_LEN: usize = 14;

/// Default cap on a single frame's payload (16 MiB).
pub const DEFAULT_MAX_PAYLOAD_LEN: u64 = 16 * 1024 * 1024;

/// One decoded frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Final-fragment flag. Always `true` for frames returned by the decoder.
    pub fin: bool,
    /// Frame opcode.
    pub opcode: OpCode,
    /// Mask key, present iff the frame was masked on the wire.
    pub mask_key: Option<[u8; 4]>,
    /// Unmasked payload.
    pub payload: Bytes,
}

impl Frame {
    /// Whether the frame arrived masked.
    pub fn is_masked(&self) -> bool {
        self.mask_key.is_some()
    }

    /// Payload length in bytes.
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Status code of a close frame, if the payload carries one.
    pub fn close_code(&self) -> Option<u16> {
        if self.opcode != OpCode::Close {
            return None;
        }
        match self.payload.as_ref() {
            [hi, lo, ..] => Some(u16::from_be_bytes([*hi, *lo])),
            _ => None,
        }
    }
}

/// Which endpoint originates an encoded frame.
///
/// Server frames are never masked. Client frames must be masked with the
/// given key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    /// Sent by the server: no mask bit, no mask key.
    Server,
    /// Sent by a client, masked with this key.
    Client([u8; 4]),
}

/// Frame encoder/decoder.
///
/// Decoding is bounded by `max_payload_len`; encoding is stateless.
#[derive(Clone, Copy, Debug)]
pub struct FrameCodec {
    max_payload_len: u64,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD_LEN)
    }
}

impl FrameCodec {
    /// Create a codec that rejects payloads longer than `max_payload_len`.
    pub fn new(max_payload_len: u64) -> Self {
        Self { max_payload_len }
    }

    /// Configured payload limit.
    pub fn max_payload_len(&self) -> u64 {
        self.max_payload_len
    }

    /// Read exactly one frame from `reader`.
    ///
    /// End of stream before the first header byte is [`FrameError::StreamClosed`];
    /// end of stream anywhere later is a [`FrameError::Stream`] error.
    pub async fn decode<R>(&self, reader: &mut R) -> Result<Frame, FrameError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut header = [0u8; 2];
        if reader.read(&mut header[..1]).await? == 0 {
            return Err(FrameError::StreamClosed);
        }
        let _ = reader.read_exact(&mut header[1..]).await?;

        let fin = header[0] & FIN_BIT != 0;
        if !fin {
            return Err(FrameError::FragmentationUnsupported);
        }
        let rsv = (header[0] & RSV_BITS) >> 4;
        if rsv != 0 {
            return Err(FrameError::ReservedBitsSet(rsv));
        }
        let opcode =
            OpCode::from_u8(header[0]).ok_or(FrameError::UnknownOpcode(header[0] & 0x0F))?;
        if opcode == OpCode::Continuation {
            return Err(FrameError::FragmentationUnsupported);
        }

        let masked = header[1] & MASK_BIT != 0;
        let len = match header[1] & LEN_BITS {
            LEN_U16 => {
                let mut ext = [0u8; 2];
                let _ = reader.read_exact(&mut ext).await?;
                u64::from(u16::from_be_bytes(ext))
            }
            LEN_U64 => {
                let mut ext = [0u8; 8];
                let _ = reader.read_exact(&mut ext).await?;
                u64::from_be_bytes(ext)
            }
            short => u64::from(short),
        };
        if len > self.max_payload_len {
            return Err(FrameError::PayloadTooLarge {
                len,
                max: self.max_payload_len,
            });
        }
        let len = usize::try_from(len).map_err(|_| FrameError::PayloadTooLarge {
            len,
            max: self.max_payload_len,
        })?;

        let mask_key = if masked {
            let mut key = [0u8; 4];
            let _ = reader.read_exact(&mut key).await?;
            Some(key)
        } else {
            None
        };

        let mut payload = vec![0u8; len];
        let _ = reader.read_exact(&mut payload).await?;
        if let Some(key) = mask_key {
            apply_mask(&mut payload, key);
        }

        Ok(Frame {
            fin,
            opcode,
            mask_key,
            payload: Bytes::from(payload),
        })
    }

    /// Encode a complete (`FIN` set) frame using the minimal length encoding.
    pub fn encode(opcode: OpCode, payload: &[u8], origin: Origin) -> Vec<u8> {
        let mut out = Vec::with_capacity(MAX_HEADER_LEN + payload.len());
        out.push(FIN_BIT | opcode.as_u8());

        let mask_bit = match origin {
            Origin::Server => 0,
            Origin::Client(_) => MASK_BIT,
        };
        let len = payload.len();
        if len < usize::from(LEN_U16) {
            out.push(mask_bit | len as u8);
        } else if let Ok(short) = u16::try_from(len) {
            out.push(mask_bit | LEN_U16);
            out.extend_from_slice(&short.to_be_bytes());
        } else {
            out.push(mask_bit | LEN_U64);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }

        match origin {
            Origin::Server => out.extend_from_slice(payload),
            Origin::Client(key) => {
                out.extend_from_slice(&key);
                let start = out.len();
                out.extend_from_slice(payload);
                apply_mask(&mut out[start..], key);
            }
        }
        out
    }
}

/// XOR `buf` in place with the repeating 4-byte `key`. Masking and
/// unmasking are the same operation.
pub fn apply_mask(buf: &mut [u8], key: [u8; 4]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}
