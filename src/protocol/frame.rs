//! WebSocket frame encoding and decoding (RFC 6455 Section 5.2).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |                     Masking key (if MASK set)                 |
//! +---------------------------------------------------------------+
//! |                          Payload data                         |
//! +---------------------------------------------------------------+
//! ```

use std::sync::Arc;

use bytes::{BufMut, BytesMut};

use crate::connection::Role;
use crate::error::{Error, ProtocolError, Result};
use crate::protocol::OpCode;
use crate::protocol::mask::apply_mask_fast;
use crate::random::{self, RandomSource};

/// Maximum payload size for control frames (RFC 6455).
pub const MAX_CONTROL_FRAME_PAYLOAD: usize = 125;

/// One wire-level WebSocket frame.
///
/// The payload is always held unmasked; `mask` records the key the frame
/// travelled with, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag.
    pub fin: bool,
    /// Frame opcode.
    pub opcode: OpCode,
    /// Masking key carried on the wire.
    pub mask: Option<[u8; 4]>,
    payload: Vec<u8>,
}

impl Frame {
    /// Create an unmasked frame.
    #[must_use]
    pub fn new(fin: bool, opcode: OpCode, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            fin,
            opcode,
            mask: None,
            payload: payload.into(),
        }
    }

    /// Create a final text frame.
    #[must_use]
    pub fn text(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Text, data)
    }

    /// Create a final binary frame.
    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Binary, data)
    }

    /// Create a close frame with optional status code and reason.
    #[must_use]
    pub fn close(code: Option<u16>, reason: &str) -> Self {
        let payload = match code {
            Some(code) => {
                let mut data = code.to_be_bytes().to_vec();
                data.extend_from_slice(reason.as_bytes());
                data
            }
            None => Vec::new(),
        };
        Self::new(true, OpCode::Close, payload)
    }

    /// Create a ping frame.
    #[must_use]
    pub fn ping(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Ping, data)
    }

    /// Whether the frame carried a masking key.
    #[inline]
    #[must_use]
    pub const fn masked(&self) -> bool {
        self.mask.is_some()
    }

    /// Exact payload length in bytes.
    #[inline]
    #[must_use]
    pub fn payload_len(&self) -> u64 {
        self.payload.len() as u64
    }

    /// Get the (unmasked) payload bytes.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Take ownership of the payload.
    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

/// Outcome of a decode attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete frame occupying the first `consumed` bytes of the buffer.
    Frame {
        /// The decoded frame.
        frame: Frame,
        /// Number of buffer bytes the frame occupied.
        consumed: usize,
    },
    /// More bytes are needed; nothing was consumed.
    Incomplete {
        /// Lower bound on the number of additional bytes required.
        needed: usize,
    },
}

/// Number of bytes a frame with this payload length takes on the wire.
#[must_use]
pub const fn wire_size(payload_len: usize, masked: bool) -> usize {
    let extended = if payload_len <= 125 {
        0
    } else if payload_len <= 0xFFFF {
        2
    } else {
        8
    };
    let mask = if masked { 4 } else { 0 };
    2 + extended + mask + payload_len
}

/// Frame encoder/decoder for one side of a connection.
///
/// Decoding is a pure function of the input buffer. Encoding draws a fresh
/// masking key from the [`RandomSource`] for every frame when the role masks.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    role: Role,
    max_payload_size: usize,
    random: Arc<dyn RandomSource>,
}

impl FrameCodec {
    /// Create a codec for `role` that rejects incoming payloads above `max_payload_size`.
    #[must_use]
    pub fn new(role: Role, max_payload_size: usize, random: Arc<dyn RandomSource>) -> Self {
        Self {
            role,
            max_payload_size,
            random,
        }
    }

    /// Create a client-side codec.
    #[must_use]
    pub fn client(max_payload_size: usize, random: Arc<dyn RandomSource>) -> Self {
        Self::new(Role::Client, max_payload_size, random)
    }

    /// Encode one fragment and append it to `dst`.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidMessage` for a fragmented or oversized control frame
    /// - `Error::Random` if no masking key could be drawn
    pub fn encode(&self, opcode: OpCode, fin: bool, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
        let mask = if self.role.must_mask() {
            Some(random::mask_key(self.random.as_ref())?)
        } else {
            None
        };
        Self::encode_with_mask(opcode, fin, payload, mask, dst)
    }

    /// Encode with an explicit masking key.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidMessage` for a fragmented or oversized control frame.
    pub fn encode_with_mask(
        opcode: OpCode,
        fin: bool,
        payload: &[u8],
        mask: Option<[u8; 4]>,
        dst: &mut BytesMut,
    ) -> Result<()> {
        if opcode.is_control() {
            if !fin {
                return Err(Error::InvalidMessage(format!(
                    "{opcode} frames cannot be fragmented"
                )));
            }
            if payload.len() > MAX_CONTROL_FRAME_PAYLOAD {
                return Err(Error::InvalidMessage(format!(
                    "{opcode} payload of {} bytes exceeds {MAX_CONTROL_FRAME_PAYLOAD}",
                    payload.len()
                )));
            }
        }

        dst.reserve(wire_size(payload.len(), mask.is_some()));

        let mut byte0 = opcode.as_u8();
        if fin {
            byte0 |= 0x80;
        }
        dst.put_u8(byte0);

        let mask_bit = if mask.is_some() { 0x80 } else { 0x00 };
        match payload.len() {
            len @ 0..=125 => dst.put_u8(mask_bit | len as u8),
            len @ 126..=0xFFFF => {
                dst.put_u8(mask_bit | 126);
                dst.put_u16(len as u16);
            }
            len => {
                dst.put_u8(mask_bit | 127);
                dst.put_u64(len as u64);
            }
        }

        match mask {
            Some(key) => {
                dst.put_slice(&key);
                let start = dst.len();
                dst.put_slice(payload);
                apply_mask_fast(&mut dst[start..], key);
            }
            None => dst.put_slice(payload),
        }

        Ok(())
    }

    /// Decode the frame at the start of `buf`.
    ///
    /// Header fields are validated as soon as they are available, so an
    /// oversized declared length is rejected before its payload arrives.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::ReservedBitsSet` if any RSV bit is set
    /// - `ProtocolError::ReservedOpcode` for opcodes 0x3-0x7 and 0xB-0xF
    /// - `ProtocolError::FragmentedControlFrame` / `ControlFrameTooLarge`
    /// - `ProtocolError::MaskedServerFrame` / `UnmaskedClientFrame` on a masking violation
    /// - `ProtocolError::FrameTooLarge` if the declared length exceeds the maximum
    pub fn decode(&self, buf: &[u8]) -> std::result::Result<Decoded, ProtocolError> {
        if buf.len() < 2 {
            return Ok(Decoded::Incomplete {
                needed: 2 - buf.len(),
            });
        }

        let byte0 = buf[0];
        let byte1 = buf[1];

        if byte0 & 0x70 != 0 {
            return Err(ProtocolError::ReservedBitsSet);
        }
        let fin = byte0 & 0x80 != 0;
        let opcode = OpCode::from_u8(byte0 & 0x0F)?;
        let masked = byte1 & 0x80 != 0;
        let len7 = byte1 & 0x7F;

        if opcode.is_control() {
            if !fin {
                return Err(ProtocolError::FragmentedControlFrame);
            }
            if usize::from(len7) > MAX_CONTROL_FRAME_PAYLOAD {
                return Err(ProtocolError::ControlFrameTooLarge(u64::from(len7)));
            }
        }

        match (self.role, masked) {
            (Role::Client, true) => return Err(ProtocolError::MaskedServerFrame),
            (Role::Server, false) => return Err(ProtocolError::UnmaskedClientFrame),
            _ => {}
        }

        let (payload_len, mut offset) = match len7 {
            126 => {
                if buf.len() < 4 {
                    return Ok(Decoded::Incomplete {
                        needed: 4 - buf.len(),
                    });
                }
                (u64::from(u16::from_be_bytes([buf[2], buf[3]])), 4)
            }
            127 => {
                if buf.len() < 10 {
                    return Ok(Decoded::Incomplete {
                        needed: 10 - buf.len(),
                    });
                }
                let mut len = [0u8; 8];
                len.copy_from_slice(&buf[2..10]);
                (u64::from_be_bytes(len), 10)
            }
            len => (u64::from(len), 2),
        };

        if payload_len > self.max_payload_size as u64 {
            return Err(ProtocolError::FrameTooLarge {
                size: payload_len,
                max: self.max_payload_size,
            });
        }
        // Bounded by max_payload_size, which is a usize
        let payload_len = payload_len as usize;

        let mask = if masked {
            if buf.len() < offset + 4 {
                return Ok(Decoded::Incomplete {
                    needed: offset + 4 - buf.len(),
                });
            }
            let key = [buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]];
            offset += 4;
            Some(key)
        } else {
            None
        };

        let total = offset + payload_len;
        if buf.len() < total {
            return Ok(Decoded::Incomplete {
                needed: total - buf.len(),
            });
        }

        let mut payload = buf[offset..total].to_vec();
        if let Some(key) = mask {
            apply_mask_fast(&mut payload, key);
        }

        Ok(Decoded::Frame {
            frame: Frame {
                fin,
                opcode,
                mask,
                payload,
            },
            consumed: total,
        })
    }
}
