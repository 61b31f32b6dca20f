//! Runtime-independent WebSocket protocol pieces (RFC 6455).

pub mod assembler;
pub mod frame;
pub mod handshake;
pub mod http;
pub mod mask;
pub mod opcode;
pub mod utf8;

pub use assembler::{Assembled, MessageAssembler};
pub use frame::{Decoded, Frame, FrameCodec, MAX_CONTROL_FRAME_PAYLOAD};
pub use handshake::{Handshake, HandshakeNegotiator, WS_GUID, WsTarget, compute_accept_key};
pub use mask::{apply_mask, apply_mask_fast};
pub use opcode::OpCode;
pub use utf8::{Utf8Validator, validate_utf8};
