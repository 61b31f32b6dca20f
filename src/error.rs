//! Error types for the WebSocket client.
//!
//! Errors are grouped the way the client reacts to them:
//!
//! - [`HandshakeError`] ends a connection attempt; the session lands in `Closed`.
//! - [`ProtocolError`] ends an established session; a Close frame carrying
//!   [`ProtocolError::close_code`] is sent before the error is surfaced.
//! - [`Error::Transport`] and [`Error::ConnectionLost`] tear the session down
//!   immediately.
//! - [`Error::InvalidState`] is local to the call and never changes the state.

use thiserror::Error;

use crate::connection::ConnectionState;
use crate::message::CloseCode;

/// Result type alias for WebSocket operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures of the opening HTTP upgrade exchange.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum HandshakeError {
    /// The peer answered with something other than `101 Switching Protocols`.
    #[error("Unexpected handshake status: {status} {reason}")]
    UnexpectedStatus {
        /// HTTP status code of the response.
        status: u16,
        /// Reason phrase of the response.
        reason: String,
    },

    /// `Sec-WebSocket-Accept` was missing or did not prove the request key.
    #[error("Sec-WebSocket-Accept mismatch: expected {expected}, got {actual:?}")]
    AcceptMismatch {
        /// Accept value derived from the request key.
        expected: String,
        /// Value returned by the peer, if any.
        actual: Option<String>,
    },

    /// The response could not be parsed or lacks required upgrade headers.
    #[error("Malformed handshake response: {0}")]
    MalformedResponse(String),

    /// The target URI cannot be used for a WebSocket connection.
    #[error("Invalid WebSocket URI: {0}")]
    InvalidUri(String),

    /// No complete handshake within the configured timeout.
    #[error("Handshake timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A caller-supplied request header or subprotocol cannot be sent.
    #[error("Invalid header {header}: {reason}")]
    InvalidHeader {
        /// Header name as supplied.
        header: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Violations of the RFC 6455 framing or messaging rules by the peer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProtocolError {
    /// Reserved opcode used.
    #[error("Reserved opcode: {0:#x}")]
    ReservedOpcode(u8),

    /// Reserved bits set without a negotiated extension.
    #[error("Reserved bits set without negotiated extension")]
    ReservedBitsSet,

    /// Control frame declared with FIN=0.
    #[error("Control frames cannot be fragmented")]
    FragmentedControlFrame,

    /// Control frame payload larger than 125 bytes.
    #[error("Control frame payload too large: {0} bytes (max: 125)")]
    ControlFrameTooLarge(u64),

    /// Server frames must not be masked.
    #[error("Server frame must not be masked")]
    MaskedServerFrame,

    /// Client frames must be masked.
    #[error("Client frame must be masked")]
    UnmaskedClientFrame,

    /// Declared frame payload exceeds the configured maximum.
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Declared payload length.
        size: u64,
        /// Maximum allowed payload length.
        max: usize,
    },

    /// Reassembled message exceeds the configured maximum.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Accumulated message size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Too many fragments in a single message.
    #[error("Too many fragments: {count} (max: {max})")]
    TooManyFragments {
        /// Fragment count including the offending frame.
        count: usize,
        /// Maximum allowed fragments.
        max: usize,
    },

    /// Continuation frame arrived with no message pending.
    #[error("Unexpected continuation frame")]
    UnexpectedContinuation,

    /// New data frame arrived while a fragmented message was pending.
    #[error("Expected continuation frame, got {0}")]
    ExpectedContinuation(&'static str),

    /// Text message payload is not valid UTF-8.
    #[error("Invalid UTF-8 in text message")]
    InvalidUtf8,

    /// Close frame payload is malformed.
    #[error("Invalid close payload: {0}")]
    InvalidClosePayload(String),
}

impl ProtocolError {
    /// Close status code to send to the peer for this violation.
    #[must_use]
    pub const fn close_code(&self) -> CloseCode {
        match self {
            ProtocolError::InvalidUtf8 => CloseCode::InvalidPayload,
            ProtocolError::FrameTooLarge { .. }
            | ProtocolError::MessageTooLarge { .. }
            | ProtocolError::TooManyFragments { .. } => CloseCode::MessageTooBig,
            _ => CloseCode::ProtocolError,
        }
    }
}

impl From<std::str::Utf8Error> for ProtocolError {
    fn from(_: std::str::Utf8Error) -> Self {
        ProtocolError::InvalidUtf8
    }
}

/// Errors that can occur during WebSocket operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Opening handshake failed.
    #[error("Handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// Peer violated the protocol.
    #[error("Protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    /// Transport read, write or connect failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Transport reached end of stream while the session was active.
    #[error("Connection lost")]
    ConnectionLost,

    /// Session ended by the close handshake (or its timeout).
    #[error("Connection closed")]
    ConnectionClosed,

    /// Operation not allowed in the current state.
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        /// Name of the rejected operation.
        operation: &'static str,
        /// State the session was in.
        state: ConnectionState,
    },

    /// Operation cancelled by the caller.
    #[error("Operation cancelled")]
    Cancelled,

    /// Close code that must not be sent on the wire.
    #[error("Invalid close code: {0}")]
    InvalidCloseCode(u16),

    /// Outgoing message rejected before anything was written.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Random source failed.
    #[error("Random source failure: {0}")]
    Random(String),
}

impl Error {
    /// Returns `true` if the error ended the session.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Handshake(_)
                | Error::Protocol(_)
                | Error::Transport(_)
                | Error::ConnectionLost
                | Error::ConnectionClosed
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

impl From<getrandom::Error> for Error {
    fn from(err: getrandom::Error) -> Self {
        Error::Random(err.to_string())
    }
}
