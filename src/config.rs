//! Configuration and limits for WebSocket client sessions.

use std::time::Duration;

use crate::error::ProtocolError;

/// Bounds on what a peer can make the client buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum payload size of a single incoming frame in bytes.
    ///
    /// Checked against the declared length before any payload is buffered.
    ///
    /// Default: 16 MB (16 * 1024 * 1024)
    pub max_frame_size: usize,

    /// Largest complete message, incoming after reassembly or outgoing
    /// before fragmentation.
    ///
    /// Default: 64 MB (64 * 1024 * 1024)
    pub max_message_size: usize,

    /// Maximum number of fragments in a single incoming message.
    ///
    /// Default: 128
    pub max_fragment_count: usize,

    /// Maximum size of the handshake response head in bytes.
    ///
    /// Default: 8 KB (8192)
    pub max_handshake_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_frame_size: 16 * 1024 * 1024,   // 16 MB
            max_message_size: 64 * 1024 * 1024, // 64 MB
            max_fragment_count: 128,
            max_handshake_size: 8192,
        }
    }
}

impl Limits {
    #[must_use]
    pub const fn new(
        max_frame_size: usize,
        max_message_size: usize,
        max_fragment_count: usize,
        max_handshake_size: usize,
    ) -> Self {
        Self {
            max_frame_size,
            max_message_size,
            max_fragment_count,
            max_handshake_size,
        }
    }

    /// Tight limits for memory-constrained hosts: 64 KB frames, 256 KB
    /// messages, 16 fragments, 4 KB handshake.
    #[must_use]
    pub const fn embedded() -> Self {
        Self {
            max_frame_size: 64 * 1024,
            max_message_size: 256 * 1024,
            max_fragment_count: 16,
            max_handshake_size: 4096,
        }
    }

    /// Check an accumulated or outgoing message size.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MessageTooLarge`] if `size` exceeds the configured maximum.
    pub const fn check_message_size(&self, size: usize) -> Result<(), ProtocolError> {
        if size > self.max_message_size {
            Err(ProtocolError::MessageTooLarge {
                size,
                max: self.max_message_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that a declared frame payload length is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::FrameTooLarge`] if `size` exceeds the configured maximum.
    pub const fn check_frame_size(&self, size: u64) -> Result<(), ProtocolError> {
        if size > self.max_frame_size as u64 {
            Err(ProtocolError::FrameTooLarge {
                size,
                max: self.max_frame_size,
            })
        } else {
            Ok(())
        }
    }

    /// Check the fragment count of a message in progress.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::TooManyFragments`] if `count` exceeds the configured maximum.
    pub const fn check_fragment_count(&self, count: usize) -> Result<(), ProtocolError> {
        if count > self.max_fragment_count {
            Err(ProtocolError::TooManyFragments {
                count,
                max: self.max_fragment_count,
            })
        } else {
            Ok(())
        }
    }
}

/// Timeout configuration for client sessions.
///
/// Socket-level read and write timeouts belong to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeouts {
    /// Maximum time to open the transport and complete the upgrade handshake.
    ///
    /// Default: 30 seconds
    pub handshake: Duration,

    /// Maximum time to wait for the peer's Close frame after sending ours.
    ///
    /// When it elapses the session is closed without further error.
    /// Default: 5 seconds
    pub close: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(30),
            close: Duration::from_secs(5),
        }
    }
}

impl Timeouts {
    #[must_use]
    pub const fn new(handshake: Duration, close: Duration) -> Self {
        Self { handshake, close }
    }
}

/// WebSocket client configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Resource limits.
    pub limits: Limits,

    /// Outgoing Text/Binary payloads above this many bytes are sent as a
    /// fragmented message.
    ///
    /// Default: 16 KB
    pub fragment_size: usize,

    /// Bytes reserved per transport read.
    ///
    /// Default: 8 KB
    pub read_buffer_size: usize,

    /// Initial capacity of the encode buffer.
    ///
    /// Default: 8 KB
    pub write_buffer_size: usize,

    pub timeouts: Timeouts,

    /// Subprotocols offered in `Sec-WebSocket-Protocol`, in preference order.
    ///
    /// Default: none
    pub protocols: Vec<String>,

    /// Extra headers sent with the upgrade request (e.g. `Origin`).
    ///
    /// Default: none
    pub headers: Vec<(String, String)>,

    /// Answer incoming pings with a pong automatically.
    ///
    /// Default: true
    pub auto_pong: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            fragment_size: 16 * 1024,
            read_buffer_size: 8192,
            write_buffer_size: 8192,
            timeouts: Timeouts::default(),
            protocols: Vec::new(),
            headers: Vec::new(),
            auto_pong: true,
        }
    }
}

impl Config {
    /// Default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set custom limits.
    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the outgoing fragment size.
    #[must_use]
    pub fn with_fragment_size(mut self, size: usize) -> Self {
        self.fragment_size = size;
        self
    }

    /// Set read buffer size.
    #[must_use]
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Set write buffer size.
    #[must_use]
    pub fn with_write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size;
        self
    }

    /// Replace the handshake and close timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Offer a subprotocol during the handshake.
    #[must_use]
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocols.push(protocol.into());
        self
    }

    /// Send an extra header with the upgrade request.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Enable or disable automatic pong replies.
    #[must_use]
    pub fn with_auto_pong(mut self, enabled: bool) -> Self {
        self.auto_pong = enabled;
        self
    }
}
