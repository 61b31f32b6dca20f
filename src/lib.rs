//! # rsws-client - RFC 6455 WebSocket client core
//!
//! A WebSocket client split into a runtime-independent protocol layer and a
//! tokio-based session layer.
//!
//! ## Features
//!
//! - **Restartable frame decoding** that never consumes a partial frame
//! - **Masking with injected randomness** so sessions are reproducible in tests
//! - **Incremental UTF-8 validation** across fragment boundaries
//! - **Cancellable send and receive** via `CancellationToken`
//! - **Bounded close handshake** with a background close-wait timer
//! - **Resource limits** on frames, messages, fragments and handshake size
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rsws_client::{CloseCode, Config, WebSocketClient};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> rsws_client::Result<()> {
//! let client = WebSocketClient::new(Config::new().with_protocol("chat"));
//! let cancel = CancellationToken::new();
//!
//! client.connect("ws://127.0.0.1:9001/").await?;
//! client.send_text("hello", &cancel).await?;
//! let reply = client.receive_message(&cancel).await?;
//! println!("{reply:?}");
//! client.close(CloseCode::Normal, "bye").await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod protocol;
pub mod random;

pub use config::{Config, Limits, Timeouts};
pub use connection::{ConnectionState, Role};
#[cfg(feature = "async-tokio")]
pub use connection::{Connector, TcpConnector, WebSocketClient};
pub use error::{Error, HandshakeError, ProtocolError, Result};
pub use message::{CloseCode, CloseFrame, Message};
pub use protocol::{
    Decoded, Frame, FrameCodec, HandshakeNegotiator, MessageAssembler, OpCode, WS_GUID, WsTarget,
    compute_accept_key,
};
pub use random::{OsRandom, RandomSource};
