//! Byte-stream transports the client runs over.

use std::future::Future;
use std::io;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::protocol::WsTarget;

/// Opens the byte stream for a connection attempt.
///
/// The client owns the stream for the lifetime of one session and drops it
/// when the session reaches `Closed`. Implementations that add TLS wrap the
/// stream here; the core never looks inside it.
pub trait Connector: Send + Sync + 'static {
    /// Stream type produced by this connector.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Open a stream to `target`.
    fn connect(&self, target: &WsTarget) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

/// Plain TCP connector for `ws://` targets.
#[derive(Debug, Clone, Copy)]
pub struct TcpConnector {
    nodelay: bool,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self { nodelay: true }
    }
}

impl TcpConnector {
    /// Connector with `TCP_NODELAY` enabled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `TCP_NODELAY` on connected sockets.
    #[must_use]
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }
}

impl Connector for TcpConnector {
    type Stream = TcpStream;

    fn connect(&self, target: &WsTarget) -> impl Future<Output = io::Result<TcpStream>> + Send {
        let secure = target.is_secure();
        let host = target.host().to_string();
        let port = target.port();
        let nodelay = self.nodelay;

        async move {
            if secure {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "wss:// needs a TLS connector",
                ));
            }
            let stream = TcpStream::connect((host.as_str(), port)).await?;
            stream.set_nodelay(nodelay)?;
            tracing::debug!(peer = ?stream.peer_addr().ok(), nodelay, "tcp connected");
            Ok(stream)
        }
    }
}
