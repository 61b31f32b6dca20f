//! In-memory transport and scripted peer for driving the client in tests.

#![allow(dead_code)]

mod peer;

use std::future::Future;
use std::io;
use std::sync::Arc;

use rsws_client::error::Result;
use rsws_client::protocol::WsTarget;
use rsws_client::{Config, Connector, RandomSource, WebSocketClient};
use tokio::io::{DuplexStream, duplex};
use tokio::sync::mpsc;

pub use peer::{FakePeer, sec_key};

pub const URI: &str = "ws://peer.test/chat";

/// Connector that hands the far end of an in-memory pipe to a [`PeerListener`].
#[derive(Debug)]
pub struct DuplexConnector {
    tx: mpsc::UnboundedSender<DuplexStream>,
    buffer: usize,
}

impl Connector for DuplexConnector {
    type Stream = DuplexStream;

    fn connect(&self, _target: &WsTarget) -> impl Future<Output = io::Result<DuplexStream>> + Send {
        let (client, server) = duplex(self.buffer);
        let delivered = self.tx.send(server).is_ok();
        async move {
            if delivered {
                Ok(client)
            } else {
                Err(io::Error::new(io::ErrorKind::ConnectionRefused, "no peer listening"))
            }
        }
    }
}

/// Receives the peer side of every connection the client opens.
pub struct PeerListener {
    rx: mpsc::UnboundedReceiver<DuplexStream>,
}

impl PeerListener {
    pub async fn accept(&mut self) -> FakePeer {
        let io = self.rx.recv().await.expect("client connector dropped");
        FakePeer::new(io)
    }
}

pub fn client(config: Config) -> (Arc<WebSocketClient<DuplexConnector>>, PeerListener) {
    client_with_buffer(config, 64 * 1024)
}

pub fn client_with_buffer(
    config: Config,
    buffer: usize,
) -> (Arc<WebSocketClient<DuplexConnector>>, PeerListener) {
    let (tx, rx) = mpsc::unbounded_channel();
    let client = WebSocketClient::with_connector(DuplexConnector { tx, buffer }, config);
    (Arc::new(client), PeerListener { rx })
}

/// Deterministic random source: every byte is the same value.
#[derive(Debug)]
pub struct FixedRandom(pub u8);

impl RandomSource for FixedRandom {
    fn fill_bytes(&self, dest: &mut [u8]) -> Result<()> {
        dest.fill(self.0);
        Ok(())
    }
}

/// Connect the client and complete the handshake from the peer side.
pub async fn open(
    client: &WebSocketClient<DuplexConnector>,
    listener: &mut PeerListener,
) -> FakePeer {
    let (connected, peer) = tokio::join!(client.connect(URI), async {
        let mut peer = listener.accept().await;
        peer.accept_handshake().await;
        peer
    });
    connected.expect("handshake failed");
    peer
}

pub async fn connected(config: Config) -> (Arc<WebSocketClient<DuplexConnector>>, FakePeer) {
    let (client, mut listener) = client(config);
    let peer = open(&client, &mut listener).await;
    (client, peer)
}
