use std::sync::Arc;

use bytes::{Buf, BytesMut};
use rsws_client::protocol::{Decoded, Frame, FrameCodec, OpCode, compute_accept_key};
use rsws_client::{OsRandom, Role};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

/// Server end of a connection, scripted step by step from a test.
pub struct FakePeer {
    io: DuplexStream,
    buf: BytesMut,
    codec: FrameCodec,
}

impl FakePeer {
    pub fn new(io: DuplexStream) -> Self {
        Self {
            io,
            buf: BytesMut::new(),
            codec: FrameCodec::new(Role::Server, 1 << 24, Arc::new(OsRandom)),
        }
    }

    /// Read the upgrade request head.
    pub async fn read_request(&mut self) -> String {
        loop {
            if let Some(end) = self.buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8(self.buf[..end + 4].to_vec()).unwrap();
                self.buf.advance(end + 4);
                return head;
            }
            let n = self.io.read_buf(&mut self.buf).await.unwrap();
            assert!(n > 0, "client closed before sending the request");
        }
    }

    /// Read the request and answer with a valid `101`.
    pub async fn accept_handshake(&mut self) -> String {
        self.accept_handshake_with("").await
    }

    /// Like [`accept_handshake`](Self::accept_handshake), appending `extra` header lines.
    pub async fn accept_handshake_with(&mut self, extra: &str) -> String {
        let request = self.read_request().await;
        let key = sec_key(&request);
        let response = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n{extra}\r\n",
            compute_accept_key(&key)
        );
        self.send_raw(response.as_bytes()).await;
        request
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.io.write_all(bytes).await.unwrap();
        self.io.flush().await.unwrap();
    }

    pub async fn send_frame(&mut self, opcode: OpCode, fin: bool, payload: &[u8]) {
        let mut wire = BytesMut::new();
        FrameCodec::encode_with_mask(opcode, fin, payload, None, &mut wire).unwrap();
        self.send_raw(&wire).await;
    }

    pub async fn send_text(&mut self, text: &str) {
        self.send_frame(OpCode::Text, true, text.as_bytes()).await;
    }

    pub async fn send_close(&mut self, code: u16, reason: &str) {
        let mut payload = code.to_be_bytes().to_vec();
        payload.extend_from_slice(reason.as_bytes());
        self.send_frame(OpCode::Close, true, &payload).await;
    }

    /// Next frame from the client, or `None` once the client dropped the transport.
    pub async fn read_frame(&mut self) -> Option<Frame> {
        loop {
            match self.codec.decode(&self.buf).expect("client sent an invalid frame") {
                Decoded::Frame { frame, consumed } => {
                    self.buf.advance(consumed);
                    return Some(frame);
                }
                Decoded::Incomplete { .. } => {
                    if self.io.read_buf(&mut self.buf).await.unwrap_or(0) == 0 {
                        return None;
                    }
                }
            }
        }
    }

    pub async fn expect_frame(&mut self) -> Frame {
        self.read_frame().await.expect("client closed the transport")
    }

    /// Whether the client has dropped its end with nothing left unread.
    pub async fn is_closed(&mut self) -> bool {
        self.read_frame().await.is_none()
    }
}

pub fn sec_key(request: &str) -> String {
    request
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("sec-websocket-key")
                .then(|| value.trim().to_string())
        })
        .expect("request carries Sec-WebSocket-Key")
}
