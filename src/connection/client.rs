use std::sync::{Arc, Mutex, PoisonError};

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::connection::fragmenter::MessageFragmenter;
use crate::connection::transport::{Connector, TcpConnector};
use crate::connection::{ConnectionState, StateMachine};
use crate::error::{Error, HandshakeError, ProtocolError, Result};
use crate::message::{CloseCode, CloseFrame, MAX_CLOSE_REASON_LEN, Message};
use crate::protocol::frame::MAX_CONTROL_FRAME_PAYLOAD;
use crate::protocol::{
    Assembled, Decoded, FrameCodec, Handshake, HandshakeNegotiator, MessageAssembler, OpCode,
    WsTarget, http,
};
use crate::random::{OsRandom, RandomSource};

/// Asynchronous WebSocket client.
///
/// All methods take `&self`, so one client can be shared (for example in an
/// `Arc`) between a task that receives and tasks that send. Receives are
/// serialized among themselves, as are sends; a send never interleaves its
/// frames with another send.
///
/// ## Example
///
/// ```rust,no_run
/// use rsws_client::{Config, Message, WebSocketClient};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn run() -> rsws_client::Result<()> {
/// let client = WebSocketClient::new(Config::new());
/// let cancel = CancellationToken::new();
///
/// client.connect("ws://127.0.0.1:9001/echo").await?;
/// client.send_text("hello", &cancel).await?;
/// if let Message::Text(reply) = client.receive_message(&cancel).await? {
///     println!("{reply}");
/// }
/// client.close(rsws_client::CloseCode::Normal, "done").await?;
/// # Ok(())
/// # }
/// ```
pub struct WebSocketClient<C: Connector = TcpConnector> {
    connector: C,
    config: Config,
    random: Arc<dyn RandomSource>,
    session: Arc<Session<C::Stream>>,
}

struct Session<S> {
    state: StateMachine,
    reader: AsyncMutex<Option<ReadSide<S>>>,
    writer: AsyncMutex<Option<WriteSide<S>>>,
    remote: Mutex<Option<WsTarget>>,
    protocol: Mutex<Option<String>>,
}

struct ReadSide<S> {
    io: ReadHalf<S>,
    buf: BytesMut,
    codec: FrameCodec,
    assembler: MessageAssembler,
}

struct WriteSide<S> {
    io: WriteHalf<S>,
    buf: BytesMut,
    codec: FrameCodec,
}

enum ReadOutcome {
    Data(std::io::Result<usize>),
    Cancelled,
    Closed,
}

enum WriteOutcome {
    Written(std::io::Result<usize>),
    Cancelled,
    Closed,
}

impl<S> Session<S> {
    fn new() -> Self {
        Self {
            state: StateMachine::new(),
            reader: AsyncMutex::new(None),
            writer: AsyncMutex::new(None),
            remote: Mutex::new(None),
            protocol: Mutex::new(None),
        }
    }

    /// Drop whichever transport halves are not held by an in-flight call.
    /// A holder drops its own half once it observes `Closed`.
    fn release(&self) {
        if let Ok(mut writer) = self.writer.try_lock() {
            writer.take();
        }
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }
    }

    fn teardown(&self) {
        let previous = self.state.transport_lost();
        if previous != ConnectionState::Closed {
            tracing::warn!(%previous, "session torn down");
        }
        self.release();
    }
}

impl WebSocketClient<TcpConnector> {
    /// Client over plain TCP.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self::with_connector(TcpConnector::new(), config)
    }
}

impl<C: Connector> WebSocketClient<C> {
    /// Client over the transport produced by `connector`.
    #[must_use]
    pub fn with_connector(connector: C, config: Config) -> Self {
        Self {
            connector,
            config,
            random: Arc::new(OsRandom),
            session: Arc::new(Session::new()),
        }
    }

    /// Use `random` for handshake keys and frame masks.
    #[must_use]
    pub fn with_random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    /// Client configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current session state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.session.state.state()
    }

    /// Subprotocol selected by the server for the current (or last) session.
    #[must_use]
    pub fn protocol(&self) -> Option<String> {
        self.session
            .protocol
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Endpoint of the current (or last) session.
    #[must_use]
    pub fn remote(&self) -> Option<WsTarget> {
        self.session
            .remote
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Open a session to `uri`.
    ///
    /// The transport connect and opening handshake together are bounded by
    /// `timeouts.handshake`. On failure the session is back in `Closed` and
    /// the client may connect again.
    ///
    /// # Errors
    ///
    /// - `Error::Handshake(HandshakeError::InvalidUri)` before any state change
    /// - `Error::InvalidState` unless the session is `Closed`
    /// - `Error::Handshake`, `Error::Transport` or `Error::ConnectionLost` if
    ///   the attempt fails
    pub async fn connect(&self, uri: &str) -> Result<()> {
        let target = WsTarget::parse(uri)?;
        let epoch = self.session.state.begin_connect()?;
        tracing::info!(%target, epoch, "connecting");

        let timeout = self.config.timeouts.handshake;
        let attempt = match tokio::time::timeout(timeout, self.open(&target)).await {
            Ok(attempt) => attempt,
            Err(_) => Err(HandshakeError::Timeout(timeout).into()),
        };

        let (stream, leftover, handshake) = match attempt {
            Ok(opened) => opened,
            Err(e) => {
                self.session.state.handshake_failed();
                tracing::warn!(%target, error = %e, "connect failed");
                return Err(e);
            }
        };

        let (read, write) = tokio::io::split(stream);
        let codec = FrameCodec::client(self.config.limits.max_frame_size, Arc::clone(&self.random));
        *self.session.reader.lock().await = Some(ReadSide {
            io: read,
            buf: leftover,
            codec: codec.clone(),
            assembler: MessageAssembler::new(self.config.limits.clone()),
        });
        *self.session.writer.lock().await = Some(WriteSide {
            io: write,
            buf: BytesMut::with_capacity(self.config.write_buffer_size),
            codec,
        });
        *self
            .session
            .remote
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(target.clone());
        *self
            .session
            .protocol
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = handshake.protocol.clone();

        if let Err(e) = self.session.state.handshake_succeeded() {
            self.session.release();
            return Err(e);
        }
        tracing::info!(%target, protocol = ?handshake.protocol, "connected");
        Ok(())
    }

    async fn open(&self, target: &WsTarget) -> Result<(C::Stream, BytesMut, Handshake)> {
        let mut stream = self.connector.connect(target).await?;

        let negotiator = HandshakeNegotiator::new(target.clone(), self.random.as_ref())?
            .with_protocols(self.config.protocols.iter().cloned())
            .with_headers(self.config.headers.iter().cloned());
        let request = negotiator.build_request()?;

        let mut buf = BytesMut::with_capacity(self.config.write_buffer_size);
        http::write_request(&request, &mut buf);
        stream.write_all(&buf).await?;
        stream.flush().await?;
        tracing::debug!(key = negotiator.key(), "upgrade request sent");

        let mut parser = http::ResponseParser::new(self.config.limits.max_handshake_size);
        let mut buf = BytesMut::with_capacity(self.config.read_buffer_size);
        let (response, head_len) = loop {
            if let Some(parsed) = parser.parse(&buf)? {
                break parsed;
            }
            if stream.read_buf(&mut buf).await? == 0 {
                return Err(Error::ConnectionLost);
            }
        };

        let handshake = negotiator.validate_response(&response)?;
        buf.advance(head_len);
        Ok((stream, buf, handshake))
    }

    /// Send a message.
    ///
    /// Text and Binary payloads longer than `fragment_size` go out as a
    /// fragmented message. `Message::Close` starts the close handshake like
    /// [`close`](Self::close).
    ///
    /// Cancellation before the first byte is written leaves the session
    /// `Open`; after that the peer would see a truncated frame, so the
    /// session is torn down.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidState` unless `Open`
    /// - `Error::InvalidMessage` for oversized control payloads or messages
    ///   above `limits.max_message_size`
    /// - `Error::Cancelled`, `Error::Transport`, `Error::ConnectionLost`,
    ///   `Error::ConnectionClosed`
    pub async fn send_message(&self, message: Message, cancel: &CancellationToken) -> Result<()> {
        let (opcode, payload) = match message {
            Message::Close(frame) => {
                let frame = frame.unwrap_or_else(|| CloseFrame::new(CloseCode::Normal, ""));
                return self.close(frame.code, &frame.reason).await;
            }
            Message::Text(text) => (OpCode::Text, text.into_bytes()),
            Message::Binary(data) => (OpCode::Binary, data),
            Message::Ping(data) => (OpCode::Ping, data),
            Message::Pong(data) => (OpCode::Pong, data),
        };
        self.send_frames(opcode, &payload, cancel).await
    }

    /// Send a text message.
    ///
    /// # Errors
    ///
    /// See [`send_message`](Self::send_message).
    pub async fn send_text(&self, text: &str, cancel: &CancellationToken) -> Result<()> {
        self.send_frames(OpCode::Text, text.as_bytes(), cancel).await
    }

    /// Send a binary message.
    ///
    /// # Errors
    ///
    /// See [`send_message`](Self::send_message).
    pub async fn send_binary(&self, data: &[u8], cancel: &CancellationToken) -> Result<()> {
        self.send_frames(OpCode::Binary, data, cancel).await
    }

    /// Send a Ping. The matching Pong is surfaced by [`receive_message`](Self::receive_message).
    ///
    /// # Errors
    ///
    /// See [`send_message`](Self::send_message).
    pub async fn ping(&self, payload: &[u8], cancel: &CancellationToken) -> Result<()> {
        self.send_frames(OpCode::Ping, payload, cancel).await
    }

    async fn send_frames(&self, opcode: OpCode, payload: &[u8], cancel: &CancellationToken) -> Result<()> {
        let state = self.state();
        if !state.can_send() {
            return Err(Error::InvalidState {
                operation: "send",
                state,
            });
        }
        if opcode.is_control() && payload.len() > MAX_CONTROL_FRAME_PAYLOAD {
            return Err(Error::InvalidMessage(format!(
                "{opcode} payload of {} bytes exceeds {MAX_CONTROL_FRAME_PAYLOAD}",
                payload.len()
            )));
        }
        if payload.len() > self.config.limits.max_message_size {
            return Err(Error::InvalidMessage(format!(
                "message of {} bytes exceeds {}",
                payload.len(),
                self.config.limits.max_message_size
            )));
        }

        let epoch = self.session.state.epoch();
        let mut closed = self.session.state.subscribe();
        let mut guard = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            guard = self.session.writer.lock() => guard,
        };

        let state = self.state();
        if !state.can_send() || self.session.state.epoch() != epoch {
            return Err(Error::InvalidState {
                operation: "send",
                state,
            });
        }
        let Some(writer) = guard.as_mut() else {
            return Err(Error::ConnectionClosed);
        };

        writer.buf.clear();
        let encoded = MessageFragmenter::new(payload, opcode, self.config.fragment_size)
            .try_for_each(|f| writer.codec.encode(f.opcode, f.fin, f.payload, &mut writer.buf));
        if let Err(e) = encoded {
            writer.buf.clear();
            return Err(e);
        }

        let written = self.write_buffered(&mut guard, cancel, &mut closed).await?;
        tracing::debug!(%opcode, len = payload.len(), wire = written, "message sent");
        Ok(())
    }

    /// Write out the writer's buffer, racing `cancel` and session close.
    ///
    /// Nothing written yet: cancellation leaves the session untouched. After
    /// a partial write, or on a transport failure, the session is torn down.
    async fn write_buffered(
        &self,
        slot: &mut Option<WriteSide<C::Stream>>,
        cancel: &CancellationToken,
        closed: &mut watch::Receiver<ConnectionState>,
    ) -> Result<usize> {
        let Some(writer) = slot.as_mut() else {
            return Err(Error::ConnectionClosed);
        };

        let mut written = 0;
        while written < writer.buf.len() {
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => WriteOutcome::Cancelled,
                _ = closed.wait_for(|s| *s == ConnectionState::Closed) => WriteOutcome::Closed,
                n = writer.io.write(&writer.buf[written..]) => WriteOutcome::Written(n),
            };
            let failure = match outcome {
                WriteOutcome::Written(Ok(n)) if n > 0 => {
                    written += n;
                    continue;
                }
                WriteOutcome::Written(Ok(_)) => Error::ConnectionLost,
                WriteOutcome::Written(Err(e)) => e.into(),
                WriteOutcome::Cancelled if written == 0 => {
                    writer.buf.clear();
                    return Err(Error::Cancelled);
                }
                WriteOutcome::Cancelled => {
                    tracing::warn!(written, "write cancelled mid-frame");
                    Error::Cancelled
                }
                WriteOutcome::Closed => {
                    slot.take();
                    return Err(Error::ConnectionClosed);
                }
            };
            slot.take();
            self.session.teardown();
            return Err(failure);
        }

        if let Err(e) = writer.io.flush().await {
            slot.take();
            self.session.teardown();
            return Err(e.into());
        }
        writer.buf.clear();
        Ok(written)
    }

    /// Write one control frame.
    ///
    /// Waiting for the writer and the write itself end with
    /// `Error::ConnectionClosed` once the session reaches `Closed`, so a send
    /// stuck on backpressure cannot hold a Close past the close wait.
    async fn write_control(
        &self,
        opcode: OpCode,
        payload: &[u8],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut closed = self.session.state.subscribe();
        let mut guard = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            _ = closed.wait_for(|s| *s == ConnectionState::Closed) => {
                return Err(Error::ConnectionClosed);
            }
            guard = self.session.writer.lock() => guard,
        };
        let Some(writer) = guard.as_mut() else {
            return Err(Error::ConnectionClosed);
        };

        writer.buf.clear();
        writer.codec.encode(opcode, true, payload, &mut writer.buf)?;
        self.write_buffered(&mut guard, cancel, &mut closed).await?;
        tracing::debug!(%opcode, len = payload.len(), "control frame sent");
        Ok(())
    }

    /// Receive the next message.
    ///
    /// Ping, Pong and Close are surfaced as well as data messages. A Ping is
    /// answered automatically when `auto_pong` is set. Bytes already read
    /// stay buffered if the call is cancelled, so no frame is lost.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidState` unless `Open` or `Closing`
    /// - `Error::Protocol` after a peer violation; a Close with the matching
    ///   status has been sent and the session is `Closing`
    /// - `Error::ConnectionLost` / `Error::Transport` if the transport ends
    /// - `Error::ConnectionClosed` if the session closed while waiting
    /// - `Error::Cancelled`
    pub async fn receive_message(&self, cancel: &CancellationToken) -> Result<Message> {
        let state = self.state();
        if !state.can_receive() {
            return Err(Error::InvalidState {
                operation: "receive",
                state,
            });
        }

        let epoch = self.session.state.epoch();
        let mut closed = self.session.state.subscribe();
        let mut guard = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            guard = self.session.reader.lock() => guard,
        };
        if self.session.state.epoch() != epoch {
            return Err(Error::ConnectionClosed);
        }

        let result = match guard.as_mut() {
            Some(reader) => self.read_message(reader, cancel, &mut closed).await,
            None => Err(Error::ConnectionClosed),
        };
        if self.state() == ConnectionState::Closed {
            guard.take();
        }
        result
    }

    async fn read_message(
        &self,
        reader: &mut ReadSide<C::Stream>,
        cancel: &CancellationToken,
        closed: &mut watch::Receiver<ConnectionState>,
    ) -> Result<Message> {
        loop {
            match reader.codec.decode(&reader.buf) {
                Ok(Decoded::Frame { frame, consumed }) => {
                    reader.buf.advance(consumed);
                    tracing::debug!(
                        opcode = %frame.opcode,
                        fin = frame.fin,
                        len = frame.payload_len(),
                        "frame received"
                    );
                    match reader.assembler.feed(frame) {
                        Ok(Assembled::Pending) => {}
                        Ok(Assembled::Complete(message)) => {
                            return self.on_message(message, cancel).await;
                        }
                        Err(e) => return Err(self.fail_protocol(reader, e).await),
                    }
                }
                Ok(Decoded::Incomplete { .. }) => {
                    reader.buf.reserve(self.config.read_buffer_size);
                    let outcome = tokio::select! {
                        biased;
                        () = cancel.cancelled() => ReadOutcome::Cancelled,
                        _ = closed.wait_for(|s| *s == ConnectionState::Closed) => ReadOutcome::Closed,
                        n = reader.io.read_buf(&mut reader.buf) => ReadOutcome::Data(n),
                    };
                    match outcome {
                        ReadOutcome::Data(Ok(0)) => {
                            if self.state() == ConnectionState::Closed {
                                return Err(Error::ConnectionClosed);
                            }
                            tracing::warn!("transport reached end of stream");
                            self.session.teardown();
                            return Err(Error::ConnectionLost);
                        }
                        ReadOutcome::Data(Ok(_)) => {}
                        ReadOutcome::Data(Err(e)) => {
                            tracing::warn!(error = %e, "transport read failed");
                            self.session.teardown();
                            return Err(e.into());
                        }
                        ReadOutcome::Cancelled => return Err(Error::Cancelled),
                        ReadOutcome::Closed => return Err(Error::ConnectionClosed),
                    }
                }
                Err(e) => return Err(self.fail_protocol(reader, e).await),
            }
        }
    }

    async fn on_message(&self, message: Message, cancel: &CancellationToken) -> Result<Message> {
        match &message {
            Message::Ping(data) if self.config.auto_pong && self.state() == ConnectionState::Open => {
                match self.write_control(OpCode::Pong, data, cancel).await {
                    Ok(()) => {}
                    // The Ping is already consumed; surface it without the Pong
                    Err(Error::Cancelled) if self.state().can_receive() => {
                        tracing::debug!("pong skipped, receive cancelled");
                    }
                    Err(e) => return Err(e),
                }
            }
            Message::Close(frame) => self.on_peer_close(frame.as_ref()).await,
            _ => {}
        }
        Ok(message)
    }

    async fn on_peer_close(&self, frame: Option<&CloseFrame>) {
        let code = frame.map(|f| f.code.as_u16());
        if self.session.state.begin_close().is_ok() {
            self.spawn_close_timer(self.session.state.epoch());
            let echo = frame
                .map(|f| CloseFrame::new(f.code, "").encode())
                .unwrap_or_default();
            if let Err(e) = self
                .write_control(OpCode::Close, &echo, &CancellationToken::new())
                .await
            {
                tracing::debug!(error = %e, "close echo not delivered");
            }
            tracing::info!(?code, "closed by peer");
        } else {
            tracing::info!(?code, "close handshake completed");
        }
        self.session.state.close_completed();
        self.session.release();
    }

    async fn fail_protocol(&self, reader: &mut ReadSide<C::Stream>, error: ProtocolError) -> Error {
        tracing::warn!(%error, "protocol violation");
        reader.buf.clear();
        reader.assembler.reset();

        if self.session.state.begin_close().is_ok() {
            self.spawn_close_timer(self.session.state.epoch());
            let close = CloseFrame::new(error.close_code(), "");
            if let Err(e) = self
                .write_control(OpCode::Close, &close.encode(), &CancellationToken::new())
                .await
            {
                tracing::debug!(error = %e, "close after violation not delivered");
            }
        } else {
            self.session.teardown();
        }
        Error::Protocol(error)
    }

    /// Start the close handshake.
    ///
    /// Sends a Close frame and returns with the session `Closing`. The
    /// session becomes `Closed` when the peer's Close is received or, if it
    /// never arrives, after `timeouts.close`. Calling this while already
    /// `Closing` does nothing.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidCloseCode` for codes that may not be sent
    /// - `Error::InvalidMessage` for a reason longer than 123 bytes
    /// - `Error::InvalidState` while `Closed` or `Connecting`
    /// - `Error::Transport` if the Close frame cannot be written
    pub async fn close(&self, code: CloseCode, reason: &str) -> Result<()> {
        if !code.is_valid() {
            return Err(Error::InvalidCloseCode(code.as_u16()));
        }
        if reason.len() > MAX_CLOSE_REASON_LEN {
            return Err(Error::InvalidMessage(format!(
                "close reason of {} bytes exceeds {MAX_CLOSE_REASON_LEN}",
                reason.len()
            )));
        }

        if let Err(e) = self.session.state.begin_close() {
            return match self.state() {
                ConnectionState::Closing => Ok(()),
                _ => Err(e),
            };
        }

        // Armed first: the write below may wait behind a stalled send
        self.spawn_close_timer(self.session.state.epoch());
        let frame = CloseFrame::new(code, reason);
        match self
            .write_control(OpCode::Close, &frame.encode(), &CancellationToken::new())
            .await
        {
            Ok(()) => tracing::info!(%code, reason, "close sent"),
            Err(Error::ConnectionClosed) => {
                tracing::info!(%code, "session closed before close frame was sent");
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    fn spawn_close_timer(&self, epoch: u64) {
        let session = Arc::clone(&self.session);
        let wait = self.config.timeouts.close;
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            if session.state.close_wait_elapsed(epoch) {
                tracing::info!(?wait, "peer did not answer close");
                session.release();
            }
        });
    }
}

impl<C: Connector + std::fmt::Debug> std::fmt::Debug for WebSocketClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketClient")
            .field("connector", &self.connector)
            .field("state", &self.state())
            .field("remote", &self.remote())
            .finish_non_exhaustive()
    }
}
