//! Reassembly of fragmented messages (RFC 6455 Section 5.4).

use bytes::BytesMut;

use crate::config::Limits;
use crate::error::ProtocolError;
use crate::message::{CloseFrame, Message};
use crate::protocol::utf8::Utf8Validator;
use crate::protocol::{Frame, OpCode};

/// Result of feeding one frame to the assembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assembled {
    /// A message is complete.
    Complete(Message),
    /// The frame was a non-final fragment; more are expected.
    Pending,
}

/// Reassembles data fragments into messages.
///
/// Control frames may arrive between fragments of a data message; they
/// complete immediately and leave the pending message untouched.
#[derive(Debug)]
pub struct MessageAssembler {
    buffer: BytesMut,
    opcode: Option<OpCode>,
    fragment_count: usize,
    utf8: Utf8Validator,
    limits: Limits,
}

impl MessageAssembler {
    /// Create an assembler enforcing `limits`.
    #[must_use]
    pub fn new(limits: Limits) -> Self {
        Self {
            buffer: BytesMut::new(),
            opcode: None,
            fragment_count: 0,
            utf8: Utf8Validator::new(),
            limits,
        }
    }

    /// Feed the next decoded frame.
    ///
    /// # Errors
    ///
    /// Any [`ProtocolError`] is a session-ending violation; pending state is
    /// discarded before it is returned.
    pub fn feed(&mut self, frame: Frame) -> Result<Assembled, ProtocolError> {
        if frame.opcode.is_control() {
            return Self::control(frame).map(Assembled::Complete);
        }

        let result = self.data(frame);
        if result.is_err() {
            self.reset();
        }
        result
    }

    /// Whether a fragmented message is in progress.
    #[must_use]
    pub fn is_assembling(&self) -> bool {
        self.opcode.is_some()
    }

    /// Discard any partially assembled message.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.opcode = None;
        self.fragment_count = 0;
        self.utf8.reset();
    }

    fn control(frame: Frame) -> Result<Message, ProtocolError> {
        let opcode = frame.opcode;
        let payload = frame.into_payload();
        match opcode {
            OpCode::Ping => Ok(Message::Ping(payload)),
            OpCode::Pong => Ok(Message::Pong(payload)),
            _ => CloseFrame::parse(&payload).map(Message::Close),
        }
    }

    fn data(&mut self, frame: Frame) -> Result<Assembled, ProtocolError> {
        let opcode = match (frame.opcode, self.opcode) {
            (OpCode::Continuation, Some(pending)) => pending,
            (OpCode::Continuation, None) => return Err(ProtocolError::UnexpectedContinuation),
            (opcode, None) => {
                self.opcode = Some(opcode);
                opcode
            }
            (opcode, Some(_)) => return Err(ProtocolError::ExpectedContinuation(opcode.name())),
        };

        self.fragment_count += 1;
        self.limits.check_fragment_count(self.fragment_count)?;
        self.limits
            .check_message_size(self.buffer.len() + frame.payload().len())?;

        if opcode == OpCode::Text {
            self.utf8.validate(frame.payload(), frame.fin)?;
        }
        self.buffer.extend_from_slice(frame.payload());

        if !frame.fin {
            return Ok(Assembled::Pending);
        }

        let payload = self.buffer.split().to_vec();
        self.reset();

        let message = if opcode == OpCode::Text {
            // Validated incrementally above
            Message::Text(String::from_utf8(payload).map_err(|e| e.utf8_error())?)
        } else {
            Message::Binary(payload)
        };
        Ok(Assembled::Complete(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::CloseCode;

    fn assembler() -> MessageAssembler {
        MessageAssembler::new(Limits::default())
    }

    fn complete(result: Result<Assembled, ProtocolError>) -> Message {
        match result.unwrap() {
            Assembled::Complete(message) => message,
            Assembled::Pending => panic!("expected a complete message"),
        }
    }

    #[test]
    fn test_single_frame_message() {
        let mut assembler = assembler();
        let message = complete(assembler.feed(Frame::text("Hello")));
        assert_eq!(message, Message::text("Hello"));
        assert!(!assembler.is_assembling());
    }

    #[test]
    fn test_fragmented_binary_message() {
        let mut assembler = assembler();
        assert_eq!(
            assembler.feed(Frame::new(false, OpCode::Binary, b"ab".to_vec())),
            Ok(Assembled::Pending)
        );
        assert!(assembler.is_assembling());
        assert_eq!(
            assembler.feed(Frame::new(false, OpCode::Continuation, b"cd".to_vec())),
            Ok(Assembled::Pending)
        );
        let message = complete(assembler.feed(Frame::new(true, OpCode::Continuation, b"ef".to_vec())));
        assert_eq!(message, Message::binary(b"abcdef".to_vec()));
        assert!(!assembler.is_assembling());
    }

    #[test]
    fn test_text_split_inside_character() {
        let bytes = "héllo".as_bytes();
        let mut assembler = assembler();
        assembler
            .feed(Frame::new(false, OpCode::Text, bytes[..2].to_vec()))
            .unwrap();
        let message = complete(assembler.feed(Frame::new(true, OpCode::Continuation, bytes[2..].to_vec())));
        assert_eq!(message.as_text(), Some("héllo"));
    }

    #[test]
    fn test_control_frame_between_fragments() {
        let mut assembler = assembler();
        assembler
            .feed(Frame::new(false, OpCode::Text, b"Hel".to_vec()))
            .unwrap();

        let ping = complete(assembler.feed(Frame::ping(b"p".to_vec())));
        assert_eq!(ping, Message::Ping(b"p".to_vec()));
        assert!(assembler.is_assembling());

        let message = complete(assembler.feed(Frame::new(true, OpCode::Continuation, b"lo".to_vec())));
        assert_eq!(message, Message::text("Hello"));
    }

    #[test]
    fn test_unexpected_continuation() {
        let mut assembler = assembler();
        assert_eq!(
            assembler.feed(Frame::new(true, OpCode::Continuation, b"x".to_vec())),
            Err(ProtocolError::UnexpectedContinuation)
        );
    }

    #[test]
    fn test_interleaved_data_message_is_rejected() {
        let mut assembler = assembler();
        assembler
            .feed(Frame::new(false, OpCode::Text, b"first".to_vec()))
            .unwrap();
        assert_eq!(
            assembler.feed(Frame::binary(b"second".to_vec())),
            Err(ProtocolError::ExpectedContinuation("Binary"))
        );
        assert!(!assembler.is_assembling());
    }

    #[test]
    fn test_invalid_utf8_resets() {
        let mut assembler = assembler();
        assert_eq!(
            assembler.feed(Frame::text(vec![0xff, 0xfe])),
            Err(ProtocolError::InvalidUtf8)
        );
        assert!(!assembler.is_assembling());
        assert!(assembler.feed(Frame::text("ok")).is_ok());
    }

    #[test]
    fn test_message_size_limit() {
        let mut assembler = MessageAssembler::new(Limits::new(1024, 4, 8, 4096));
        assembler
            .feed(Frame::new(false, OpCode::Binary, b"abc".to_vec()))
            .unwrap();
        assert_eq!(
            assembler.feed(Frame::new(true, OpCode::Continuation, b"de".to_vec())),
            Err(ProtocolError::MessageTooLarge { size: 5, max: 4 })
        );
    }

    #[test]
    fn test_fragment_count_limit() {
        let mut assembler = MessageAssembler::new(Limits::new(1024, 1024, 2, 4096));
        assembler
            .feed(Frame::new(false, OpCode::Binary, b"a".to_vec()))
            .unwrap();
        assembler
            .feed(Frame::new(false, OpCode::Continuation, b"b".to_vec()))
            .unwrap();
        assert_eq!(
            assembler.feed(Frame::new(true, OpCode::Continuation, b"c".to_vec())),
            Err(ProtocolError::TooManyFragments { count: 3, max: 2 })
        );
    }

    #[test]
    fn test_close_payloads() {
        let mut assembler = assembler();

        let empty = complete(assembler.feed(Frame::close(None, "")));
        assert_eq!(empty, Message::Close(None));

        let normal = complete(assembler.feed(Frame::close(Some(1000), "bye")));
        assert_eq!(normal.close_status(), Some(1000));
        assert_eq!(normal.status_description(), Some("bye"));

        assert!(matches!(
            assembler.feed(Frame::new(true, OpCode::Close, vec![0x03])),
            Err(ProtocolError::InvalidClosePayload(_))
        ));
        assert!(matches!(
            assembler.feed(Frame::close(Some(1005), "")),
            Err(ProtocolError::InvalidClosePayload(_))
        ));
        assert!(matches!(
            assembler.feed(Frame::new(true, OpCode::Close, vec![0x03, 0xe8, 0xff])),
            Err(ProtocolError::InvalidClosePayload(_))
        ));
        assert_eq!(CloseCode::from_u16(1000), CloseCode::Normal);
    }
}
