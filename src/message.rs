//! WebSocket message types and close codes as defined in RFC 6455.

use crate::error::ProtocolError;

/// Maximum length of a close reason so the Close payload fits a control frame.
pub const MAX_CLOSE_REASON_LEN: usize = 123;

/// Status code carried by a Close frame (RFC 6455 Section 7.4).
///
/// Named variants cover the codes the client itself produces or commonly
/// receives; everything else round-trips through `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum CloseCode {
    /// 1000
    #[default]
    Normal,
    /// 1001, the endpoint is shutting down or navigating away.
    GoingAway,
    /// 1002, sent after a framing or messaging violation.
    ProtocolError,
    /// 1003
    UnsupportedData,
    /// 1007, sent when a text message is not UTF-8.
    InvalidPayload,
    /// 1008
    PolicyViolation,
    /// 1009, sent when a frame or message exceeds the configured limits.
    MessageTooBig,
    /// 1010
    MandatoryExtension,
    /// 1011
    InternalError,
    /// Registered codes without a variant and application codes 3000-4999.
    Other(u16),
}

const NAMED_CODES: [(CloseCode, u16); 9] = [
    (CloseCode::Normal, 1000),
    (CloseCode::GoingAway, 1001),
    (CloseCode::ProtocolError, 1002),
    (CloseCode::UnsupportedData, 1003),
    (CloseCode::InvalidPayload, 1007),
    (CloseCode::PolicyViolation, 1008),
    (CloseCode::MessageTooBig, 1009),
    (CloseCode::MandatoryExtension, 1010),
    (CloseCode::InternalError, 1011),
];

impl CloseCode {
    /// Map a wire value to its variant.
    #[must_use]
    pub fn from_u16(code: u16) -> Self {
        NAMED_CODES
            .iter()
            .find(|(_, value)| *value == code)
            .map_or(CloseCode::Other(code), |(named, _)| *named)
    }

    /// Wire value of this code.
    #[must_use]
    pub fn as_u16(&self) -> u16 {
        match self {
            CloseCode::Other(code) => *code,
            named => NAMED_CODES
                .iter()
                .find(|(variant, _)| variant == named)
                .map_or(0, |(_, value)| *value),
        }
    }

    /// Whether the code may be put on the wire: 1000-1003, 1007-1014 or 3000-4999.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self.as_u16(), 1000..=1003 | 1007..=1014 | 3000..=4999)
    }

    /// Codes that only exist as local signals (1004-1006, 1015) and are never sent.
    #[must_use]
    pub fn is_reserved(&self) -> bool {
        matches!(self.as_u16(), 1004..=1006 | 1015)
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// Status code and reason of a Close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: CloseCode,
    /// UTF-8, at most [`MAX_CLOSE_REASON_LEN`] bytes when sent.
    pub reason: String,
}

impl CloseFrame {
    #[must_use]
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Parse a received Close payload.
    ///
    /// An empty payload carries no status and yields `None`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidClosePayload`] for a 1-byte payload, a
    /// status code that may not appear on the wire, or a reason that is not UTF-8.
    pub fn parse(payload: &[u8]) -> Result<Option<Self>, ProtocolError> {
        match payload {
            [] => Ok(None),
            [_] => Err(ProtocolError::InvalidClosePayload(
                "close payload of 1 byte".into(),
            )),
            [hi, lo, reason @ ..] => {
                let code = CloseCode::from_u16(u16::from_be_bytes([*hi, *lo]));
                if !code.is_valid() {
                    return Err(ProtocolError::InvalidClosePayload(format!(
                        "close code {code} not allowed on the wire"
                    )));
                }
                let reason = std::str::from_utf8(reason).map_err(|_| {
                    ProtocolError::InvalidClosePayload("close reason is not UTF-8".into())
                })?;
                Ok(Some(Self::new(code, reason)))
            }
        }
    }

    /// Encode into a Close frame payload: big-endian code followed by the reason.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(2 + self.reason.len());
        data.extend_from_slice(&self.code.as_u16().to_be_bytes());
        data.extend_from_slice(self.reason.as_bytes());
        data
    }
}

/// A complete message as surfaced to or accepted from the application.
///
/// Control messages are included so callers can observe Ping, Pong and the
/// peer's Close.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
    /// At most 125 bytes.
    Ping(Vec<u8>),
    /// At most 125 bytes.
    Pong(Vec<u8>),
    /// `None` when the Close frame had an empty payload.
    Close(Option<CloseFrame>),
}

impl Message {
    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        Message::Text(s.into())
    }

    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Message::Binary(data.into())
    }

    #[must_use]
    pub fn ping(data: impl Into<Vec<u8>>) -> Self {
        Message::Ping(data.into())
    }

    #[must_use]
    pub fn pong(data: impl Into<Vec<u8>>) -> Self {
        Message::Pong(data.into())
    }

    /// Close message carrying `code` and `reason`.
    #[must_use]
    pub fn close(code: CloseCode, reason: impl Into<String>) -> Self {
        Message::Close(Some(CloseFrame::new(code, reason)))
    }

    #[must_use]
    pub const fn is_close(&self) -> bool {
        matches!(self, Message::Close(_))
    }

    /// Ping, Pong or Close.
    #[must_use]
    pub const fn is_control(&self) -> bool {
        matches!(self, Message::Ping(_) | Message::Pong(_) | Message::Close(_))
    }

    /// Payload bytes as they travel on the wire (unmasked).
    #[must_use]
    pub fn payload(&self) -> std::borrow::Cow<'_, [u8]> {
        use std::borrow::Cow;
        match self {
            Message::Text(s) => Cow::Borrowed(s.as_bytes()),
            Message::Binary(data) | Message::Ping(data) | Message::Pong(data) => {
                Cow::Borrowed(data)
            }
            Message::Close(Some(frame)) => Cow::Owned(frame.encode()),
            Message::Close(None) => Cow::Borrowed(&[]),
        }
    }

    /// Close status code, only for close messages that carry one.
    #[must_use]
    pub fn close_status(&self) -> Option<u16> {
        match self {
            Message::Close(Some(frame)) => Some(frame.code.as_u16()),
            _ => None,
        }
    }

    /// Close reason, only for close messages that carry one.
    #[must_use]
    pub fn status_description(&self) -> Option<&str> {
        match self {
            Message::Close(Some(frame)) => Some(&frame.reason),
            _ => None,
        }
    }

    /// Text content, if this is a text message.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Message::Text(s) => Some(s),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_is_control() {
        assert!(Message::ping(vec![]).is_control());
        assert!(Message::pong(vec![]).is_control());
        assert!(Message::Close(None).is_control());
        assert!(!Message::text("x").is_control());
        assert!(!Message::binary(vec![1]).is_control());
    }

    #[test]
    fn test_close_accessors() {
        let msg = Message::close(CloseCode::Normal, "bye");
        assert_eq!(msg.close_status(), Some(1000));
        assert_eq!(msg.status_description(), Some("bye"));
        assert!(msg.is_close());

        let text = Message::text("bye");
        assert_eq!(text.close_status(), None);
        assert_eq!(text.status_description(), None);
        assert_eq!(Message::Close(None).close_status(), None);
    }

    #[test]
    fn test_message_payload() {
        assert_eq!(&*Message::text("hi").payload(), b"hi");
        assert_eq!(&*Message::ping(vec![9]).payload(), &[9]);
        assert_eq!(
            &*Message::close(CloseCode::Normal, "ok").payload(),
            &[0x03, 0xe8, b'o', b'k']
        );
        assert!(Message::Close(None).payload().is_empty());
    }

    #[test]
    fn test_message_as_text() {
        assert_eq!(Message::text("a").as_text(), Some("a"));
        assert_eq!(Message::binary(vec![1]).as_text(), None);
    }

    #[test]
    fn test_close_code_from_u16() {
        assert_eq!(CloseCode::from_u16(1000), CloseCode::Normal);
        assert_eq!(CloseCode::from_u16(1002), CloseCode::ProtocolError);
        assert_eq!(CloseCode::from_u16(1009), CloseCode::MessageTooBig);
        assert_eq!(CloseCode::from_u16(4000), CloseCode::Other(4000));
        assert_eq!(CloseCode::from_u16(1012).as_u16(), 1012);
        assert_eq!(CloseCode::MessageTooBig.as_u16(), 1009);
    }

    #[test]
    fn test_close_code_validity() {
        assert!(CloseCode::Normal.is_valid());
        assert!(CloseCode::Other(1012).is_valid());
        assert!(CloseCode::Other(3000).is_valid());
        assert!(CloseCode::Other(4999).is_valid());
        assert!(!CloseCode::Other(1005).is_valid());
        assert!(!CloseCode::Other(999).is_valid());
        assert!(!CloseCode::Other(5000).is_valid());
    }

    #[test]
    fn test_close_code_reserved() {
        assert!(CloseCode::Other(1004).is_reserved());
        assert!(CloseCode::Other(1005).is_reserved());
        assert!(CloseCode::Other(1006).is_reserved());
        assert!(CloseCode::Other(1015).is_reserved());
        assert!(!CloseCode::Normal.is_reserved());
    }

    #[test]
    fn test_close_frame_parse() {
        assert_eq!(CloseFrame::parse(&[]).unwrap(), None);

        let frame = CloseFrame::parse(&[0x03, 0xe8, b'b', b'y', b'e'])
            .unwrap()
            .unwrap();
        assert_eq!(frame.code, CloseCode::Normal);
        assert_eq!(frame.reason, "bye");
    }

    #[test]
    fn test_close_frame_parse_rejects_malformed() {
        assert!(matches!(
            CloseFrame::parse(&[0x03]),
            Err(ProtocolError::InvalidClosePayload(_))
        ));
        // 1005 must never appear on the wire
        assert!(CloseFrame::parse(&[0x03, 0xed]).is_err());
        assert!(CloseFrame::parse(&[0x03, 0xe8, 0xff, 0xfe]).is_err());
    }

    #[test]
    fn test_close_frame_encode_parse() {
        let frame = CloseFrame::new(CloseCode::GoingAway, "shutdown");
        let parsed = CloseFrame::parse(&frame.encode()).unwrap();
        assert_eq!(parsed, Some(frame));
    }
}
