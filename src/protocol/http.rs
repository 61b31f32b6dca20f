//! Minimal HTTP/1.1 head codec for the upgrade exchange.
//!
//! Only what the opening handshake needs: serialize a bodiless request and
//! parse a response head. Anything after the blank line belongs to the
//! WebSocket stream and is left to the caller.

use bytes::{BufMut, BytesMut};
use http::header::{HeaderName, HeaderValue};
use http::{Request, Response, StatusCode, Version};

use crate::error::HandshakeError;

/// Headers that must appear at most once in an upgrade response.
const SINGLETON_HEADERS: [&str; 3] = ["sec-websocket-accept", "sec-websocket-protocol", "upgrade"];

/// Reason phrase of a parsed response, stored as a response extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReasonPhrase(pub String);

/// Serialize the request line and headers of `request` into `dst`.
pub fn write_request(request: &Request<()>, dst: &mut BytesMut) {
    let target = request
        .uri()
        .path_and_query()
        .map_or("/", |path| path.as_str());

    dst.put_slice(request.method().as_str().as_bytes());
    dst.put_u8(b' ');
    dst.put_slice(target.as_bytes());
    dst.put_slice(b" HTTP/1.1\r\n");

    for (name, value) in request.headers() {
        dst.put_slice(name.as_str().as_bytes());
        dst.put_slice(b": ");
        dst.put_slice(value.as_bytes());
        dst.put_slice(b"\r\n");
    }
    dst.put_slice(b"\r\n");
}

/// Incremental reader for the response head.
///
/// Remembers how far the buffer has been searched for the blank line, so a
/// head arriving in small reads is scanned once overall.
#[derive(Debug, Clone)]
pub struct ResponseParser {
    max_size: usize,
    scanned: usize,
}

impl ResponseParser {
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            scanned: 0,
        }
    }

    /// Parse a response head from the start of `data`, which must extend the
    /// buffer passed on the previous call.
    ///
    /// Returns `Ok(None)` until the terminating blank line has arrived,
    /// otherwise the response and the number of bytes the head occupied.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::MalformedResponse`] if the head exceeds the
    /// size limit, is not valid HTTP/1.1, or repeats a handshake header.
    pub fn parse(
        &mut self,
        data: &[u8],
    ) -> Result<Option<(Response<()>, usize)>, HandshakeError> {
        // The terminator may straddle the previous end of the buffer
        let start = self.scanned.saturating_sub(3).min(data.len());
        let found = data[start..]
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .map(|offset| start + offset);
        self.scanned = data.len();

        let Some(end) = found else {
            if data.len() > self.max_size {
                return Err(too_large(data.len(), self.max_size));
            }
            return Ok(None);
        };
        let head_len = end + 4;
        if head_len > self.max_size {
            return Err(too_large(head_len, self.max_size));
        }
        parse_head(&data[..end]).map(|response| Some((response, head_len)))
    }

    /// Bytes already searched for the end of the head.
    #[must_use]
    pub fn scanned(&self) -> usize {
        self.scanned
    }
}

/// Parse a complete response head held in `data`.
///
/// One-shot form of [`ResponseParser::parse`].
///
/// # Errors
///
/// See [`ResponseParser::parse`].
pub fn parse_response(
    data: &[u8],
    max_size: usize,
) -> Result<Option<(Response<()>, usize)>, HandshakeError> {
    ResponseParser::new(max_size).parse(data)
}

fn parse_head(data: &[u8]) -> Result<Response<()>, HandshakeError> {
    let head = std::str::from_utf8(data)
        .map_err(|_| malformed("response head is not UTF-8"))?;
    let mut lines = head.split("\r\n");

    let status_line = lines.next().unwrap_or_default();
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if version != "HTTP/1.1" {
        return Err(malformed(format!("unsupported HTTP version {version:?}")));
    }
    let status = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .and_then(|code| StatusCode::from_u16(code).ok())
        .ok_or_else(|| malformed(format!("invalid status line {status_line:?}")))?;
    let reason = parts.next().unwrap_or_default().trim().to_string();

    let mut builder = Response::builder()
        .status(status)
        .version(Version::HTTP_11)
        .extension(ReasonPhrase(reason));

    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| malformed(format!("invalid header line {line:?}")))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|_| malformed(format!("invalid header name {name:?}")))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|_| malformed(format!("invalid value for header {name}")))?;

        let duplicate = builder
            .headers_ref()
            .is_some_and(|headers| headers.contains_key(&name));
        if duplicate && SINGLETON_HEADERS.contains(&name.as_str()) {
            return Err(malformed(format!("duplicate header {name}")));
        }
        builder = builder.header(name, value);
    }

    builder.body(()).map_err(|e| malformed(e.to_string()))
}

fn malformed(reason: impl Into<String>) -> HandshakeError {
    HandshakeError::MalformedResponse(reason.into())
}

fn too_large(size: usize, max: usize) -> HandshakeError {
    malformed(format!("response head of {size} bytes exceeds {max}"))
}
