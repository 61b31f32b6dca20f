//! Client side of the opening handshake (RFC 6455 Section 4).

use std::fmt;
use std::str::FromStr;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use http::header::{
    CONNECTION, HOST, HeaderName, HeaderValue, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY,
    SEC_WEBSOCKET_PROTOCOL, SEC_WEBSOCKET_VERSION, UPGRADE,
};
use http::{Request, Response, StatusCode, Uri};
use sha1::{Digest, Sha1};

use crate::error::{HandshakeError, Result};
use crate::protocol::http::ReasonPhrase;
use crate::random::RandomSource;

/// The WebSocket GUID used in the Sec-WebSocket-Accept calculation (RFC 6455).
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Protocol version sent in `Sec-WebSocket-Version`.
pub const WS_VERSION: &str = "13";

/// Headers the negotiator owns; callers may not supply them.
const RESERVED_HEADERS: [&str; 7] = [
    "host",
    "upgrade",
    "connection",
    "sec-websocket-key",
    "sec-websocket-version",
    "sec-websocket-accept",
    "sec-websocket-protocol",
];

/// Computes the Sec-WebSocket-Accept value from the client's Sec-WebSocket-Key.
///
/// The accept key is calculated as: Base64(SHA-1(key + GUID))
///
/// # Example
///
/// ```
/// use rsws_client::protocol::handshake::compute_accept_key;
///
/// let accept = compute_accept_key("dGhlIHNhbXBsZSBub25jZQ==");
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
#[must_use]
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Remote endpoint of a WebSocket connection, parsed from a `ws://` or `wss://` URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WsTarget {
    host: String,
    port: u16,
    secure: bool,
    resource: String,
}

impl WsTarget {
    /// Parse a WebSocket URI.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::InvalidUri`] for unparsable URIs, schemes
    /// other than `ws`/`wss`, or a missing host.
    pub fn parse(uri: &str) -> std::result::Result<Self, HandshakeError> {
        let parsed: Uri = uri
            .parse()
            .map_err(|e| HandshakeError::InvalidUri(format!("{uri}: {e}")))?;

        let secure = match parsed.scheme_str().map(str::to_ascii_lowercase).as_deref() {
            Some("ws") => false,
            Some("wss") => true,
            Some(other) => {
                return Err(HandshakeError::InvalidUri(format!(
                    "unsupported scheme {other:?}"
                )));
            }
            None => return Err(HandshakeError::InvalidUri(format!("{uri}: missing scheme"))),
        };

        let host = parsed
            .host()
            .map(|host| host.trim_start_matches('[').trim_end_matches(']'))
            .filter(|host| !host.is_empty())
            .ok_or_else(|| HandshakeError::InvalidUri(format!("{uri}: missing host")))?
            .to_string();

        let port = parsed.port_u16().unwrap_or(if secure { 443 } else { 80 });
        let resource = match parsed.path_and_query().map(|p| p.as_str()) {
            None | Some("") => "/".to_string(),
            Some(path) if path.starts_with('?') => format!("/{path}"),
            Some(path) => path.to_string(),
        };

        Ok(Self {
            host,
            port,
            secure,
            resource,
        })
    }

    /// Host name or address, without IPv6 brackets.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port, defaulted from the scheme when absent.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether the scheme was `wss`.
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Path and query sent in the request line.
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Value of the `Host` header; the port is omitted when it is the scheme default.
    #[must_use]
    pub fn host_header(&self) -> String {
        let host = self.bracketed_host();
        let default_port = if self.secure { 443 } else { 80 };
        if self.port == default_port {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }

    /// `host:port`, always with the port.
    #[must_use]
    pub fn authority(&self) -> String {
        format!("{}:{}", self.bracketed_host(), self.port)
    }

    fn bracketed_host(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        }
    }
}

impl FromStr for WsTarget {
    type Err = HandshakeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for WsTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.secure { "wss" } else { "ws" };
        write!(f, "{scheme}://{}{}", self.authority(), self.resource)
    }
}

/// Outcome of a successful handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Handshake {
    /// Subprotocol selected by the server, if any.
    pub protocol: Option<String>,
}

/// Builds one upgrade request and checks the server's answer to it.
///
/// A negotiator holds the key for a single attempt and is consumed by
/// [`HandshakeNegotiator::validate_response`].
#[derive(Debug)]
pub struct HandshakeNegotiator {
    target: WsTarget,
    key: String,
    expected_accept: String,
    protocols: Vec<String>,
    headers: Vec<(String, String)>,
}

impl HandshakeNegotiator {
    /// Start a handshake with a fresh 16-byte key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Random`](crate::Error::Random) if no key could be drawn.
    pub fn new(target: WsTarget, random: &dyn RandomSource) -> Result<Self> {
        let mut nonce = [0u8; 16];
        random.fill_bytes(&mut nonce)?;
        let key = BASE64.encode(nonce);
        let expected_accept = compute_accept_key(&key);

        Ok(Self {
            target,
            key,
            expected_accept,
            protocols: Vec::new(),
            headers: Vec::new(),
        })
    }

    /// Offer these subprotocols, in preference order.
    #[must_use]
    pub fn with_protocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.protocols.extend(protocols.into_iter().map(Into::into));
        self
    }

    /// Send these extra headers with the request.
    #[must_use]
    pub fn with_headers<I, N, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(n, v)| (n.into(), v.into())));
        self
    }

    /// The `Sec-WebSocket-Key` of this attempt.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The `Sec-WebSocket-Accept` the server must answer with.
    #[must_use]
    pub fn expected_accept(&self) -> &str {
        &self.expected_accept
    }

    /// The endpoint being negotiated with.
    #[must_use]
    pub fn target(&self) -> &WsTarget {
        &self.target
    }

    /// Build the upgrade request.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::InvalidHeader`] for a custom header that
    /// is malformed or collides with a handshake header, or a subprotocol
    /// that is not an HTTP token.
    pub fn build_request(&self) -> std::result::Result<Request<()>, HandshakeError> {
        let mut builder = Request::get(self.target.resource())
            .header(HOST, header_value("Host", &self.target.host_header())?)
            .header(UPGRADE, HeaderValue::from_static("websocket"))
            .header(CONNECTION, HeaderValue::from_static("Upgrade"))
            .header(SEC_WEBSOCKET_KEY, header_value("Sec-WebSocket-Key", &self.key)?)
            .header(SEC_WEBSOCKET_VERSION, HeaderValue::from_static(WS_VERSION));

        if !self.protocols.is_empty() {
            if let Some(bad) = self.protocols.iter().find(|p| !is_token(p)) {
                return Err(HandshakeError::InvalidHeader {
                    header: "Sec-WebSocket-Protocol".into(),
                    reason: format!("{bad:?} is not a valid token"),
                });
            }
            let offered = self.protocols.join(", ");
            builder = builder.header(
                SEC_WEBSOCKET_PROTOCOL,
                header_value("Sec-WebSocket-Protocol", &offered)?,
            );
        }

        for (name, value) in &self.headers {
            let header = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                HandshakeError::InvalidHeader {
                    header: name.clone(),
                    reason: "invalid header name".into(),
                }
            })?;
            if RESERVED_HEADERS.contains(&header.as_str()) {
                return Err(HandshakeError::InvalidHeader {
                    header: name.clone(),
                    reason: "set by the handshake".into(),
                });
            }
            builder = builder.header(header, header_value(name, value)?);
        }

        builder
            .body(())
            .map_err(|e| HandshakeError::InvalidHeader {
                header: String::new(),
                reason: e.to_string(),
            })
    }

    /// Check the server's response against this attempt.
    ///
    /// # Errors
    ///
    /// - [`HandshakeError::UnexpectedStatus`] unless the status is 101
    /// - [`HandshakeError::MalformedResponse`] for missing upgrade headers or
    ///   a subprotocol that was not offered
    /// - [`HandshakeError::AcceptMismatch`] if the accept value is missing or wrong
    pub fn validate_response(
        self,
        response: &Response<()>,
    ) -> std::result::Result<Handshake, HandshakeError> {
        let status = response.status();
        if status != StatusCode::SWITCHING_PROTOCOLS {
            let reason = response
                .extensions()
                .get::<ReasonPhrase>()
                .map(|r| r.0.clone())
                .or_else(|| status.canonical_reason().map(str::to_string))
                .unwrap_or_default();
            return Err(HandshakeError::UnexpectedStatus {
                status: status.as_u16(),
                reason,
            });
        }

        let headers = response.headers();
        let upgrade = headers.get(UPGRADE).and_then(|v| v.to_str().ok());
        if !upgrade.is_some_and(|v| v.trim().eq_ignore_ascii_case("websocket")) {
            return Err(HandshakeError::MalformedResponse(format!(
                "Upgrade header is {upgrade:?}, expected websocket"
            )));
        }

        let connection_upgrade = headers.get_all(CONNECTION).iter().any(|value| {
            value.to_str().is_ok_and(|v| {
                v.split(',')
                    .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
            })
        });
        if !connection_upgrade {
            return Err(HandshakeError::MalformedResponse(
                "Connection header does not contain upgrade".into(),
            ));
        }

        let accept = headers
            .get(SEC_WEBSOCKET_ACCEPT)
            .map(|v| String::from_utf8_lossy(v.as_bytes()).trim().to_string());
        if accept.as_deref() != Some(self.expected_accept.as_str()) {
            return Err(HandshakeError::AcceptMismatch {
                expected: self.expected_accept,
                actual: accept,
            });
        }

        let protocol = match headers.get(SEC_WEBSOCKET_PROTOCOL) {
            None => None,
            Some(value) => {
                let selected = value.to_str().map(str::trim).unwrap_or_default();
                if !self.protocols.iter().any(|p| p == selected) {
                    return Err(HandshakeError::MalformedResponse(format!(
                        "server selected subprotocol {selected:?} that was not offered"
                    )));
                }
                Some(selected.to_string())
            }
        };

        Ok(Handshake { protocol })
    }
}

fn header_value(name: &str, value: &str) -> std::result::Result<HeaderValue, HandshakeError> {
    HeaderValue::from_str(value).map_err(|_| HandshakeError::InvalidHeader {
        header: name.to_string(),
        reason: "contains CR, LF or other control characters".into(),
    })
}

/// RFC 7230 token.
fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().all(|b| {
            b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
        })
}
