//! Opening handshake (RFC 6455 §4.2).
//!
//! The negotiator only validates and produces the response. Detaching the
//! socket from the HTTP layer is the caller's job.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::HeaderMap;
use http::header::{SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_PROTOCOL, UPGRADE};
use sha1::{Digest, Sha1};

use crate::errors::HandshakeError;

/// GUID appended to the client key before hashing.
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The parts of an upgrade request the negotiator looks at.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// `Upgrade` header present and exactly `websocket`.
    pub upgrade_header_present: bool,
    /// Raw `Sec-WebSocket-Key` value, empty when absent.
    pub sec_websocket_key: String,
    /// `Sec-WebSocket-Protocol` offers in client order.
    pub requested_subprotocols: Vec<String>,
}

impl HandshakeRequest {
    /// Extract handshake fields from request headers.
    ///
    /// Only the first `Upgrade` value is considered and it must match
    /// `websocket` byte for byte.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let upgrade_header_present = headers
            .get(UPGRADE)
            .is_some_and(|v| v.as_bytes() == b"websocket");
        let sec_websocket_key = headers
            .get(SEC_WEBSOCKET_KEY)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let requested_subprotocols = headers
            .get_all(SEC_WEBSOCKET_PROTOCOL)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();

        Self {
            upgrade_header_present,
            sec_websocket_key,
            requested_subprotocols,
        }
    }
}

/// `Sec-WebSocket-Accept` value: base64(SHA-1(key ++ GUID)).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AcceptToken(String);

impl AcceptToken {
    /// Derive the token for a client key.
    pub fn from_key(key: &str) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(key.as_bytes());
        hasher.update(WEBSOCKET_GUID.as_bytes());
        Self(STANDARD.encode(hasher.finalize()))
    }

    /// The token as a header value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AcceptToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A successfully negotiated handshake.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Handshake {
    accept: AcceptToken,
    subprotocol: Option<String>,
}

/// Validate an upgrade request and compute its accept token.
pub fn negotiate(request: &HandshakeRequest) -> Result<Handshake, HandshakeError> {
    if !request.upgrade_header_present {
        return Err(HandshakeError::NotWebSocketUpgrade);
    }
    if request.sec_websocket_key.is_empty() {
        return Err(HandshakeError::MissingKey);
    }
    Ok(Handshake {
        accept: AcceptToken::from_key(&request.sec_websocket_key),
        subprotocol: None,
    })
}

impl Handshake {
    /// The computed accept token.
    pub fn accept(&self) -> &AcceptToken {
        &self.accept
    }

    /// Subprotocol echoed back to the client, if any.
    pub fn subprotocol(&self) -> Option<&str> {
        self.subprotocol.as_deref()
    }

    /// Select a subprotocol to echo in the response.
    #[must_use]
    pub fn with_subprotocol(mut self, subprotocol: Option<String>) -> Self {
        self.subprotocol = subprotocol;
        self
    }

    /// Response headers after the status line, in wire order.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("Upgrade", "websocket".to_string()),
            ("Connection", "Upgrade".to_string()),
            ("Sec-WebSocket-Accept", self.accept.to_string()),
        ];
        if let Some(proto) = &self.subprotocol {
            headers.push(("Sec-WebSocket-Protocol", proto.clone()));
        }
        headers
    }

    /// The literal `101 Switching Protocols` response, blank line included.
    pub fn response_bytes(&self) -> Vec<u8> {
        let mut response = String::from("HTTP/1.1 101 Switching Protocols\r\n");
        for (name, value) in self.headers() {
            response.push_str(name);
            response.push_str(": ");
            response.push_str(&value);
            response.push_str("\r\n");
        }
        response.push_str("\r\n");
        response.into_bytes()
    }
}
