//! Session event observer.
//!
//! Sessions report what they see through [`Observer`]; the production
//! implementation, [`TracingObserver`], prints every event with `tracing`.
//! Events are emitted inside the session's `ws` span, which carries the
//! connection id.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::net::SocketAddr;

use axum::http::HeaderMap;
use tracing::{info, warn};
use uuid::Uuid;
use wiretap_protocol::{HandshakeRequest, OpCode};

use crate::session::CloseReason;

/// Unique connection identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl Default for ConnectionId {
    fn default() -> Self {
        Self(format!("conn_{}", Uuid::now_v7()))
    }
}

impl ConnectionId {
    /// Generate a fresh id.
    pub fn new() -> Self {
        Self::default()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything known about a connection when its session starts.
#[derive(Clone, Debug, Default)]
pub struct ConnectionInfo {
    /// Connection id, also recorded on the session span.
    pub id: ConnectionId,
    /// Remote address, when the transport exposes one.
    pub peer: Option<SocketAddr>,
    /// Upgrade request headers in arrival order.
    pub headers: Vec<(String, String)>,
    /// Query string parameters of the upgrade request.
    pub query: BTreeMap<String, String>,
    /// Subprotocols offered by the client.
    pub requested_subprotocols: Vec<String>,
    /// Subprotocol echoed back in the handshake.
    pub selected_subprotocol: Option<String>,
}

impl ConnectionInfo {
    /// Collect connection details from the upgrade request.
    pub fn new(
        peer: Option<SocketAddr>,
        headers: &HeaderMap,
        query: BTreeMap<String, String>,
        request: &HandshakeRequest,
        selected_subprotocol: Option<String>,
    ) -> Self {
        let headers = headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        Self {
            id: ConnectionId::new(),
            peer,
            headers,
            query,
            requested_subprotocols: request.requested_subprotocols.clone(),
            selected_subprotocol,
        }
    }
}

/// Bounded, printable view of a frame payload.
///
/// Binary payloads are rendered as hex, everything else as lossy UTF-8.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Preview {
    text: String,
    shown: usize,
    total: usize,
}

impl Preview {
    /// Render at most `limit` bytes of `payload`.
    pub fn new(opcode: OpCode, payload: &[u8], limit: usize) -> Self {
        let shown = payload.len().min(limit);
        let head = &payload[..shown];
        let text = if opcode == OpCode::Binary {
            let mut hex = String::with_capacity(shown * 3);
            for (i, byte) in head.iter().enumerate() {
                if i > 0 {
                    hex.push(' ');
                }
                let _ = write!(hex, "{byte:02x}");
            }
            hex
        } else {
            String::from_utf8_lossy(head).into_owned()
        };
        Self {
            text,
            shown,
            total: payload.len(),
        }
    }

    /// Rendered content without the truncation marker.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Whether bytes were left out.
    pub fn is_truncated(&self) -> bool {
        self.shown < self.total
    }
}

impl fmt::Display for Preview {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)?;
        if self.is_truncated() {
            write!(f, "... [truncated, {} more bytes]", self.total - self.shown)?;
        }
        Ok(())
    }
}

/// Receives session events.
pub trait Observer: Send + Sync {
    /// A handshake succeeded and the session is starting.
    fn on_connection_opened(&self, info: &ConnectionInfo);
    /// A frame was decoded.
    fn on_frame_received(&self, opcode: OpCode, len: usize, preview: &Preview);
    /// The session ended.
    fn on_connection_closed(&self, reason: &CloseReason);
}

/// Observer that prints events through `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn on_connection_opened(&self, info: &ConnectionInfo) {
        let headers = serde_json::to_string(&info.headers).unwrap_or_default();
        let query = serde_json::to_string(&info.query).unwrap_or_default();
        info!(
            peer = ?info.peer,
            headers = %headers,
            query = %query,
            requested_subprotocols = ?info.requested_subprotocols,
            subprotocol = ?info.selected_subprotocol,
            "websocket connection opened"
        );
    }

    fn on_frame_received(&self, opcode: OpCode, len: usize, preview: &Preview) {
        info!(opcode = %opcode, len, preview = %preview, "ws frame received");
    }

    fn on_connection_closed(&self, reason: &CloseReason) {
        if reason.is_error() {
            warn!(kind = reason.kind(), reason = %reason, "websocket connection closed");
        } else {
            info!(kind = reason.kind(), reason = %reason, "websocket connection closed");
        }
    }
}
