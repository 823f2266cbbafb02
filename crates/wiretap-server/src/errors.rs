//! Server error types.

use std::io;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use wiretap_protocol::{HandshakeError, OpCode};

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the config file.
    #[error("failed to read config file: {0}")]
    Io(#[from] io::Error),
    /// Config file is not valid JSON or has the wrong shape.
    #[error("failed to parse config JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// A value is out of range or inconsistent.
    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

/// Reasons an upgrade request is refused before a session exists.
#[derive(Debug, Error)]
pub enum UpgradeError {
    /// The request is not a valid WebSocket handshake (400).
    #[error(transparent)]
    InvalidHandshake(#[from] HandshakeError),
    /// The transport cannot be detached for raw framing (500).
    #[error("connection cannot be taken over for raw framing")]
    HijackUnsupported,
}

impl UpgradeError {
    /// HTTP status sent back to the client.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidHandshake(_) => StatusCode::BAD_REQUEST,
            Self::HijackUnsupported => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short classification string for structured logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidHandshake(e) => e.kind(),
            Self::HijackUnsupported => "hijack_unsupported",
        }
    }
}

impl IntoResponse for UpgradeError {
    fn into_response(self) -> Response {
        tracing::warn!(kind = self.kind(), error = %self, "websocket upgrade rejected");
        (self.status(), self.to_string()).into_response()
    }
}

/// A failed write on a session's socket.
#[derive(Debug, Error)]
pub enum WriteError {
    /// The write did not complete within its budget.
    #[error("{opcode} write timed out after {timeout:?}")]
    TimedOut {
        /// Opcode of the frame being written.
        opcode: OpCode,
        /// Budget that was exceeded.
        timeout: Duration,
    },
    /// The socket reported an error.
    #[error("{opcode} write failed: {source}")]
    Io {
        /// Opcode of the frame being written.
        opcode: OpCode,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

impl WriteError {
    /// Opcode of the frame whose write failed.
    pub fn opcode(&self) -> OpCode {
        match self {
            Self::TimedOut { opcode, .. } | Self::Io { opcode, .. } => *opcode,
        }
    }

    /// Short classification string for structured logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TimedOut { .. } => "write_timeout",
            Self::Io { .. } => "write_error",
        }
    }
}
