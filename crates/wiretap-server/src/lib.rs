//! # wiretap-server
//!
//! Axum HTTP logger and WebSocket echo server.
//!
//! - HTTP: every request logged (method, URI, headers, body), answered `ok`
//! - `GET /ws`: handshake via `wiretap-protocol`, then a raw-framed session
//! - Sessions: echo loop, ping/pong keepalive, single writer task per socket
//! - Graceful shutdown via `CancellationToken` + `TaskTracker`

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod http_log;
pub mod observer;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod upgrade;
pub mod writer;

pub use config::{ServerConfig, SessionConfig, load_config};
pub use errors::{ConfigError, UpgradeError, WriteError};
pub use observer::{ConnectionId, ConnectionInfo, Observer, Preview, TracingObserver};
pub use server::{AppState, ServerHandle, build_router, start};
pub use session::{CloseReason, ConnectionSession, SessionState};
pub use shutdown::ShutdownCoordinator;
