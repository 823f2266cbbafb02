//! One upgraded connection: echo loop plus ping/pong keepalive.
//!
//! The session splits its stream. The read half stays with the read loop;
//! the write half moves into the [`writer`](crate::writer) task, which is
//! fed by a bounded queue and also owns the ping timer. A shared
//! `CancellationToken` lets either side stop the other.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, trace, warn};
use wiretap_protocol::{FrameCodec, FrameError, OpCode};

use crate::config::SessionConfig;
use crate::errors::WriteError;
use crate::observer::{ConnectionInfo, Observer, Preview};
use crate::writer::{self, CLOSE_GOING_AWAY, Outbound, WriterConfig};

/// Lifecycle of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Reading and echoing frames.
    Open,
    /// A terminal condition was hit; the writer is finishing.
    Closing,
    /// The connection has been released.
    Closed,
}

/// Why a session ended.
#[derive(Debug)]
pub enum CloseReason {
    /// The peer sent a `Close` frame, optionally with a status code.
    PeerClosed {
        /// Status code from the close payload.
        code: Option<u16>,
    },
    /// The peer closed the stream on a frame boundary.
    StreamClosed,
    /// A fragmented frame arrived.
    FragmentationUnsupported,
    /// Nothing was read within the liveness window.
    KeepaliveTimeout {
        /// The liveness window that elapsed.
        window: Duration,
    },
    /// The inbound byte stream was malformed or failed.
    Protocol(FrameError),
    /// An outbound write failed or timed out.
    WriteFailed(WriteError),
    /// The server is shutting down.
    ServerShutdown,
}

impl CloseReason {
    /// Whether this ending should be reported as a failure.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::KeepaliveTimeout { .. } | Self::Protocol(_) | Self::WriteFailed(_)
        )
    }

    /// Short classification string for structured logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PeerClosed { .. } => "peer_closed",
            Self::StreamClosed => "stream_closed",
            Self::FragmentationUnsupported => "fragmentation_unsupported",
            Self::KeepaliveTimeout { .. } => "keepalive_timeout",
            Self::Protocol(e) => e.kind(),
            Self::WriteFailed(e) => e.kind(),
            Self::ServerShutdown => "server_shutdown",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed { code: Some(code) } => write!(f, "peer sent close ({code})"),
            Self::PeerClosed { code: None } => f.write_str("peer sent close"),
            Self::StreamClosed => f.write_str("stream closed by peer"),
            Self::FragmentationUnsupported => {
                f.write_str("fragmented frame received, fragmentation is not supported")
            }
            Self::KeepaliveTimeout { window } => {
                write!(f, "no frames received within {window:?}")
            }
            Self::Protocol(e) => write!(f, "protocol error: {e}"),
            Self::WriteFailed(e) => write!(f, "{e}"),
            Self::ServerShutdown => f.write_str("server shutting down"),
        }
    }
}

/// Read deadline bookkeeping.
#[derive(Debug)]
struct Liveness {
    window: Duration,
    read_deadline: Instant,
    last_pong_at: Option<Instant>,
}

impl Liveness {
    fn new(window: Duration) -> Self {
        Self {
            window,
            read_deadline: Instant::now() + window,
            last_pong_at: None,
        }
    }

    fn refresh(&mut self) {
        self.read_deadline = Instant::now() + self.window;
    }

    fn record_pong(&mut self) {
        let now = Instant::now();
        self.last_pong_at = Some(now);
        self.read_deadline = now + self.window;
    }
}

/// Owns one upgraded connection for its whole lifetime.
pub struct ConnectionSession<S> {
    stream: S,
    config: SessionConfig,
    observer: Arc<dyn Observer>,
    shutdown: CancellationToken,
    state: watch::Sender<SessionState>,
}

impl<S> ConnectionSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap an upgraded stream.
    pub fn new(stream: S, config: &SessionConfig, observer: Arc<dyn Observer>) -> Self {
        let (state, _) = watch::channel(SessionState::Open);
        Self {
            stream,
            config: config.clone(),
            observer,
            shutdown: CancellationToken::new(),
            state,
        }
    }

    /// Close with status 1001 when `token` is cancelled.
    #[must_use]
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Subscribe to state transitions.
    pub fn state_watch(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Run until the connection ends and report why.
    pub async fn run(self, info: ConnectionInfo) -> CloseReason {
        let span = info_span!("ws", conn = %info.id);
        self.run_inner(info).instrument(span).await
    }

    async fn run_inner(self, info: ConnectionInfo) -> CloseReason {
        let Self {
            stream,
            config,
            observer,
            shutdown,
            state,
        } = self;
        observer.on_connection_opened(&info);

        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader = BufReader::with_capacity(config.read_buffer_size, read_half);
        let (tx, rx) = mpsc::channel(config.send_queue);
        let cancel = CancellationToken::new();
        let writer = tokio::spawn(
            writer::run_writer(write_half, rx, WriterConfig::from(&config), cancel.clone())
                .in_current_span(),
        );

        let codec = FrameCodec::new(config.max_payload_len);
        let mut liveness = Liveness::new(config.liveness_timeout());

        // None: the writer stopped first and its result explains why
        let outcome = loop {
            let read = tokio::select! {
                biased;

                () = cancel.cancelled() => break None,
                () = shutdown.cancelled() => {
                    let _ = tx.send(Outbound::close(CLOSE_GOING_AWAY)).await;
                    break Some(CloseReason::ServerShutdown);
                }
                read = tokio::time::timeout_at(liveness.read_deadline, codec.decode(&mut reader)) => read,
            };

            let frame = match read {
                Err(_) => {
                    break Some(CloseReason::KeepaliveTimeout {
                        window: liveness.window,
                    });
                }
                Ok(Err(FrameError::StreamClosed)) => break Some(CloseReason::StreamClosed),
                Ok(Err(FrameError::FragmentationUnsupported)) => {
                    break Some(CloseReason::FragmentationUnsupported);
                }
                Ok(Err(e)) => break Some(CloseReason::Protocol(e)),
                Ok(Ok(frame)) => frame,
            };

            liveness.refresh();
            let preview = Preview::new(frame.opcode, &frame.payload, config.preview_limit);
            observer.on_frame_received(frame.opcode, frame.payload_len(), &preview);

            let reply = match frame.opcode {
                OpCode::Text | OpCode::Binary => Outbound::new(frame.opcode, frame.payload),
                OpCode::Ping => Outbound::new(OpCode::Pong, frame.payload),
                OpCode::Pong => {
                    liveness.record_pong();
                    trace!(last_pong_at = ?liveness.last_pong_at, "pong received");
                    continue;
                }
                OpCode::Close => {
                    let code = frame.close_code();
                    let _ = tx.send(Outbound::new(OpCode::Close, frame.payload)).await;
                    break Some(CloseReason::PeerClosed { code });
                }
                OpCode::Continuation => break Some(CloseReason::FragmentationUnsupported),
            };
            if tx.send(reply).await.is_err() {
                break None;
            }
        };

        let _ = state.send_replace(SessionState::Closing);
        debug!(reason = ?outcome.as_ref().map(CloseReason::kind), "session closing");
        match &outcome {
            Some(reason) if !reason.is_error() => drop(tx),
            _ => cancel.cancel(),
        }

        let write_error = match writer.await {
            Ok(result) => result.err(),
            Err(e) => {
                warn!(error = %e, "writer task failed");
                None
            }
        };
        let reason = match (outcome, write_error) {
            (Some(reason), Some(e)) => {
                debug!(error = %e, "write failed while closing");
                reason
            }
            (Some(reason), None) => reason,
            (None, Some(e)) => CloseReason::WriteFailed(e),
            (None, None) => CloseReason::StreamClosed,
        };

        drop(reader);
        let _ = state.send_replace(SessionState::Closed);
        observer.on_connection_closed(&reason);
        reason
    }
}
