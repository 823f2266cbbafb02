//! Session writer task.
//!
//! The only code that touches a session's write half. Echoes, control
//! replies and keepalive pings all go through here, so frames never
//! interleave on the wire.

use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use wiretap_protocol::{FrameCodec, OpCode, Origin};

use crate::config::SessionConfig;
use crate::errors::WriteError;

/// Status code sent when the server is going away.
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// A frame waiting to be written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outbound {
    /// Frame opcode.
    pub opcode: OpCode,
    /// Unmasked payload.
    pub payload: Bytes,
}

impl Outbound {
    /// Frame with the given opcode and payload.
    pub fn new(opcode: OpCode, payload: Bytes) -> Self {
        Self { opcode, payload }
    }

    /// Close frame carrying only a status code.
    pub fn close(code: u16) -> Self {
        Self::new(OpCode::Close, Bytes::copy_from_slice(&code.to_be_bytes()))
    }
}

/// Timing knobs for the writer.
#[derive(Clone, Copy, Debug)]
pub struct WriterConfig {
    /// Period between keepalive pings.
    pub ping_interval: Duration,
    /// Budget for a single ping write.
    pub ping_write_timeout: Duration,
    /// Budget for any other write.
    pub write_timeout: Duration,
}

impl From<&SessionConfig> for WriterConfig {
    fn from(config: &SessionConfig) -> Self {
        Self {
            ping_interval: config.ping_interval(),
            ping_write_timeout: config.ping_write_timeout(),
            write_timeout: config.write_timeout(),
        }
    }
}

/// Drain `rx` onto `sink`, pinging every `ping_interval`.
///
/// Returns when the queue closes, a `Close` frame has been written or
/// `cancel` fires. A failed write cancels `cancel` so the reader stops too.
/// The sink is shut down before returning in every case.
pub async fn run_writer<W>(
    mut sink: W,
    mut rx: mpsc::Receiver<Outbound>,
    config: WriterConfig,
    cancel: CancellationToken,
) -> Result<(), WriteError>
where
    W: AsyncWrite + Unpin,
{
    let mut ping = tokio::time::interval_at(
        Instant::now() + config.ping_interval,
        config.ping_interval,
    );
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let result = loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => break Ok(()),
            next = rx.recv() => {
                let Some(frame) = next else { break Ok(()) };
                if let Err(e) =
                    write_frame(&mut sink, frame.opcode, &frame.payload, config.write_timeout).await
                {
                    break Err(e);
                }
                if frame.opcode == OpCode::Close {
                    debug!("close frame written");
                    break Ok(());
                }
            }
            _ = ping.tick() => {
                trace!("sending keepalive ping");
                if let Err(e) =
                    write_frame(&mut sink, OpCode::Ping, &[], config.ping_write_timeout).await
                {
                    break Err(e);
                }
            }
        }
    };

    if let Err(e) = &result {
        warn!(kind = e.kind(), error = %e, "write failed, stopping session");
        cancel.cancel();
    }
    if let Ok(Err(e)) = tokio::time::timeout(config.write_timeout, sink.shutdown()).await {
        debug!(error = %e, "write half shutdown failed");
    }
    result
}

async fn write_frame<W>(
    sink: &mut W,
    opcode: OpCode,
    payload: &[u8],
    budget: Duration,
) -> Result<(), WriteError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = FrameCodec::encode(opcode, payload, Origin::Server);
    let write = async {
        sink.write_all(&bytes).await?;
        sink.flush().await
    };
    match tokio::time::timeout(budget, write).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(source)) => Err(WriteError::Io { opcode, source }),
        Err(_) => Err(WriteError::TimedOut {
            opcode,
            timeout: budget,
        }),
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, duplex};

    use super::*;

    fn config() -> WriterConfig {
        WriterConfig {
            ping_interval: Duration::from_secs(30),
            ping_write_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(10),
        }
    }

    async fn read_exact_bytes<R: tokio::io::AsyncRead + Unpin>(r: &mut R, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        let _ = r.read_exact(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn writes_queued_frames_in_order() {
        let (server, mut client) = duplex(4096);
        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(run_writer(server, rx, config(), CancellationToken::new()));

        tx.send(Outbound::new(OpCode::Text, Bytes::from_static(b"one")))
            .await
            .unwrap();
        tx.send(Outbound::new(OpCode::Binary, Bytes::from_static(&[1, 2])))
            .await
            .unwrap();
        drop(tx);

        let first = FrameCodec::encode(OpCode::Text, b"one", Origin::Server);
        let second = FrameCodec::encode(OpCode::Binary, &[1, 2], Origin::Server);
        assert_eq!(read_exact_bytes(&mut client, first.len()).await, first);
        assert_eq!(read_exact_bytes(&mut client, second.len()).await, second);

        task.await.unwrap().unwrap();
        let mut rest = Vec::new();
        let _ = client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn close_frame_ends_writer() {
        let (server, mut client) = duplex(4096);
        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(run_writer(server, rx, config(), CancellationToken::new()));

        tx.send(Outbound::close(CLOSE_GOING_AWAY)).await.unwrap();
        task.await.unwrap().unwrap();

        let expected = FrameCodec::encode(OpCode::Close, &[0x03, 0xe9], Origin::Server);
        let mut written = Vec::new();
        let _ = client.read_to_end(&mut written).await.unwrap();
        assert_eq!(written, expected);
        // sender is still alive, the writer stopped on its own
        assert!(tx.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn pings_on_schedule() {
        let (server, mut client) = duplex(4096);
        let (_tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_writer(server, rx, config(), cancel.clone()));

        let start = Instant::now();
        let ping = FrameCodec::encode(OpCode::Ping, &[], Origin::Server);
        assert_eq!(read_exact_bytes(&mut client, ping.len()).await, ping);
        assert!(start.elapsed() >= Duration::from_secs(30));
        assert_eq!(read_exact_bytes(&mut client, ping.len()).await, ping);
        assert!(start.elapsed() >= Duration::from_secs(60));

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_ping_write_times_out_and_cancels() {
        // tiny buffer nobody drains
        let (server, _client) = duplex(1);
        let (_tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let err = run_writer(server, rx, config(), cancel.clone())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WriteError::TimedOut {
                opcode: OpCode::Ping,
                timeout
            } if timeout == Duration::from_secs(5)
        ));
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn closed_peer_is_write_error() {
        let (server, client) = duplex(64);
        drop(client);
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        tx.send(Outbound::new(OpCode::Text, Bytes::from_static(b"hi")))
            .await
            .unwrap();

        let err = run_writer(server, rx, config(), cancel.clone())
            .await
            .unwrap_err();
        assert_eq!(err.opcode(), OpCode::Text);
        assert_eq!(err.kind(), "write_error");
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn close_helper_encodes_status_big_endian() {
        let frame = Outbound::close(1000);
        assert_eq!(frame.opcode, OpCode::Close);
        assert_eq!(&frame.payload[..], &[0x03, 0xe8]);
    }
}
