//! End-to-end tests against a real listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use wiretap_protocol::{AcceptToken, FrameCodec, OpCode, Origin};
use wiretap_server::{ServerConfig, ServerHandle, TracingObserver, start};

const TIMEOUT: Duration = Duration::from_secs(5);
const KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

async fn boot_server() -> ServerHandle {
    let config = ServerConfig {
        addr: "127.0.0.1:0".into(),
        ..ServerConfig::default()
    };
    start(config, Arc::new(TracingObserver)).await.unwrap()
}

/// Send a raw upgrade request and return the status line, lower-cased
/// headers and the reader positioned at the first frame.
async fn raw_handshake(
    addr: SocketAddr,
    extra_headers: &str,
) -> (
    String,
    Vec<(String, String)>,
    BufReader<OwnedReadHalf>,
    tokio::net::tcp::OwnedWriteHalf,
) {
    let stream = TcpStream::connect(addr).await.unwrap();
    let (read, mut write) = stream.into_split();
    let request = format!(
        "GET /ws?room=lobby HTTP/1.1\r\n\
         Host: {addr}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {KEY}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         {extra_headers}\r\n"
    );
    write.write_all(request.as_bytes()).await.unwrap();

    let mut reader = BufReader::new(read);
    let mut status = String::new();
    let _ = timeout(TIMEOUT, reader.read_line(&mut status))
        .await
        .unwrap()
        .unwrap();

    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        let _ = reader.read_line(&mut line).await.unwrap();
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        let (name, value) = line.split_once(':').unwrap();
        headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
    }
    (status.trim_end().to_string(), headers, reader, write)
}

fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str())
}

#[tokio::test]
async fn raw_client_gets_identical_echoes() {
    let server = boot_server().await;
    let (status, headers, mut reader, mut writer) =
        raw_handshake(server.local_addr(), "").await;

    assert_eq!(status, "HTTP/1.1 101 Switching Protocols");
    assert_eq!(header(&headers, "upgrade"), Some("websocket"));
    assert_eq!(
        header(&headers, "sec-websocket-accept"),
        Some(AcceptToken::from_key(KEY).as_str())
    );
    assert_eq!(header(&headers, "sec-websocket-protocol"), None);

    let codec = FrameCodec::default();
    let messages: Vec<Vec<u8>> = vec![
        b"hello".to_vec(),
        Vec::new(),
        vec![b'x'; 126],
        vec![7u8; 70_000],
    ];
    for (i, payload) in messages.iter().enumerate() {
        let opcode = if i % 2 == 0 { OpCode::Text } else { OpCode::Binary };
        let key = rand::random::<[u8; 4]>();
        let wire = FrameCodec::encode(opcode, payload, Origin::Client(key));
        writer.write_all(&wire).await.unwrap();
    }
    for (i, payload) in messages.iter().enumerate() {
        let frame = timeout(TIMEOUT, codec.decode(&mut reader))
            .await
            .unwrap()
            .unwrap();
        let opcode = if i % 2 == 0 { OpCode::Text } else { OpCode::Binary };
        assert_eq!(frame.opcode, opcode);
        assert!(frame.mask_key.is_none());
        assert_eq!(&frame.payload[..], &payload[..]);
    }

    let close = FrameCodec::encode(OpCode::Close, &1000u16.to_be_bytes(), Origin::Client([1, 2, 3, 4]));
    writer.write_all(&close).await.unwrap();
    let reply = timeout(TIMEOUT, codec.decode(&mut reader))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply.opcode, OpCode::Close);
    assert_eq!(reply.close_code(), Some(1000));

    // the server releases the connection after the close exchange
    let mut rest = Vec::new();
    let _ = timeout(TIMEOUT, reader.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap();
    assert!(rest.is_empty());

    assert!(server.shutdown().await);
}

#[tokio::test]
async fn frame_sent_with_handshake_is_not_lost() {
    let server = boot_server().await;
    let stream = TcpStream::connect(server.local_addr()).await.unwrap();
    let (read, mut write) = stream.into_split();

    // request and first frame in a single write
    let mut bytes = format!(
        "GET /ws HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\n\
         Connection: Upgrade\r\nSec-WebSocket-Key: {KEY}\r\n\r\n"
    )
    .into_bytes();
    bytes.extend(FrameCodec::encode(OpCode::Text, b"early", Origin::Client([9, 9, 9, 9])));
    write.write_all(&bytes).await.unwrap();

    let mut reader = BufReader::new(read);
    loop {
        let mut line = String::new();
        let _ = reader.read_line(&mut line).await.unwrap();
        if line == "\r\n" {
            break;
        }
    }
    let frame = timeout(TIMEOUT, FrameCodec::default().decode(&mut reader))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&frame.payload[..], b"early");

    drop(write);
    assert!(server.shutdown().await);
}

#[tokio::test]
async fn subprotocol_not_selected_by_default() {
    let server = boot_server().await;
    let (status, headers, _reader, _writer) = raw_handshake(
        server.local_addr(),
        "Sec-WebSocket-Protocol: chat, superchat\r\n",
    )
    .await;
    assert!(status.contains("101"));
    assert_eq!(header(&headers, "sec-websocket-protocol"), None);
}

#[tokio::test]
async fn subprotocol_selected_when_enabled() {
    let mut config = ServerConfig {
        addr: "127.0.0.1:0".into(),
        ..ServerConfig::default()
    };
    config.session.select_subprotocol = true;
    let server = start(config, Arc::new(TracingObserver)).await.unwrap();

    let (status, headers, _reader, _writer) = raw_handshake(
        server.local_addr(),
        "Sec-WebSocket-Protocol: chat, superchat\r\n",
    )
    .await;
    assert!(status.contains("101"));
    assert_eq!(header(&headers, "sec-websocket-protocol"), Some("chat"));
}

#[tokio::test]
async fn non_upgrade_request_is_rejected() {
    let server = boot_server().await;
    let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();
    stream
        .write_all(b"GET /ws HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();

    let mut response = String::new();
    let _ = timeout(TIMEOUT, stream.read_to_string(&mut response))
        .await
        .unwrap()
        .unwrap();
    assert!(response.starts_with("HTTP/1.1 400"));
}

#[tokio::test]
async fn tungstenite_client_interoperates() {
    let server = boot_server().await;
    let url = format!("ws://{}/ws", server.local_addr());
    let (mut ws, response) = timeout(TIMEOUT, connect_async(url.as_str()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.status(), 101);

    ws.send(Message::text("hello")).await.unwrap();
    assert_eq!(ws.next().await.unwrap().unwrap(), Message::text("hello"));

    ws.send(Message::binary(vec![0u8, 1, 2, 255])).await.unwrap();
    assert_eq!(
        ws.next().await.unwrap().unwrap(),
        Message::binary(vec![0u8, 1, 2, 255])
    );

    ws.send(Message::Ping(b"are you there".to_vec().into()))
        .await
        .unwrap();
    assert_eq!(
        ws.next().await.unwrap().unwrap(),
        Message::Pong(b"are you there".to_vec().into())
    );

    ws.close(None).await.unwrap();
    let mut saw_close = false;
    while let Some(Ok(msg)) = timeout(TIMEOUT, ws.next()).await.unwrap() {
        saw_close |= msg.is_close();
    }
    assert!(saw_close);
}

#[tokio::test]
async fn shutdown_sends_going_away_to_live_sessions() {
    let server = boot_server().await;
    let url = format!("ws://{}/ws", server.local_addr());
    let (mut ws, _) = connect_async(url.as_str()).await.unwrap();

    ws.send(Message::text("ping me")).await.unwrap();
    let _ = ws.next().await.unwrap().unwrap();
    assert_eq!(server.active_sessions(), 1);

    let shutdown = tokio::spawn(server.shutdown());
    let msg = timeout(TIMEOUT, ws.next()).await.unwrap().unwrap().unwrap();
    match msg {
        Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Away),
        other => panic!("expected close frame, got {other:?}"),
    }
    assert!(timeout(TIMEOUT, shutdown).await.unwrap().unwrap());
}

#[tokio::test]
async fn plain_http_answers_ok() {
    let server = boot_server().await;
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{}/anything", server.local_addr()))
        .body("payload")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "ok");
    drop(client);
    assert!(server.shutdown().await);
}
