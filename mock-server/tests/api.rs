use std::time::Duration;

use bytes::BytesMut;
use mock_server::{router, spawn, Reply};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

async fn connect() -> TcpStream {
    let addr = spawn(router()).await.unwrap();
    TcpStream::connect(addr).await.unwrap()
}

/// Read until one newline-terminated JSON frame has arrived.
async fn read_frame(stream: &mut TcpStream) -> Value {
    let mut buf = BytesMut::with_capacity(1024);
    loop {
        let n = tokio::time::timeout(Duration::from_secs(5), stream.read_buf(&mut buf))
            .await
            .expect("mock server did not reply")
            .unwrap();
        assert!(n > 0, "mock server closed the stream");
        if buf.ends_with(b"\n") {
            return serde_json::from_slice(&buf).unwrap();
        }
    }
}

#[tokio::test]
async fn test_route_replies_with_newline_terminated_frame() {
    let mut stream = connect().await;
    stream
        .write_all(br#"{"body":{},"headers":{},"url":"/test","method":"GET"}"#)
        .await
        .unwrap();
    let frame = read_frame(&mut stream).await;
    assert_eq!(frame["status_code"], 200);
    assert_eq!(frame["body"]["message"], "ok");
}

#[tokio::test]
async fn greeting_gets_no_reply() {
    let mut stream = connect().await;
    stream
        .write_all(br#"{"role":"frontend","message":"Hello from the client!"}"#)
        .await
        .unwrap();
    let mut buf = [0u8; 64];
    let read = tokio::time::timeout(Duration::from_millis(200), stream.read(&mut buf)).await;
    assert!(read.is_err(), "greeting must not be answered");

    stream
        .write_all(br#"{"body":{},"headers":{},"url":"/echo/after-greeting","method":"GET"}"#)
        .await
        .unwrap();
    let frame = read_frame(&mut stream).await;
    assert_eq!(frame["body"]["url"], "/echo/after-greeting");
}

#[tokio::test]
async fn invalid_json_gets_400() {
    let mut stream = connect().await;
    stream.write_all(b"definitely not json").await.unwrap();
    let frame = read_frame(&mut stream).await;
    assert_eq!(frame["status_code"], 400);
    assert_eq!(frame["message"], "Invalid JSON.");
}

#[tokio::test]
async fn request_split_across_writes_is_reassembled() {
    let mut stream = connect().await;
    stream.write_all(br#"{"body":{},"headers":{},"url":"/ec"#).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    stream.write_all(br#"ho/split","method":"PUT"}"#).await.unwrap();
    let frame = read_frame(&mut stream).await;
    assert_eq!(frame["body"]["url"], "/echo/split");
    assert_eq!(frame["body"]["method"], "PUT");
}

#[tokio::test]
async fn custom_handler_can_hang_up() {
    let addr = spawn(std::sync::Arc::new(|_: &Value| Reply::Close)).await.unwrap();
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(br#"{"url":"/test","method":"GET"}"#).await.unwrap();
    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn chunked_reply_arrives_in_pieces() {
    let handler = std::sync::Arc::new(|_: &Value| Reply::Chunked {
        parts: vec![br#"{"status_code":"#.to_vec(), b"200}\n".to_vec()],
        gap: Duration::from_millis(30),
    });
    let addr = spawn(handler).await.unwrap();
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(br#"{"url":"/x","method":"GET"}"#).await.unwrap();
    let frame = read_frame(&mut stream).await;
    assert_eq!(frame, json!({"status_code": 200}));
}
