//! Stub backend that speaks the console's wire protocol.
//!
//! Requests arrive as bare JSON objects on a TCP stream. Each one is handed
//! to a `Handler`, whose `Reply` says what to write back: a JSON frame,
//! arbitrary bytes, a frame split into delayed chunks, nothing at all, or a
//! hang-up. Greetings (`{"role": ..}`) are accepted and never answered.
//!
//! JSON replies end with `\n`, matching what the real backend writes.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// What to write back for one request frame.
#[derive(Debug, Clone)]
pub enum Reply {
    Json(Value),
    Raw(Vec<u8>),
    /// Written part by part with `gap` between writes.
    Chunked { parts: Vec<Vec<u8>>, gap: Duration },
    Delayed { delay: Duration, reply: Box<Reply> },
    Silent,
    Close,
}

impl Reply {
    pub fn delayed(delay: Duration, reply: Reply) -> Self {
        Reply::Delayed {
            delay,
            reply: Box::new(reply),
        }
    }
}

pub type Handler = Arc<dyn Fn(&Value) -> Reply + Send + Sync>;

/// A success frame in the backend's shape.
pub fn success(status_code: u16, body: Value, headers: Value) -> Value {
    json!({"status_code": status_code, "headers": headers, "body": body})
}

/// A failure frame in the backend's shape.
pub fn failure(status_code: u16, message: &str, headers: Value) -> Value {
    json!({"status_code": status_code, "headers": headers, "message": message})
}

pub fn is_greeting(frame: &Value) -> bool {
    frame.get("role").is_some()
}

/// Default routes:
///
/// - `/test`: 200
/// - `/echo...`: 200 echoing `url`, `method` and `body`
/// - `/status/<code>`: that status code
/// - `/slow/<ms>`: echo after `ms` milliseconds
/// - anything else: 404
pub fn route(frame: &Value) -> Reply {
    let url = frame.get("url").and_then(Value::as_str).unwrap_or_default();
    let headers = frame.get("headers").cloned().unwrap_or_else(|| json!({}));
    let echo = || {
        json!({
            "url": url,
            "method": frame.get("method").cloned().unwrap_or(Value::Null),
            "body": frame.get("body").cloned().unwrap_or_else(|| json!({})),
        })
    };

    if url == "/test" {
        return Reply::Json(success(200, json!({"message": "ok"}), headers));
    }
    if url.starts_with("/echo") {
        return Reply::Json(success(200, echo(), headers));
    }
    if let Some(code) = url.strip_prefix("/status/").and_then(|code| code.parse::<u16>().ok()) {
        return if code < 400 {
            Reply::Json(success(code, echo(), headers))
        } else {
            Reply::Json(failure(code, &format!("status {code}"), headers))
        };
    }
    if let Some(ms) = url.strip_prefix("/slow/").and_then(|ms| ms.parse::<u64>().ok()) {
        return Reply::delayed(
            Duration::from_millis(ms),
            Reply::Json(success(200, echo(), headers)),
        );
    }
    Reply::Json(failure(404, "Not found", headers))
}

pub fn router() -> Handler {
    Arc::new(route)
}

pub async fn run(listener: TcpListener, handler: Handler) -> Result<(), io::Error> {
    loop {
        let (stream, peer) = listener.accept().await?;
        tracing::debug!(%peer, "client connected");
        let handler = Arc::clone(&handler);
        tokio::spawn(async move {
            if let Err(err) = serve(stream, handler).await {
                tracing::debug!(%peer, error = %err, "client connection ended with error");
            }
        });
    }
}

/// Bind an ephemeral loopback port and serve `handler` on it in the background.
pub async fn spawn(handler: Handler) -> Result<SocketAddr, io::Error> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        if let Err(err) = run(listener, handler).await {
            tracing::warn!(error = %err, "mock server stopped");
        }
    });
    Ok(addr)
}

async fn serve(mut stream: TcpStream, handler: Handler) -> Result<(), io::Error> {
    let mut pending: Vec<u8> = Vec::new();
    let mut chunk = vec![0u8; 64 * 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        pending.extend_from_slice(chunk.get(..n).unwrap_or_default());

        let (frames, consumed) = split_frames(&pending);
        pending.drain(..consumed);
        for frame in frames {
            let reply = match frame {
                Some(frame) if is_greeting(&frame) => continue,
                Some(frame) => handler(&frame),
                None => Reply::Json(json!({
                    "status_code": 400,
                    "message": "Invalid JSON.",
                    "body": {},
                    "headers": {},
                })),
            };
            if !write_reply(&mut stream, reply).await? {
                return Ok(());
            }
        }
    }
}

/// Pull every complete JSON value out of `buf`.
///
/// `None` stands for bytes that can never become valid JSON; the rest of the
/// buffer is consumed with it. An incomplete trailing value is left in place.
fn split_frames(buf: &[u8]) -> (Vec<Option<Value>>, usize) {
    let mut frames = Vec::new();
    let mut stream = serde_json::Deserializer::from_slice(buf).into_iter::<Value>();
    loop {
        match stream.next() {
            Some(Ok(value)) => frames.push(Some(value)),
            Some(Err(err)) if err.is_eof() => return (frames, stream.byte_offset()),
            Some(Err(_)) => {
                frames.push(None);
                return (frames, buf.len());
            }
            None => return (frames, buf.len()),
        }
    }
}

async fn write_reply(stream: &mut TcpStream, mut reply: Reply) -> Result<bool, io::Error> {
    loop {
        match reply {
            Reply::Delayed { delay, reply: next } => {
                tokio::time::sleep(delay).await;
                reply = *next;
            }
            Reply::Json(value) => {
                let mut bytes = serde_json::to_vec(&value)?;
                bytes.push(b'\n');
                stream.write_all(&bytes).await?;
                return Ok(true);
            }
            Reply::Raw(bytes) => {
                stream.write_all(&bytes).await?;
                return Ok(true);
            }
            Reply::Chunked { parts, gap } => {
                for part in parts {
                    stream.write_all(&part).await?;
                    stream.flush().await?;
                    tokio::time::sleep(gap).await;
                }
                return Ok(true);
            }
            Reply::Silent => return Ok(true),
            Reply::Close => return Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json_of(reply: Reply) -> Value {
        match reply {
            Reply::Json(value) => value,
            other => panic!("expected JSON reply, got {other:?}"),
        }
    }

    #[test]
    fn test_route_succeeds() {
        let value = json_of(route(&json!({"url": "/test", "method": "GET"})));
        assert_eq!(value["status_code"], 200);
        assert_eq!(value["body"]["message"], "ok");
    }

    #[test]
    fn echo_route_returns_request_fields() {
        let value = json_of(route(&json!({
            "url": "/echo/order/42",
            "method": "POST",
            "body": {"qty": 3},
            "headers": {"token": "t"},
        })));
        assert_eq!(value["body"]["url"], "/echo/order/42");
        assert_eq!(value["body"]["method"], "POST");
        assert_eq!(value["body"]["body"]["qty"], 3);
        assert_eq!(value["headers"]["token"], "t");
    }

    #[test]
    fn status_route_splits_at_400() {
        let ok = json_of(route(&json!({"url": "/status/399"})));
        assert_eq!(ok["status_code"], 399);
        assert!(ok.get("message").is_none());

        let failed = json_of(route(&json!({"url": "/status/400"})));
        assert_eq!(failed["status_code"], 400);
        assert_eq!(failed["message"], "status 400");
    }

    #[test]
    fn unknown_route_is_not_found() {
        let value = json_of(route(&json!({"url": "/nope", "method": "GET"})));
        assert_eq!(value["status_code"], 404);
        assert_eq!(value["message"], "Not found");
    }

    #[test]
    fn slow_route_is_delayed() {
        let reply = route(&json!({"url": "/slow/250"}));
        assert!(matches!(reply, Reply::Delayed { delay, .. } if delay == Duration::from_millis(250)));
    }

    #[test]
    fn greeting_detection() {
        assert!(is_greeting(&json!({"role": "frontend", "message": "hi"})));
        assert!(!is_greeting(&json!({"url": "/test"})));
    }

    #[test]
    fn split_frames_handles_coalesced_and_partial_input() {
        let buf = br#"{"role":"frontend"}{"url":"/test"}{"url":"/ec"#;
        let (frames, consumed) = split_frames(buf);
        assert_eq!(frames.len(), 2);
        assert_eq!(consumed, br#"{"role":"frontend"}{"url":"/test"}"#.len());
    }

    #[test]
    fn split_frames_flags_garbage() {
        let (frames, consumed) = split_frames(b"not json");
        assert!(matches!(frames.as_slice(), [None]));
        assert_eq!(consumed, 8);
    }
}
