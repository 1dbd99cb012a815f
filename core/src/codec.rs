//! Frame encoding and decoding, with no I/O.
//!
//! # Design
//! The backend speaks bare JSON over a stream: a request is one JSON object
//! written in one go, and a response is one JSON object read back. Nothing
//! on the wire marks where a frame ends. `Framing::Unframed` keeps that
//! format exactly. On the read side, `FrameDecoder` accumulates chunks until
//! they hold one complete JSON value, so a response split across several
//! reads is reassembled without changing what the peer sees.
//!
//! `Framing::Lines` is for peers that terminate each frame with `\n`.
//!
//! Decoding a frame and classifying it are separate steps:
//! `FrameDecoder::push` yields a `serde_json::Value`, and `parse_response`
//! turns it into an `ApiResponse`.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{EncodeError, ProtocolError};
use crate::http::{ApiResponse, Greeting, Request, FAILURE_STATUS};

/// Default upper bound for a single frame in either direction.
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

/// What the relay writes instead of a response when no backend is attached.
pub const BACKEND_UNAVAILABLE_NOTICE: &str = "There is no connected backend side to the server";

/// How frame boundaries are marked on the stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Framing {
    /// No delimiter. One write is one frame.
    #[default]
    Unframed,
    /// Each frame ends with `\n`.
    Lines,
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Framing::Unframed => f.write_str("unframed"),
            Framing::Lines => f.write_str("lines"),
        }
    }
}

/// Returned when text names neither framing mode.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown framing: {0} (expected `unframed` or `lines`)")]
pub struct UnknownFraming(pub String);

impl FromStr for Framing {
    type Err = UnknownFraming;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unframed" | "raw" => Ok(Framing::Unframed),
            "lines" | "newline" => Ok(Framing::Lines),
            _ => Err(UnknownFraming(s.to_string())),
        }
    }
}

pub fn encode_request(
    request: &Request,
    framing: Framing,
    max_len: usize,
) -> Result<Vec<u8>, EncodeError> {
    encode(request, framing, max_len)
}

pub fn encode_greeting(greeting: &Greeting, framing: Framing) -> Result<Vec<u8>, EncodeError> {
    encode(greeting, framing, DEFAULT_MAX_FRAME_LEN)
}

fn encode<T: Serialize>(value: &T, framing: Framing, max_len: usize) -> Result<Vec<u8>, EncodeError> {
    let mut bytes = serde_json::to_vec(value)?;
    if framing == Framing::Lines {
        bytes.push(b'\n');
    }
    if bytes.len() > max_len {
        return Err(EncodeError::TooLarge {
            len: bytes.len(),
            max: max_len,
        });
    }
    Ok(bytes)
}

/// Accumulates inbound chunks into complete response frames.
#[derive(Debug)]
pub struct FrameDecoder {
    framing: Framing,
    max_len: usize,
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new(framing: Framing, max_len: usize) -> Self {
        Self {
            framing,
            max_len,
            buf: Vec::new(),
        }
    }

    /// Feed one chunk. Returns `Ok(None)` while the frame is still incomplete.
    ///
    /// After a frame or an error is returned the decoder is empty again;
    /// any bytes that followed the frame in the same chunk are dropped.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Option<Value>, ProtocolError> {
        self.buf.extend_from_slice(chunk);
        if self.buf.len() > self.max_len {
            self.buf.clear();
            return Err(ProtocolError::FrameTooLarge { max: self.max_len });
        }
        let result = match self.framing {
            Framing::Unframed => self.decode_unframed(),
            Framing::Lines => self.decode_line(),
        };
        if !matches!(result, Ok(None)) {
            self.buf.clear();
        }
        result
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn reset(&mut self) {
        self.buf.clear();
    }

    fn decode_unframed(&self) -> Result<Option<Value>, ProtocolError> {
        decode_frame(&self.buf, true)
    }

    fn decode_line(&mut self) -> Result<Option<Value>, ProtocolError> {
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = line.trim_ascii();
            if line.is_empty() {
                continue;
            }
            return decode_frame(line, false);
        }
        Ok(None)
    }
}

fn decode_frame(bytes: &[u8], allow_partial: bool) -> Result<Option<Value>, ProtocolError> {
    if bytes.trim_ascii() == BACKEND_UNAVAILABLE_NOTICE.as_bytes() {
        return Err(ProtocolError::BackendUnavailable);
    }
    let mut stream = serde_json::Deserializer::from_slice(bytes).into_iter::<Value>();
    match stream.next() {
        None => Ok(None),
        Some(Ok(value)) => {
            let trailing = bytes.get(stream.byte_offset()..).unwrap_or_default();
            if !trailing.trim_ascii().is_empty() {
                tracing::warn!(
                    discarded = trailing.len(),
                    "discarding bytes that followed a complete response frame"
                );
            }
            Ok(Some(value))
        }
        Some(Err(err)) if err.is_eof() && allow_partial => Ok(None),
        Some(Err(err)) => {
            if std::str::from_utf8(bytes).is_err() {
                Err(ProtocolError::InvalidUtf8)
            } else {
                Err(ProtocolError::Malformed(err))
            }
        }
    }
}

/// Classify a decoded frame as success or business failure.
pub fn parse_response(frame: Value) -> Result<ApiResponse, ProtocolError> {
    let Value::Object(mut object) = frame else {
        return Err(ProtocolError::NotAnObject);
    };
    let status_code = object
        .get("status_code")
        .ok_or(ProtocolError::MissingStatus)
        .and_then(parse_status)?;

    if status_code >= FAILURE_STATUS {
        let message = match object.remove("message") {
            Some(Value::String(message)) => message,
            None | Some(Value::Null) => format!("request failed with status {status_code}"),
            Some(other) => other.to_string(),
        };
        return Ok(ApiResponse::Failure {
            status_code,
            message,
        });
    }

    let headers = match object.get("headers") {
        Some(Value::Object(headers)) => headers.clone(),
        _ => Map::new(),
    };
    let data = object
        .get("data")
        .or_else(|| object.get("body"))
        .cloned()
        .unwrap_or_else(|| Value::Object(object.clone()));
    Ok(ApiResponse::Success {
        status_code,
        headers,
        data,
        payload: Value::Object(object),
    })
}

fn parse_status(value: &Value) -> Result<u16, ProtocolError> {
    let invalid = || ProtocolError::InvalidStatus(value.to_string());
    match value {
        Value::Number(number) => {
            if let Some(code) = number.as_u64() {
                return u16::try_from(code).map_err(|_| invalid());
            }
            match number.as_f64() {
                Some(code) if code.fract() == 0.0 && (0.0..=f64::from(u16::MAX)).contains(&code) => {
                    Ok(code as u16)
                }
                _ => Err(invalid()),
            }
        }
        Value::String(text) => text.trim().parse::<u16>().map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}
