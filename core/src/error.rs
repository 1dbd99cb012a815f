//! Error types for the backend transport.
//!
//! # Design
//! Each layer gets its own enum: connecting, writing, encoding, decoding.
//! `SendError` is what `Dispatcher::send` returns and wraps the others. A
//! response with `status_code >= 400` is never an error here; it arrives as
//! `ApiResponse::Failure`. Every variant maps to a stable `ErrorKind` so logs
//! and the C boundary can keep the distinction even where the user only sees
//! a generic message.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::connection::Endpoint;

/// Coarse classification of a transport-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotConnected,
    Timeout,
    Transport,
    Protocol,
    Encode,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotConnected => "not_connected",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Transport => "transport",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Encode => "encode",
        }
    }
}

/// Opening the stream failed. The connection stays `Disconnected`.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("failed to connect to backend at {endpoint}: {source}")]
    Io {
        endpoint: Endpoint,
        #[source]
        source: io::Error,
    },
    #[error("connecting to backend at {endpoint} timed out after {after:?}")]
    TimedOut { endpoint: Endpoint, after: Duration },
    #[error("failed to write greeting to {endpoint}: {source}")]
    Greeting {
        endpoint: Endpoint,
        #[source]
        source: WriteError,
    },
}

/// Writing raw bytes to the stream failed.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("connection is not open")]
    NotConnected,
    #[error("write failed: {0}")]
    Io(#[from] io::Error),
}

/// A request could not be turned into a frame.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to serialize request: {0}")]
    Json(#[from] serde_json::Error),
    #[error("request frame of {len} bytes exceeds the {max} byte limit")]
    TooLarge { len: usize, max: usize },
}

/// The peer sent bytes that are not a valid response frame.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed response frame: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("response frame is not valid UTF-8")]
    InvalidUtf8,
    #[error("response frame is not a JSON object")]
    NotAnObject,
    #[error("response frame has no status_code")]
    MissingStatus,
    #[error("response frame has a non-numeric status_code: {0}")]
    InvalidStatus(String),
    #[error("response frame exceeds the {max} byte limit")]
    FrameTooLarge { max: usize },
    #[error("there is no connected backend side to the server")]
    BackendUnavailable,
}

/// Every way `Dispatcher::send` can fail short of a decoded response.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("not connected to the backend")]
    NotConnected,
    #[error("no response within {after:?}")]
    Timeout { after: Duration },
    #[error("transport error: {0}")]
    Transport(#[source] io::Error),
    #[error("connection closed before a response arrived")]
    ConnectionClosed,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("reconnect failed: {0}")]
    Reconnect(#[source] ConnectError),
}

impl SendError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SendError::NotConnected | SendError::Reconnect(_) => ErrorKind::NotConnected,
            SendError::Timeout { .. } => ErrorKind::Timeout,
            SendError::Transport(_) | SendError::ConnectionClosed => ErrorKind::Transport,
            SendError::Protocol(_) => ErrorKind::Protocol,
            SendError::Encode(_) => ErrorKind::Encode,
        }
    }
}

impl From<WriteError> for SendError {
    fn from(err: WriteError) -> Self {
        match err {
            WriteError::NotConnected => SendError::NotConnected,
            WriteError::Io(source) => SendError::Transport(source),
        }
    }
}
