//! `#[repr(C)]` types for the FFI boundary.
//!
//! # Design
//! Replies cross the boundary as one heap-allocated `FfiReply` whose string
//! fields are owned C strings. `FfiStatus` separates "the request never
//! completed" (transport kinds) from "the backend said no" (`Ok` with
//! `success == false`), so a host can branch without parsing messages.

use std::ffi::CString;
use std::os::raw::c_char;

use depot_core::reply::TECHNICAL_ISSUE;
use depot_core::{ApiResponse, ConnectionState, Dispatcher, ErrorKind, SendError};

/// Opaque handle. C callers receive a pointer to this and pass it back into
/// every `depot_client_*` function.
pub struct FfiDepotClient {
    pub(crate) dispatcher: Dispatcher,
    pub(crate) runtime: tokio::runtime::Runtime,
}

/// Outcome classification shared by every FFI entry point.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiStatus {
    Ok = 0,
    NotConnected = 1,
    Timeout = 2,
    Transport = 3,
    Protocol = 4,
    Encode = 5,
    NullArgument = 6,
    InvalidRequest = 7,
    Panic = 8,
}

impl From<ErrorKind> for FfiStatus {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::NotConnected => FfiStatus::NotConnected,
            ErrorKind::Timeout => FfiStatus::Timeout,
            ErrorKind::Transport => FfiStatus::Transport,
            ErrorKind::Protocol => FfiStatus::Protocol,
            ErrorKind::Encode => FfiStatus::Encode,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Closed = 3,
}

impl From<ConnectionState> for FfiConnectionState {
    fn from(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Disconnected => FfiConnectionState::Disconnected,
            ConnectionState::Connecting => FfiConnectionState::Connecting,
            ConnectionState::Connected => FfiConnectionState::Connected,
            ConnectionState::Closed => FfiConnectionState::Closed,
        }
    }
}

/// Result of `depot_client_send`.
///
/// - `status == Ok && success`: `data_json` holds the whole response,
///   `{status_code, headers, body}`.
/// - `status == Ok && !success`: business failure; `message` is for the user.
/// - `status != Ok`: the request did not complete; `message` is generic.
///
/// `status_code` is 0 when no response was decoded. Free with
/// `depot_free_reply`.
#[repr(C)]
pub struct FfiReply {
    pub success: bool,
    pub status: FfiStatus,
    pub status_code: u16,
    pub data_json: *mut c_char,
    pub message: *mut c_char,
}

impl FfiReply {
    pub(crate) fn from_outcome(outcome: Result<ApiResponse, SendError>) -> *mut Self {
        let reply = match outcome {
            Ok(ApiResponse::Success {
                status_code,
                payload,
                ..
            }) => match serde_json::to_string(&payload) {
                Ok(json) => FfiReply {
                    success: true,
                    status: FfiStatus::Ok,
                    status_code,
                    data_json: to_c_string(json),
                    message: std::ptr::null_mut(),
                },
                Err(_) => return FfiReply::error(FfiStatus::Protocol, TECHNICAL_ISSUE),
            },
            Ok(ApiResponse::Failure {
                status_code,
                message,
            }) => FfiReply {
                success: false,
                status: FfiStatus::Ok,
                status_code,
                data_json: std::ptr::null_mut(),
                message: to_c_string(message),
            },
            Err(err) => {
                tracing::warn!(kind = err.kind().as_str(), error = %err, "request did not complete");
                return FfiReply::error(err.kind().into(), TECHNICAL_ISSUE);
            }
        };
        Box::into_raw(Box::new(reply))
    }

    pub(crate) fn error(status: FfiStatus, message: &str) -> *mut Self {
        Box::into_raw(Box::new(FfiReply {
            success: false,
            status,
            status_code: 0,
            data_json: std::ptr::null_mut(),
            message: to_c_string(message.to_string()),
        }))
    }

    pub(crate) fn null_arg(name: &str) -> *mut Self {
        Self::error(FfiStatus::NullArgument, &format!("null argument: {name}"))
    }

    pub(crate) fn panic(context: &str) -> *mut Self {
        Self::error(FfiStatus::Panic, context)
    }
}

/// Interior NULs cannot cross as C strings; they are dropped.
pub(crate) fn to_c_string(text: String) -> *mut c_char {
    let bytes: Vec<u8> = text.into_bytes().into_iter().filter(|b| *b != 0).collect();
    CString::new(bytes)
        .map(CString::into_raw)
        .unwrap_or(std::ptr::null_mut())
}
