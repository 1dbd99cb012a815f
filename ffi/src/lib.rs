//! C-ABI wrapper around `depot-core`.
//!
//! # Overview
//! Lets a non-Rust UI host (the console's renderer process, via a native
//! addon) own one backend connection and send requests over it. Requests
//! cross the boundary as JSON text in the wire shape
//! (`{"body", "headers", "url", "method"}`) and come back as an `FfiReply`.
//!
//! # Design
//! - Each `FfiDepotClient` owns a small tokio runtime and a `Dispatcher`;
//!   every call blocks the calling thread until the operation settles.
//! - Every `extern "C"` function wraps its body in `catch_unwind` so panics
//!   never cross the FFI boundary.
//! - The C caller owns all returned pointers and must call the matching
//!   `depot_free_*` / `depot_client_free` function to release them.

pub mod types;

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use depot_core::{ClientConfig, Dispatcher, Endpoint, Request};

use types::*;

// ---------------------------------------------------------------------------
// Client lifecycle
// ---------------------------------------------------------------------------

/// Create a client for `host:port`. Does not connect.
///
/// `timeout_ms == 0` keeps the default response timeout. Returns null if
/// `host` is null or not UTF-8, or if the runtime cannot be started.
/// The caller must free the returned pointer with `depot_client_free`.
#[unsafe(no_mangle)]
pub extern "C" fn depot_client_new(
    host: *const c_char,
    port: u16,
    timeout_ms: u64,
) -> *mut FfiDepotClient {
    catch_unwind(|| {
        if host.is_null() {
            return std::ptr::null_mut();
        }
        let Ok(host) = unsafe { CStr::from_ptr(host) }.to_str() else {
            return std::ptr::null_mut();
        };
        let mut config = ClientConfig::new(Endpoint::new(host, port));
        if timeout_ms > 0 {
            config.timeout = Duration::from_millis(timeout_ms);
        }
        let runtime = match tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("depot-ffi")
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(_) => return std::ptr::null_mut(),
        };
        let client = FfiDepotClient {
            dispatcher: Dispatcher::new(config),
            runtime,
        };
        Box::into_raw(Box::new(client))
    })
    .unwrap_or(std::ptr::null_mut())
}

/// Free a client created by `depot_client_new`. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn depot_client_free(client: *mut FfiDepotClient) {
    if !client.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            drop(unsafe { Box::from_raw(client) });
        }));
    }
}

/// Open the backend connection and send the greeting.
///
/// Returns `NotConnected` if the backend cannot be reached; the client stays
/// usable and `depot_client_connect` may be called again.
#[unsafe(no_mangle)]
pub extern "C" fn depot_client_connect(client: *const FfiDepotClient) -> FfiStatus {
    catch_unwind(AssertUnwindSafe(|| {
        if client.is_null() {
            return FfiStatus::NullArgument;
        }
        let client = unsafe { &*client };
        match client.runtime.block_on(client.dispatcher.connect()) {
            Ok(()) => FfiStatus::Ok,
            Err(err) => {
                tracing::warn!(error = %err, "connect from host failed");
                FfiStatus::NotConnected
            }
        }
    }))
    .unwrap_or(FfiStatus::Panic)
}

/// Close the backend connection. Later sends report `NotConnected` until
/// `depot_client_connect` succeeds again.
#[unsafe(no_mangle)]
pub extern "C" fn depot_client_close(client: *const FfiDepotClient) -> FfiStatus {
    catch_unwind(AssertUnwindSafe(|| {
        if client.is_null() {
            return FfiStatus::NullArgument;
        }
        let client = unsafe { &*client };
        client.runtime.block_on(client.dispatcher.close());
        FfiStatus::Ok
    }))
    .unwrap_or(FfiStatus::Panic)
}

/// Current lifecycle state. A null client reads as `Disconnected`.
#[unsafe(no_mangle)]
pub extern "C" fn depot_client_state(client: *const FfiDepotClient) -> FfiConnectionState {
    catch_unwind(AssertUnwindSafe(|| {
        if client.is_null() {
            return FfiConnectionState::Disconnected;
        }
        let client = unsafe { &*client };
        client.dispatcher.state().into()
    }))
    .unwrap_or(FfiConnectionState::Disconnected)
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Send one request and wait for its outcome.
///
/// `request_json` is a JSON object with `url` and `method` and optional
/// `body` and `headers` objects. Never returns null.
/// The caller must free the returned pointer with `depot_free_reply`.
#[unsafe(no_mangle)]
pub extern "C" fn depot_client_send(
    client: *const FfiDepotClient,
    request_json: *const c_char,
) -> *mut FfiReply {
    catch_unwind(AssertUnwindSafe(|| {
        if client.is_null() {
            return FfiReply::null_arg("client");
        }
        if request_json.is_null() {
            return FfiReply::null_arg("request_json");
        }
        let client = unsafe { &*client };
        let Ok(text) = unsafe { CStr::from_ptr(request_json) }.to_str() else {
            return FfiReply::error(FfiStatus::InvalidRequest, "request is not valid UTF-8");
        };
        let request: Request = match serde_json::from_str(text) {
            Ok(request) => request,
            Err(err) => {
                return FfiReply::error(FfiStatus::InvalidRequest, &format!("invalid request: {err}"))
            }
        };
        FfiReply::from_outcome(client.runtime.block_on(client.dispatcher.send(&request)))
    }))
    .unwrap_or_else(|_| FfiReply::panic("panic in depot_client_send"))
}

// ---------------------------------------------------------------------------
// Free functions
// ---------------------------------------------------------------------------

/// Free an `FfiReply` returned by `depot_client_send`. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn depot_free_reply(reply: *mut FfiReply) {
    if reply.is_null() {
        return;
    }
    let _ = catch_unwind(|| {
        let reply = unsafe { Box::from_raw(reply) };
        if !reply.data_json.is_null() {
            drop(unsafe { CString::from_raw(reply.data_json) });
        }
        if !reply.message.is_null() {
            drop(unsafe { CString::from_raw(reply.message) });
        }
    });
}

/// Free a C string allocated by this library. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn depot_free_string(s: *mut c_char) {
    if !s.is_null() {
        let _ = catch_unwind(|| {
            drop(unsafe { CString::from_raw(s) });
        });
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
