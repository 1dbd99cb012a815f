//! Drives the C ABI against the mock server the way a host would.
//!
//! # Design
//! The mock server runs on its own thread and runtime so every `depot_*`
//! call below blocks exactly as it would when called from C.

use std::ffi::{CStr, CString};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use depot_ffi::types::{FfiConnectionState, FfiDepotClient, FfiReply, FfiStatus};
use depot_ffi::*;
use mock_server::{Handler, Reply};
use serde_json::{json, Value};

fn start_server(handler: Handler) -> SocketAddr {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            mock_server::run(listener, handler).await
        })
    });
    addr
}

fn client_for(addr: SocketAddr, timeout_ms: u64) -> *mut FfiDepotClient {
    let host = CString::new(addr.ip().to_string()).unwrap();
    let client = depot_client_new(host.as_ptr(), addr.port(), timeout_ms);
    assert!(!client.is_null());
    client
}

fn send(client: *const FfiDepotClient, request: Value) -> *mut FfiReply {
    let text = CString::new(request.to_string()).unwrap();
    let reply = depot_client_send(client, text.as_ptr());
    assert!(!reply.is_null());
    reply
}

fn text_of(ptr: *mut std::os::raw::c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        Some(unsafe { CStr::from_ptr(ptr) }.to_str().unwrap().to_string())
    }
}

#[test]
fn connect_send_close() {
    let addr = start_server(mock_server::router());
    let client = client_for(addr, 0);

    assert_eq!(depot_client_connect(client), FfiStatus::Ok);
    assert_eq!(depot_client_state(client), FfiConnectionState::Connected);

    let reply = send(
        client,
        json!({"body": {"qty": 2}, "headers": {"token": "jwt-abc"}, "url": "/echo/order/7", "method": "POST"}),
    );
    let reply_ref = unsafe { &*reply };
    assert_eq!(reply_ref.status, FfiStatus::Ok);
    assert!(reply_ref.success);
    assert_eq!(reply_ref.status_code, 200);
    assert!(reply_ref.message.is_null());
    let data: Value = serde_json::from_str(&text_of(reply_ref.data_json).unwrap()).unwrap();
    assert_eq!(data["status_code"], 200);
    assert_eq!(data["headers"]["token"], "jwt-abc");
    assert_eq!(data["body"]["url"], "/echo/order/7");
    assert_eq!(data["body"]["body"]["qty"], 2);
    depot_free_reply(reply);

    assert_eq!(depot_client_close(client), FfiStatus::Ok);
    assert_eq!(depot_client_state(client), FfiConnectionState::Closed);

    let reply = send(client, json!({"url": "/test", "method": "GET"}));
    let reply_ref = unsafe { &*reply };
    assert_eq!(reply_ref.status, FfiStatus::NotConnected);
    depot_free_reply(reply);

    depot_client_free(client);
}

#[test]
fn business_failure_keeps_backend_message() {
    let addr = start_server(mock_server::router());
    let client = client_for(addr, 0);
    assert_eq!(depot_client_connect(client), FfiStatus::Ok);

    let reply = send(client, json!({"url": "/status/404", "method": "GET"}));
    let reply_ref = unsafe { &*reply };
    assert_eq!(reply_ref.status, FfiStatus::Ok);
    assert!(!reply_ref.success);
    assert_eq!(reply_ref.status_code, 404);
    assert!(reply_ref.data_json.is_null());
    assert_eq!(text_of(reply_ref.message).as_deref(), Some("status 404"));
    depot_free_reply(reply);

    depot_client_free(client);
}

#[test]
fn silent_backend_times_out() {
    let handler: Handler = Arc::new(|_: &Value| Reply::Silent);
    let addr = start_server(handler);
    let client = client_for(addr, 200);
    assert_eq!(depot_client_connect(client), FfiStatus::Ok);

    let started = std::time::Instant::now();
    let reply = send(client, json!({"url": "/test", "method": "GET"}));
    let reply_ref = unsafe { &*reply };
    assert_eq!(reply_ref.status, FfiStatus::Timeout);
    assert!(!reply_ref.success);
    assert_eq!(text_of(reply_ref.message).as_deref(), Some("Technical issue"));
    assert!(started.elapsed() >= Duration::from_millis(200));
    depot_free_reply(reply);

    depot_client_free(client);
}

#[test]
fn unreachable_backend_is_not_connected() {
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let client = client_for(addr, 0);
    assert_eq!(depot_client_connect(client), FfiStatus::NotConnected);
    assert_eq!(depot_client_state(client), FfiConnectionState::Disconnected);
    depot_client_free(client);
}
