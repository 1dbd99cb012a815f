//! Backend transport for the depot management console.
//!
//! # Overview
//! The console talks to its backend over one long-lived TCP stream. Each
//! request is a JSON object written to the stream; the next JSON object read
//! back is its response. There is no request id on the wire, so at most one
//! request may be waiting for a response at a time.
//!
//! # Design
//! - `connection::Connection` owns the stream and its lifecycle.
//! - `dispatcher::Dispatcher` serializes requests over it, enforces the
//!   response timeout and turns whatever comes back into a typed outcome.
//! - `codec` does framing and response classification without any I/O.
//! - `resource::ResourceClient` builds CRUD requests; `reply::Reply` is the
//!   `{success, data?, message?}` shape the UI consumes.
//! - There is no global client. The composition root builds a `Dispatcher`
//!   from a `ClientConfig` and hands clones to whoever needs one.

pub mod codec;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod http;
pub mod reply;
pub mod resource;
pub mod telemetry;

pub use codec::Framing;
pub use config::{ClientConfig, ReconnectPolicy};
pub use connection::{Connection, ConnectionEvent, ConnectionState, Endpoint};
pub use dispatcher::Dispatcher;
pub use error::{ConnectError, EncodeError, ErrorKind, ProtocolError, SendError, WriteError};
pub use http::{ApiResponse, Greeting, Method, Request};
pub use reply::Reply;
pub use resource::ResourceClient;
