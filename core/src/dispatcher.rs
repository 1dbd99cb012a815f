//! Request Dispatcher: one framed write, one framed read, one outcome.
//!
//! # Design
//! The wire carries no request id, so a response can only be matched to a
//! request by position: the next frame read after a write answers that
//! write. The dispatcher keeps that true by never letting two requests share
//! the response window:
//!
//! - The connection sits behind a `tokio::sync::Mutex`. Its lock queue is
//!   FIFO, so concurrent `send` calls are dispatched one after another in
//!   arrival order.
//! - Anything that arrived while no request was pending is discarded before
//!   the next write.
//! - When a request times out, or its future is dropped before it settles,
//!   the stream is torn down. A late answer for that request therefore dies
//!   with the old stream instead of being read by the next caller.
//!
//! A torn-down stream is re-established by the next `send` (with
//! exponential backoff). A stream that was never opened, or that the peer or
//! `close` ended, is not: `send` then fails with `SendError::NotConnected`
//! without writing anything.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{watch, Mutex};

use crate::codec::{encode_greeting, encode_request, parse_response, FrameDecoder};
use crate::config::ClientConfig;
use crate::connection::{Connection, ConnectionEvent, ConnectionState, Endpoint};
use crate::error::{ConnectError, ProtocolError, SendError};
use crate::http::{ApiResponse, Request};
use crate::reply::Reply;

/// Cloneable handle; clones share one connection.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    config: ClientConfig,
    slot: Mutex<Slot>,
    states: watch::Receiver<ConnectionState>,
}

#[derive(Debug)]
struct Slot {
    connection: Connection,
    /// Set when the dispatcher itself tore the stream down.
    recycle: bool,
}

impl Slot {
    fn recycle(&mut self) {
        self.connection.abandon();
        self.recycle = true;
    }
}

/// Marks the connection for recycling unless the request settled.
struct Pending<'a> {
    slot: &'a mut Slot,
    settled: bool,
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!("request dropped before it settled; recycling backend connection");
            self.slot.recycle();
        }
    }
}

impl Dispatcher {
    pub fn new(config: ClientConfig) -> Self {
        let connection = Connection::new(config.endpoint.clone(), config.connect_timeout);
        let states = connection.subscribe();
        Self {
            inner: Arc::new(Inner {
                config,
                slot: Mutex::new(Slot {
                    connection,
                    recycle: false,
                }),
                states,
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.config.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.states.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.states.clone()
    }

    /// Open the connection and write the greeting, if one is configured.
    ///
    /// Callers at startup should log a failure and carry on; every later
    /// `send` reports `NotConnected` until a connect succeeds.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        let mut slot = self.inner.slot.lock().await;
        self.open(&mut slot).await
    }

    /// Drop the current stream, if any, and connect again with backoff.
    pub async fn reconnect(&self) -> Result<(), ConnectError> {
        let mut slot = self.inner.slot.lock().await;
        slot.connection.close().await;
        self.open_with_backoff(&mut slot).await
    }

    pub async fn close(&self) {
        let mut slot = self.inner.slot.lock().await;
        slot.recycle = false;
        slot.connection.close().await;
    }

    /// Send one request and wait for its response.
    ///
    /// Business failures (`status_code >= 400`) come back as
    /// `Ok(ApiResponse::Failure)`. Everything else that prevents a response
    /// from being read is a `SendError`.
    pub async fn send(&self, request: &Request) -> Result<ApiResponse, SendError> {
        let config = &self.inner.config;
        let mut slot = self.inner.slot.lock().await;
        self.ensure_ready(&mut slot).await?;

        let frame = encode_request(request, config.framing, config.max_frame_len)?;
        discard_stale(&mut slot.connection)?;

        tracing::debug!(method = %request.method, url = %request.url, bytes = frame.len(), "sending request");
        let started = Instant::now();
        let mut pending = Pending {
            slot: &mut *slot,
            settled: false,
        };
        let outcome = match pending.slot.connection.write(&frame).await {
            Ok(()) => {
                let mut decoder = FrameDecoder::new(config.framing, config.max_frame_len);
                tokio::time::timeout(
                    config.timeout,
                    read_response(&mut pending.slot.connection, &mut decoder),
                )
                .await
                .unwrap_or_else(|_| {
                    Err(SendError::Timeout {
                        after: config.timeout,
                    })
                })
            }
            Err(err) => Err(err.into()),
        };
        pending.settled = true;

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match &outcome {
            Ok(response) => {
                tracing::debug!(
                    method = %request.method,
                    url = %request.url,
                    status_code = response.status_code(),
                    elapsed_ms,
                    "response received"
                );
            }
            Err(err) => {
                tracing::warn!(
                    method = %request.method,
                    url = %request.url,
                    kind = err.kind().as_str(),
                    error = %err,
                    elapsed_ms,
                    "request failed"
                );
                if leaves_stream_out_of_step(err) {
                    pending.slot.recycle();
                }
            }
        }
        outcome
    }

    /// `send`, collapsed into the shape the UI layer consumes.
    pub async fn request(&self, request: &Request) -> Reply {
        Reply::from_outcome(self.send(request).await)
    }

    async fn ensure_ready(&self, slot: &mut Slot) -> Result<(), SendError> {
        if slot.connection.is_connected() {
            return Ok(());
        }
        if !slot.recycle {
            return Err(SendError::NotConnected);
        }
        tracing::info!(endpoint = %self.inner.config.endpoint, "re-establishing recycled backend connection");
        self.open_with_backoff(slot)
            .await
            .map_err(SendError::Reconnect)
    }

    async fn open_with_backoff(&self, slot: &mut Slot) -> Result<(), ConnectError> {
        let policy = self.inner.config.reconnect;
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            let delay = policy.delay_for(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match self.open(slot).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt + 1 >= max_attempts => return Err(err),
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "connect attempt failed");
                }
            }
            attempt += 1;
        }
    }

    async fn open(&self, slot: &mut Slot) -> Result<(), ConnectError> {
        let config = &self.inner.config;
        slot.connection.connect().await?;
        slot.recycle = false;

        let Some(greeting) = &config.greeting else {
            return Ok(());
        };
        match encode_greeting(greeting, config.framing) {
            Ok(frame) => slot
                .connection
                .write(&frame)
                .await
                .map_err(|source| ConnectError::Greeting {
                    endpoint: config.endpoint.clone(),
                    source,
                }),
            Err(err) => {
                tracing::warn!(error = %err, "skipping greeting that could not be encoded");
                Ok(())
            }
        }
    }
}

async fn read_response(
    connection: &mut Connection,
    decoder: &mut FrameDecoder,
) -> Result<ApiResponse, SendError> {
    loop {
        match connection.next_event().await {
            ConnectionEvent::Data(chunk) => {
                if let Some(frame) = decoder.push(&chunk)? {
                    return Ok(parse_response(frame)?);
                }
            }
            ConnectionEvent::Closed => return Err(SendError::ConnectionClosed),
            ConnectionEvent::Error(err) => return Err(SendError::Transport(err)),
        }
    }
}

/// Throw away whatever arrived while nothing was pending.
fn discard_stale(connection: &mut Connection) -> Result<(), SendError> {
    for event in connection.drain_pending() {
        match event {
            ConnectionEvent::Data(chunk) => {
                tracing::warn!(bytes = chunk.len(), "discarding unsolicited data from backend");
            }
            ConnectionEvent::Closed => return Err(SendError::NotConnected),
            ConnectionEvent::Error(err) => return Err(SendError::Transport(err)),
        }
    }
    Ok(())
}

/// Whether unread bytes of the failed response may still be in flight.
fn leaves_stream_out_of_step(err: &SendError) -> bool {
    match err {
        SendError::Timeout { .. } => true,
        SendError::Protocol(protocol) => matches!(
            protocol,
            ProtocolError::Malformed(_) | ProtocolError::InvalidUtf8 | ProtocolError::FrameTooLarge { .. }
        ),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn timeouts_and_garbage_recycle_the_stream() {
        assert!(leaves_stream_out_of_step(&SendError::Timeout {
            after: Duration::from_secs(1)
        }));
        assert!(leaves_stream_out_of_step(&SendError::Protocol(ProtocolError::InvalidUtf8)));
        assert!(!leaves_stream_out_of_step(&SendError::Protocol(
            ProtocolError::MissingStatus
        )));
        assert!(!leaves_stream_out_of_step(&SendError::ConnectionClosed));
        assert!(!leaves_stream_out_of_step(&SendError::NotConnected));
    }

    #[tokio::test]
    async fn send_before_connect_fails_fast() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let dispatcher = Dispatcher::new(ClientConfig::new(Endpoint::new("127.0.0.1", port)));

        let err = dispatcher.send(&Request::get("/test")).await.unwrap_err();
        assert!(matches!(err, SendError::NotConnected));
        assert_eq!(dispatcher.state(), ConnectionState::Disconnected);

        // Nothing was dialled, let alone written.
        let accepted = tokio::time::timeout(Duration::from_millis(100), listener.accept()).await;
        assert!(accepted.is_err());
    }
}
