//! The single long-lived stream to the backend.
//!
//! # Design
//! `Connection` owns the write half of a `TcpStream`. A reader task owns the
//! read half and forwards everything it sees as `ConnectionEvent`s over a
//! bounded channel: inbound bytes, a graceful close, or an I/O error. The
//! dispatcher is the only consumer of that channel and the only writer.
//!
//! The lifecycle is published on a `watch` channel so the composition root
//! can observe a peer close without going through the dispatcher:
//!
//! ```text
//! Disconnected --connect ok--> Connected --peer close / close()--> Closed
//! Disconnected --connect err-> Disconnected
//! ```
//!
//! Each successful `connect` gets a fresh id. A reader task only marks the
//! connection `Closed` while its id is still current, so a stale reader from
//! a recycled stream cannot close its replacement.

use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{ConnectError, WriteError};

const READ_CHUNK: usize = 8 * 1024;
const EVENT_CAPACITY: usize = 64;

/// Host and port of the backend peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closed,
}

/// Something the reader task observed on the stream.
#[derive(Debug)]
pub enum ConnectionEvent {
    Data(Vec<u8>),
    Closed,
    Error(io::Error),
}

#[derive(Debug)]
struct Shared {
    state: watch::Sender<ConnectionState>,
    current: Mutex<Option<Uuid>>,
}

impl Shared {
    fn set(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn set_current(&self, id: Option<Uuid>) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = id;
    }

    fn mark_closed(&self, id: Uuid) {
        let current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if *current == Some(id) {
            self.state.send_replace(ConnectionState::Closed);
        }
    }
}

#[derive(Debug)]
struct Live {
    id: Uuid,
    writer: OwnedWriteHalf,
    events: mpsc::Receiver<ConnectionEvent>,
    reader: JoinHandle<()>,
}

impl Drop for Live {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Connection Manager: one stream, one reader, one writer.
#[derive(Debug)]
pub struct Connection {
    endpoint: Endpoint,
    connect_timeout: Duration,
    shared: Arc<Shared>,
    live: Option<Live>,
}

impl Connection {
    pub fn new(endpoint: Endpoint, connect_timeout: Duration) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            endpoint,
            connect_timeout,
            shared: Arc::new(Shared {
                state,
                current: Mutex::new(None),
            }),
            live: None,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Id of the current stream, if one is open.
    pub fn id(&self) -> Option<Uuid> {
        self.live.as_ref().map(|live| live.id)
    }

    /// Watch lifecycle transitions, including closes the peer initiates.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Open the stream. A no-op when already connected.
    ///
    /// Any previous stream is dropped first. On failure the state returns to
    /// `Disconnected` and nothing is retried.
    pub async fn connect(&mut self) -> Result<(), ConnectError> {
        if self.is_connected() {
            return Ok(());
        }
        self.live = None;
        self.shared.set_current(None);
        self.shared.set(ConnectionState::Connecting);

        let addr = (self.endpoint.host.as_str(), self.endpoint.port);
        let stream = match tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                self.shared.set(ConnectionState::Disconnected);
                return Err(ConnectError::Io {
                    endpoint: self.endpoint.clone(),
                    source,
                });
            }
            Err(_) => {
                self.shared.set(ConnectionState::Disconnected);
                return Err(ConnectError::TimedOut {
                    endpoint: self.endpoint.clone(),
                    after: self.connect_timeout,
                });
            }
        };
        if let Err(err) = stream.set_nodelay(true) {
            tracing::debug!(error = %err, "failed to disable nagle on backend stream");
        }

        let (read_half, writer) = stream.into_split();
        let id = Uuid::new_v4();
        let (tx, events) = mpsc::channel(EVENT_CAPACITY);
        self.shared.set_current(Some(id));
        let reader = tokio::spawn(read_loop(id, read_half, tx, Arc::clone(&self.shared)));
        self.live = Some(Live {
            id,
            writer,
            events,
            reader,
        });
        self.shared.set(ConnectionState::Connected);
        tracing::info!(endpoint = %self.endpoint, connection_id = %id, "connected to backend");
        Ok(())
    }

    /// Write raw bytes. Fails without touching the network unless connected.
    pub async fn write(&mut self, bytes: &[u8]) -> Result<(), WriteError> {
        if !self.is_connected() {
            return Err(WriteError::NotConnected);
        }
        let Some(live) = self.live.as_mut() else {
            return Err(WriteError::NotConnected);
        };
        let result = live.writer.write_all(bytes).await;
        if let Err(err) = result {
            tracing::warn!(endpoint = %self.endpoint, error = %err, "write to backend failed");
            self.close().await;
            return Err(WriteError::Io(err));
        }
        Ok(())
    }

    /// Wait for the next event from the reader task.
    ///
    /// Returns `ConnectionEvent::Closed` once the stream is gone, so callers
    /// never wait on a connection that can no longer deliver anything.
    pub async fn next_event(&mut self) -> ConnectionEvent {
        let Some(live) = self.live.as_mut() else {
            return ConnectionEvent::Closed;
        };
        live.events.recv().await.unwrap_or(ConnectionEvent::Closed)
    }

    /// Remove every event already queued, without waiting.
    pub fn drain_pending(&mut self) -> Vec<ConnectionEvent> {
        let mut drained = Vec::new();
        if let Some(live) = self.live.as_mut() {
            while let Ok(event) = live.events.try_recv() {
                drained.push(event);
            }
        }
        drained
    }

    /// Drop the stream without waiting for a graceful shutdown.
    ///
    /// Usable from `Drop`. Dropping the write half still sends FIN; anything
    /// the peer writes afterwards is never read.
    pub fn abandon(&mut self) {
        self.shared.set_current(None);
        if let Some(live) = self.live.take() {
            tracing::info!(endpoint = %self.endpoint, connection_id = %live.id, "abandoned backend connection");
            self.shared.set(ConnectionState::Closed);
        }
    }

    /// End the stream locally. Idempotent.
    pub async fn close(&mut self) {
        self.shared.set_current(None);
        if let Some(mut live) = self.live.take() {
            live.reader.abort();
            if let Err(err) = live.writer.shutdown().await {
                tracing::debug!(error = %err, "shutdown of backend stream failed");
            }
            tracing::info!(endpoint = %self.endpoint, connection_id = %live.id, "closed backend connection");
            self.shared.set(ConnectionState::Closed);
        } else if self.state() != ConnectionState::Disconnected {
            self.shared.set(ConnectionState::Closed);
        }
    }
}

async fn read_loop(
    id: Uuid,
    mut reader: OwnedReadHalf,
    events: mpsc::Sender<ConnectionEvent>,
    shared: Arc<Shared>,
) {
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                tracing::info!(connection_id = %id, "backend closed the connection");
                shared.mark_closed(id);
                // The receiver may already be gone; nothing else to tell.
                let _ = events.send(ConnectionEvent::Closed).await;
                return;
            }
            Ok(n) => {
                let chunk = buf.get(..n).unwrap_or_default().to_vec();
                tracing::trace!(connection_id = %id, bytes = n, "received chunk");
                if events.send(ConnectionEvent::Data(chunk)).await.is_err() {
                    return;
                }
            }
            Err(err) => {
                tracing::warn!(connection_id = %id, error = %err, "backend stream error");
                shared.mark_closed(id);
                let _ = events.send(ConnectionEvent::Error(err)).await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

    async fn listener() -> (TcpListener, Endpoint) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, Endpoint::new("127.0.0.1", addr.port()))
    }

    #[test]
    fn endpoint_display() {
        assert_eq!(Endpoint::new("127.0.0.1", 8000).to_string(), "127.0.0.1:8000");
        assert_eq!(Endpoint::new("::1", 8500).to_string(), "[::1]:8500");
    }

    #[tokio::test]
    async fn write_before_connect_is_rejected() {
        let (_listener, endpoint) = listener().await;
        let mut conn = Connection::new(endpoint, CONNECT_TIMEOUT);
        let err = conn.write(b"{}").await.unwrap_err();
        assert!(matches!(err, WriteError::NotConnected));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn refused_connect_stays_disconnected() {
        let (listener, endpoint) = listener().await;
        drop(listener);
        let mut conn = Connection::new(endpoint, CONNECT_TIMEOUT);
        let err = conn.connect().await.unwrap_err();
        assert!(matches!(err, ConnectError::Io { .. }));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(conn.id().is_none());
    }

    #[tokio::test]
    async fn data_and_peer_close_are_forwarded() {
        let (listener, endpoint) = listener().await;
        let mut conn = Connection::new(endpoint, CONNECT_TIMEOUT);
        let mut states = conn.subscribe();

        let accept = tokio::spawn(async move {
            let (mut peer, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 16];
            let n = peer.read(&mut buf).await.unwrap();
            peer.write_all(&buf[..n]).await.unwrap();
        });

        conn.connect().await.unwrap();
        assert!(conn.is_connected());
        conn.write(b"ping").await.unwrap();

        let ConnectionEvent::Data(bytes) = conn.next_event().await else {
            panic!("expected data");
        };
        assert_eq!(bytes, b"ping");
        accept.await.unwrap();

        assert!(matches!(conn.next_event().await, ConnectionEvent::Closed));
        states
            .wait_for(|state| *state == ConnectionState::Closed)
            .await
            .unwrap();
        assert!(matches!(conn.write(b"late").await, Err(WriteError::NotConnected)));
    }

    #[tokio::test]
    async fn local_close_is_idempotent() {
        let (listener, endpoint) = listener().await;
        let mut conn = Connection::new(endpoint, CONNECT_TIMEOUT);
        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });
        conn.connect().await.unwrap();
        let _peer = accept.await.unwrap();

        conn.close().await;
        conn.close().await;
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(matches!(conn.next_event().await, ConnectionEvent::Closed));
    }

    #[tokio::test]
    async fn drain_returns_unsolicited_data() {
        let (listener, endpoint) = listener().await;
        let mut conn = Connection::new(endpoint, CONNECT_TIMEOUT);
        let accept = tokio::spawn(async move {
            let (mut peer, _) = listener.accept().await.unwrap();
            peer.write_all(b"stale").await.unwrap();
            peer
        });
        conn.connect().await.unwrap();
        let _peer = accept.await.unwrap();

        let mut drained = Vec::new();
        for _ in 0..50 {
            drained = conn.drain_pending();
            if !drained.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(matches!(drained.as_slice(), [ConnectionEvent::Data(bytes)] if bytes == b"stale"));
    }
}
